//! HTTP + WebSocket surface for a formation session.
//!
//! Used by the binary and by integration tests. Create with [`create_router`].
//! Uses Extension for state so the router is `Router<()>` and works with `into_make_service()`.
//!
//! Control plane (experimenter): `POST /rounds`, `POST /rounds/finalize`,
//! `POST /rounds/settle`, `GET /state`, `GET /history`. Participants connect to
//! `GET /ws/formation/:agent` and send action messages as text frames.

use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::{Extension, Path},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use log::{debug, info, warn};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

use crate::engine::{Recipient, Session, SessionError};
use crate::finalize::Finalized;
use crate::persistence::LedgerFile;
use crate::types::{ActionMessage, AgentId, FormationError};
use crate::ExperimentConfig;

/// Serialized outbound frame and who should get it.
#[derive(Clone, Debug)]
pub struct Push {
    pub recipient: Recipient,
    pub payload: String,
}

impl Push {
    fn is_for(&self, agent: AgentId) -> bool {
        match self.recipient {
            Recipient::All => true,
            Recipient::Agent(a) => a == agent,
        }
    }
}

/// Shared app state: one session per process.
#[derive(Clone)]
pub struct AppState {
    pub(crate) session: Arc<Mutex<Session>>,
    pub(crate) updates: broadcast::Sender<Push>,
    pub(crate) ledger_file: Option<LedgerFile>,
}

impl AppState {
    fn new(session: Session, ledger_file: Option<LedgerFile>) -> Self {
        let (updates, _) = broadcast::channel(256);
        Self {
            session: Arc::new(Mutex::new(session)),
            updates,
            ledger_file,
        }
    }
}

/// Builds the router for a fresh session with `config`.
pub fn create_router(config: ExperimentConfig) -> Router<()> {
    create_router_with(Session::new(config), None)
}

/// Builds the router around an existing session. With `ledger_file`, the ledger is saved after every settle.
pub fn create_router_with(session: Session, ledger_file: Option<LedgerFile>) -> Router<()> {
    let state = AppState::new(session, ledger_file);
    Router::new()
        .route("/health", get(health))
        .route("/state", get(current_state))
        .route("/history", get(history))
        .route("/rounds", post(start_round))
        .route("/rounds/finalize", post(finalize_now))
        .route("/rounds/settle", post(settle_round))
        .route("/ws/formation/:agent", get(formation_ws))
        .layer(Extension(state))
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

fn error_response(e: &SessionError) -> Response {
    let status = match e {
        SessionError::Payoff(_)
        | SessionError::EmptyRoster
        | SessionError::DuplicateAgent(_)
        | SessionError::InvalidAgent(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::CONFLICT,
    };
    (status, Json(serde_json::json!({ "error": e.to_string() }))).into_response()
}

async fn current_state(Extension(state): Extension<AppState>) -> Response {
    let guard = state.session.lock().expect("lock");
    match guard.snapshot() {
        Some(snapshot) => (StatusCode::OK, Json(snapshot)).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": SessionError::NoActiveRound.to_string() })),
        )
            .into_response(),
    }
}

async fn history(Extension(state): Extension<AppState>) -> Response {
    let guard = state.session.lock().expect("lock");
    (StatusCode::OK, Json(guard.ledger().clone())).into_response()
}

#[derive(serde::Deserialize, Default)]
struct StartRoundRequest {
    #[serde(default)]
    roster: Option<Vec<u32>>,
}

async fn start_round(Extension(state): Extension<AppState>, body: Option<Json<StartRoundRequest>>) -> Response {
    let request = body.map(|Json(b)| b).unwrap_or_default();
    let started = {
        let mut guard = state.session.lock().expect("lock");
        let result = match request.roster {
            Some(ids) => guard.start_round(ids.into_iter().map(AgentId).collect()),
            None => guard.start_default_round(),
        };
        if let (Ok(_), Some(snapshot)) = (&result, guard.snapshot()) {
            broadcast_json(&state, &serde_json::json!({ "state": snapshot }));
        }
        result.map(|round| (round, guard.config().formation_deadline()))
    };
    match started {
        Ok((round, deadline)) => {
            arm_deadline(state.clone(), round, deadline);
            #[derive(serde::Serialize)]
            struct Out {
                round: u32,
                deadline_secs: u64,
            }
            (StatusCode::OK, Json(Out { round, deadline_secs: deadline.as_secs() })).into_response()
        }
        Err(e) => error_response(&e),
    }
}

fn arm_deadline(state: AppState, round: u32, deadline: std::time::Duration) {
    tokio::spawn(async move {
        tokio::time::sleep(deadline).await;
        match finalize_round(&state, Some(round)) {
            Ok(_) => info!("formation deadline fired round={}", round),
            Err(e) => debug!("formation deadline skipped round={} reason={}", round, e),
        }
    });
}

/// Finalizes the open round if it is still forming (and is `expected_round`, when given),
/// then pushes the partition and final snapshot to every client.
fn finalize_round(state: &AppState, expected_round: Option<u32>) -> Result<Finalized, SessionError> {
    let mut guard = state.session.lock().expect("lock");
    let round = guard.current_round().ok_or(SessionError::NoActiveRound)?;
    if expected_round.is_some_and(|r| r != round) {
        return Err(SessionError::NoActiveRound);
    }
    let finalized = guard.finalize_formation()?;
    // Sent under the lock so clients see pushes in commit order.
    broadcast_json(
        state,
        &serde_json::json!({
            "type": "finalized",
            "round": round,
            "partition": finalized.partition.as_lists(),
            "state": guard.snapshot(),
        }),
    );
    Ok(finalized)
}

async fn finalize_now(Extension(state): Extension<AppState>) -> Response {
    match finalize_round(&state, None) {
        Ok(finalized) => (StatusCode::OK, Json(finalized)).into_response(),
        Err(e) => error_response(&e),
    }
}

#[derive(serde::Deserialize)]
struct SettleRequest {
    #[serde(default)]
    efforts: BTreeMap<AgentId, Decimal>,
}

async fn settle_round(Extension(state): Extension<AppState>, Json(body): Json<SettleRequest>) -> Response {
    let settled = {
        let mut guard = state.session.lock().expect("lock");
        guard.settle_round(&body.efforts).map(|payoffs| (payoffs, guard.ledger().clone()))
    };
    match settled {
        Ok((payoffs, ledger)) => {
            if let Some(file) = &state.ledger_file {
                if let Err(e) = file.save(&ledger) {
                    warn!("ledger save failed path={} error={}", file.path().display(), e);
                }
            }
            let relay = payoffs.relay_rows();
            (StatusCode::OK, Json(serde_json::json!({ "payoffs": payoffs, "relay": relay }))).into_response()
        }
        Err(e) => error_response(&e),
    }
}

fn broadcast_json(state: &AppState, value: &serde_json::Value) {
    let payload = value.to_string();
    // No receivers just means nobody is connected yet.
    let _ = state.updates.send(Push { recipient: Recipient::All, payload });
}

async fn formation_ws(
    Path(agent): Path<u32>,
    Extension(state): Extension<AppState>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| formation_socket(socket, state, AgentId(agent)))
}

/// Runs one message through the session. Broadcasts are published before the
/// session lock is released; the returned payload is the private reply, if any.
fn handle_text(state: &AppState, agent: AgentId, text: &str) -> Option<String> {
    let parsed = serde_json::from_str::<ActionMessage>(text)
        .map_err(|_| FormationError::UnknownAction)
        .and_then(|m| m.to_action());
    let mut guard = state.session.lock().expect("lock");
    let result = match parsed {
        Ok(action) => guard.handle_action(agent, action),
        Err(e) => guard.deny(agent, e),
    };
    let response = match result {
        Ok(response) => response,
        Err(e) => return Some(serde_json::json!({ "alert": e.to_string() }).to_string()),
    };
    let payload = match serde_json::to_string(&response) {
        Ok(payload) => payload,
        Err(e) => {
            warn!("snapshot serialization failed agent={} error={}", agent, e);
            return None;
        }
    };
    match response.recipient {
        Recipient::All => {
            let _ = state.updates.send(Push { recipient: Recipient::All, payload });
            None
        }
        Recipient::Agent(_) => Some(payload),
    }
}

async fn formation_socket(mut socket: WebSocket, state: AppState, agent: AgentId) {
    let mut rx = state.updates.subscribe();
    debug!("formation socket connected agent={}", agent);

    if let Some(hello) = handle_text(&state, agent, r#"{"type":"ping"}"#) {
        if socket.send(Message::Text(hello)).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        let Some(reply) = handle_text(&state, agent, &text) else { continue };
                        if socket.send(Message::Text(reply)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    _ => {}
                }
            }
            outgoing = rx.recv() => {
                match outgoing {
                    Ok(push) => {
                        if !push.is_for(agent) {
                            continue;
                        }
                        if socket.send(Message::Text(push.payload)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("formation socket lagged agent={} skipped={}", agent, skipped);
                        let Some(resync) = handle_text(&state, agent, r#"{"type":"ping"}"#) else { continue };
                        if socket.send(Message::Text(resync)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }
    debug!("formation socket closed agent={}", agent);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app(participants: u32) -> AppState {
        AppState::new(Session::new(ExperimentConfig { participants, ..Default::default() }), None)
    }

    #[test]
    fn stale_deadline_does_not_finalize_next_round() {
        let state = app(2);
        {
            let mut guard = state.session.lock().expect("lock");
            guard.start_default_round().unwrap();
            guard.finalize_formation().unwrap();
            guard.settle_round(&BTreeMap::new()).unwrap();
            assert_eq!(guard.start_default_round().unwrap(), 2);
        }
        assert_eq!(finalize_round(&state, Some(1)).unwrap_err(), SessionError::NoActiveRound);
        assert!(state.session.lock().expect("lock").is_forming());

        let finalized = finalize_round(&state, Some(2)).unwrap();
        assert_eq!(finalized.partition.as_lists(), vec![vec![1], vec![2]]);
        assert_eq!(finalize_round(&state, Some(2)).unwrap_err(), SessionError::AlreadyFinalized);
    }

    #[test]
    fn broadcasts_arrive_in_commit_order() {
        let state = app(3);
        state.session.lock().expect("lock").start_default_round().unwrap();
        let mut rx = state.updates.subscribe();

        assert_eq!(handle_text(&state, AgentId(2), r#"{"type":"apply","owner":1}"#), None);
        assert_eq!(handle_text(&state, AgentId(3), r#"{"type":"apply","owner":1}"#), None);

        let first: serde_json::Value = serde_json::from_str(&rx.try_recv().unwrap().payload).unwrap();
        let second: serde_json::Value = serde_json::from_str(&rx.try_recv().unwrap().payload).unwrap();
        assert_eq!(first["state"]["outgoing"]["3"], serde_json::json!([]));
        assert_eq!(second["state"]["firms"][0]["pending"], serde_json::json!([2, 3]));
    }

    #[test]
    fn denied_action_is_private_and_not_published() {
        let state = app(2);
        state.session.lock().expect("lock").start_default_round().unwrap();
        let mut rx = state.updates.subscribe();

        let reply = handle_text(&state, AgentId(1), r#"{"type":"apply","owner":"abc"}"#).unwrap();
        let reply: serde_json::Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(reply["alert"], serde_json::json!("Invalid firm."));
        assert!(rx.try_recv().is_err());
    }
}
