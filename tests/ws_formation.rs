//! WebSocket formation integration tests. Connect to /ws/formation/:agent and drive a round.

use firm_formation_engine::api;
use firm_formation_engine::ExperimentConfig;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tokio_tungstenite::tungstenite::Message;

type Client = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn spawn_app() -> (SocketAddr, tokio::task::JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let config = ExperimentConfig { participants: 3, formation_seconds: 3600, ..Default::default() };
    let app = api::create_router(config);
    let handle = tokio::spawn(async move {
        axum::serve(listener, app.into_make_service()).await.unwrap();
    });
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    (addr, handle)
}

async fn start_round(addr: SocketAddr) {
    let client = reqwest::Client::new();
    let response = client.post(format!("http://{}/rounds", addr)).send().await.unwrap();
    assert_eq!(response.status(), 200);
}

async fn connect(addr: SocketAddr, agent: u32) -> Client {
    let url = format!("ws://{}/ws/formation/{}", addr, agent);
    let (ws, _) = tokio_tungstenite::connect_async(&url).await.expect("connect");
    ws
}

async fn next_json(ws: &mut Client) -> serde_json::Value {
    let raw = tokio::time::timeout(std::time::Duration::from_secs(5), ws.next())
        .await
        .expect("message before timeout")
        .expect("one message")
        .expect("ws recv");
    let text = raw.into_text().expect("text frame");
    serde_json::from_str(&text).expect("json")
}

async fn send(ws: &mut Client, value: serde_json::Value) {
    ws.send(Message::Text(value.to_string())).await.expect("send");
}

#[tokio::test]
async fn ws_without_round_sends_alert() {
    let (addr, _handle) = spawn_app().await;
    let mut ws = connect(addr, 1).await;
    let msg = next_json(&mut ws).await;
    assert!(msg.get("alert").is_some());
    assert!(msg.get("state").is_none());
}

#[tokio::test]
async fn ws_sends_snapshot_on_connect() {
    let (addr, _handle) = spawn_app().await;
    start_round(addr).await;
    let mut ws = connect(addr, 2).await;
    let msg = next_json(&mut ws).await;
    assert!(msg.get("alert").is_none());
    assert_eq!(msg["state"]["round"], serde_json::json!(1));
    assert_eq!(msg["state"]["all_ids"], serde_json::json!([1, 2, 3]));
}

#[tokio::test]
async fn ws_apply_is_broadcast_to_every_client() {
    let (addr, _handle) = spawn_app().await;
    start_round(addr).await;
    let mut owner = connect(addr, 1).await;
    let _ = next_json(&mut owner).await;
    let mut applicant = connect(addr, 2).await;
    let _ = next_json(&mut applicant).await;

    send(&mut applicant, serde_json::json!({ "type": "apply", "owner": 1 })).await;

    let seen_by_applicant = next_json(&mut applicant).await;
    let seen_by_owner = next_json(&mut owner).await;
    assert_eq!(seen_by_applicant, seen_by_owner);
    assert_eq!(seen_by_owner["state"]["outgoing"]["2"], serde_json::json!([1]));

    send(&mut owner, serde_json::json!({ "type": "accept", "owner": 1, "applicant": 2 })).await;
    let after_accept = next_json(&mut applicant).await;
    assert_eq!(after_accept["state"]["employer"]["2"], serde_json::json!(1));
}

#[tokio::test]
async fn ws_invalid_action_gets_private_alert() {
    let (addr, _handle) = spawn_app().await;
    start_round(addr).await;
    let mut ws = connect(addr, 1).await;
    let _ = next_json(&mut ws).await;

    send(&mut ws, serde_json::json!({ "type": "apply", "owner": 1 })).await;
    let msg = next_json(&mut ws).await;
    assert_eq!(msg["alert"], serde_json::json!("You cannot apply to your own firm."));

    send(&mut ws, serde_json::json!({ "type": "dance" })).await;
    let msg = next_json(&mut ws).await;
    assert_eq!(msg["alert"], serde_json::json!("Unknown action."));
}

#[tokio::test]
async fn ws_string_ids_are_accepted_and_garbage_ids_are_invalid() {
    let (addr, _handle) = spawn_app().await;
    start_round(addr).await;
    let mut ws = connect(addr, 2).await;
    let _ = next_json(&mut ws).await;

    send(&mut ws, serde_json::json!({ "type": "apply", "owner": "x" })).await;
    let msg = next_json(&mut ws).await;
    assert_eq!(msg["alert"], serde_json::json!("Invalid firm."));

    send(&mut ws, serde_json::json!({ "type": "apply", "owner": "1" })).await;
    let msg = next_json(&mut ws).await;
    assert!(msg.get("alert").is_none());
    assert_eq!(msg["state"]["outgoing"]["2"], serde_json::json!([1]));
}

#[tokio::test]
async fn ws_clients_see_finalized_partition() {
    let (addr, _handle) = spawn_app().await;
    start_round(addr).await;
    let mut ws = connect(addr, 3).await;
    let _ = next_json(&mut ws).await;

    let client = reqwest::Client::new();
    let response = client.post(format!("http://{}/rounds/finalize", addr)).send().await.unwrap();
    assert_eq!(response.status(), 200);

    let msg = next_json(&mut ws).await;
    assert_eq!(msg["type"], serde_json::json!("finalized"));
    assert_eq!(msg["partition"], serde_json::json!([[1], [2], [3]]));

    send(&mut ws, serde_json::json!({ "type": "apply", "owner": 1 })).await;
    let msg = next_json(&mut ws).await;
    assert!(msg.get("alert").is_some());
}
