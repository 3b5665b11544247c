//! Single-entry session coordinator.
//!
//! [`Session`] owns the experiment config, the history ledger, and the current
//! round's match state. Every inbound action goes through
//! [`Session::handle_action`], one at a time; the caller provides the critical
//! section (the server wraps the session in a mutex).
//!
//! Round lifecycle: `start_round` → actions → `finalize_formation` (exactly once)
//! → `settle_round` → next round.

use crate::audit::{AuditEvent, AuditSink};
use crate::broadcast::{project, Snapshot};
use crate::config::ExperimentConfig;
use crate::finalize::{finalize, Finalized, Partition};
use crate::history::HistoryLedger;
use crate::matching::{apply_action, Applied};
use crate::payoff::{compute_payoffs, PayoffError, RoundPayoffs};
use crate::state::MatchState;
use crate::types::{Action, AgentId, FormationError};
use log::{debug, info, warn};
use rust_decimal::Decimal;
use serde_json::json;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Who should receive a [`Response`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Recipient {
    /// Every connected client.
    All,
    /// Only this agent.
    Agent(AgentId),
}

/// Outbound message for one handled action: `{ alert?, state }` plus its destination.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct Response {
    #[serde(skip)]
    pub recipient: Recipient,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert: Option<String>,
    pub state: Snapshot,
}

/// Lifecycle misuse. The session state is unchanged when one is returned.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionError {
    NoActiveRound,
    RoundInProgress,
    RoundLimitReached(u32),
    EmptyRoster,
    DuplicateAgent(AgentId),
    /// Id 0 is reserved for missing or malformed wire ids.
    InvalidAgent(AgentId),
    AlreadyFinalized,
    NotFinalized,
    Payoff(PayoffError),
    Ledger(String),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::NoActiveRound => write!(f, "no round is open"),
            SessionError::RoundInProgress => write!(f, "a round is already in progress"),
            SessionError::RoundLimitReached(n) => write!(f, "all {} rounds have been played", n),
            SessionError::EmptyRoster => write!(f, "roster is empty"),
            SessionError::DuplicateAgent(a) => write!(f, "agent {} appears twice in the roster", a),
            SessionError::InvalidAgent(a) => write!(f, "agent id {} is not allowed; ids start at 1", a),
            SessionError::AlreadyFinalized => write!(f, "formation already finalized for this round"),
            SessionError::NotFinalized => write!(f, "formation has not been finalized yet"),
            SessionError::Payoff(e) => write!(f, "payoff computation failed: {}", e),
            SessionError::Ledger(e) => write!(f, "history ledger rejected round: {}", e),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<PayoffError> for SessionError {
    fn from(e: PayoffError) -> Self {
        SessionError::Payoff(e)
    }
}

#[derive(Debug)]
enum Phase {
    Idle,
    Forming {
        round: u32,
        roster: Vec<AgentId>,
        state: MatchState,
    },
    Deciding {
        round: u32,
        roster: Vec<AgentId>,
        state: MatchState,
        finalized: Finalized,
    },
}

/// One experiment session: config, ledger, and the open round.
pub struct Session {
    config: ExperimentConfig,
    ledger: HistoryLedger,
    phase: Phase,
    last_round: u32,
    audit: Option<Arc<dyn AuditSink>>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.config)
            .field("last_round", &self.last_round)
            .field("phase", &self.phase)
            .finish()
    }
}

impl Session {
    pub fn new(config: ExperimentConfig) -> Self {
        Self::with_ledger(config, HistoryLedger::new())
    }

    /// Resumes a session from a recovered ledger; the next round follows its last round.
    pub fn with_ledger(config: ExperimentConfig, ledger: HistoryLedger) -> Self {
        let last_round = ledger.last_round().unwrap_or(0);
        Self {
            config,
            ledger,
            phase: Phase::Idle,
            last_round,
            audit: None,
        }
    }

    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(sink);
        self
    }

    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    pub fn ledger(&self) -> &HistoryLedger {
        &self.ledger
    }

    /// Round currently forming or deciding.
    pub fn current_round(&self) -> Option<u32> {
        match &self.phase {
            Phase::Idle => None,
            Phase::Forming { round, .. } | Phase::Deciding { round, .. } => Some(*round),
        }
    }

    pub fn is_forming(&self) -> bool {
        matches!(self.phase, Phase::Forming { .. })
    }

    /// Partition of the round awaiting settlement, if any.
    pub fn partition(&self) -> Option<&Partition> {
        match &self.phase {
            Phase::Deciding { finalized, .. } => Some(&finalized.partition),
            _ => None,
        }
    }

    /// Opens the next round with `roster`. Returns the round number.
    pub fn start_round(&mut self, roster: Vec<AgentId>) -> Result<u32, SessionError> {
        if !matches!(self.phase, Phase::Idle) {
            return Err(SessionError::RoundInProgress);
        }
        if self.last_round >= self.config.num_rounds {
            return Err(SessionError::RoundLimitReached(self.config.num_rounds));
        }
        if roster.is_empty() {
            return Err(SessionError::EmptyRoster);
        }
        let mut sorted = roster;
        sorted.sort();
        if sorted[0] == AgentId(0) {
            return Err(SessionError::InvalidAgent(AgentId(0)));
        }
        if let Some(w) = sorted.windows(2).find(|w| w[0] == w[1]) {
            return Err(SessionError::DuplicateAgent(w[0]));
        }

        let round = self.last_round + 1;
        self.last_round = round;
        let state = MatchState::fresh(&sorted);
        info!("round started round={} agents={}", round, sorted.len());
        self.emit("operator", "round_start", Some(json!({ "round": round, "agents": sorted.len() })), "accepted");
        self.phase = Phase::Forming { round, roster: sorted, state };
        Ok(round)
    }

    /// Opens the next round with the default roster `1..=participants`.
    pub fn start_default_round(&mut self) -> Result<u32, SessionError> {
        let roster = (1..=self.config.participants).map(AgentId).collect();
        self.start_round(roster)
    }

    /// Current projection, available while forming and after finalize.
    pub fn snapshot(&self) -> Option<Snapshot> {
        match &self.phase {
            Phase::Idle => None,
            Phase::Forming { round, roster, state } | Phase::Deciding { round, roster, state, .. } => Some(project(
                state,
                roster,
                &self.ledger,
                *round,
                self.config.max_firm_size,
            )),
        }
    }

    /// Applies one action. Success is broadcast to all; failures and pings go back to the actor only.
    pub fn handle_action(&mut self, actor: AgentId, action: Action) -> Result<Response, SessionError> {
        let max_firm_size = self.config.max_firm_size;
        let (round, outcome) = match &mut self.phase {
            Phase::Idle => return Err(SessionError::NoActiveRound),
            Phase::Deciding { round, .. } => (*round, Err(FormationError::FormationClosed)),
            Phase::Forming { round, state, .. } => (*round, apply_action(state, actor, &action, max_firm_size)),
        };
        let resource = Some(action_resource(round, &action));
        let actor_label = format!("agent:{}", actor);
        let response = match outcome {
            Ok(Applied::Mutated) => {
                info!("formation action round={} actor={} action={:?}", round, actor, action);
                self.emit(&actor_label, action.name(), resource, "accepted");
                Response { recipient: Recipient::All, alert: None, state: self.snapshot_or_empty(round) }
            }
            Ok(Applied::Unchanged) => {
                debug!("ping round={} actor={}", round, actor);
                Response { recipient: Recipient::Agent(actor), alert: None, state: self.snapshot_or_empty(round) }
            }
            Err(e) => {
                warn!("formation action denied round={} actor={} action={:?} reason={}", round, actor, action, e);
                self.emit(&actor_label, action.name(), resource, "rejected");
                Response {
                    recipient: Recipient::Agent(actor),
                    alert: Some(e.advisory().to_string()),
                    state: self.snapshot_or_empty(round),
                }
            }
        };
        Ok(response)
    }

    /// Private advisory for a message that never became an [`Action`] (bad JSON, unknown type).
    pub fn deny(&self, actor: AgentId, error: FormationError) -> Result<Response, SessionError> {
        let round = self.current_round().ok_or(SessionError::NoActiveRound)?;
        warn!("formation message denied round={} actor={} reason={}", round, actor, error);
        Ok(Response {
            recipient: Recipient::Agent(actor),
            alert: Some(error.advisory().to_string()),
            state: self.snapshot_or_empty(round),
        })
    }

    /// Resolves the open round's formation. Runs at most once per round; applies
    /// termination flags to the previous round's ledger rows.
    pub fn finalize_formation(&mut self) -> Result<Finalized, SessionError> {
        match self.phase {
            Phase::Idle => return Err(SessionError::NoActiveRound),
            Phase::Deciding { .. } => return Err(SessionError::AlreadyFinalized),
            Phase::Forming { .. } => {}
        }
        let Phase::Forming { round, roster, mut state } = std::mem::replace(&mut self.phase, Phase::Idle) else {
            return Err(SessionError::NoActiveRound);
        };

        let previous = if round > 1 { self.ledger.round(round - 1) } else { None };
        let finalized = finalize(&mut state, &roster, previous);
        for &agent in &finalized.terminations {
            self.ledger.mark_terminated(round - 1, agent);
        }
        info!(
            "formation finalized round={} firms={} operating={} auto_rejected={} terminations={}",
            round,
            finalized.partition.firms.len(),
            finalized.partition.operating_owners().len(),
            finalized.auto_rejected,
            finalized.terminations.len()
        );
        self.emit(
            "deadline",
            "formation_finalize",
            Some(json!({ "round": round, "partition": finalized.partition.as_lists() })),
            "accepted",
        );
        self.phase = Phase::Deciding { round, roster, state, finalized: finalized.clone() };
        Ok(finalized)
    }

    /// Computes payoffs for the finalized round and appends it to the ledger.
    /// On error the round stays open for settlement.
    pub fn settle_round(&mut self, efforts: &BTreeMap<AgentId, Decimal>) -> Result<RoundPayoffs, SessionError> {
        let (round, partition) = match &self.phase {
            Phase::Deciding { round, finalized, .. } => (*round, &finalized.partition),
            Phase::Forming { .. } => return Err(SessionError::NotFinalized),
            Phase::Idle => return Err(SessionError::NoActiveRound),
        };
        let payoffs = match compute_payoffs(partition, efforts, &self.config.returns, self.config.endowment) {
            Ok(p) => p,
            Err(e) => {
                log::error!("payoff computation failed round={} error={}", round, e);
                self.emit("operator", "round_settle", Some(json!({ "round": round })), "error");
                return Err(e.into());
            }
        };
        self.ledger
            .append(round, payoffs.history_entries())
            .map_err(SessionError::Ledger)?;
        info!("round settled round={} firms={}", round, payoffs.firms.len());
        self.emit("operator", "round_settle", Some(json!({ "round": round })), "accepted");
        self.phase = Phase::Idle;
        Ok(payoffs)
    }

    fn snapshot_or_empty(&self, round: u32) -> Snapshot {
        self.snapshot().unwrap_or_else(|| Snapshot {
            round,
            all_ids: Vec::new(),
            firms: Vec::new(),
            employer: BTreeMap::new(),
            outgoing: BTreeMap::new(),
            resumes: BTreeMap::new(),
        })
    }

    fn emit(&self, actor: &str, action: &str, resource: Option<serde_json::Value>, outcome: &str) {
        if let Some(sink) = &self.audit {
            sink.emit(&AuditEvent::now(actor, action, resource, outcome));
        }
    }
}

fn action_resource(round: u32, action: &Action) -> serde_json::Value {
    match *action {
        Action::Apply { owner } | Action::Withdraw { owner } => json!({ "round": round, "owner": owner }),
        Action::Accept { owner, applicant } | Action::Reject { owner, applicant } => {
            json!({ "round": round, "owner": owner, "applicant": applicant })
        }
        Action::Ping => json!({ "round": round }),
    }
}
