//! Core types for firm formation: agent ids, inbound actions, rejection log entries,
//! and the advisory errors returned to an acting client.
//!
//! [`AgentId`] is a newtype; [`Action`] is the validated form of an inbound
//! [`ActionMessage`].

use std::fmt;

/// Agent identifier in `1..=N` for a round's roster.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct AgentId(pub u32);

impl AgentId {
    /// Converts a raw wire integer. Negative or oversized values map to `AgentId(0)`,
    /// which is never on a roster and fails range checks downstream.
    pub fn from_wire(raw: i64) -> Self {
        AgentId(u32::try_from(raw).unwrap_or(0))
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One client action against the match state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Action {
    /// Apply to join `owner`'s firm.
    Apply { owner: AgentId },
    /// Withdraw a pending application to `owner`.
    Withdraw { owner: AgentId },
    /// Owner accepts a pending applicant (binding).
    Accept { owner: AgentId, applicant: AgentId },
    /// Owner rejects a pending applicant.
    Reject { owner: AgentId, applicant: AgentId },
    /// Resync: no mutation, just the current projection.
    Ping,
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::Apply { .. } => "apply",
            Action::Withdraw { .. } => "withdraw",
            Action::Accept { .. } => "accept",
            Action::Reject { .. } => "reject",
            Action::Ping => "ping",
        }
    }

    pub fn is_ping(&self) -> bool {
        matches!(self, Action::Ping)
    }
}

/// Inbound wire message: `{ type, owner?, applicant? }`.
///
/// Malformed messages become advisories, not transport errors. Ids may arrive
/// as integers, numeric strings, or floats (truncated). Missing ids and ids
/// that are not numbers at all map to 0 (out of range).
#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct ActionMessage {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default, deserialize_with = "lenient_id")]
    pub owner: Option<i64>,
    #[serde(default, deserialize_with = "lenient_id")]
    pub applicant: Option<i64>,
}

fn lenient_id<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::Deserialize;
    let raw = serde_json::Value::deserialize(deserializer)?;
    let id = match raw {
        serde_json::Value::Null => return Ok(None),
        serde_json::Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        serde_json::Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>().ok().or_else(|| s.parse::<f64>().ok().map(|f| f.trunc() as i64))
        }
        _ => None,
    };
    Ok(Some(id.unwrap_or(0)))
}

impl ActionMessage {
    /// Validates the message type. Id range checks happen in the engine, against the roster.
    pub fn to_action(&self) -> Result<Action, FormationError> {
        let owner = AgentId::from_wire(self.owner.unwrap_or(0));
        let applicant = AgentId::from_wire(self.applicant.unwrap_or(0));
        match self.kind.as_str() {
            "apply" => Ok(Action::Apply { owner }),
            "withdraw" => Ok(Action::Withdraw { owner }),
            "accept" => Ok(Action::Accept { owner, applicant }),
            "reject" => Ok(Action::Reject { owner, applicant }),
            "ping" => Ok(Action::Ping),
            _ => Err(FormationError::UnknownAction),
        }
    }
}

/// Why an application left a pending list without being accepted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    /// Owner explicitly rejected the applicant.
    Rejected,
    /// Still pending when the formation deadline fired.
    AutoEnd,
    /// Owner was hired elsewhere, so their firm can no longer operate.
    OwnerBecameInactive,
}

/// Rejection log entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Rejection {
    pub applicant: AgentId,
    pub owner: AgentId,
    pub reason: RejectionReason,
}

/// Advisory failure for one action. State is never mutated when one is returned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FormationError {
    UnknownAction,
    UnknownAgent,
    InvalidFirm,
    OwnFirm,
    AlreadyEmployed,
    HasHired,
    FirmInactive,
    FirmFull,
    AlreadyApplied,
    WithdrawAfterAccept,
    NothingToWithdraw,
    NotOwnerAccept,
    NotOwnerReject,
    OwnerEmployed,
    NotPending,
    ApplicantEmployed,
    ApplicantHasHired,
    OwnFirmFull,
    FormationClosed,
}

impl FormationError {
    /// Advisory text shown to the acting client.
    pub fn advisory(&self) -> &'static str {
        match self {
            FormationError::UnknownAction => "Unknown action.",
            FormationError::UnknownAgent => "You are not a participant in this round.",
            FormationError::InvalidFirm => "Invalid firm.",
            FormationError::OwnFirm => "You cannot apply to your own firm.",
            FormationError::AlreadyEmployed => "You are already employed; acceptance is binding.",
            FormationError::HasHired => "You have hired someone, so you can no longer apply elsewhere.",
            FormationError::FirmInactive => "That firm is inactive (owner is employed elsewhere).",
            FormationError::FirmFull => "That firm is full.",
            FormationError::AlreadyApplied => "You already applied to that firm.",
            FormationError::WithdrawAfterAccept => "You cannot withdraw after being accepted.",
            FormationError::NothingToWithdraw => "No pending application to withdraw.",
            FormationError::NotOwnerAccept => "Only the firm owner can accept applicants to this firm.",
            FormationError::NotOwnerReject => "Only the firm owner can reject applicants to this firm.",
            FormationError::OwnerEmployed => "Your firm is inactive because you are employed elsewhere.",
            FormationError::NotPending => "That application is not pending.",
            FormationError::ApplicantEmployed => "Applicant is already employed elsewhere.",
            FormationError::ApplicantHasHired => "Applicant cannot join because they already hired someone.",
            FormationError::OwnFirmFull => "Your firm is full.",
            FormationError::FormationClosed => "Firm formation has ended for this round.",
        }
    }

    /// Range and shape failures, as opposed to attempts that would break an invariant.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            FormationError::UnknownAction | FormationError::UnknownAgent | FormationError::InvalidFirm
        )
    }
}

impl fmt::Display for FormationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.advisory())
    }
}

impl std::error::Error for FormationError {}
