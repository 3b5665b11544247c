//! Read-only projection of the match state pushed to every connected client.

use crate::history::{HistoryLedger, ResumeEntry};
use crate::state::MatchState;
use crate::types::AgentId;
use std::collections::BTreeMap;

/// One potential firm as clients see it.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FirmView {
    pub owner: AgentId,
    /// False once the owner is employed elsewhere.
    pub active: bool,
    /// Owner first, then accepted employees.
    pub members: Vec<AgentId>,
    pub pending: Vec<AgentId>,
    pub slots_left: usize,
}

/// Everything a client needs to render the formation screen.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Snapshot {
    pub round: u32,
    pub all_ids: Vec<AgentId>,
    pub firms: Vec<FirmView>,
    pub employer: BTreeMap<AgentId, Option<AgentId>>,
    /// Applicant -> owners they currently have pending applications to.
    pub outgoing: BTreeMap<AgentId, Vec<AgentId>>,
    /// Agent -> rows from earlier rounds.
    pub resumes: BTreeMap<AgentId, Vec<ResumeEntry>>,
}

impl Snapshot {
    pub fn firm(&self, owner: AgentId) -> Option<&FirmView> {
        self.firms.iter().find(|f| f.owner == owner)
    }
}

/// Builds the snapshot. Pure: never mutates `state` or `history`.
pub fn project(
    state: &MatchState,
    roster: &[AgentId],
    history: &HistoryLedger,
    round: u32,
    max_firm_size: usize,
) -> Snapshot {
    let mut outgoing: BTreeMap<AgentId, Vec<AgentId>> = roster.iter().map(|&a| (a, Vec::new())).collect();
    let mut firms = Vec::with_capacity(roster.len());
    for owner in state.agents() {
        let pending = state.pending(owner).to_vec();
        for &applicant in &pending {
            outgoing.entry(applicant).or_default().push(owner);
        }
        let mut members = Vec::with_capacity(state.member_count(owner));
        members.push(owner);
        members.extend_from_slice(state.accepted(owner));
        firms.push(FirmView {
            owner,
            active: !state.is_employed(owner),
            slots_left: max_firm_size.saturating_sub(members.len()),
            members,
            pending,
        });
    }

    let resumes = roster.iter().map(|&a| (a, history.resume(a, round))).collect();

    Snapshot {
        round,
        all_ids: roster.to_vec(),
        firms,
        employer: state.employers().clone(),
        outgoing,
        resumes,
    }
}
