//! Deadline resolution: turns the accumulated match state into a partition of
//! the roster into firms and autarky singletons, and detects terminations
//! against the previous round's history.

use crate::history::RoundHistory;
use crate::state::MatchState;
use crate::types::{AgentId, RejectionReason};
use std::collections::{BTreeMap, BTreeSet};

/// One firm of the partition. The first member is the owner; a single member is autarky.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Firm {
    pub members: Vec<AgentId>,
}

impl Firm {
    pub fn owner(&self) -> AgentId {
        self.members[0]
    }

    pub fn size(&self) -> usize {
        self.members.len()
    }

    pub fn is_autarkic(&self) -> bool {
        self.members.len() == 1
    }
}

/// Where one agent ended up.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Assignment {
    /// Owner of the operating firm the agent belongs to; `None` for autarky.
    pub firm_owner_id: Option<AgentId>,
    /// Owner for employees; `None` for owners and autarkic agents.
    pub employer_id: Option<AgentId>,
}

impl Assignment {
    pub fn is_autarkic(&self) -> bool {
        self.firm_owner_id.is_none()
    }
}

/// Disjoint firms covering the roster exactly once. Operating firms come first in
/// ascending owner order, then singletons in ascending id order.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Partition {
    pub firms: Vec<Firm>,
}

impl Partition {
    /// The firm containing `agent`.
    pub fn firm_of(&self, agent: AgentId) -> Option<&Firm> {
        self.firms.iter().find(|f| f.members.contains(&agent))
    }

    pub fn assignment(&self, agent: AgentId) -> Option<Assignment> {
        let firm = self.firm_of(agent)?;
        if firm.is_autarkic() {
            return Some(Assignment { firm_owner_id: None, employer_id: None });
        }
        let owner = firm.owner();
        Some(Assignment {
            firm_owner_id: Some(owner),
            employer_id: if agent == owner { None } else { Some(owner) },
        })
    }

    /// Owners of firms with at least two members.
    pub fn operating_owners(&self) -> BTreeSet<AgentId> {
        self.firms.iter().filter(|f| !f.is_autarkic()).map(Firm::owner).collect()
    }

    /// Every member across all firms, in partition order.
    pub fn members(&self) -> impl Iterator<Item = AgentId> + '_ {
        self.firms.iter().flat_map(|f| f.members.iter().copied())
    }

    /// Firm members as the raw id lists, in partition order.
    pub fn as_lists(&self) -> Vec<Vec<u32>> {
        self.firms
            .iter()
            .map(|f| f.members.iter().map(|a| a.0).collect())
            .collect()
    }
}

/// Output of [`finalize`].
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Finalized {
    pub partition: Partition,
    /// Agents whose previous-round row must get `was_terminated = true`.
    pub terminations: Vec<AgentId>,
    /// Applications still pending at the deadline.
    pub auto_rejected: usize,
}

/// Resolves the round. `previous` is the previous round's history (`None` in round 1).
///
/// # Panics
///
/// If `roster` does not match the agents in `state` exactly; that is a caller bug.
pub fn finalize(state: &mut MatchState, roster: &[AgentId], previous: Option<&RoundHistory>) -> Finalized {
    let roster_set: BTreeSet<AgentId> = roster.iter().copied().collect();
    assert!(
        roster_set.len() == roster.len() && roster_set.iter().copied().eq(state.agents()),
        "finalize roster {:?} does not match match-state agents {:?}",
        roster,
        state.agents().collect::<Vec<_>>()
    );

    // 1. Nobody stays pending past the deadline.
    let owners: Vec<AgentId> = state.agents().collect();
    let auto_rejected: usize = owners
        .iter()
        .map(|&o| state.reject_all_incoming(o, RejectionReason::AutoEnd))
        .sum();

    // 2-4. Operating firms in ascending owner order, everyone else alone.
    let mut firms = Vec::new();
    let mut assigned = BTreeSet::new();
    for &owner in &owners {
        if state.is_employed(owner) || !state.has_hired(owner) {
            continue;
        }
        let mut members = Vec::with_capacity(state.member_count(owner));
        members.push(owner);
        members.extend_from_slice(state.accepted(owner));
        assigned.extend(members.iter().copied());
        firms.push(Firm { members });
    }
    for &agent in &owners {
        if !assigned.contains(&agent) {
            firms.push(Firm { members: vec![agent] });
        }
    }
    let partition = Partition { firms };

    // 5. First (applicant, owner) occurrence only.
    let mut terminations = Vec::new();
    if let Some(prev) = previous {
        let operating = partition.operating_owners();
        let mut seen = BTreeSet::new();
        for r in state.rejections() {
            if !seen.insert((r.applicant, r.owner)) {
                continue;
            }
            if !operating.contains(&r.owner) {
                continue;
            }
            let worked_there = prev
                .get(r.applicant)
                .map(|e| !e.is_autarkic() && e.firm_owner_id == Some(r.owner))
                .unwrap_or(false);
            if worked_there && !terminations.contains(&r.applicant) {
                terminations.push(r.applicant);
            }
        }
    }

    Finalized { partition, terminations, auto_rejected }
}

/// Per-agent assignments for a partition, keyed by id.
pub fn assignments(partition: &Partition) -> BTreeMap<AgentId, Assignment> {
    partition
        .members()
        .filter_map(|a| partition.assignment(a).map(|asg| (a, asg)))
        .collect()
}
