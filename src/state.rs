//! Round-scoped match state: pending applications, accepted hires, employer
//! pointers, and the rejection log.
//!
//! Mutation goes through [`crate::matching::apply_action`] and
//! [`crate::finalize::finalize`]; the helpers here are the shared cascade steps.

use crate::types::{AgentId, Rejection, RejectionReason};
use std::collections::BTreeMap;

/// Pending/accepted/employer maps for one round, keyed by roster id.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MatchState {
    /// Owner -> applicants, in arrival order.
    pending: BTreeMap<AgentId, Vec<AgentId>>,
    /// Owner -> hired employees, in acceptance order.
    accepted: BTreeMap<AgentId, Vec<AgentId>>,
    /// Agent -> owner they are bound to.
    employer: BTreeMap<AgentId, Option<AgentId>>,
    rejections: Vec<Rejection>,
}

impl MatchState {
    /// Empty state for the given roster.
    pub fn fresh(agents: &[AgentId]) -> Self {
        Self {
            pending: agents.iter().map(|&a| (a, Vec::new())).collect(),
            accepted: agents.iter().map(|&a| (a, Vec::new())).collect(),
            employer: agents.iter().map(|&a| (a, None)).collect(),
            rejections: Vec::new(),
        }
    }

    pub fn contains(&self, agent: AgentId) -> bool {
        self.employer.contains_key(&agent)
    }

    /// Roster ids in ascending order.
    pub fn agents(&self) -> impl Iterator<Item = AgentId> + '_ {
        self.employer.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.employer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.employer.is_empty()
    }

    pub fn pending(&self, owner: AgentId) -> &[AgentId] {
        self.pending.get(&owner).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn accepted(&self, owner: AgentId) -> &[AgentId] {
        self.accepted.get(&owner).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn employer(&self, agent: AgentId) -> Option<AgentId> {
        self.employer.get(&agent).copied().flatten()
    }

    pub fn employers(&self) -> &BTreeMap<AgentId, Option<AgentId>> {
        &self.employer
    }

    pub fn rejections(&self) -> &[Rejection] {
        &self.rejections
    }

    pub fn is_employed(&self, agent: AgentId) -> bool {
        self.employer(agent).is_some()
    }

    pub fn has_hired(&self, agent: AgentId) -> bool {
        !self.accepted(agent).is_empty()
    }

    pub fn is_pending(&self, owner: AgentId, applicant: AgentId) -> bool {
        self.pending(owner).contains(&applicant)
    }

    /// Owner plus accepted employees.
    pub fn member_count(&self, owner: AgentId) -> usize {
        1 + self.accepted(owner).len()
    }

    /// True when one more hire would exceed `max_firm_size`.
    pub fn is_full(&self, owner: AgentId, max_firm_size: usize) -> bool {
        self.member_count(owner) >= max_firm_size
    }

    /// Owners `applicant` currently has outstanding applications to, ascending.
    pub fn outgoing(&self, applicant: AgentId) -> Vec<AgentId> {
        self.pending
            .iter()
            .filter(|(_, apps)| apps.contains(&applicant))
            .map(|(&owner, _)| owner)
            .collect()
    }

    /// Number of applications still pending across all owners.
    pub fn pending_count(&self) -> usize {
        self.pending.values().map(Vec::len).sum()
    }

    pub(crate) fn push_pending(&mut self, owner: AgentId, applicant: AgentId) {
        self.pending.entry(owner).or_default().push(applicant);
    }

    /// Removes `applicant` from `pending[owner]`. Returns whether it was there.
    pub(crate) fn remove_pending(&mut self, owner: AgentId, applicant: AgentId) -> bool {
        match self.pending.get_mut(&owner) {
            Some(apps) => {
                let before = apps.len();
                apps.retain(|&a| a != applicant);
                apps.len() != before
            }
            None => false,
        }
    }

    /// Removes `agent` from every pending list.
    pub(crate) fn remove_from_all_pending(&mut self, agent: AgentId) {
        for apps in self.pending.values_mut() {
            apps.retain(|&a| a != agent);
        }
    }

    /// Binds `applicant` to `owner`. Caller has already removed the pending entry.
    pub(crate) fn hire(&mut self, owner: AgentId, applicant: AgentId) {
        self.accepted.entry(owner).or_default().push(applicant);
        self.employer.insert(applicant, Some(owner));
    }

    /// Empties `pending[owner]`, logging each applicant with `reason`.
    pub(crate) fn reject_all_incoming(&mut self, owner: AgentId, reason: RejectionReason) -> usize {
        let incoming = match self.pending.get_mut(&owner) {
            Some(apps) => std::mem::take(apps),
            None => return 0,
        };
        let n = incoming.len();
        for applicant in incoming {
            self.rejections.push(Rejection { applicant, owner, reason });
        }
        n
    }

    pub(crate) fn log_rejection(&mut self, applicant: AgentId, owner: AgentId, reason: RejectionReason) {
        self.rejections.push(Rejection { applicant, owner, reason });
    }

    /// Checks the structural invariants (single employer, employer/accepted
    /// agreement, no pending after bind or hire, capacity, inactive owners have
    /// no incoming). Returns the first violation found.
    pub fn check_invariants(&self, max_firm_size: usize) -> Result<(), String> {
        let mut bound_to: BTreeMap<AgentId, AgentId> = BTreeMap::new();
        for (&owner, employees) in &self.accepted {
            if 1 + employees.len() > max_firm_size {
                return Err(format!("firm {} has {} members, cap {}", owner, 1 + employees.len(), max_firm_size));
            }
            for &e in employees {
                if let Some(prev) = bound_to.insert(e, owner) {
                    return Err(format!("agent {} accepted by both {} and {}", e, prev, owner));
                }
            }
        }
        for (&agent, &emp) in &self.employer {
            if emp != bound_to.get(&agent).copied() {
                return Err(format!("employer[{}] = {:?} disagrees with accepted lists", agent, emp));
            }
        }
        for (&owner, apps) in &self.pending {
            if self.is_employed(owner) && !apps.is_empty() {
                return Err(format!("inactive owner {} still has pending applicants", owner));
            }
            for &a in apps {
                if self.is_employed(a) {
                    return Err(format!("employed agent {} still pending at {}", a, owner));
                }
                if self.has_hired(a) {
                    return Err(format!("hiring owner {} still pending at {}", a, owner));
                }
            }
        }
        for (&owner, employees) in &self.accepted {
            if !employees.is_empty() && self.is_employed(owner) {
                return Err(format!("owner {} both hired and is employed", owner));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roster(n: u32) -> Vec<AgentId> {
        (1..=n).map(AgentId).collect()
    }

    #[test]
    fn fresh_state_is_empty_for_every_agent() {
        let state = MatchState::fresh(&roster(3));
        assert_eq!(state.len(), 3);
        for a in roster(3) {
            assert!(state.pending(a).is_empty());
            assert!(state.accepted(a).is_empty());
            assert_eq!(state.employer(a), None);
        }
        assert!(state.rejections().is_empty());
        assert!(state.check_invariants(6).is_ok());
    }

    #[test]
    fn outgoing_is_inverse_of_pending() {
        let mut state = MatchState::fresh(&roster(4));
        state.push_pending(AgentId(3), AgentId(1));
        state.push_pending(AgentId(2), AgentId(1));
        state.push_pending(AgentId(2), AgentId(4));
        assert_eq!(state.outgoing(AgentId(1)), vec![AgentId(2), AgentId(3)]);
        assert_eq!(state.outgoing(AgentId(4)), vec![AgentId(2)]);
        assert!(state.outgoing(AgentId(2)).is_empty());
        assert_eq!(state.pending_count(), 3);
    }

    #[test]
    fn reject_all_incoming_logs_each_applicant() {
        let mut state = MatchState::fresh(&roster(3));
        state.push_pending(AgentId(1), AgentId(2));
        state.push_pending(AgentId(1), AgentId(3));
        let n = state.reject_all_incoming(AgentId(1), RejectionReason::AutoEnd);
        assert_eq!(n, 2);
        assert!(state.pending(AgentId(1)).is_empty());
        assert_eq!(state.rejections().len(), 2);
        assert_eq!(state.rejections()[0].applicant, AgentId(2));
        assert_eq!(state.rejections()[1].reason, RejectionReason::AutoEnd);
    }

    #[test]
    fn check_invariants_flags_pending_after_bind() {
        let mut state = MatchState::fresh(&roster(3));
        state.hire(AgentId(1), AgentId(2));
        state.push_pending(AgentId(3), AgentId(2));
        let err = state.check_invariants(6).unwrap_err();
        assert!(err.contains("employed agent 2"));
    }

    #[test]
    fn check_invariants_flags_capacity() {
        let mut state = MatchState::fresh(&roster(3));
        state.hire(AgentId(1), AgentId(2));
        state.hire(AgentId(1), AgentId(3));
        assert!(state.check_invariants(2).is_err());
        assert!(state.check_invariants(3).is_ok());
    }
}
