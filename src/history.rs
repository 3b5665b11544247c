//! Append-only per-agent round history.
//!
//! One [`RoundHistory`] is appended when a round settles. Rows are immutable
//! afterwards except for the termination flag, which the next round's finalize
//! may set through [`HistoryLedger::mark_terminated`].

use crate::types::AgentId;
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// One agent's outcome for one round.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct HistoryEntry {
    /// Owner of the agent's firm; `None` for autarky.
    pub firm_owner_id: Option<AgentId>,
    pub firm_size: usize,
    pub firm_members: Vec<AgentId>,
    pub effort: Decimal,
    pub per_capita_effort: Decimal,
    pub per_capita_payout: Decimal,
    pub payoff: Decimal,
    /// Set retroactively when the owner let this agent go next round.
    pub was_terminated: bool,
}

impl HistoryEntry {
    pub fn is_autarkic(&self) -> bool {
        self.firm_owner_id.is_none()
    }
}

/// All agents' rows for one round.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RoundHistory {
    pub round: u32,
    pub entries: BTreeMap<AgentId, HistoryEntry>,
}

impl RoundHistory {
    pub fn get(&self, agent: AgentId) -> Option<&HistoryEntry> {
        self.entries.get(&agent)
    }
}

/// Resume row shown to clients: one earlier round for one agent.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ResumeEntry {
    pub round: u32,
    pub firm_owner_id: Option<AgentId>,
    pub firm_size: usize,
    pub firm_members: Vec<AgentId>,
    pub per_capita_effort: Decimal,
    pub per_capita_payout: Decimal,
    pub was_terminated: bool,
}

/// Session-wide ledger, keyed by round number.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct HistoryLedger {
    rounds: BTreeMap<u32, RoundHistory>,
}

impl HistoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a settled round. Rounds must be strictly increasing.
    pub fn append(&mut self, round: u32, entries: BTreeMap<AgentId, HistoryEntry>) -> Result<(), String> {
        if let Some(last) = self.last_round() {
            if round <= last {
                return Err(format!("round {} already recorded (last is {})", round, last));
            }
        }
        self.rounds.insert(round, RoundHistory { round, entries });
        Ok(())
    }

    pub fn round(&self, round: u32) -> Option<&RoundHistory> {
        self.rounds.get(&round)
    }

    pub fn last_round(&self) -> Option<u32> {
        self.rounds.keys().next_back().copied()
    }

    pub fn rounds(&self) -> impl Iterator<Item = &RoundHistory> {
        self.rounds.values()
    }

    /// Sets `was_terminated` on `agent`'s row for `round`. Returns false if there is no such row.
    pub fn mark_terminated(&mut self, round: u32, agent: AgentId) -> bool {
        match self.rounds.get_mut(&round).and_then(|r| r.entries.get_mut(&agent)) {
            Some(entry) => {
                entry.was_terminated = true;
                true
            }
            None => false,
        }
    }

    /// `agent`'s rows for every round before `before_round`, oldest first.
    pub fn resume(&self, agent: AgentId, before_round: u32) -> Vec<ResumeEntry> {
        self.rounds
            .range(..before_round)
            .filter_map(|(&round, history)| {
                history.get(agent).map(|e| ResumeEntry {
                    round,
                    firm_owner_id: e.firm_owner_id,
                    firm_size: e.firm_size,
                    firm_members: e.firm_members.clone(),
                    per_capita_effort: e.per_capita_effort,
                    per_capita_payout: e.per_capita_payout,
                    was_terminated: e.was_terminated,
                })
            })
            .collect()
    }

    /// Sum of an agent's payoffs over all recorded rounds.
    pub fn total_payoff(&self, agent: AgentId) -> Decimal {
        self.rounds
            .values()
            .filter_map(|r| r.get(agent))
            .map(|e| e.payoff)
            .sum()
    }
}
