//! Public-goods payoffs for a finalized partition.
//!
//! Autarkic agents keep their endowment. In a firm of size n every member keeps
//! `endowment - effort` and receives the firm's per-capita payout, computed from
//! total effort under constant (MPCR table) or increasing (power) returns.

use crate::finalize::Partition;
use crate::history::HistoryEntry;
use crate::types::AgentId;
use rust_decimal::{Decimal, MathematicalOps};
use std::collections::BTreeMap;
use std::fmt;

/// Production technology of a firm.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ReturnsType {
    /// Per-capita payout `mpcr[n] * E`.
    Constant { mpcr: BTreeMap<usize, Decimal> },
    /// Per-capita payout `a * E^b / n`.
    Increasing { a: Decimal, b: Decimal },
}

impl ReturnsType {
    /// Constant returns with the standard MPCR table for sizes 2..=6.
    pub fn constant() -> Self {
        let mpcr: BTreeMap<usize, Decimal> = [(2, 65), (3, 55), (4, 49), (5, 45), (6, 42)]
            .into_iter()
            .map(|(n, hundredths)| (n, Decimal::new(hundredths, 2)))
            .collect();
        ReturnsType::Constant { mpcr }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ReturnsType::Constant { .. } => "constant",
            ReturnsType::Increasing { .. } => "increasing",
        }
    }

    /// Per-capita payout for a firm of `size` with total effort `total`.
    pub fn per_capita_payout(&self, size: usize, total: Decimal) -> Result<Decimal, PayoffError> {
        match self {
            ReturnsType::Constant { mpcr } => {
                let alpha = mpcr.get(&size).ok_or(PayoffError::MissingMpcr(size))?;
                Ok(*alpha * total)
            }
            ReturnsType::Increasing { a, b } => {
                if total <= Decimal::ZERO {
                    return Ok(Decimal::ZERO);
                }
                let output = total
                    .checked_powd(*b)
                    .and_then(|p| a.checked_mul(p))
                    .ok_or(PayoffError::Overflow { size, total })?;
                Ok(output / Decimal::from(size as u64))
            }
        }
    }
}

/// Payoff failure. Indicates a broken deployment or bad effort data; fatal for the round.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PayoffError {
    MissingMpcr(usize),
    InvalidEffort { agent: AgentId, effort: Decimal },
    UnknownAgent(AgentId),
    Overflow { size: usize, total: Decimal },
}

impl fmt::Display for PayoffError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayoffError::MissingMpcr(n) => write!(f, "no MPCR specified for firm size n={}", n),
            PayoffError::InvalidEffort { agent, effort } => {
                write!(f, "effort {} for agent {} is outside [0, endowment]", effort, agent)
            }
            PayoffError::UnknownAgent(agent) => write!(f, "effort submitted for unknown agent {}", agent),
            PayoffError::Overflow { size, total } => {
                write!(f, "production overflow for firm size {} with total effort {}", size, total)
            }
        }
    }
}

impl std::error::Error for PayoffError {}

/// Aggregate outcome of one firm.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FirmOutcome {
    pub owner: AgentId,
    pub members: Vec<AgentId>,
    pub total_effort: Decimal,
    pub per_capita_effort: Decimal,
    pub per_capita_payout: Decimal,
}

impl FirmOutcome {
    pub fn size(&self) -> usize {
        self.members.len()
    }
}

/// Relay row: what everyone learns about every firm after a round.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RelayRow {
    pub firm_size: usize,
    pub per_capita_effort: Decimal,
    pub per_capita_payout: Decimal,
}

/// Payoffs for a whole round.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RoundPayoffs {
    pub firms: Vec<FirmOutcome>,
    pub efforts: BTreeMap<AgentId, Decimal>,
    pub payoffs: BTreeMap<AgentId, Decimal>,
}

impl RoundPayoffs {
    /// One row per firm, smallest firms first.
    pub fn relay_rows(&self) -> Vec<RelayRow> {
        let mut rows: Vec<RelayRow> = self
            .firms
            .iter()
            .map(|f| RelayRow {
                firm_size: f.size(),
                per_capita_effort: f.per_capita_effort,
                per_capita_payout: f.per_capita_payout,
            })
            .collect();
        rows.sort_by_key(|r| r.firm_size);
        rows
    }

    /// Ledger rows for this round. Termination flags start cleared.
    pub fn history_entries(&self) -> BTreeMap<AgentId, HistoryEntry> {
        let mut out = BTreeMap::new();
        for firm in &self.firms {
            let owner = if firm.size() > 1 { Some(firm.owner) } else { None };
            for &agent in &firm.members {
                out.insert(
                    agent,
                    HistoryEntry {
                        firm_owner_id: owner,
                        firm_size: firm.size(),
                        firm_members: firm.members.clone(),
                        effort: self.efforts.get(&agent).copied().unwrap_or_default(),
                        per_capita_effort: firm.per_capita_effort,
                        per_capita_payout: firm.per_capita_payout,
                        payoff: self.payoffs.get(&agent).copied().unwrap_or_default(),
                        was_terminated: false,
                    },
                );
            }
        }
        out
    }
}

/// Computes payoffs. Missing efforts count as 0; autarkic agents' efforts are ignored.
pub fn compute_payoffs(
    partition: &Partition,
    efforts: &BTreeMap<AgentId, Decimal>,
    returns: &ReturnsType,
    endowment: Decimal,
) -> Result<RoundPayoffs, PayoffError> {
    for (&agent, &effort) in efforts {
        if partition.firm_of(agent).is_none() {
            return Err(PayoffError::UnknownAgent(agent));
        }
        if effort < Decimal::ZERO || effort > endowment {
            return Err(PayoffError::InvalidEffort { agent, effort });
        }
    }

    let mut firms = Vec::with_capacity(partition.firms.len());
    let mut used_efforts = BTreeMap::new();
    let mut payoffs = BTreeMap::new();
    for firm in &partition.firms {
        if firm.is_autarkic() {
            let agent = firm.owner();
            used_efforts.insert(agent, Decimal::ZERO);
            payoffs.insert(agent, endowment);
            firms.push(FirmOutcome {
                owner: agent,
                members: firm.members.clone(),
                total_effort: Decimal::ZERO,
                per_capita_effort: Decimal::ZERO,
                per_capita_payout: Decimal::ZERO,
            });
            continue;
        }

        let n = firm.size();
        let total: Decimal = firm
            .members
            .iter()
            .map(|a| efforts.get(a).copied().unwrap_or_default())
            .sum();
        let per_capita_effort = total / Decimal::from(n as u64);
        let per_capita_payout = returns.per_capita_payout(n, total)?;
        for &agent in &firm.members {
            let effort = efforts.get(&agent).copied().unwrap_or_default();
            used_efforts.insert(agent, effort);
            payoffs.insert(agent, endowment - effort + per_capita_payout);
        }
        firms.push(FirmOutcome {
            owner: firm.owner(),
            members: firm.members.clone(),
            total_effort: total,
            per_capita_effort,
            per_capita_payout,
        });
    }

    Ok(RoundPayoffs { firms, efforts: used_efforts, payoffs })
}
