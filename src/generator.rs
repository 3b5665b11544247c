//! Synthetic formation traffic.
//!
//! Deterministic, configurable stream of `(actor, action)` pairs for replay
//! tests, property tests, and benchmarks. Same seed ⇒ same stream. Actions are
//! drawn blind (without looking at the state), so many are denied; that is
//! what exercises the validation paths.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::engine::{Recipient, Session, SessionError};
use crate::types::{Action, AgentId};

/// Configuration for the synthetic action generator. Ratios are relative weights.
#[derive(Clone, Debug)]
pub struct GeneratorConfig {
    /// RNG seed. Same seed ⇒ same action stream.
    pub seed: u64,
    /// Roster size; actors and targets are drawn from `1..=num_agents`.
    pub num_agents: u32,
    /// Number of actions in [`Generator::all_actions`].
    pub num_actions: usize,
    pub apply_weight: u32,
    pub withdraw_weight: u32,
    pub accept_weight: u32,
    pub reject_weight: u32,
    pub ping_weight: u32,
    /// Probability that a target id is drawn out of range (exercises validation).
    pub out_of_range_ratio: f64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            num_agents: 18,
            num_actions: 500,
            apply_weight: 6,
            withdraw_weight: 1,
            accept_weight: 3,
            reject_weight: 1,
            ping_weight: 1,
            out_of_range_ratio: 0.02,
        }
    }
}

/// Deterministic action stream.
pub struct Generator {
    rng: StdRng,
    config: GeneratorConfig,
}

impl Generator {
    pub fn new(config: GeneratorConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self { rng, config }
    }

    fn agent(&mut self) -> AgentId {
        AgentId(self.rng.gen_range(1..=self.config.num_agents.max(1)))
    }

    fn target(&mut self) -> AgentId {
        if self.rng.gen::<f64>() < self.config.out_of_range_ratio {
            AgentId(self.config.num_agents + 1)
        } else {
            self.agent()
        }
    }

    /// Next `(actor, action)` pair. Accept/reject always name the actor as owner.
    pub fn next_action(&mut self) -> (AgentId, Action) {
        let c = &self.config;
        let weights = [c.apply_weight, c.withdraw_weight, c.accept_weight, c.reject_weight, c.ping_weight];
        let total: u32 = weights.iter().sum::<u32>().max(1);
        let mut pick = self.rng.gen_range(0..total);
        let mut kind = weights.len() - 1;
        for (i, w) in weights.iter().enumerate() {
            if pick < *w {
                kind = i;
                break;
            }
            pick -= w;
        }

        let actor = self.agent();
        let action = match kind {
            0 => Action::Apply { owner: self.target() },
            1 => Action::Withdraw { owner: self.target() },
            2 => Action::Accept { owner: actor, applicant: self.target() },
            3 => Action::Reject { owner: actor, applicant: self.target() },
            _ => Action::Ping,
        };
        (actor, action)
    }

    pub fn take_actions(&mut self, n: usize) -> Vec<(AgentId, Action)> {
        (0..n).map(|_| self.next_action()).collect()
    }

    /// The full stream as defined by `config.num_actions`.
    pub fn all_actions(&mut self) -> Vec<(AgentId, Action)> {
        self.take_actions(self.config.num_actions)
    }
}

/// Replay counts: how many actions were broadcast (accepted) and how many came back privately.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReplayStats {
    pub broadcast: usize,
    pub private: usize,
}

/// Replays actions into the session's open round.
pub fn replay_into_session(
    session: &mut Session,
    actions: impl IntoIterator<Item = (AgentId, Action)>,
) -> Result<ReplayStats, SessionError> {
    let mut stats = ReplayStats::default();
    for (actor, action) in actions {
        let response = session.handle_action(actor, action)?;
        match response.recipient {
            Recipient::All => stats.broadcast += 1,
            Recipient::Agent(_) => stats.private += 1,
        }
    }
    Ok(stats)
}
