//! # Firm Formation Engine
//!
//! Live firm-formation matching for a repeated public-goods experiment: N
//! anonymous agents apply to each other's firms and accept or reject applicants
//! under binding-offer rules until a deadline; the engine then resolves the
//! state into a partition of firms and autarky singletons and flags
//! terminations against the previous round.
//!
//! ## Entry point
//!
//! Use [`Session`] as the single entry point: [`Session::start_round`], then
//! [`Session::handle_action`] for every client message, [`Session::finalize_formation`]
//! at the deadline, and [`Session::settle_round`] once efforts are in.
//!
//! ## Example
//!
//! ```rust
//! use firm_formation_engine::{Action, AgentId, ExperimentConfig, Recipient, Session};
//! use std::collections::BTreeMap;
//!
//! let mut session = Session::new(ExperimentConfig { participants: 3, ..Default::default() });
//! session.start_default_round().unwrap();
//! let applied = session.handle_action(AgentId(2), Action::Apply { owner: AgentId(1) }).unwrap();
//! assert_eq!(applied.recipient, Recipient::All);
//! session
//!     .handle_action(AgentId(1), Action::Accept { owner: AgentId(1), applicant: AgentId(2) })
//!     .unwrap();
//! let finalized = session.finalize_formation().unwrap();
//! assert_eq!(finalized.partition.as_lists(), vec![vec![1, 2], vec![3]]);
//! let payoffs = session.settle_round(&BTreeMap::new()).unwrap();
//! assert_eq!(payoffs.firms.len(), 2);
//! ```
//!
//! ## Lower-level API
//!
//! [`MatchState`], [`apply_action`], [`project`], and [`finalize`] are pure
//! building blocks if you manage rounds and history yourself.

pub mod api;
pub mod audit;
pub mod broadcast;
pub mod config;
pub mod engine;
pub mod finalize;
pub mod generator;
pub mod history;
pub mod matching;
pub mod payoff;
pub mod persistence;
pub mod state;
pub mod types;

pub use broadcast::{project, FirmView, Snapshot};
pub use config::{ConfigError, ExperimentConfig};
pub use engine::{Recipient, Response, Session, SessionError};
pub use finalize::{assignments, finalize, Assignment, Finalized, Firm, Partition};
pub use generator::{replay_into_session, Generator, GeneratorConfig, ReplayStats};
pub use history::{HistoryEntry, HistoryLedger, ResumeEntry, RoundHistory};
pub use matching::{apply_action, Applied};
pub use payoff::{compute_payoffs, PayoffError, RelayRow, ReturnsType, RoundPayoffs};
pub use persistence::LedgerFile;
pub use state::MatchState;
pub use types::{Action, ActionMessage, AgentId, FormationError, Rejection, RejectionReason};
