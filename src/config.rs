//! Experiment configuration, read from the environment.
//!
//! Every key is optional. `RETURNS_TYPE` selects the production technology:
//! `constant` (MPCR table) or `increasing` (`PRODUCTION_A`, `PRODUCTION_B`).

use crate::payoff::ReturnsType;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use std::fmt;
use std::time::Duration;

/// Bad configuration. Fatal: the experiment must not start.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigError {
    UnknownReturnsType(String),
    Invalid { key: &'static str, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::UnknownReturnsType(s) => write!(f, "unknown returns_type: {}", s),
            ConfigError::Invalid { key, value } => write!(f, "invalid value for {}: {:?}", key, value),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Session-wide parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct ExperimentConfig {
    /// Owner plus employees; at least 2.
    pub max_firm_size: usize,
    pub returns: ReturnsType,
    pub endowment: Decimal,
    pub formation_seconds: u64,
    pub num_rounds: u32,
    /// Default roster size when a round is started without an explicit roster.
    pub participants: u32,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            max_firm_size: 6,
            returns: ReturnsType::constant(),
            endowment: Decimal::from(8),
            formation_seconds: 120,
            num_rounds: 30,
            participants: 18,
        }
    }
}

impl ExperimentConfig {
    /// Loads from process env. See the module docs for the keys.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads from an arbitrary key lookup (tests pass a map).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let max_firm_size = parse_or(&lookup, "MAX_FIRM_SIZE", defaults.max_firm_size)?;
        if max_firm_size < 2 {
            return Err(ConfigError::Invalid {
                key: "MAX_FIRM_SIZE",
                value: max_firm_size.to_string(),
            });
        }
        let returns = match lookup("RETURNS_TYPE").as_deref().map(str::trim) {
            None | Some("constant") => ReturnsType::constant(),
            Some("increasing") => {
                let (default_a, default_b) = default_power_parameters();
                ReturnsType::Increasing {
                    a: parse_or(&lookup, "PRODUCTION_A", default_a)?,
                    b: parse_or(&lookup, "PRODUCTION_B", default_b)?,
                }
            }
            Some(other) => return Err(ConfigError::UnknownReturnsType(other.to_string())),
        };
        Ok(Self {
            max_firm_size,
            returns,
            endowment: parse_or(&lookup, "ENDOWMENT", defaults.endowment)?,
            formation_seconds: parse_or(&lookup, "FORMATION_SECONDS", defaults.formation_seconds)?,
            num_rounds: parse_or(&lookup, "NUM_ROUNDS", defaults.num_rounds)?,
            participants: parse_or(&lookup, "PARTICIPANTS", defaults.participants)?,
        })
    }

    pub fn formation_deadline(&self) -> Duration {
        Duration::from_secs(self.formation_seconds)
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => {
            let parsed = raw.trim().parse::<T>();
            parsed.map_err(|_| ConfigError::Invalid { key, value: raw })
        }
    }
}

/// Power technology calibrated so that `b = ln(120 / 20.8) / ln 3` and `a = 20.8 / 16^b`.
fn default_power_parameters() -> (Decimal, Decimal) {
    let b = (120.0f64 / 20.8).ln() / 3.0f64.ln();
    let a = 20.8 / 16.0f64.powf(b);
    (
        Decimal::from_f64(a).unwrap_or_default(),
        Decimal::from_f64(b).unwrap_or_default(),
    )
}
