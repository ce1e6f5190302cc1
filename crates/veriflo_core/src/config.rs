//! Ledger tuning configuration.
//!
//! # Responsibility
//! - Hold retry, notification and reset-window settings for the ledger.
//! - Load them from JSON with per-field defaults.
//!
//! # Invariants
//! - A validated config has `max_attempts >= 1` and a non-zero reset window.

use crate::model::profile::DAY_MS;
use crate::service::retry::BackoffPolicy;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Duration;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_BACKOFF_STEP_MS: u64 = 50;
pub const DEFAULT_LOW_BALANCE_THRESHOLD: i64 = 100;
pub const DEFAULT_RESET_INTERVAL_DAYS: u32 = 30;

/// Configuration loading/validation failures.
#[derive(Debug)]
pub enum ConfigError {
    Parse(serde_json::Error),
    Invalid(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parse(err) => write!(f, "failed to parse ledger config: {err}"),
            Self::Invalid(message) => write!(f, "invalid ledger config: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Parse(err) => Some(err),
            Self::Invalid(_) => None,
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(value: serde_json::Error) -> Self {
        Self::Parse(value)
    }
}

/// Credit ledger settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LedgerConfig {
    /// Optimistic compare-and-swap attempts before the final guarded write.
    pub max_attempts: u32,
    /// Linear backoff step; attempt `n` waits `n * backoff_step_ms`.
    pub backoff_step_ms: u64,
    /// Balances strictly between zero and this value trigger a notification.
    pub low_balance_threshold: i64,
    /// Minimum days between two monthly resets.
    pub reset_interval_days: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_step_ms: DEFAULT_BACKOFF_STEP_MS,
            low_balance_threshold: DEFAULT_LOW_BALANCE_THRESHOLD,
            reset_interval_days: DEFAULT_RESET_INTERVAL_DAYS,
        }
    }
}

impl LedgerConfig {
    /// Parses and validates a JSON document. Missing fields use defaults.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if self.reset_interval_days == 0 {
            return Err(ConfigError::Invalid(
                "reset_interval_days must be at least 1".to_string(),
            ));
        }
        if self.low_balance_threshold < 0 {
            return Err(ConfigError::Invalid(format!(
                "low_balance_threshold must be >= 0, got {}",
                self.low_balance_threshold
            )));
        }
        Ok(())
    }

    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.backoff_step_ms),
        )
    }

    pub fn reset_interval_ms(&self) -> i64 {
        i64::from(self.reset_interval_days) * DAY_MS
    }
}
