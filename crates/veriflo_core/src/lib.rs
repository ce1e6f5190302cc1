//! Core domain logic for the Veriflo credit ledger.
//! This crate is the single source of truth for balance invariants.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use config::{ConfigError, LedgerConfig};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::credit_event::{CreditEvent, CreditEventKind};
pub use model::operation::Operation;
pub use model::plan::{Plan, PlanLimits};
pub use model::profile::{now_epoch_ms, Profile, ProfileValidationError, UserId, DAY_MS};
pub use repo::profile_repo::{ProfileRepository, RepoError, RepoResult, SqliteProfileRepository};
pub use service::credit_service::{
    ChargeReceipt, CreditLedger, LedgerError, LedgerResult, ResetOutcome, ResetSummary,
};
pub use service::notify::{
    dispatch_detached, LogNotifier, LowBalanceAlert, LowBalanceNotifier, NotifyError,
};
pub use service::retry::{retry_optimistic, Attempt, BackoffPolicy, Retried};

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
