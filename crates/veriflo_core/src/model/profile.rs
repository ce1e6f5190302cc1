//! Account profile model.
//!
//! # Responsibility
//! - Define the per-user record that carries the credit balance.
//! - Decide whether a monthly reset is due.
//!
//! # Invariants
//! - `user_id` is stable and never reused for another account.
//! - `credits` is never written negative by this crate. A negative value read
//!   from storage is an anomaly, not a validation failure, so it stays
//!   representable here and is corrected by the ledger.
//! - `documents_used` is never negative.

use crate::model::plan::Plan;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Stable account identifier (the auth provider's user id).
pub type UserId = Uuid;

/// One day in epoch milliseconds.
pub const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// Profile validation failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileValidationError {
    /// Email is set but blank or missing `@`.
    InvalidEmail,
    /// `documents_used` is negative.
    NegativeDocumentCount(i64),
}

impl Display for ProfileValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidEmail => write!(f, "email must be non-empty and contain `@`"),
            Self::NegativeDocumentCount(value) => {
                write!(f, "documents_used must be >= 0, got {value}")
            }
        }
    }
}

impl Error for ProfileValidationError {}

/// Per-user ledger record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub user_id: UserId,
    /// Contact address for account notifications. Never logged.
    pub email: Option<String>,
    pub plan: Plan,
    /// Current credit balance.
    pub credits: i64,
    /// Documents processed since the last reset.
    pub documents_used: i64,
    /// Unix epoch milliseconds of the last monthly reset, `None` if never.
    pub last_reset_at: Option<i64>,
    /// Unix epoch milliseconds.
    pub created_at: i64,
    /// Unix epoch milliseconds.
    pub updated_at: i64,
}

impl Profile {
    /// Creates a fresh profile holding the full allotment of `plan`.
    ///
    /// `last_reset_at` is set to `now_ms` so the first reset happens one
    /// interval after sign-up.
    pub fn new(user_id: UserId, plan: Plan, now_ms: i64) -> Self {
        Self {
            user_id,
            email: None,
            plan,
            credits: plan.limits().monthly_credits,
            documents_used: 0,
            last_reset_at: Some(now_ms),
            created_at: now_ms,
            updated_at: now_ms,
        }
    }

    /// Validates persisted field constraints.
    pub fn validate(&self) -> Result<(), ProfileValidationError> {
        if let Some(email) = self.email.as_deref() {
            let trimmed = email.trim();
            if trimmed.is_empty() || !trimmed.contains('@') {
                return Err(ProfileValidationError::InvalidEmail);
            }
        }
        if self.documents_used < 0 {
            return Err(ProfileValidationError::NegativeDocumentCount(
                self.documents_used,
            ));
        }
        Ok(())
    }

    /// Returns whether a monthly reset is due at `now_ms`.
    pub fn reset_due(&self, now_ms: i64, interval_ms: i64) -> bool {
        match self.last_reset_at {
            None => true,
            Some(last) => now_ms.saturating_sub(last) >= interval_ms,
        }
    }

    /// Earliest time the next reset becomes due, `None` when already due.
    pub fn next_reset_at(&self, now_ms: i64, interval_ms: i64) -> Option<i64> {
        if self.reset_due(now_ms, interval_ms) {
            return None;
        }
        self.last_reset_at.map(|last| last + interval_ms)
    }
}

/// Current wall-clock time in Unix epoch milliseconds.
pub fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
}
