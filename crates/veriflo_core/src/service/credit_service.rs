//! Credit ledger use-case service.
//!
//! # Responsibility
//! - Charge, refund and periodically reset per-user credit balances.
//! - Resolve concurrent charges with optimistic compare-and-swap retries.
//! - Fire low-balance notifications without affecting charge outcomes.
//!
//! # Invariants
//! - A charge never succeeds when the read balance is below the amount, and
//!   never writes a balance below zero.
//! - Exactly one of N racing charges against the same read balance wins that
//!   balance; losers re-read and re-check before writing.
//! - A negative stored balance is clamped to zero as soon as it is read.
//! - `reset_if_due` grants the allotment at most once per reset window,
//!   guarded by the stored timestamp rather than a lock.
//! - Audit-trail and notification failures are logged, never propagated
//!   after the balance write committed.

use crate::config::LedgerConfig;
use crate::model::credit_event::{CreditEvent, CreditEventKind};
use crate::model::operation::Operation;
use crate::model::plan::Plan;
use crate::model::profile::{now_epoch_ms, Profile, UserId};
use crate::repo::profile_repo::{ProfileRepository, RepoError};
use crate::service::notify::{dispatch_detached, LowBalanceAlert, LowBalanceNotifier};
use crate::service::retry::{retry_optimistic, Attempt, BackoffPolicy, Retried};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Ledger failure surfaced to callers.
#[derive(Debug)]
pub enum LedgerError {
    /// Negative charge amount.
    InvalidAmount(i64),
    /// A refund would push the balance past `i64::MAX`. Nothing was written.
    BalanceOverflow { balance: i64, amount: i64 },
    /// Balance does not cover the charge. Never retried automatically.
    InsufficientCredits { available: i64, required: i64 },
    /// Every optimistic attempt lost its race. Safe for the client to retry.
    ConcurrentUpdate { attempts: u32 },
    /// The plan's monthly document allotment is spent.
    DocumentQuotaExceeded { used: i64, limit: i64 },
    ProfileNotFound(UserId),
    AccountExists(UserId),
    Repo(RepoError),
}

impl LedgerError {
    /// Whether a client may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrentUpdate { .. })
    }

    /// Stable machine-readable code.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidAmount(_) => "invalid_amount",
            Self::BalanceOverflow { .. } => "balance_overflow",
            Self::InsufficientCredits { .. } => "insufficient_credits",
            Self::ConcurrentUpdate { .. } => "concurrent_update",
            Self::DocumentQuotaExceeded { .. } => "document_quota_exceeded",
            Self::ProfileNotFound(_) => "profile_not_found",
            Self::AccountExists(_) => "account_exists",
            Self::Repo(_) => "storage_error",
        }
    }
}

impl Display for LedgerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidAmount(amount) => write!(f, "credit amount must be >= 0, got {amount}"),
            Self::BalanceOverflow { balance, amount } => write!(
                f,
                "refund of {amount} credits would overflow balance {balance}"
            ),
            Self::InsufficientCredits {
                available,
                required,
            } => write!(
                f,
                "insufficient credits: {required} required, {available} available"
            ),
            Self::ConcurrentUpdate { attempts } => write!(
                f,
                "balance changed concurrently after {attempts} attempts, please retry"
            ),
            Self::DocumentQuotaExceeded { used, limit } => {
                write!(f, "monthly document limit reached: {used} of {limit} used")
            }
            Self::ProfileNotFound(id) => write!(f, "profile not found: {id}"),
            Self::AccountExists(id) => write!(f, "account already exists: {id}"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for LedgerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for LedgerError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::NotFound(id) => Self::ProfileNotFound(id),
            RepoError::Duplicate(id) => Self::AccountExists(id),
            other => Self::Repo(other),
        }
    }
}

/// Result of a successful charge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChargeReceipt {
    pub user_id: UserId,
    pub charged: i64,
    pub balance_before: i64,
    pub balance_after: i64,
    /// Write attempts used; `0` for a zero-amount no-op.
    pub attempts: u32,
    pub operation: Option<Operation>,
}

/// Result of a reset check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ResetOutcome {
    Reset { balance: i64 },
    NotDue { next_reset_at: i64 },
}

/// Totals of one batch reset run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResetSummary {
    pub examined: usize,
    pub reset: usize,
    pub failed: usize,
}

/// Credit ledger over a profile repository.
pub struct CreditLedger<R: ProfileRepository> {
    repo: R,
    config: LedgerConfig,
    backoff: BackoffPolicy,
    notifier: Option<Arc<dyn LowBalanceNotifier>>,
}

impl<R: ProfileRepository> CreditLedger<R> {
    /// Creates a ledger with default settings and no notifier.
    pub fn new(repo: R) -> Self {
        Self::with_config(repo, LedgerConfig::default())
    }

    pub fn with_config(repo: R, config: LedgerConfig) -> Self {
        let backoff = config.backoff_policy();
        Self {
            repo,
            config,
            backoff,
            notifier: None,
        }
    }

    /// Attaches the sink for low-balance alerts.
    pub fn with_notifier(mut self, notifier: Arc<dyn LowBalanceNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }

    /// Creates an account holding the full allotment of `plan`.
    pub fn open_account(
        &self,
        user_id: UserId,
        email: Option<String>,
        plan: Plan,
    ) -> LedgerResult<Profile> {
        self.open_account_at(user_id, email, plan, now_epoch_ms())
    }

    /// Same as [`Self::open_account`] with an explicit clock.
    pub fn open_account_at(
        &self,
        user_id: UserId,
        email: Option<String>,
        plan: Plan,
        now_ms: i64,
    ) -> LedgerResult<Profile> {
        let mut profile = Profile::new(user_id, plan, now_ms);
        profile.email = email;
        self.repo.create_profile(&profile)?;
        self.record(CreditEvent::new(
            user_id,
            CreditEventKind::Reset,
            profile.credits,
            profile.credits,
            now_ms,
        ));
        info!(
            "event=account_open module=ledger status=ok user_id={} plan={} credits={}",
            user_id, plan, profile.credits
        );
        Ok(profile)
    }

    /// Loads the account; a negative stored balance is clamped first.
    pub fn profile(&self, user_id: UserId) -> LedgerResult<Profile> {
        let mut profile = self
            .repo
            .get_profile(user_id)?
            .ok_or(LedgerError::ProfileNotFound(user_id))?;
        if profile.credits < 0 {
            profile.credits = self.read_checked_balance(user_id)?;
        }
        Ok(profile)
    }

    /// Returns the current balance, correcting a negative stored value.
    pub fn balance(&self, user_id: UserId) -> LedgerResult<i64> {
        self.read_checked_balance(user_id)
    }

    /// Deducts `amount` credits.
    ///
    /// # Errors
    /// - `InvalidAmount` for a negative amount.
    /// - `InsufficientCredits` when the balance does not cover `amount`.
    /// - `ConcurrentUpdate` when every attempt lost a race.
    pub fn charge(&self, user_id: UserId, amount: i64) -> LedgerResult<ChargeReceipt> {
        self.charge_inner(user_id, amount, None)
    }

    /// Deducts the price of one metered operation.
    pub fn charge_operation(
        &self,
        user_id: UserId,
        operation: Operation,
    ) -> LedgerResult<ChargeReceipt> {
        self.charge_inner(user_id, operation.cost(), Some(operation))
    }

    /// Adds `amount` credits back. Non-positive amounts return the current
    /// balance unchanged.
    ///
    /// # Errors
    /// - `BalanceOverflow` when the new balance would not fit in an `i64`.
    pub fn refund(&self, user_id: UserId, amount: i64) -> LedgerResult<i64> {
        let before = self.read_checked_balance(user_id)?;
        if amount <= 0 {
            return Ok(before);
        }
        if before.checked_add(amount).is_none() {
            return Err(self.refund_overflow(user_id, before, amount));
        }

        let Some(balance) = self.repo.increment_balance(user_id, amount)? else {
            // A concurrent refund raised the balance in between.
            let current = self.read_checked_balance(user_id)?;
            return Err(self.refund_overflow(user_id, current, amount));
        };
        self.record(CreditEvent::new(
            user_id,
            CreditEventKind::Refund,
            amount,
            balance,
            now_epoch_ms(),
        ));
        info!(
            "event=credits_refund module=ledger status=ok user_id={} amount={} balance_after={}",
            user_id, amount, balance
        );
        Ok(balance)
    }

    /// Grants the plan allotment when the reset window has elapsed.
    pub fn reset_if_due(&self, user_id: UserId) -> LedgerResult<ResetOutcome> {
        self.reset_if_due_at(user_id, now_epoch_ms())
    }

    /// Same as [`Self::reset_if_due`] with an explicit clock.
    pub fn reset_if_due_at(&self, user_id: UserId, now_ms: i64) -> LedgerResult<ResetOutcome> {
        let interval = self.config.reset_interval_ms();
        let profile = self.profile(user_id)?;
        if let Some(next_reset_at) = profile.next_reset_at(now_ms, interval) {
            return Ok(ResetOutcome::NotDue { next_reset_at });
        }

        let allotment = profile.plan.limits().monthly_credits;
        let cutoff = now_ms.saturating_sub(interval);
        if self.repo.reset_if_due(user_id, allotment, now_ms, cutoff)? {
            self.record(CreditEvent::new(
                user_id,
                CreditEventKind::Reset,
                allotment,
                allotment,
                now_ms,
            ));
            info!(
                "event=credits_reset module=ledger status=ok user_id={} plan={} balance_after={}",
                user_id, profile.plan, allotment
            );
            return Ok(ResetOutcome::Reset { balance: allotment });
        }

        // Another caller reset first; report its window.
        debug!(
            "event=credits_reset module=ledger status=skipped user_id={} reason=concurrent_reset",
            user_id
        );
        let current = self.profile(user_id)?;
        let next_reset_at = current
            .last_reset_at
            .map_or(now_ms, |last| last.saturating_add(interval));
        Ok(ResetOutcome::NotDue { next_reset_at })
    }

    /// Resets every account whose window has elapsed at `now_ms`.
    ///
    /// Per-account failures are logged and counted; the run continues.
    pub fn reset_all_due_at(&self, now_ms: i64) -> LedgerResult<ResetSummary> {
        let cutoff = now_ms.saturating_sub(self.config.reset_interval_ms());
        let due = self.repo.list_due_for_reset(cutoff)?;
        let mut summary = ResetSummary {
            examined: due.len(),
            ..ResetSummary::default()
        };

        for user_id in due {
            match self.reset_if_due_at(user_id, now_ms) {
                Ok(ResetOutcome::Reset { .. }) => summary.reset += 1,
                Ok(ResetOutcome::NotDue { .. }) => {}
                Err(err) => {
                    summary.failed += 1;
                    warn!(
                        "event=credits_reset module=ledger status=error user_id={} error_code={} error={}",
                        user_id,
                        err.error_code(),
                        err
                    );
                }
            }
        }

        info!(
            "event=credits_reset_batch module=ledger status=ok examined={} reset={} failed={}",
            summary.examined, summary.reset, summary.failed
        );
        Ok(summary)
    }

    /// Switches plan and grants the new plan's allotment.
    pub fn change_plan(&self, user_id: UserId, plan: Plan) -> LedgerResult<i64> {
        let now_ms = now_epoch_ms();
        let allotment = plan.limits().monthly_credits;
        self.repo.set_plan(user_id, plan, allotment, now_ms)?;
        self.record(CreditEvent::new(
            user_id,
            CreditEventKind::PlanChange,
            allotment,
            allotment,
            now_ms,
        ));
        info!(
            "event=plan_change module=ledger status=ok user_id={} plan={} balance_after={}",
            user_id, plan, allotment
        );
        Ok(allotment)
    }

    /// Counts one processed document against the plan's monthly allotment.
    ///
    /// Returns the number of documents used in the current window.
    pub fn consume_document(&self, user_id: UserId) -> LedgerResult<i64> {
        let profile = self.profile(user_id)?;
        let limit = profile.plan.limits().monthly_documents;
        if let Some(used) = self.repo.consume_document(user_id, limit)? {
            return Ok(used);
        }

        let current = self.profile(user_id)?;
        Err(LedgerError::DocumentQuotaExceeded {
            used: current.documents_used,
            limit: current
                .plan
                .limits()
                .monthly_documents
                .unwrap_or(current.documents_used),
        })
    }

    /// Recent balance mutations, newest first.
    pub fn history(&self, user_id: UserId, limit: u32) -> LedgerResult<Vec<CreditEvent>> {
        Ok(self.repo.list_events(user_id, limit)?)
    }

    fn charge_inner(
        &self,
        user_id: UserId,
        amount: i64,
        operation: Option<Operation>,
    ) -> LedgerResult<ChargeReceipt> {
        if amount < 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }
        if amount == 0 {
            let balance = self.read_checked_balance(user_id)?;
            return Ok(ChargeReceipt {
                user_id,
                charged: 0,
                balance_before: balance,
                balance_after: balance,
                attempts: 0,
                operation,
            });
        }

        let outcome = retry_optimistic(&self.backoff, |attempt| {
            let before = self.read_checked_balance(user_id)?;
            if before < amount {
                return Err(LedgerError::InsufficientCredits {
                    available: before,
                    required: amount,
                });
            }

            let after = (before - amount).max(0);
            if self.repo.compare_and_swap_balance(user_id, before, after)? {
                Ok(Attempt::Done((before, after)))
            } else {
                debug!(
                    "event=credits_charge module=ledger status=conflict user_id={} attempt={}",
                    user_id, attempt
                );
                Ok(Attempt::Conflict)
            }
        });

        let receipt = match outcome {
            Ok(Retried::Done {
                value: (before, after),
                attempts,
            }) => ChargeReceipt {
                user_id,
                charged: amount,
                balance_before: before,
                balance_after: after,
                attempts,
                operation,
            },
            Ok(Retried::Exhausted { attempts }) => {
                self.final_charge_attempt(user_id, amount, operation, attempts)?
            }
            Err(err) => {
                if let LedgerError::InsufficientCredits {
                    available,
                    required,
                } = &err
                {
                    info!(
                        "event=credits_charge module=ledger status=rejected user_id={} error_code=insufficient_credits available={} required={}",
                        user_id, available, required
                    );
                }
                return Err(err);
            }
        };

        self.record(
            CreditEvent::new(
                user_id,
                CreditEventKind::Charge,
                -amount,
                receipt.balance_after,
                now_epoch_ms(),
            )
            .with_operation(operation),
        );
        info!(
            "event=credits_charge module=ledger status=ok user_id={} amount={} balance_after={} attempts={}",
            user_id, amount, receipt.balance_after, receipt.attempts
        );
        self.maybe_notify_low_balance(user_id, receipt.balance_after);
        Ok(receipt)
    }

    /// Single guarded decrement once the optimistic attempts are spent.
    fn final_charge_attempt(
        &self,
        user_id: UserId,
        amount: i64,
        operation: Option<Operation>,
        attempts: u32,
    ) -> LedgerResult<ChargeReceipt> {
        let attempts = attempts + 1;
        warn!(
            "event=credits_charge module=ledger status=contended user_id={} attempts={}",
            user_id, attempts
        );

        if let Some(after) = self.repo.decrement_if_sufficient(user_id, amount)? {
            return Ok(ChargeReceipt {
                user_id,
                charged: amount,
                balance_before: after + amount,
                balance_after: after,
                attempts,
                operation,
            });
        }

        let available = self.read_checked_balance(user_id)?;
        if available < amount {
            return Err(LedgerError::InsufficientCredits {
                available,
                required: amount,
            });
        }

        error!(
            "event=credits_charge module=ledger status=error user_id={} error_code=concurrent_update attempts={}",
            user_id, attempts
        );
        Err(LedgerError::ConcurrentUpdate { attempts })
    }

    fn refund_overflow(&self, user_id: UserId, balance: i64, amount: i64) -> LedgerError {
        warn!(
            "event=credits_refund module=ledger status=rejected user_id={} error_code=balance_overflow balance={} amount={}",
            user_id, balance, amount
        );
        LedgerError::BalanceOverflow { balance, amount }
    }

    fn read_checked_balance(&self, user_id: UserId) -> LedgerResult<i64> {
        let stored = self.repo.read_balance(user_id)?;
        if stored >= 0 {
            return Ok(stored);
        }

        error!(
            "event=credits_negative module=ledger status=error user_id={} stored={} action=clamp_to_zero",
            user_id, stored
        );
        if self.repo.compare_and_swap_balance(user_id, stored, 0)? {
            self.record(CreditEvent::new(
                user_id,
                CreditEventKind::Clamp,
                -stored,
                0,
                now_epoch_ms(),
            ));
            return Ok(0);
        }

        // A concurrent writer replaced the value; every write path clamps.
        Ok(self.repo.read_balance(user_id)?.max(0))
    }

    fn maybe_notify_low_balance(&self, user_id: UserId, balance: i64) {
        let threshold = self.config.low_balance_threshold;
        if balance <= 0 || balance >= threshold {
            return;
        }
        let Some(notifier) = self.notifier.as_ref() else {
            return;
        };

        let email = match self.repo.get_profile(user_id) {
            Ok(profile) => profile.and_then(|profile| profile.email),
            Err(err) => {
                warn!(
                    "event=low_balance_notify module=ledger status=degraded user_id={} error={}",
                    user_id, err
                );
                None
            }
        };

        dispatch_detached(
            Arc::clone(notifier),
            LowBalanceAlert {
                user_id,
                email,
                balance,
                threshold,
            },
        );
    }

    fn record(&self, event: CreditEvent) {
        if let Err(err) = self.repo.record_event(&event) {
            error!(
                "event=credit_event_write module=ledger status=error user_id={} kind={} error={}",
                event.user_id,
                event.kind.as_str(),
                err
            );
        }
    }
}
