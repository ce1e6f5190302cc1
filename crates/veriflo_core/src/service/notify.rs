//! Low-balance notification dispatch.
//!
//! # Responsibility
//! - Define the notifier seam used after a successful charge.
//! - Run notifications on a detached thread the ledger never joins.
//!
//! # Invariants
//! - Notification failures never reach the charge caller; they are logged.
//! - Email addresses are handed to the notifier but never logged here.

use crate::model::profile::UserId;
use log::{info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::thread;

/// Payload delivered to a [`LowBalanceNotifier`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LowBalanceAlert {
    pub user_id: UserId,
    pub email: Option<String>,
    pub balance: i64,
    pub threshold: i64,
}

/// Delivery failure reported by a notifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyError(pub String);

impl Display for NotifyError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "low balance notification failed: {}", self.0)
    }
}

impl Error for NotifyError {}

/// Sink for low-balance alerts (email, webhook, queue).
pub trait LowBalanceNotifier: Send + Sync {
    fn notify_low_balance(&self, alert: &LowBalanceAlert) -> Result<(), NotifyError>;
}

/// Notifier that only records the alert in the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl LowBalanceNotifier for LogNotifier {
    fn notify_low_balance(&self, alert: &LowBalanceAlert) -> Result<(), NotifyError> {
        info!(
            "event=low_balance module=notify status=ok user_id={} balance={} threshold={} has_email={}",
            alert.user_id,
            alert.balance,
            alert.threshold,
            alert.email.is_some()
        );
        Ok(())
    }
}

/// Sends `alert` on a detached thread.
///
/// Returns immediately. Spawn failures and notifier errors are logged with
/// `warn` and dropped.
pub fn dispatch_detached(notifier: Arc<dyn LowBalanceNotifier>, alert: LowBalanceAlert) {
    let user_id = alert.user_id;
    let spawned = thread::Builder::new()
        .name("veriflo-low-balance".to_string())
        .spawn(move || {
            if let Err(err) = notifier.notify_low_balance(&alert) {
                warn!(
                    "event=low_balance_notify module=notify status=error user_id={} error={}",
                    alert.user_id, err
                );
            }
        });

    if let Err(err) = spawned {
        warn!(
            "event=low_balance_notify module=notify status=error user_id={} error_code=spawn_failed error={}",
            user_id, err
        );
    }
}
