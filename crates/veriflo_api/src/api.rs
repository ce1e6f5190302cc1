//! Use-case API for web-facing calls.
//!
//! # Responsibility
//! - Expose stable, use-case-level ledger functions to the web layer.
//! - Map ledger failures to stable error codes and HTTP statuses.
//!
//! # Invariants
//! - Exported functions never panic; every failure is an envelope.
//! - `InsufficientCredits` always carries `available` and `required`.
//! - Only `concurrent_update` responses are marked retryable.

use log::warn;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use uuid::Uuid;
use veriflo_core::db::open_db;
use veriflo_core::{
    core_version as core_version_inner, init_logging as init_logging_inner, ping as ping_inner,
    CreditEvent, CreditLedger, LedgerConfig, LedgerError, LogNotifier, Operation, Plan,
    ResetOutcome, SqliteProfileRepository, UserId,
};

const LEDGER_DB_FILE_NAME: &str = "veriflo_ledger.sqlite3";
const LEDGER_DB_ENV: &str = "VERIFLO_DB_PATH";
const HISTORY_DEFAULT_LIMIT: u32 = 20;
const HISTORY_LIMIT_MAX: u32 = 100;

static LEDGER_SETTINGS: OnceLock<LedgerSettings> = OnceLock::new();

#[derive(Debug, Clone, PartialEq, Eq)]
struct LedgerSettings {
    db_path: PathBuf,
    config: LedgerConfig,
}

/// Response envelope shared by all ledger calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerResponse {
    pub ok: bool,
    /// HTTP status the web layer should answer with.
    pub http_status: u16,
    /// Stable machine-readable failure code, `None` on success.
    pub error_code: Option<String>,
    /// Human-readable message for diagnostics/UI.
    pub message: String,
    /// Balance after the call, when known.
    pub balance: Option<i64>,
    /// Credits charged by the call.
    pub charged: Option<i64>,
    /// Set for `insufficient_credits`.
    pub available: Option<i64>,
    /// Set for `insufficient_credits`.
    pub required: Option<i64>,
    /// Documents used in the current window (document calls only).
    pub documents_used: Option<i64>,
    /// Whether the client may resend the same request.
    pub retryable: bool,
}

impl LedgerResponse {
    fn success(message: impl Into<String>, balance: Option<i64>) -> Self {
        Self {
            ok: true,
            http_status: 200,
            error_code: None,
            message: message.into(),
            balance,
            charged: None,
            available: None,
            required: None,
            documents_used: None,
            retryable: false,
        }
    }

    fn failure(http_status: u16, error_code: &str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            http_status,
            error_code: Some(error_code.to_string()),
            message: message.into(),
            balance: None,
            charged: None,
            available: None,
            required: None,
            documents_used: None,
            retryable: false,
        }
    }

    fn from_ledger_error(operation: &str, err: &LedgerError) -> Self {
        let mut response = Self::failure(
            http_status_for(err),
            err.error_code(),
            format!("{operation} failed: {err}"),
        );
        response.retryable = err.is_retryable();
        match err {
            LedgerError::InsufficientCredits {
                available,
                required,
            } => {
                response.available = Some(*available);
                response.required = Some(*required);
                response.balance = Some(*available);
            }
            LedgerError::BalanceOverflow { balance, .. } => {
                response.balance = Some(*balance);
            }
            LedgerError::DocumentQuotaExceeded { used, .. } => {
                response.documents_used = Some(*used);
            }
            LedgerError::Repo(_) => {
                warn!(
                    "event=api_call module=api status=error operation={} error_code={} error={}",
                    operation,
                    err.error_code(),
                    err
                );
            }
            _ => {}
        }
        response
    }
}

/// One entry of the credit history response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreditHistoryItem {
    pub kind: String,
    pub amount: i64,
    pub balance_after: i64,
    pub operation: Option<String>,
    pub created_at: i64,
}

/// History response envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreditHistoryResponse {
    pub ok: bool,
    pub http_status: u16,
    pub error_code: Option<String>,
    pub message: String,
    /// Newest first.
    pub items: Vec<CreditHistoryItem>,
    pub applied_limit: u32,
}

/// Health check.
pub fn ping() -> String {
    ping_inner().to_owned()
}

pub fn core_version() -> String {
    core_version_inner().to_owned()
}

/// Initializes core logging once per process.
///
/// Returns an empty string on success and the error message otherwise.
pub fn init_logging(level: String, log_dir: String) -> String {
    match init_logging_inner(level.as_str(), log_dir.as_str()) {
        Ok(()) => String::new(),
        Err(err) => err,
    }
}

/// Sets the ledger database path and optional JSON config for this process.
///
/// Idempotent for identical settings; a different second configuration is
/// rejected. Returns an empty string on success and the error otherwise.
pub fn configure(db_path: String, config_json: Option<String>) -> String {
    let trimmed = db_path.trim();
    if trimmed.is_empty() {
        return "db_path cannot be empty".to_string();
    }
    let config = match config_json.as_deref().map(LedgerConfig::from_json_str) {
        Some(Ok(config)) => config,
        Some(Err(err)) => return err.to_string(),
        None => LedgerConfig::default(),
    };

    let requested = LedgerSettings {
        db_path: PathBuf::from(trimmed),
        config,
    };
    let active = LEDGER_SETTINGS.get_or_init(|| requested.clone());
    if *active != requested {
        return format!(
            "ledger already configured at `{}`; refusing to reconfigure",
            active.db_path.display()
        );
    }
    String::new()
}

/// Returns the current balance.
pub fn credits_balance(user_id: String) -> LedgerResponse {
    run("credits_balance", &user_id, |ledger, user| {
        let balance = ledger.balance(user)?;
        Ok(LedgerResponse::success("Balance loaded.", Some(balance)))
    })
}

/// Charges the price of one metered operation (`extraction`, `chat_message`,
/// `analysis`, `enrichment`, `workflow_run`).
pub fn credits_charge(user_id: String, operation: String) -> LedgerResponse {
    let Some(operation) = Operation::parse(&operation) else {
        return LedgerResponse::failure(
            400,
            "invalid_operation",
            format!("credits_charge failed: unknown operation `{}`", operation.trim()),
        );
    };
    run("credits_charge", &user_id, |ledger, user| {
        let receipt = ledger.charge_operation(user, operation)?;
        let mut response = LedgerResponse::success(
            format!("Charged {} credit(s) for {operation}.", receipt.charged),
            Some(receipt.balance_after),
        );
        response.charged = Some(receipt.charged);
        Ok(response)
    })
}

/// Charges an explicit amount (admin adjustments, multi-page documents).
pub fn credits_charge_amount(user_id: String, amount: i64) -> LedgerResponse {
    run("credits_charge_amount", &user_id, |ledger, user| {
        let receipt = ledger.charge(user, amount)?;
        let mut response = LedgerResponse::success(
            format!("Charged {} credit(s).", receipt.charged),
            Some(receipt.balance_after),
        );
        response.charged = Some(receipt.charged);
        Ok(response)
    })
}

/// Returns credits after a failed downstream call.
pub fn credits_refund(user_id: String, amount: i64) -> LedgerResponse {
    run("credits_refund", &user_id, |ledger, user| {
        let balance = ledger.refund(user, amount)?;
        let message = if amount > 0 {
            format!("Refunded {amount} credit(s).")
        } else {
            "Nothing to refund.".to_string()
        };
        Ok(LedgerResponse::success(message, Some(balance)))
    })
}

/// Applies the monthly reset when due.
pub fn credits_reset_due(user_id: String) -> LedgerResponse {
    run("credits_reset_due", &user_id, |ledger, user| {
        match ledger.reset_if_due(user)? {
            ResetOutcome::Reset { balance } => Ok(LedgerResponse::success(
                "Monthly credits restored.",
                Some(balance),
            )),
            ResetOutcome::NotDue { next_reset_at } => {
                let balance = ledger.balance(user)?;
                Ok(LedgerResponse::success(
                    format!("Reset not due until {next_reset_at}."),
                    Some(balance),
                ))
            }
        }
    })
}

/// Creates the ledger account for a newly signed-up user.
pub fn account_open(user_id: String, email: Option<String>, plan: Option<String>) -> LedgerResponse {
    let plan = match plan.as_deref().map(Plan::parse) {
        Some(Some(plan)) => plan,
        Some(None) => {
            return LedgerResponse::failure(
                400,
                "invalid_plan",
                "account_open failed: unknown plan",
            )
        }
        None => Plan::default(),
    };
    let email = email
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty());
    run("account_open", &user_id, |ledger, user| {
        let profile = ledger.open_account(user, email, plan)?;
        let mut response = LedgerResponse::success(
            format!("Account opened on {} plan.", profile.plan),
            Some(profile.credits),
        );
        response.http_status = 201;
        Ok(response)
    })
}

/// Counts one processed document against the monthly allotment.
pub fn document_consume(user_id: String) -> LedgerResponse {
    run("document_consume", &user_id, |ledger, user| {
        let used = ledger.consume_document(user)?;
        let mut response = LedgerResponse::success("Document counted.", None);
        response.documents_used = Some(used);
        Ok(response)
    })
}

/// Lists recent balance mutations.
pub fn credits_history(user_id: String, limit: Option<u32>) -> CreditHistoryResponse {
    let applied_limit = normalize_history_limit(limit);
    let response = run("credits_history", &user_id, |ledger, user| {
        ledger.history(user, applied_limit).map(Ok)
    });
    match response {
        Ok(events) => CreditHistoryResponse {
            ok: true,
            http_status: 200,
            error_code: None,
            message: format!("Found {} event(s).", events.len()),
            items: events.into_iter().map(to_history_item).collect(),
            applied_limit,
        },
        Err(failure) => CreditHistoryResponse {
            ok: false,
            http_status: failure.http_status,
            error_code: failure.error_code,
            message: failure.message,
            items: Vec::new(),
            applied_limit,
        },
    }
}

fn http_status_for(err: &LedgerError) -> u16 {
    match err {
        LedgerError::InvalidAmount(_) | LedgerError::BalanceOverflow { .. } => 400,
        LedgerError::InsufficientCredits { .. } | LedgerError::DocumentQuotaExceeded { .. } => 402,
        LedgerError::ProfileNotFound(_) => 404,
        LedgerError::AccountExists(_) | LedgerError::ConcurrentUpdate { .. } => 409,
        LedgerError::Repo(_) => 500,
    }
}

fn normalize_history_limit(limit: Option<u32>) -> u32 {
    match limit {
        Some(0) | None => HISTORY_DEFAULT_LIMIT,
        Some(value) => value.min(HISTORY_LIMIT_MAX),
    }
}

fn resolve_settings() -> &'static LedgerSettings {
    LEDGER_SETTINGS.get_or_init(|| {
        let db_path = std::env::var(LEDGER_DB_ENV)
            .ok()
            .map(|raw| raw.trim().to_string())
            .filter(|raw| !raw.is_empty())
            .map_or_else(
                || std::env::temp_dir().join(LEDGER_DB_FILE_NAME),
                PathBuf::from,
            );
        LedgerSettings {
            db_path,
            config: LedgerConfig::default(),
        }
    })
}

/// Output of [`run`]: the call's value or a ready failure envelope.
trait Envelope: Sized {
    fn wrap(failure: LedgerResponse) -> Self;
}

impl Envelope for LedgerResponse {
    fn wrap(failure: LedgerResponse) -> Self {
        failure
    }
}

impl<T> Envelope for Result<T, LedgerResponse> {
    fn wrap(failure: LedgerResponse) -> Self {
        Err(failure)
    }
}

fn run<T: Envelope>(
    operation: &str,
    user_id: &str,
    f: impl FnOnce(&CreditLedger<SqliteProfileRepository<'_>>, UserId) -> Result<T, LedgerError>,
) -> T {
    let Ok(user) = Uuid::parse_str(user_id.trim()) else {
        return T::wrap(LedgerResponse::failure(
            400,
            "invalid_user_id",
            format!("{operation} failed: `{}` is not a valid user id", user_id.trim()),
        ));
    };

    let settings = resolve_settings();
    let conn = match open_db(&settings.db_path) {
        Ok(conn) => conn,
        Err(err) => {
            warn!(
                "event=api_call module=api status=error operation={} error_code=db_open_failed error={}",
                operation, err
            );
            return T::wrap(LedgerResponse::failure(
                500,
                "storage_error",
                format!("{operation} failed: ledger DB open failed: {err}"),
            ));
        }
    };
    let ledger = CreditLedger::with_config(
        SqliteProfileRepository::new(&conn),
        settings.config.clone(),
    )
    .with_notifier(Arc::new(LogNotifier));

    match f(&ledger, user) {
        Ok(value) => value,
        Err(err) => T::wrap(LedgerResponse::from_ledger_error(operation, &err)),
    }
}

fn to_history_item(event: CreditEvent) -> CreditHistoryItem {
    CreditHistoryItem {
        kind: event.kind.as_str().to_string(),
        amount: event.amount,
        balance_after: event.balance_after,
        operation: event.operation.map(|operation| operation.as_str().to_string()),
        created_at: event.created_at,
    }
}
