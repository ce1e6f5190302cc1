//! Profile repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Provide the compare-and-swap, guarded-decrement and atomic-increment
//!   primitives the ledger builds on.
//! - Persist and list the credit audit trail.
//!
//! # Invariants
//! - `compare_and_swap_balance` changes a row only when the stored balance
//!   equals the caller's expected value.
//! - `reset_if_due` only fires when the stored `last_reset_at` is older than
//!   the caller's cutoff, so two racing resets grant the allotment once.
//! - Read paths reject unknown plan/kind names instead of masking them.

use crate::db::DbError;
use crate::model::credit_event::{CreditEvent, CreditEventKind};
use crate::model::operation::Operation;
use crate::model::plan::Plan;
use crate::model::profile::{Profile, ProfileValidationError, UserId};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

const PROFILE_SELECT_SQL: &str = "SELECT
    user_id,
    email,
    plan,
    credits,
    documents_used,
    last_reset_at,
    created_at,
    updated_at
FROM profiles";

const NOW_MS_SQL: &str = "(strftime('%s', 'now') * 1000)";

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error for profile persistence and balance operations.
#[derive(Debug)]
pub enum RepoError {
    Validation(ProfileValidationError),
    Db(DbError),
    NotFound(UserId),
    Duplicate(UserId),
    InvalidData(String),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::NotFound(id) => write!(f, "profile not found: {id}"),
            Self::Duplicate(id) => write!(f, "profile already exists: {id}"),
            Self::InvalidData(message) => write!(f, "invalid persisted profile data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Db(err) => Some(err),
            Self::NotFound(_) | Self::Duplicate(_) | Self::InvalidData(_) => None,
        }
    }
}

impl From<ProfileValidationError> for RepoError {
    fn from(value: ProfileValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Storage contract for balances and the credit audit trail.
///
/// Implementations must make each balance method a single atomic step on the
/// underlying store.
pub trait ProfileRepository {
    fn create_profile(&self, profile: &Profile) -> RepoResult<UserId>;
    fn get_profile(&self, id: UserId) -> RepoResult<Option<Profile>>;
    fn list_profiles(&self) -> RepoResult<Vec<Profile>>;

    /// Returns the stored balance exactly as persisted, negative included.
    fn read_balance(&self, id: UserId) -> RepoResult<i64>;

    /// Sets `credits = new` only when the stored value equals `expected`.
    ///
    /// Returns `false` when no row changed (lost race). `new` is clamped to
    /// zero before it is written.
    fn compare_and_swap_balance(&self, id: UserId, expected: i64, new: i64) -> RepoResult<bool>;

    /// Subtracts `amount` only when the stored balance covers it.
    ///
    /// Returns the new balance, or `None` when the guard rejected the write.
    fn decrement_if_sufficient(&self, id: UserId, amount: i64) -> RepoResult<Option<i64>>;

    /// Atomically adds `amount`, treating a negative stored value as zero.
    ///
    /// Returns `None` without writing when `amount` is negative or the sum
    /// would not fit in an `i64`.
    fn increment_balance(&self, id: UserId, amount: i64) -> RepoResult<Option<i64>>;

    /// Grants `allotment` when `last_reset_at` is unset or `<= cutoff`.
    ///
    /// Returns `false` when the guard rejected the write.
    fn reset_if_due(
        &self,
        id: UserId,
        allotment: i64,
        now_ms: i64,
        cutoff_ms: i64,
    ) -> RepoResult<bool>;

    /// Lists accounts whose reset guard would pass for `cutoff`.
    fn list_due_for_reset(&self, cutoff_ms: i64) -> RepoResult<Vec<UserId>>;

    /// Switches plan and grants its allotment, starting a new reset window.
    fn set_plan(&self, id: UserId, plan: Plan, allotment: i64, now_ms: i64) -> RepoResult<()>;

    /// Increments `documents_used` while it stays below `limit`.
    ///
    /// `limit = None` means unlimited. Returns the new count, or `None` when
    /// the guard rejected the write.
    fn consume_document(&self, id: UserId, limit: Option<i64>) -> RepoResult<Option<i64>>;

    fn record_event(&self, event: &CreditEvent) -> RepoResult<i64>;

    /// Lists events for one account, newest first.
    fn list_events(&self, id: UserId, limit: u32) -> RepoResult<Vec<CreditEvent>>;
}

/// SQLite-backed profile repository.
pub struct SqliteProfileRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteProfileRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl ProfileRepository for SqliteProfileRepository<'_> {
    fn create_profile(&self, profile: &Profile) -> RepoResult<UserId> {
        profile.validate()?;

        let result = self.conn.execute(
            "INSERT INTO profiles (
                user_id,
                email,
                plan,
                credits,
                documents_used,
                last_reset_at,
                created_at,
                updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8);",
            params![
                profile.user_id.to_string(),
                profile.email.as_deref().map(str::trim),
                profile.plan.as_str(),
                profile.credits.max(0),
                profile.documents_used,
                profile.last_reset_at,
                profile.created_at,
                profile.updated_at,
            ],
        );

        match result {
            Ok(_) => Ok(profile.user_id),
            Err(err) if is_constraint_violation(&err) => Err(RepoError::Duplicate(profile.user_id)),
            Err(err) => Err(err.into()),
        }
    }

    fn get_profile(&self, id: UserId) -> RepoResult<Option<Profile>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{PROFILE_SELECT_SQL} WHERE user_id = ?1;"))?;
        let mut rows = stmt.query([id.to_string()])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_profile_row(row)?));
        }

        Ok(None)
    }

    fn list_profiles(&self) -> RepoResult<Vec<Profile>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{PROFILE_SELECT_SQL} ORDER BY created_at ASC, user_id ASC;"))?;
        let mut rows = stmt.query([])?;
        let mut profiles = Vec::new();
        while let Some(row) = rows.next()? {
            profiles.push(parse_profile_row(row)?);
        }

        Ok(profiles)
    }

    fn read_balance(&self, id: UserId) -> RepoResult<i64> {
        self.conn
            .query_row(
                "SELECT credits FROM profiles WHERE user_id = ?1;",
                [id.to_string()],
                |row| row.get::<_, i64>(0),
            )
            .optional()?
            .ok_or(RepoError::NotFound(id))
    }

    fn compare_and_swap_balance(&self, id: UserId, expected: i64, new: i64) -> RepoResult<bool> {
        let changed = self.conn.execute(
            &format!(
                "UPDATE profiles
                 SET
                    credits = ?1,
                    updated_at = {NOW_MS_SQL}
                 WHERE user_id = ?2 AND credits = ?3;"
            ),
            params![new.max(0), id.to_string(), expected],
        )?;

        Ok(changed == 1)
    }

    fn decrement_if_sufficient(&self, id: UserId, amount: i64) -> RepoResult<Option<i64>> {
        let balance = self
            .conn
            .query_row(
                &format!(
                    "UPDATE profiles
                     SET
                        credits = MAX(credits - ?1, 0),
                        updated_at = {NOW_MS_SQL}
                     WHERE user_id = ?2 AND credits >= ?1
                     RETURNING credits;"
                ),
                params![amount, id.to_string()],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;

        Ok(balance)
    }

    fn increment_balance(&self, id: UserId, amount: i64) -> RepoResult<Option<i64>> {
        // SQLite turns an overflowing integer sum into REAL, so the guard
        // must reject it before the write.
        let balance = self
            .conn
            .query_row(
                &format!(
                    "UPDATE profiles
                     SET
                        credits = MAX(credits, 0) + ?1,
                        updated_at = {NOW_MS_SQL}
                     WHERE user_id = ?2
                       AND ?1 >= 0
                       AND MAX(credits, 0) <= {max} - ?1
                     RETURNING credits;",
                    max = i64::MAX
                ),
                params![amount, id.to_string()],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;

        if balance.is_none() {
            // Distinguish a rejected sum from a missing row.
            self.read_balance(id)?;
        }
        Ok(balance)
    }

    fn reset_if_due(
        &self,
        id: UserId,
        allotment: i64,
        now_ms: i64,
        cutoff_ms: i64,
    ) -> RepoResult<bool> {
        let changed = self.conn.execute(
            "UPDATE profiles
             SET
                credits = ?1,
                documents_used = 0,
                last_reset_at = ?2,
                updated_at = ?2
             WHERE user_id = ?3
               AND (last_reset_at IS NULL OR last_reset_at <= ?4);",
            params![allotment.max(0), now_ms, id.to_string(), cutoff_ms],
        )?;

        Ok(changed == 1)
    }

    fn list_due_for_reset(&self, cutoff_ms: i64) -> RepoResult<Vec<UserId>> {
        let mut stmt = self.conn.prepare(
            "SELECT user_id
             FROM profiles
             WHERE last_reset_at IS NULL OR last_reset_at <= ?1
             ORDER BY user_id ASC;",
        )?;
        let mut rows = stmt.query([cutoff_ms])?;
        let mut ids = Vec::new();
        while let Some(row) = rows.next()? {
            let text: String = row.get(0)?;
            ids.push(parse_user_id(&text)?);
        }

        Ok(ids)
    }

    fn set_plan(&self, id: UserId, plan: Plan, allotment: i64, now_ms: i64) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE profiles
             SET
                plan = ?1,
                credits = ?2,
                documents_used = 0,
                last_reset_at = ?3,
                updated_at = ?3
             WHERE user_id = ?4;",
            params![plan.as_str(), allotment.max(0), now_ms, id.to_string()],
        )?;

        if changed == 0 {
            return Err(RepoError::NotFound(id));
        }

        Ok(())
    }

    fn consume_document(&self, id: UserId, limit: Option<i64>) -> RepoResult<Option<i64>> {
        let used = self
            .conn
            .query_row(
                &format!(
                    "UPDATE profiles
                     SET
                        documents_used = documents_used + 1,
                        updated_at = {NOW_MS_SQL}
                     WHERE user_id = ?1
                       AND (?2 IS NULL OR documents_used < ?2)
                     RETURNING documents_used;"
                ),
                params![id.to_string(), limit],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;

        Ok(used)
    }

    fn record_event(&self, event: &CreditEvent) -> RepoResult<i64> {
        self.conn.execute(
            "INSERT INTO credit_events (
                user_id,
                kind,
                amount,
                balance_after,
                operation,
                created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6);",
            params![
                event.user_id.to_string(),
                event.kind.as_str(),
                event.amount,
                event.balance_after,
                event.operation.map(Operation::as_str),
                event.created_at,
            ],
        )?;

        Ok(self.conn.last_insert_rowid())
    }

    fn list_events(&self, id: UserId, limit: u32) -> RepoResult<Vec<CreditEvent>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, kind, amount, balance_after, operation, created_at
             FROM credit_events
             WHERE user_id = ?1
             ORDER BY created_at DESC, id DESC
             LIMIT ?2;",
        )?;
        let mut rows = stmt.query(params![id.to_string(), i64::from(limit)])?;
        let mut events = Vec::new();
        while let Some(row) = rows.next()? {
            events.push(parse_event_row(row)?);
        }

        Ok(events)
    }
}

fn parse_profile_row(row: &Row<'_>) -> RepoResult<Profile> {
    let user_id_text: String = row.get("user_id")?;
    let user_id = parse_user_id(&user_id_text)?;

    let plan_text: String = row.get("plan")?;
    let plan = Plan::parse(&plan_text).ok_or_else(|| {
        RepoError::InvalidData(format!("invalid plan `{plan_text}` in profiles.plan"))
    })?;

    let profile = Profile {
        user_id,
        email: row.get("email")?,
        plan,
        credits: row.get("credits")?,
        documents_used: row.get("documents_used")?,
        last_reset_at: row.get("last_reset_at")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    };
    profile.validate()?;
    Ok(profile)
}

fn parse_event_row(row: &Row<'_>) -> RepoResult<CreditEvent> {
    let user_id_text: String = row.get("user_id")?;
    let kind_text: String = row.get("kind")?;
    let kind = CreditEventKind::parse(&kind_text).ok_or_else(|| {
        RepoError::InvalidData(format!("invalid kind `{kind_text}` in credit_events.kind"))
    })?;
    let operation = match row.get::<_, Option<String>>("operation")? {
        Some(value) => Some(Operation::parse(&value).ok_or_else(|| {
            RepoError::InvalidData(format!(
                "invalid operation `{value}` in credit_events.operation"
            ))
        })?),
        None => None,
    };

    Ok(CreditEvent {
        id: Some(row.get("id")?),
        user_id: parse_user_id(&user_id_text)?,
        kind,
        amount: row.get("amount")?,
        balance_after: row.get("balance_after")?,
        operation,
        created_at: row.get("created_at")?,
    })
}

fn parse_user_id(value: &str) -> RepoResult<UserId> {
    Uuid::parse_str(value)
        .map_err(|_| RepoError::InvalidData(format!("invalid user id `{value}`")))
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(inner, _) if inner.code == ErrorCode::ConstraintViolation
    )
}
