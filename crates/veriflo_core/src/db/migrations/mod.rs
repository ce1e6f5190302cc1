//! Ledger schema steps and the upgrade runner.
//!
//! Steps are plain SQL files applied in version order inside one IMMEDIATE
//! transaction. After each step `PRAGMA user_version` is bumped, so a
//! partially upgraded file never becomes visible to other connections.

use crate::db::{DbError, DbResult};
use log::{debug, info};
use rusqlite::{Connection, TransactionBehavior};

#[derive(Debug, Clone, Copy)]
struct SchemaStep {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

const SCHEMA_STEPS: &[SchemaStep] = &[
    SchemaStep {
        version: 1,
        name: "profiles",
        sql: include_str!("0001_profiles.sql"),
    },
    SchemaStep {
        version: 2,
        name: "credit_events",
        sql: include_str!("0002_credit_events.sql"),
    },
];

/// Schema version this build writes and understands.
pub fn latest_version() -> u32 {
    SCHEMA_STEPS.last().map_or(0, |step| step.version)
}

/// Brings the ledger schema on `conn` up to [`latest_version`].
///
/// # Errors
/// - `UnsupportedSchemaVersion` when the file is ahead of this build.
/// - `Migration` naming the failed step; nothing from the run is kept.
pub fn apply_migrations(conn: &mut Connection) -> DbResult<()> {
    let latest = latest_version();
    if ensure_supported(read_schema_version(conn)?, latest)? == latest {
        return Ok(());
    }

    // Another connection may have upgraded while we waited for the lock.
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let from_version = ensure_supported(read_schema_version(&tx)?, latest)?;
    let pending = SCHEMA_STEPS
        .iter()
        .filter(|step| step.version > from_version);
    for step in pending {
        tx.execute_batch(step.sql)
            .and_then(|()| tx.execute_batch(&format!("PRAGMA user_version = {};", step.version)))
            .map_err(|source| DbError::Migration {
                version: step.version,
                source,
            })?;
        debug!(
            "event=db_migrate_step module=db status=ok version={} name={}",
            step.version, step.name
        );
    }
    tx.commit()?;

    if from_version < latest {
        info!(
            "event=db_migrate module=db status=ok from_version={} to_version={}",
            from_version, latest
        );
    }
    Ok(())
}

fn ensure_supported(db_version: u32, latest: u32) -> DbResult<u32> {
    if db_version > latest {
        return Err(DbError::UnsupportedSchemaVersion {
            db_version,
            latest_supported: latest,
        });
    }
    Ok(db_version)
}

fn read_schema_version(conn: &Connection) -> DbResult<u32> {
    Ok(conn.query_row("PRAGMA user_version;", [], |row| row.get::<_, u32>(0))?)
}
