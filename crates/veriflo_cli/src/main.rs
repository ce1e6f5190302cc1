//! Operator CLI for the credit ledger.
//!
//! # Responsibility
//! - Inspect and adjust balances from a shell.
//! - Run the monthly reset batch (cron entry point).
//!
//! Every command prints one JSON document on stdout.

use anyhow::Context;
use clap::{Parser, Subcommand};
use log::info;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;
use veriflo_core::db::open_db;
use veriflo_core::{
    default_log_level, init_logging, now_epoch_ms, CreditLedger, LedgerConfig, LogNotifier,
    Operation, Plan, SqliteProfileRepository,
};

/// Top-level CLI parser for the `veriflo` binary.
#[derive(Debug, Parser)]
#[command(name = "veriflo", version, about = "Veriflo credit ledger operator tool")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Ledger SQLite database file
    #[arg(long, global = true, env = "VERIFLO_DB_PATH", default_value = "veriflo_ledger.sqlite3")]
    db: PathBuf,

    /// JSON ledger config (max_attempts, backoff_step_ms, ...)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Absolute directory for rotated log files; logging is off when unset
    #[arg(long, global = true)]
    log_dir: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create an account with its plan allotment
    Open {
        user: Uuid,
        #[arg(long)]
        email: Option<String>,
        #[arg(long, default_value = "free", value_parser = parse_plan)]
        plan: Plan,
    },
    /// Show the current balance
    Balance { user: Uuid },
    /// Charge an explicit amount
    Charge { user: Uuid, amount: i64 },
    /// Charge the price of a metered operation
    ChargeOp {
        user: Uuid,
        #[arg(value_parser = parse_operation)]
        operation: Operation,
    },
    /// Return credits to an account
    Refund { user: Uuid, amount: i64 },
    /// Apply the monthly reset for one account when due
    Reset { user: Uuid },
    /// Apply the monthly reset for every due account
    ResetAll,
    /// Switch plan and grant its allotment
    Plan {
        user: Uuid,
        #[arg(value_parser = parse_plan)]
        plan: Plan,
    },
    /// List recent balance mutations
    History {
        user: Uuid,
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
}

#[derive(Debug, Serialize)]
struct BalanceOutput {
    user_id: Uuid,
    balance: i64,
}

#[derive(Debug, Serialize)]
struct PlanOutput {
    user_id: Uuid,
    plan: Plan,
    balance: i64,
}

fn main() {
    if let Err(error) = run() {
        eprintln!("veriflo error: {error:#}");
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    if let Some(log_dir) = cli.log_dir.as_deref() {
        init_logging(default_log_level(), log_dir)
            .map_err(anyhow::Error::msg)
            .context("failed to initialize logging")?;
    }

    let config = load_config(cli.config.as_deref())?;
    let conn = open_db(&cli.db)
        .with_context(|| format!("failed to open ledger at `{}`", cli.db.display()))?;
    let ledger = CreditLedger::with_config(SqliteProfileRepository::new(&conn), config)
        .with_notifier(Arc::new(LogNotifier));

    let output = match cli.command {
        Command::Open { user, email, plan } => {
            serde_json::to_value(ledger.open_account(user, email, plan)?)?
        }
        Command::Balance { user } => serde_json::to_value(BalanceOutput {
            user_id: user,
            balance: ledger.balance(user)?,
        })?,
        Command::Charge { user, amount } => serde_json::to_value(ledger.charge(user, amount)?)?,
        Command::ChargeOp { user, operation } => {
            serde_json::to_value(ledger.charge_operation(user, operation)?)?
        }
        Command::Refund { user, amount } => serde_json::to_value(BalanceOutput {
            user_id: user,
            balance: ledger.refund(user, amount)?,
        })?,
        Command::Reset { user } => serde_json::to_value(ledger.reset_if_due(user)?)?,
        Command::ResetAll => {
            let summary = ledger.reset_all_due_at(now_epoch_ms())?;
            info!(
                "event=cli_reset_all module=cli status=ok examined={} reset={} failed={}",
                summary.examined, summary.reset, summary.failed
            );
            serde_json::to_value(summary)?
        }
        Command::Plan { user, plan } => serde_json::to_value(PlanOutput {
            user_id: user,
            plan,
            balance: ledger.change_plan(user, plan)?,
        })?,
        Command::History { user, limit } => serde_json::to_value(ledger.history(user, limit)?)?,
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn load_config(path: Option<&Path>) -> anyhow::Result<LedgerConfig> {
    let Some(path) = path else {
        return Ok(LedgerConfig::default());
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config `{}`", path.display()))?;
    LedgerConfig::from_json_str(&raw)
        .with_context(|| format!("invalid config `{}`", path.display()))
}

fn parse_plan(value: &str) -> Result<Plan, String> {
    Plan::parse(value)
        .ok_or_else(|| format!("unknown plan `{value}`; expected free|starter|pro|enterprise"))
}

fn parse_operation(value: &str) -> Result<Operation, String> {
    Operation::parse(value).ok_or_else(|| {
        format!(
            "unknown operation `{value}`; expected extraction|chat_message|analysis|enrichment|workflow_run"
        )
    })
}
