//! Host-facing credit ledger API.
//! Web handlers call these functions and serialize the returned envelopes.

pub mod api;

pub use api::{
    account_open, configure, core_version, credits_balance, credits_charge,
    credits_charge_amount, credits_history, credits_refund, credits_reset_due,
    document_consume, init_logging, ping, CreditHistoryItem, CreditHistoryResponse,
    LedgerResponse,
};
