//! Domain model for the credit ledger.
//!
//! # Responsibility
//! - Define the records shared by repository and service layers.
//! - Hold the static plan and operation pricing tables.
//!
//! # Invariants
//! - Every account is identified by a stable `UserId`.
//! - Plans and operations have one canonical lowercase storage name.

pub mod credit_event;
pub mod operation;
pub mod plan;
pub mod profile;
