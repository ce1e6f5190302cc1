//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define balance-oriented data access contracts.
//! - Isolate SQLite query details from ledger orchestration.
//!
//! # Invariants
//! - Every balance write is a single conditional or atomic statement; the
//!   repository never does read-modify-write on its own.
//! - Repository writes never persist a negative balance.
//! - Repository APIs return semantic errors (`NotFound`, `Duplicate`) in
//!   addition to DB transport errors.

pub mod profile_repo;
