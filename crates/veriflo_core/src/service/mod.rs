//! Ledger use-case services.
//!
//! # Responsibility
//! - Orchestrate repository primitives into charge/refund/reset use cases.
//! - Keep API/CLI layers decoupled from storage details.

pub mod credit_service;
pub mod notify;
pub mod retry;
