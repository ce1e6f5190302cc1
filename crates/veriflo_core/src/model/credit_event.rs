//! Audit trail entries for balance mutations.

use crate::model::operation::Operation;
use crate::model::profile::UserId;
use serde::{Deserialize, Serialize};

/// What kind of mutation produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditEventKind {
    Charge,
    Refund,
    Reset,
    /// Negative stored balance corrected to zero.
    Clamp,
    PlanChange,
}

impl CreditEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Charge => "charge",
            Self::Refund => "refund",
            Self::Reset => "reset",
            Self::Clamp => "clamp",
            Self::PlanChange => "plan_change",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "charge" => Some(Self::Charge),
            "refund" => Some(Self::Refund),
            "reset" => Some(Self::Reset),
            "clamp" => Some(Self::Clamp),
            "plan_change" => Some(Self::PlanChange),
            _ => None,
        }
    }
}

/// One recorded balance mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditEvent {
    /// Storage row id; `None` before persistence.
    pub id: Option<i64>,
    pub user_id: UserId,
    pub kind: CreditEventKind,
    /// Signed delta for charge/refund, granted allotment for reset.
    pub amount: i64,
    pub balance_after: i64,
    /// Metered operation that caused a charge, when known.
    pub operation: Option<Operation>,
    /// Unix epoch milliseconds.
    pub created_at: i64,
}

impl CreditEvent {
    pub fn new(
        user_id: UserId,
        kind: CreditEventKind,
        amount: i64,
        balance_after: i64,
        created_at: i64,
    ) -> Self {
        Self {
            id: None,
            user_id,
            kind,
            amount,
            balance_after,
            operation: None,
            created_at,
        }
    }

    pub fn with_operation(mut self, operation: Option<Operation>) -> Self {
        self.operation = operation;
        self
    }
}
