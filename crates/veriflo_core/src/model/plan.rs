//! Subscription plans and their monthly allotments.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Subscription tier of an account.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Plan {
    #[default]
    Free,
    Starter,
    Pro,
    Enterprise,
}

/// Monthly allotment granted by a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlanLimits {
    /// Credits granted on every monthly reset.
    pub monthly_credits: i64,
    /// Documents that may be processed per month. `None` means unlimited.
    pub monthly_documents: Option<i64>,
}

const FREE_LIMITS: PlanLimits = PlanLimits {
    monthly_credits: 200,
    monthly_documents: Some(10),
};
const STARTER_LIMITS: PlanLimits = PlanLimits {
    monthly_credits: 1_000,
    monthly_documents: Some(100),
};
const PRO_LIMITS: PlanLimits = PlanLimits {
    monthly_credits: 5_000,
    monthly_documents: Some(500),
};
const ENTERPRISE_LIMITS: PlanLimits = PlanLimits {
    monthly_credits: 25_000,
    monthly_documents: None,
};

impl Plan {
    pub const ALL: [Plan; 4] = [Plan::Free, Plan::Starter, Plan::Pro, Plan::Enterprise];

    /// Returns the static allotment for this plan.
    pub fn limits(self) -> PlanLimits {
        match self {
            Self::Free => FREE_LIMITS,
            Self::Starter => STARTER_LIMITS,
            Self::Pro => PRO_LIMITS,
            Self::Enterprise => ENTERPRISE_LIMITS,
        }
    }

    /// Canonical storage name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Starter => "starter",
            Self::Pro => "pro",
            Self::Enterprise => "enterprise",
        }
    }

    /// Parses a plan name, ignoring case and surrounding whitespace.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "free" => Some(Self::Free),
            "starter" => Some(Self::Starter),
            "pro" => Some(Self::Pro),
            "enterprise" => Some(Self::Enterprise),
            _ => None,
        }
    }
}

impl Display for Plan {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
