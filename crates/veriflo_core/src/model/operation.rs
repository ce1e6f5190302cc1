//! Metered operations and their credit prices.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// A user-facing action that consumes credits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Structured data extraction from one invoice or receipt.
    Extraction,
    /// One chat message against spreadsheet data.
    ChatMessage,
    /// Spreadsheet analysis run.
    Analysis,
    /// Row enrichment request.
    Enrichment,
    /// One workflow execution.
    WorkflowRun,
}

impl Operation {
    /// Credits charged per invocation.
    pub fn cost(self) -> i64 {
        match self {
            Self::Extraction => 10,
            Self::ChatMessage => 1,
            Self::Analysis => 5,
            Self::Enrichment => 2,
            Self::WorkflowRun => 5,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Extraction => "extraction",
            Self::ChatMessage => "chat_message",
            Self::Analysis => "analysis",
            Self::Enrichment => "enrichment",
            Self::WorkflowRun => "workflow_run",
        }
    }

    /// Parses an operation name. Accepts `-` as a separator alias for `_`.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "extraction" => Some(Self::Extraction),
            "chat_message" => Some(Self::ChatMessage),
            "analysis" => Some(Self::Analysis),
            "enrichment" => Some(Self::Enrichment),
            "workflow_run" => Some(Self::WorkflowRun),
            _ => None,
        }
    }
}

impl Display for Operation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
