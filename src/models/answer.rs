//! Question-answering results.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::retrieval::{Relationship, TableDescriptor};

/// Rows rendered into the narrative answer.
pub const NARRATIVE_ROW_LIMIT: usize = 10;
/// Rows returned in the structured payload.
pub const PAYLOAD_ROW_LIMIT: usize = 50;

pub type Row = serde_json::Map<String, JsonValue>;

/// Result of running a statement against the target database.
///
/// Driver failures are data, not errors.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Success {
        /// Column names in select-list order.
        columns: Vec<String>,
        rows: Vec<Row>,
        row_count: usize,
    },
    Failure {
        error: String,
    },
}

impl ExecutionOutcome {
    pub fn failure(error: impl Into<String>) -> Self {
        Self::Failure {
            error: error.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct QueryResultPayload {
    pub row_count: usize,
    /// First rows only, capped at 50.
    pub rows: Vec<Row>,
}

impl QueryResultPayload {
    pub fn from_rows(rows: &[Row], row_count: usize) -> Self {
        Self {
            row_count,
            rows: rows.iter().take(PAYLOAD_ROW_LIMIT).cloned().collect(),
        }
    }
}

/// Answer to one natural-language question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AskResponse {
    /// Narrative answer text.
    pub response: String,
    pub relevant_tables: Vec<TableDescriptor>,
    pub relationships: Vec<Relationship>,
    pub matches_count: usize,
    pub sql_query: Option<String>,
    pub query_result: Option<QueryResultPayload>,
    pub error: Option<String>,
}
