//! The `ask` tool: natural-language questions answered from the database.

use crate::engine::QueryEngine;
use crate::error::EngineResult;
use crate::models::AskResponse;
use schemars::JsonSchema;
use serde::Deserialize;
use std::sync::Arc;

/// Input for the ask tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct AskInput {
    /// Connection ID from create_connection or list_connections
    pub connection_id: String,
    /// Question in plain language, e.g. "How many orders were placed last week?"
    pub question: String,
}

/// Handler for the ask tool.
pub struct AskToolHandler {
    engine: Arc<QueryEngine>,
}

impl AskToolHandler {
    pub fn new(engine: Arc<QueryEngine>) -> Self {
        Self { engine }
    }

    pub async fn ask(&self, input: AskInput) -> EngineResult<AskResponse> {
        self.engine.ask(&input.connection_id, &input.question).await
    }
}
