//! MCP service implementation using rmcp.
//!
//! `Nl2SqlService` exposes the engine's connection and question operations
//! as MCP tools through the rmcp tool macros.

use crate::engine::QueryEngine;
use crate::error::EngineError;
use crate::models::AskResponse;
use crate::tools::ask::{AskInput, AskToolHandler};
use crate::tools::connection::{
    ConnectionIdInput, ConnectionOutput, ConnectionToolHandler, CreateConnectionInput,
    DeleteConnectionOutput, ListConnectionsInput, ListConnectionsOutput, SyncStatusOutput,
};
use rmcp::Json;
use rmcp::{
    ErrorData as McpError, ServerHandler,
    handler::server::tool::ToolRouter,
    handler::server::wrapper::Parameters,
    model::{Implementation, ProtocolVersion, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct Nl2SqlService {
    engine: Arc<QueryEngine>,
    /// Owner used when a tool call does not name one
    default_owner: String,
    /// Tool router for MCP tool dispatch (auto-generated)
    tool_router: ToolRouter<Self>,
}

impl Nl2SqlService {
    pub fn new(engine: Arc<QueryEngine>, default_owner: impl Into<String>) -> Self {
        Self {
            engine,
            default_owner: default_owner.into(),
            tool_router: Self::tool_router(),
        }
    }

    pub fn engine(&self) -> &Arc<QueryEngine> {
        &self.engine
    }

    fn connections(&self) -> ConnectionToolHandler {
        ConnectionToolHandler::new(self.engine.clone(), self.default_owner.clone())
    }

    /// Trimmed connection id, or an error pointing at list_connections.
    fn validate_connection_id(&self, provided: &str) -> Result<String, McpError> {
        let trimmed = provided.trim();
        if trimmed.is_empty() {
            Err(McpError::invalid_params(
                "connection_id is required. Call list_connections first to get available connection IDs.",
                None,
            ))
        } else {
            Ok(trimmed.to_string())
        }
    }
}

#[tool_router]
impl Nl2SqlService {
    #[tool(
        description = "Register a PostgreSQL database connection.\nThe schema is introspected, embedded and mapped into the knowledge graph in the background; check progress with sync_status.\nThe password is never returned."
    )]
    async fn create_connection(
        &self,
        Parameters(input): Parameters<CreateConnectionInput>,
    ) -> Result<Json<ConnectionOutput>, McpError> {
        self.connections()
            .create_connection(input)
            .await
            .map(Json)
            .map_err(|e: EngineError| McpError::from(e))
    }

    #[tool(
        description = "List the registered connections of an owner, oldest first.\nReturns connection IDs for use with the other tools."
    )]
    async fn list_connections(
        &self,
        Parameters(input): Parameters<ListConnectionsInput>,
    ) -> Result<Json<ListConnectionsOutput>, McpError> {
        self.connections()
            .list_connections(input)
            .await
            .map(Json)
            .map_err(|e: EngineError| McpError::from(e))
    }

    #[tool(description = "Get a registered connection and its current sync status.")]
    async fn get_connection(
        &self,
        Parameters(input): Parameters<ConnectionIdInput>,
    ) -> Result<Json<ConnectionOutput>, McpError> {
        let mut input = input;
        input.connection_id = self.validate_connection_id(&input.connection_id)?;
        self.connections()
            .get_connection(input)
            .await
            .map(Json)
            .map_err(|e: EngineError| McpError::from(e))
    }

    #[tool(
        description = "Delete a connection.\nCloses its connection pool and removes its schema embeddings and graph entities."
    )]
    async fn delete_connection(
        &self,
        Parameters(input): Parameters<ConnectionIdInput>,
    ) -> Result<Json<DeleteConnectionOutput>, McpError> {
        let mut input = input;
        input.connection_id = self.validate_connection_id(&input.connection_id)?;
        self.connections()
            .delete_connection(input)
            .await
            .map(Json)
            .map_err(|e: EngineError| McpError::from(e))
    }

    #[tool(
        description = "Answer a question about a connected database in plain language.\nFinds the relevant tables, generates a single read-only SELECT, runs it and explains the result.\nReturns the narrative answer, the SQL used, the relevant tables and up to 50 result rows."
    )]
    async fn ask(
        &self,
        Parameters(input): Parameters<AskInput>,
    ) -> Result<Json<AskResponse>, McpError> {
        let mut input = input;
        input.connection_id = self.validate_connection_id(&input.connection_id)?;
        AskToolHandler::new(self.engine.clone())
            .ask(input)
            .await
            .map(Json)
            .map_err(|e: EngineError| McpError::from(e))
    }

    #[tool(
        description = "Show the schema sync state of a connection: pending, running, ready or failed."
    )]
    async fn sync_status(
        &self,
        Parameters(input): Parameters<ConnectionIdInput>,
    ) -> Result<Json<SyncStatusOutput>, McpError> {
        let mut input = input;
        input.connection_id = self.validate_connection_id(&input.connection_id)?;
        self.connections()
            .sync_status(input)
            .await
            .map(Json)
            .map_err(|e: EngineError| McpError::from(e))
    }

    #[tool(
        description = "Re-run schema introspection, indexing and graph sync for a connection.\nUse after the database schema changed. Replaces the previous embeddings."
    )]
    async fn resync_connection(
        &self,
        Parameters(input): Parameters<ConnectionIdInput>,
    ) -> Result<Json<SyncStatusOutput>, McpError> {
        let mut input = input;
        input.connection_id = self.validate_connection_id(&input.connection_id)?;
        self.connections()
            .resync_connection(input)
            .await
            .map(Json)
            .map_err(|e: EngineError| McpError::from(e))
    }
}

#[tool_handler]
impl ServerHandler for Nl2SqlService {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2025_03_26,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "nl2sql-mcp-server".to_owned(),
                title: Some("NL2SQL MCP Server".to_owned()),
                version: env!("CARGO_PKG_VERSION").to_owned(),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Ask questions about PostgreSQL databases in plain language.\n\
                \n\
                ## Workflow\n\
                1. Call `create_connection` with host, database and credentials (or `list_connections` for existing ones)\n\
                2. Wait until `sync_status` reports `ready`\n\
                3. Call `ask` with the `connection_id` and a question\n\
                \n\
                ## Notes\n\
                - Only single read-only SELECT statements are ever executed.\n\
                - After schema changes, call `resync_connection`.\n\
                - `delete_connection` removes the connection and everything indexed for it.\n\
                \n\
                ## Error: Missing connection_id\n\
                If you see \"connection_id is required\", call `list_connections` first."
                    .to_string(),
            ),
        }
    }
}
