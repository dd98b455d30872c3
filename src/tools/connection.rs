//! Connection management tools.
//!
//! This module implements `create_connection`, `list_connections`,
//! `get_connection`, `delete_connection`, `sync_status` and
//! `resync_connection`.

use crate::engine::QueryEngine;
use crate::error::EngineResult;
use crate::models::{ConnectionProfile, NewConnection, SyncStatus};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Input for the create_connection tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct CreateConnectionInput {
    /// Account registering the connection. Default: the server's default owner
    #[serde(default)]
    pub owner_id: Option<String>,
    /// Display name for the connection
    pub name: String,
    /// PostgreSQL host name or IP
    pub host: String,
    /// PostgreSQL port. Default: 5432
    #[serde(default)]
    pub port: Option<u16>,
    /// Database name
    pub database: String,
    /// Database user
    pub username: String,
    /// Database password (never returned)
    pub password: String,
}

/// Input for the list_connections tool.
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct ListConnectionsInput {
    /// Owner whose connections to list. Default: the server's default owner
    #[serde(default)]
    pub owner_id: Option<String>,
}

/// Input for tools addressing a single connection.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ConnectionIdInput {
    /// Connection ID from create_connection or list_connections
    pub connection_id: String,
}

/// A connection together with its sync state.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct ConnectionOutput {
    pub connection: ConnectionProfile,
    pub sync_status: SyncStatus,
}

/// Output from the list_connections tool.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct ListConnectionsOutput {
    pub connections: Vec<ConnectionProfile>,
    pub count: usize,
}

/// Output from the delete_connection tool.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct DeleteConnectionOutput {
    pub connection_id: String,
    pub deleted: bool,
}

/// Output from the sync_status and resync_connection tools.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct SyncStatusOutput {
    pub connection_id: String,
    pub status: SyncStatus,
}

/// Handler for connection management tools.
pub struct ConnectionToolHandler {
    engine: Arc<QueryEngine>,
    default_owner: String,
}

impl ConnectionToolHandler {
    pub fn new(engine: Arc<QueryEngine>, default_owner: impl Into<String>) -> Self {
        Self {
            engine,
            default_owner: default_owner.into(),
        }
    }

    fn owner_or_default(&self, owner_id: Option<String>) -> String {
        owner_id
            .map(|o| o.trim().to_string())
            .filter(|o| !o.is_empty())
            .unwrap_or_else(|| self.default_owner.clone())
    }

    /// Register a connection; its schema sync starts in the background.
    pub async fn create_connection(
        &self,
        input: CreateConnectionInput,
    ) -> EngineResult<ConnectionOutput> {
        let request = NewConnection {
            owner_id: self.owner_or_default(input.owner_id),
            name: input.name,
            host: input.host,
            port: input.port,
            database: input.database,
            username: input.username,
            password: input.password,
        };
        let connection = self.engine.create_connection(request).await?;
        let sync_status = self.engine.sync_status(&connection.id).await?;
        Ok(ConnectionOutput {
            connection,
            sync_status,
        })
    }

    pub async fn list_connections(
        &self,
        input: ListConnectionsInput,
    ) -> EngineResult<ListConnectionsOutput> {
        let owner = self.owner_or_default(input.owner_id);
        let connections = self.engine.list_connections(&owner).await?;
        let count = connections.len();
        Ok(ListConnectionsOutput { connections, count })
    }

    pub async fn get_connection(&self, input: ConnectionIdInput) -> EngineResult<ConnectionOutput> {
        let connection = self.engine.get_connection(&input.connection_id).await?;
        let sync_status = self.engine.sync_status(&connection.id).await?;
        Ok(ConnectionOutput {
            connection,
            sync_status,
        })
    }

    pub async fn delete_connection(
        &self,
        input: ConnectionIdInput,
    ) -> EngineResult<DeleteConnectionOutput> {
        let profile = self.engine.delete_connection(&input.connection_id).await?;
        Ok(DeleteConnectionOutput {
            connection_id: profile.id,
            deleted: true,
        })
    }

    pub async fn sync_status(&self, input: ConnectionIdInput) -> EngineResult<SyncStatusOutput> {
        let status = self.engine.sync_status(&input.connection_id).await?;
        Ok(SyncStatusOutput {
            connection_id: input.connection_id,
            status,
        })
    }

    pub async fn resync_connection(
        &self,
        input: ConnectionIdInput,
    ) -> EngineResult<SyncStatusOutput> {
        let status = self.engine.resync(&input.connection_id).await?;
        info!(connection_id = %input.connection_id, "Resync scheduled");
        Ok(SyncStatusOutput {
            connection_id: input.connection_id,
            status,
        })
    }
}
