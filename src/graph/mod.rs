//! Property-graph mirror of schema snapshots.
//!
//! Nodes are `Table` and `Column`, keyed by `(connectionId, tableName[,
//! columnName])`. Edges are `HAS_COLUMN`, `FOREIGN_KEY` and
//! `SEMANTICALLY_RELATED`. Every write is a merge, so replaying a sync
//! never duplicates anything.

pub mod memory;
pub mod neo4j;
pub mod sync;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::EngineResult;
use crate::models::ColumnRole;

pub use memory::MemoryGraphStore;
pub use neo4j::Neo4jGraphStore;
pub use sync::{GraphSyncReport, GraphSynchronizer};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableNode {
    pub connection_id: String,
    pub table_name: String,
    pub primary_key: Option<String>,
    pub table_type: String,
    pub connection_name: String,
    pub db_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnNode {
    pub connection_id: String,
    pub table_name: String,
    pub column_name: String,
    pub data_type: String,
    pub is_primary_key: bool,
    pub is_foreign_key: bool,
    pub is_nullable: bool,
    /// Classifier role, stored as `columnType`.
    #[serde(rename = "columnType")]
    pub role: ColumnRole,
    pub related_table: Option<String>,
}

/// `FOREIGN_KEY` edge between two column nodes of one connection.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ForeignKeyEdge {
    pub from_table: String,
    pub from_column: String,
    pub to_table: String,
    pub to_column: String,
}

/// Column expansion for one retrieved table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpansionRequest {
    pub connection_id: String,
    pub table_name: String,
    /// Columns already matched by similarity search.
    pub existing: Vec<String>,
    /// Also return every identifier-role column.
    pub include_identifiers: bool,
}

/// Column returned by graph expansion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphColumn {
    pub column_name: String,
    pub data_type: Option<String>,
    pub role: ColumnRole,
    pub is_primary_key: bool,
    pub is_foreign_key: bool,
    pub related_table: Option<String>,
}

/// Entity counts for one connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GraphStats {
    pub tables: usize,
    pub columns: usize,
    pub has_column: usize,
    pub foreign_keys: usize,
    pub semantic_links: usize,
}

#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn merge_table(&self, node: &TableNode) -> EngineResult<()>;

    /// Merge a column node and the `HAS_COLUMN` edge from its table.
    async fn merge_column(&self, node: &ColumnNode) -> EngineResult<()>;

    /// No-op when either endpoint column is missing.
    async fn merge_foreign_key(&self, connection_id: &str, edge: &ForeignKeyEdge)
    -> EngineResult<()>;

    /// Directed `from -> to` link between two columns of one table.
    async fn merge_semantic_link(
        &self,
        connection_id: &str,
        table_name: &str,
        from_column: &str,
        to_column: &str,
    ) -> EngineResult<()>;

    /// Union of existing columns, identifier columns (when requested) and
    /// columns with a semantic link to an existing column, ordered
    /// existing first, then identifiers, then by name.
    async fn expand_columns(&self, request: &ExpansionRequest) -> EngineResult<Vec<GraphColumn>>;

    /// Delete every node and edge of one connection.
    async fn purge_connection(&self, connection_id: &str) -> EngineResult<()>;

    async fn stats(&self, connection_id: &str) -> EngineResult<GraphStats>;
}

/// Sort expansion results: existing first, then identifiers, then by name.
pub(crate) fn order_expansion(columns: &mut [GraphColumn], existing: &[String]) {
    columns.sort_by(|a, b| {
        let key = |c: &GraphColumn| {
            (
                !existing.contains(&c.column_name),
                c.role != ColumnRole::Identifier,
            )
        };
        key(a)
            .cmp(&key(b))
            .then_with(|| a.column_name.cmp(&b.column_name))
    });
}
