//! In-memory graph store.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::RwLock;

use super::{
    ColumnNode, ExpansionRequest, ForeignKeyEdge, GraphColumn, GraphStats, GraphStore, TableNode,
    order_expansion,
};
use crate::error::EngineResult;
use crate::models::ColumnRole;

type TableKey = (String, String);
type ColumnKey = (String, String, String);

#[derive(Debug, Default)]
struct Graph {
    tables: BTreeMap<TableKey, TableNode>,
    columns: BTreeMap<ColumnKey, ColumnNode>,
    has_column: BTreeSet<ColumnKey>,
    foreign_keys: BTreeSet<(String, ForeignKeyEdge)>,
    /// (connection, table, from, to)
    semantic: BTreeSet<(String, String, String, String)>,
}

impl Graph {
    fn has_column_node(&self, connection_id: &str, table: &str, column: &str) -> bool {
        self.columns.contains_key(&(
            connection_id.to_string(),
            table.to_string(),
            column.to_string(),
        ))
    }
}

/// Graph store backed by ordered maps; merge semantics match the Cypher store.
#[derive(Debug, Default)]
pub struct MemoryGraphStore {
    graph: RwLock<Graph>,
}

impl MemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored column node, if any.
    pub async fn column(
        &self,
        connection_id: &str,
        table: &str,
        column: &str,
    ) -> Option<ColumnNode> {
        self.graph
            .read()
            .await
            .columns
            .get(&(
                connection_id.to_string(),
                table.to_string(),
                column.to_string(),
            ))
            .cloned()
    }
}

#[async_trait]
impl GraphStore for MemoryGraphStore {
    async fn merge_table(&self, node: &TableNode) -> EngineResult<()> {
        let key = (node.connection_id.clone(), node.table_name.clone());
        self.graph.write().await.tables.insert(key, node.clone());
        Ok(())
    }

    async fn merge_column(&self, node: &ColumnNode) -> EngineResult<()> {
        let key = (
            node.connection_id.clone(),
            node.table_name.clone(),
            node.column_name.clone(),
        );
        let mut graph = self.graph.write().await;
        graph.columns.insert(key.clone(), node.clone());
        if graph
            .tables
            .contains_key(&(node.connection_id.clone(), node.table_name.clone()))
        {
            graph.has_column.insert(key);
        }
        Ok(())
    }

    async fn merge_foreign_key(
        &self,
        connection_id: &str,
        edge: &ForeignKeyEdge,
    ) -> EngineResult<()> {
        let mut graph = self.graph.write().await;
        if graph.has_column_node(connection_id, &edge.from_table, &edge.from_column)
            && graph.has_column_node(connection_id, &edge.to_table, &edge.to_column)
        {
            graph
                .foreign_keys
                .insert((connection_id.to_string(), edge.clone()));
        }
        Ok(())
    }

    async fn merge_semantic_link(
        &self,
        connection_id: &str,
        table_name: &str,
        from_column: &str,
        to_column: &str,
    ) -> EngineResult<()> {
        let mut graph = self.graph.write().await;
        if graph.has_column_node(connection_id, table_name, from_column)
            && graph.has_column_node(connection_id, table_name, to_column)
        {
            graph.semantic.insert((
                connection_id.to_string(),
                table_name.to_string(),
                from_column.to_string(),
                to_column.to_string(),
            ));
        }
        Ok(())
    }

    async fn expand_columns(&self, request: &ExpansionRequest) -> EngineResult<Vec<GraphColumn>> {
        let graph = self.graph.read().await;
        let links_to_existing = |column: &str| {
            graph.semantic.iter().any(|(conn, table, from, to)| {
                conn == &request.connection_id
                    && table == &request.table_name
                    && from == column
                    && request.existing.contains(to)
            })
        };

        let mut found: Vec<GraphColumn> = graph
            .has_column
            .iter()
            .filter(|(conn, table, _)| {
                conn == &request.connection_id && table == &request.table_name
            })
            .filter_map(|key| graph.columns.get(key))
            .filter(|c| {
                request.existing.contains(&c.column_name)
                    || (request.include_identifiers && c.role == ColumnRole::Identifier)
                    || links_to_existing(&c.column_name)
            })
            .map(|c| GraphColumn {
                column_name: c.column_name.clone(),
                data_type: Some(c.data_type.clone()),
                role: c.role,
                is_primary_key: c.is_primary_key,
                is_foreign_key: c.is_foreign_key,
                related_table: c.related_table.clone(),
            })
            .collect();
        order_expansion(&mut found, &request.existing);
        Ok(found)
    }

    async fn purge_connection(&self, connection_id: &str) -> EngineResult<()> {
        let mut graph = self.graph.write().await;
        graph.tables.retain(|(conn, _), _| conn != connection_id);
        graph.columns.retain(|(conn, _, _), _| conn != connection_id);
        graph.has_column.retain(|(conn, _, _)| conn != connection_id);
        graph.foreign_keys.retain(|(conn, _)| conn != connection_id);
        graph.semantic.retain(|(conn, _, _, _)| conn != connection_id);
        Ok(())
    }

    async fn stats(&self, connection_id: &str) -> EngineResult<GraphStats> {
        let graph = self.graph.read().await;
        Ok(GraphStats {
            tables: graph
                .tables
                .keys()
                .filter(|(c, _)| c == connection_id)
                .count(),
            columns: graph
                .columns
                .keys()
                .filter(|(c, _, _)| c == connection_id)
                .count(),
            has_column: graph
                .has_column
                .iter()
                .filter(|(c, _, _)| c == connection_id)
                .count(),
            foreign_keys: graph
                .foreign_keys
                .iter()
                .filter(|(c, _)| c == connection_id)
                .count(),
            semantic_links: graph
                .semantic
                .iter()
                .filter(|(c, _, _, _)| c == connection_id)
                .count(),
        })
    }
}
