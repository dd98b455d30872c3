//! Neo4j graph store over the HTTP transactional endpoint.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value as JsonValue, json};
use tracing::debug;

use super::{
    ColumnNode, ExpansionRequest, ForeignKeyEdge, GraphColumn, GraphStats, GraphStore, TableNode,
};
use crate::clients::{ensure_success, http_client};
use crate::config::GraphSettings;
use crate::error::{EngineError, EngineResult};
use crate::models::ColumnRole;

const SERVICE: &str = "neo4j";

mod cypher {
    pub const MERGE_TABLE: &str = r#"
        MERGE (t:Table {connectionId: $connectionId, tableName: $tableName})
        SET t.primaryKey = $primaryKey,
            t.tableType = $tableType,
            t.connectionName = $connectionName,
            t.dbType = $dbType
    "#;

    pub const MERGE_COLUMN: &str = r#"
        MERGE (c:Column {connectionId: $connectionId, tableName: $tableName, columnName: $columnName})
        SET c.dataType = $dataType,
            c.isPrimaryKey = $isPrimaryKey,
            c.isForeignKey = $isForeignKey,
            c.isNullable = $isNullable,
            c.columnType = $columnType,
            c.relatedTable = $relatedTable
        WITH c
        MATCH (t:Table {connectionId: $connectionId, tableName: $tableName})
        MERGE (t)-[:HAS_COLUMN]->(c)
    "#;

    pub const MERGE_FOREIGN_KEY: &str = r#"
        MATCH (c1:Column {connectionId: $connectionId, tableName: $fromTable, columnName: $fromColumn})
        MATCH (c2:Column {connectionId: $connectionId, tableName: $toTable, columnName: $toColumn})
        MERGE (c1)-[:FOREIGN_KEY {fromColumn: $fromColumn, toColumn: $toColumn}]->(c2)
    "#;

    pub const MERGE_SEMANTIC_LINK: &str = r#"
        MATCH (c1:Column {connectionId: $connectionId, tableName: $tableName, columnName: $fromColumn})
        MATCH (c2:Column {connectionId: $connectionId, tableName: $tableName, columnName: $toColumn})
        MERGE (c1)-[:SEMANTICALLY_RELATED]->(c2)
    "#;

    pub const EXPAND_COLUMNS: &str = r#"
        MATCH (t:Table {connectionId: $connectionId, tableName: $tableName})-[:HAS_COLUMN]->(c:Column)
        OPTIONAL MATCH (c)-[:SEMANTICALLY_RELATED]->(related:Column {connectionId: $connectionId, tableName: $tableName})
        WITH c, related
        WHERE c.columnName IN $existingColumns
           OR ($needsIdentifiers AND c.columnType = 'identifier')
           OR (related IS NOT NULL AND related.columnName IN $existingColumns)
        WITH DISTINCT c,
             CASE WHEN c.columnName IN $existingColumns THEN 0 ELSE 1 END AS isExisting,
             CASE WHEN c.columnType = 'identifier' THEN 0 ELSE 1 END AS isIdentifier
        RETURN c.columnName AS columnName,
               c.dataType AS dataType,
               c.columnType AS columnType,
               c.isPrimaryKey AS isPrimaryKey,
               c.isForeignKey AS isForeignKey,
               c.relatedTable AS relatedTable
        ORDER BY isExisting, isIdentifier, c.columnName
    "#;

    pub const PURGE_CONNECTION: &str = r#"
        MATCH (n {connectionId: $connectionId})
        WHERE n:Table OR n:Column
        DETACH DELETE n
    "#;

    pub const STATS: &str = r#"
        OPTIONAL MATCH (t:Table {connectionId: $connectionId})
        WITH count(t) AS tables
        OPTIONAL MATCH (c:Column {connectionId: $connectionId})
        WITH tables, count(c) AS columns
        OPTIONAL MATCH (:Table {connectionId: $connectionId})-[h:HAS_COLUMN]->()
        WITH tables, columns, count(h) AS hasColumn
        OPTIONAL MATCH (:Column {connectionId: $connectionId})-[f:FOREIGN_KEY]->()
        WITH tables, columns, hasColumn, count(f) AS foreignKeys
        OPTIONAL MATCH (:Column {connectionId: $connectionId})-[s:SEMANTICALLY_RELATED]->()
        RETURN tables, columns, hasColumn, foreignKeys, count(s) AS semanticLinks
    "#;
}

#[derive(Deserialize)]
struct CommitResponse {
    #[serde(default)]
    results: Vec<StatementResult>,
    #[serde(default)]
    errors: Vec<CommitError>,
}

#[derive(Deserialize)]
struct StatementResult {
    #[serde(default)]
    columns: Vec<String>,
    #[serde(default)]
    data: Vec<RowData>,
}

#[derive(Deserialize)]
struct RowData {
    #[serde(default)]
    row: Vec<JsonValue>,
}

#[derive(Deserialize)]
struct CommitError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

/// Column-name keyed view of one result row.
struct Record<'a> {
    columns: &'a [String],
    row: &'a [JsonValue],
}

impl Record<'_> {
    fn get(&self, name: &str) -> Option<&JsonValue> {
        self.columns
            .iter()
            .position(|c| c == name)
            .and_then(|i| self.row.get(i))
            .filter(|v| !v.is_null())
    }

    fn string(&self, name: &str) -> Option<String> {
        self.get(name).and_then(JsonValue::as_str).map(String::from)
    }

    fn bool(&self, name: &str) -> bool {
        self.get(name).and_then(JsonValue::as_bool).unwrap_or(false)
    }

    fn count(&self, name: &str) -> usize {
        self.get(name).and_then(JsonValue::as_u64).unwrap_or(0) as usize
    }
}

#[derive(Debug, Clone)]
pub struct Neo4jGraphStore {
    client: reqwest::Client,
    endpoint: String,
    user: String,
    password: String,
}

impl Neo4jGraphStore {
    pub fn new(settings: &GraphSettings, timeout: std::time::Duration) -> EngineResult<Self> {
        let uri = settings
            .uri
            .as_deref()
            .ok_or_else(|| EngineError::invalid_input("Neo4j URI is not configured"))?;
        let password = settings
            .password
            .clone()
            .ok_or_else(|| EngineError::invalid_input("Neo4j password is not configured"))?;
        Ok(Self {
            client: http_client(timeout)?,
            endpoint: format!(
                "{}/db/{}/tx/commit",
                uri.trim_end_matches('/'),
                settings.database
            ),
            user: settings.user.clone(),
            password,
        })
    }

    /// Run one statement in an auto-commit transaction.
    async fn run(&self, statement: &str, parameters: JsonValue) -> EngineResult<StatementResult> {
        let body = json!({
            "statements": [{ "statement": statement, "parameters": parameters }]
        });
        let response = self
            .client
            .post(&self.endpoint)
            .basic_auth(&self.user, Some(&self.password))
            .json(&body)
            .send()
            .await?;
        let commit: CommitResponse = ensure_success(SERVICE, response).await?.json().await?;

        if let Some(err) = commit.errors.first() {
            let message = format!("{}: {}", err.code, err.message);
            return Err(if err.code.contains("TransientError") {
                EngineError::upstream_transient(SERVICE, message)
            } else {
                EngineError::upstream(SERVICE, message)
            });
        }
        Ok(commit
            .results
            .into_iter()
            .next()
            .unwrap_or(StatementResult {
                columns: Vec::new(),
                data: Vec::new(),
            }))
    }
}

#[async_trait]
impl GraphStore for Neo4jGraphStore {
    async fn merge_table(&self, node: &TableNode) -> EngineResult<()> {
        self.run(cypher::MERGE_TABLE, serde_json::to_value(node)?)
            .await
            .map(|_| ())
    }

    async fn merge_column(&self, node: &ColumnNode) -> EngineResult<()> {
        self.run(cypher::MERGE_COLUMN, serde_json::to_value(node)?)
            .await
            .map(|_| ())
    }

    async fn merge_foreign_key(
        &self,
        connection_id: &str,
        edge: &ForeignKeyEdge,
    ) -> EngineResult<()> {
        let mut params = serde_json::to_value(edge)?;
        params["connectionId"] = json!(connection_id);
        self.run(cypher::MERGE_FOREIGN_KEY, params).await.map(|_| ())
    }

    async fn merge_semantic_link(
        &self,
        connection_id: &str,
        table_name: &str,
        from_column: &str,
        to_column: &str,
    ) -> EngineResult<()> {
        let params = json!({
            "connectionId": connection_id,
            "tableName": table_name,
            "fromColumn": from_column,
            "toColumn": to_column,
        });
        self.run(cypher::MERGE_SEMANTIC_LINK, params).await.map(|_| ())
    }

    async fn expand_columns(&self, request: &ExpansionRequest) -> EngineResult<Vec<GraphColumn>> {
        let params = json!({
            "connectionId": request.connection_id,
            "tableName": request.table_name,
            "existingColumns": request.existing,
            "needsIdentifiers": request.include_identifiers,
        });
        let result = self.run(cypher::EXPAND_COLUMNS, params).await?;

        let mut columns: Vec<GraphColumn> = Vec::with_capacity(result.data.len());
        for data in &result.data {
            let record = Record {
                columns: &result.columns,
                row: &data.row,
            };
            let Some(column_name) = record.string("columnName") else {
                continue;
            };
            if columns.iter().any(|c| c.column_name == column_name) {
                continue;
            }
            columns.push(GraphColumn {
                column_name,
                data_type: record.string("dataType"),
                role: record
                    .string("columnType")
                    .and_then(|r| ColumnRole::parse(&r))
                    .unwrap_or(ColumnRole::Attribute),
                is_primary_key: record.bool("isPrimaryKey"),
                is_foreign_key: record.bool("isForeignKey"),
                related_table: record.string("relatedTable"),
            });
        }
        debug!(
            table = %request.table_name,
            count = columns.len(),
            "Graph expansion"
        );
        Ok(columns)
    }

    async fn purge_connection(&self, connection_id: &str) -> EngineResult<()> {
        self.run(
            cypher::PURGE_CONNECTION,
            json!({ "connectionId": connection_id }),
        )
        .await
        .map(|_| ())
    }

    async fn stats(&self, connection_id: &str) -> EngineResult<GraphStats> {
        let result = self
            .run(cypher::STATS, json!({ "connectionId": connection_id }))
            .await?;
        let Some(data) = result.data.first() else {
            return Ok(GraphStats::default());
        };
        let record = Record {
            columns: &result.columns,
            row: &data.row,
        };
        Ok(GraphStats {
            tables: record.count("tables"),
            columns: record.count("columns"),
            has_column: record.count("hasColumn"),
            foreign_keys: record.count("foreignKeys"),
            semantic_links: record.count("semanticLinks"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_uses_database() {
        let settings = GraphSettings {
            uri: Some("http://localhost:7474/".to_string()),
            user: "neo4j".to_string(),
            password: Some("pw".to_string()),
            database: "schema".to_string(),
        };
        let store = Neo4jGraphStore::new(&settings, std::time::Duration::from_secs(5)).unwrap();
        assert_eq!(store.endpoint, "http://localhost:7474/db/schema/tx/commit");
    }

    #[test]
    fn test_column_node_parameters() {
        let node = ColumnNode {
            connection_id: "c1".into(),
            table_name: "users".into(),
            column_name: "id".into(),
            data_type: "integer".into(),
            is_primary_key: true,
            is_foreign_key: false,
            is_nullable: false,
            role: ColumnRole::Identifier,
            related_table: None,
        };
        let params = serde_json::to_value(&node).unwrap();
        assert_eq!(params["columnType"], "identifier");
        assert_eq!(params["isPrimaryKey"], true);
        assert!(params["relatedTable"].is_null());
    }

    #[test]
    fn test_record_lookup_skips_nulls() {
        let columns = vec!["columnName".to_string(), "relatedTable".to_string()];
        let row = vec![json!("id"), JsonValue::Null];
        let record = Record {
            columns: &columns,
            row: &row,
        };
        assert_eq!(record.string("columnName").as_deref(), Some("id"));
        assert_eq!(record.string("relatedTable"), None);
        assert!(!record.bool("isPrimaryKey"));
    }
}
