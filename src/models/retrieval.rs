//! Vector records and retrieval results.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Record kind written by the schema indexer.
pub const SCHEMA_RECORD_KIND: &str = "schema";
pub const FOREIGN_KEY_RELATIONSHIP: &str = "foreign_key";
pub const DB_TYPE_POSTGRES: &str = "postgresql";

/// Metadata stored next to each schema embedding.
///
/// Column type travels as structured data (`data_type`), so retrieval never
/// parses the free text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordMetadata {
    pub connection_id: String,
    pub connection_name: String,
    pub db_type: String,
    pub table_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_name: Option<String>,
    pub primary_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,
    #[serde(default)]
    pub is_foreign_key: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_table: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_column: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relationship_type: Option<String>,
    /// Source document the vector was computed from.
    pub text: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl RecordMetadata {
    pub fn is_relationship(&self) -> bool {
        self.relationship_type.as_deref() == Some(FOREIGN_KEY_RELATIONSHIP)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaEmbeddingRecord {
    pub id: String,
    pub values: Vec<f32>,
    pub metadata: RecordMetadata,
}

impl SchemaEmbeddingRecord {
    /// Deterministic record id for the `index`-th document of a table.
    ///
    /// Connection id and table name are length-prefixed, so names that
    /// contain the separator cannot produce the same id.
    pub fn record_id(connection_id: &str, table: &str, index: usize) -> String {
        format!(
            "schema-{}:{}-{}:{}-{}",
            connection_id.len(),
            connection_id,
            table.len(),
            table,
            index
        )
    }
}

/// Exact-match metadata filter applied to similarity search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VectorFilter {
    pub connection_id: String,
    pub kind: String,
}

impl VectorFilter {
    pub fn schema(connection_id: impl Into<String>) -> Self {
        Self {
            connection_id: connection_id.into(),
            kind: SCHEMA_RECORD_KIND.to_string(),
        }
    }

    pub fn matches(&self, metadata: &RecordMetadata) -> bool {
        metadata.connection_id == self.connection_id && metadata.kind == self.kind
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VectorMatch {
    pub id: String,
    pub score: f32,
    pub metadata: RecordMetadata,
}

/// One column of a retrieved table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    pub is_foreign_key: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_table: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_column: Option<String>,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            is_foreign_key: false,
            related_table: None,
            related_column: None,
        }
    }

    pub fn with_reference(
        mut self,
        table: impl Into<String>,
        column: Option<impl Into<String>>,
    ) -> Self {
        self.is_foreign_key = true;
        self.related_table = Some(table.into());
        self.related_column = column.map(Into::into);
        self
    }
}

/// Aggregated retrieval result for one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TableDescriptor {
    pub table_name: String,
    pub primary_key: String,
    pub columns: Vec<ColumnDescriptor>,
    /// Best similarity score among the table's matches.
    pub relevance_score: f32,
}

impl TableDescriptor {
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }
}

/// Foreign-key match surfaced by similarity search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Relationship {
    pub from_table: String,
    pub to_table: String,
    pub score: f32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetrievalOutcome {
    /// Ordered by first appearance in the similarity ranking.
    pub tables: Vec<TableDescriptor>,
    pub relationships: Vec<Relationship>,
    pub match_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_ids_do_not_collide_on_dashes() {
        let a = SchemaEmbeddingRecord::record_id("shop-eu", "orders", 0);
        let b = SchemaEmbeddingRecord::record_id("shop", "eu-orders", 0);
        assert_ne!(a, b);
        assert_eq!(a, "schema-7:shop-eu-6:orders-0");
    }
}
