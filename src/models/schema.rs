//! Schema snapshot models.
//!
//! A [`SchemaSnapshot`] is the normalized catalog of one target database at
//! introspection time. It feeds the classifier, the indexer and the graph
//! synchronizer.

use serde::{Deserialize, Serialize};

/// All tables and views of the `public` schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    pub tables: Vec<TableSchema>,
}

impl SchemaSnapshot {
    pub fn new(tables: Vec<TableSchema>) -> Self {
        Self { tables }
    }

    /// Look up a table by name.
    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn column_count(&self) -> usize {
        self.tables.iter().map(|t| t.columns.len()).sum()
    }
}

/// Type of database table object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableKind {
    Table,
    View,
}

impl TableKind {
    /// Parse the `information_schema.tables.table_type` value.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "view" => Self::View,
            _ => Self::Table,
        }
    }

    /// Catalog spelling, as written into documents and graph nodes.
    pub fn catalog_name(&self) -> &'static str {
        match self {
            Self::Table => "BASE TABLE",
            Self::View => "VIEW",
        }
    }
}

impl std::fmt::Display for TableKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.catalog_name())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub kind: TableKind,
    /// Ordered by ordinal position.
    pub columns: Vec<ColumnSchema>,
    /// In constraint key order; the first entry is the table's identity column.
    pub primary_keys: Vec<String>,
    pub foreign_keys: Vec<ForeignKey>,
    pub unique_columns: Vec<String>,
    pub indexes: Vec<IndexDefinition>,
}

impl TableSchema {
    /// Create a new, empty base table.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: TableKind::Table,
            columns: Vec::new(),
            primary_keys: Vec::new(),
            foreign_keys: Vec::new(),
            unique_columns: Vec::new(),
            indexes: Vec::new(),
        }
    }

    pub fn with_kind(mut self, kind: TableKind) -> Self {
        self.kind = kind;
        self
    }

    /// Append a column, assigning the next ordinal position when unset.
    pub fn with_column(mut self, mut column: ColumnSchema) -> Self {
        if column.ordinal_position == 0 {
            column.ordinal_position = self.columns.len() as i32 + 1;
        }
        self.columns.push(column);
        self
    }

    pub fn with_primary_key(mut self, column: impl Into<String>) -> Self {
        push_unique(&mut self.primary_keys, column.into());
        self
    }

    pub fn with_foreign_key(
        mut self,
        column: impl Into<String>,
        target_table: impl Into<String>,
        target_column: impl Into<String>,
    ) -> Self {
        self.foreign_keys.push(ForeignKey {
            column: column.into(),
            target_table: target_table.into(),
            target_column: target_column.into(),
        });
        self
    }

    pub fn with_unique(mut self, column: impl Into<String>) -> Self {
        push_unique(&mut self.unique_columns, column.into());
        self
    }

    pub fn with_index(mut self, name: impl Into<String>, definition: impl Into<String>) -> Self {
        self.indexes.push(IndexDefinition {
            name: name.into(),
            definition: definition.into(),
        });
        self
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// First primary key column, if any.
    pub fn primary_key(&self) -> Option<&str> {
        self.primary_keys.first().map(String::as_str)
    }

    pub fn is_primary_key(&self, column: &str) -> bool {
        self.primary_keys.iter().any(|c| c == column)
    }

    pub fn is_unique(&self, column: &str) -> bool {
        self.unique_columns.iter().any(|c| c == column)
    }

    pub fn foreign_key_for(&self, column: &str) -> Option<&ForeignKey> {
        self.foreign_keys.iter().find(|fk| fk.column == column)
    }
}

fn push_unique(list: &mut Vec<String>, value: String) {
    if !list.contains(&value) {
        list.push(value);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    /// Declared type as reported by `information_schema.columns.data_type`.
    pub data_type: String,
    pub nullable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    /// 1-based.
    pub ordinal_position: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_length: Option<i32>,
}

impl ColumnSchema {
    /// Create a nullable column with no default.
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            nullable: true,
            default: None,
            ordinal_position: 0,
            max_length: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn with_max_length(mut self, max_length: i32) -> Self {
        self.max_length = Some(max_length);
        self
    }

    pub fn with_position(mut self, ordinal_position: i32) -> Self {
        self.ordinal_position = ordinal_position;
        self
    }

    /// Declared type with length suffix, e.g. `character varying(255)`.
    pub fn display_type(&self) -> String {
        match self.max_length {
            Some(len) => format!("{}({})", self.data_type, len),
            None => self.data_type.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    pub column: String,
    pub target_table: String,
    pub target_column: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDefinition {
    pub name: String,
    /// Full `CREATE INDEX` statement from `pg_indexes.indexdef`.
    pub definition: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_kind_parse() {
        assert_eq!(TableKind::parse("BASE TABLE"), TableKind::Table);
        assert_eq!(TableKind::parse("VIEW"), TableKind::View);
        assert_eq!(TableKind::parse("something else"), TableKind::Table);
        assert_eq!(TableKind::View.to_string(), "VIEW");
    }

    #[test]
    fn test_builder_assigns_ordinals() {
        let table = TableSchema::new("users")
            .with_column(ColumnSchema::new("id", "integer").not_null())
            .with_column(ColumnSchema::new("name", "character varying").with_max_length(100))
            .with_primary_key("id")
            .with_primary_key("id");
        assert_eq!(table.columns[0].ordinal_position, 1);
        assert_eq!(table.columns[1].ordinal_position, 2);
        assert_eq!(table.primary_keys, vec!["id"]);
        assert_eq!(table.primary_key(), Some("id"));
    }

    #[test]
    fn test_display_type() {
        let col = ColumnSchema::new("email", "character varying").with_max_length(255);
        assert_eq!(col.display_type(), "character varying(255)");
        assert_eq!(ColumnSchema::new("id", "uuid").display_type(), "uuid");
    }

    #[test]
    fn test_lookup_helpers() {
        let table = TableSchema::new("orders")
            .with_column(ColumnSchema::new("id", "integer"))
            .with_column(ColumnSchema::new("customer_id", "integer"))
            .with_primary_key("id")
            .with_foreign_key("customer_id", "customers", "id")
            .with_unique("id");
        assert!(table.is_primary_key("id"));
        assert!(!table.is_primary_key("customer_id"));
        assert_eq!(
            table.foreign_key_for("customer_id").map(|fk| fk.target_table.as_str()),
            Some("customers")
        );
        assert!(table.is_unique("id"));

        let snapshot = SchemaSnapshot::new(vec![table]);
        assert!(snapshot.table("orders").is_some());
        assert_eq!(snapshot.column_count(), 2);
    }
}
