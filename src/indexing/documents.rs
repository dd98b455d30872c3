//! Text documents describing schema units.
//!
//! One document per column of a keyed table, plus one per foreign key. The
//! text is what gets embedded; the structured fields travel as record
//! metadata.

use crate::classifier::index_columns;
use crate::models::{ColumnSchema, ForeignKey, SchemaSnapshot, TableSchema};

/// An embeddable description of one column or one foreign key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaDocument {
    pub table_name: String,
    pub primary_key: String,
    pub column_name: String,
    /// Declared type with length, e.g. `character varying(255)`.
    pub data_type: String,
    pub foreign_key: Option<ForeignKey>,
    /// True for the relationship document of a foreign key.
    pub is_relationship: bool,
    pub text: String,
}

/// Documents for one table: all columns first, then all foreign keys.
///
/// Returns nothing for tables without a primary key, or whose first primary
/// key column is missing from the column list.
pub fn table_documents(table: &TableSchema, snapshot: &SchemaSnapshot) -> Vec<SchemaDocument> {
    let Some(pk_column) = table.primary_key().and_then(|pk| table.column(pk)) else {
        return Vec::new();
    };

    let mut documents: Vec<SchemaDocument> = table
        .columns
        .iter()
        .map(|column| SchemaDocument {
            table_name: table.name.clone(),
            primary_key: pk_column.name.clone(),
            column_name: column.name.clone(),
            data_type: column.display_type(),
            foreign_key: table.foreign_key_for(&column.name).cloned(),
            is_relationship: false,
            text: column_text(table, column, pk_column),
        })
        .collect();

    documents.extend(table.foreign_keys.iter().map(|fk| {
        SchemaDocument {
            table_name: table.name.clone(),
            primary_key: pk_column.name.clone(),
            column_name: fk.column.clone(),
            data_type: table
                .column(&fk.column)
                .map(ColumnSchema::display_type)
                .unwrap_or_default(),
            foreign_key: Some(fk.clone()),
            is_relationship: true,
            text: relationship_text(table, fk, snapshot),
        }
    }));

    documents
}

/// Description of a (primary key, column) pair.
pub fn column_text(table: &TableSchema, column: &ColumnSchema, pk_column: &ColumnSchema) -> String {
    let mut text = format!("Table: {}\nType: {}\n\n", table.name, table.kind);
    text.push_str(&format!(
        "Primary Key: {} [{}]\n\n",
        pk_column.name,
        pk_column.display_type()
    ));
    text.push_str(&format!(
        "Column: {} [{}]\n",
        column.name,
        column.display_type()
    ));

    let mut constraints = Vec::new();
    if table.is_primary_key(&column.name) {
        constraints.push("PRIMARY KEY".to_string());
    }
    if table.is_unique(&column.name) {
        constraints.push("UNIQUE".to_string());
    }
    if !column.nullable {
        constraints.push("NOT NULL".to_string());
    }
    if let Some(default) = column.default.as_deref().filter(|d| !d.is_empty()) {
        constraints.push(format!("DEFAULT: {}", default));
    }
    if let Some(fk) = table.foreign_key_for(&column.name) {
        constraints.push(format!("REFERENCES {}.{}", fk.target_table, fk.target_column));
        text.push_str(&format!(
            "Foreign Key: References {}.{}\n",
            fk.target_table, fk.target_column
        ));
    }
    if !constraints.is_empty() {
        text.push_str(&format!("Constraints: {}\n", constraints.join(", ")));
    }

    let indexes: Vec<&str> = table
        .indexes
        .iter()
        .filter(|idx| index_columns(&idx.definition).contains(&column.name))
        .map(|idx| idx.name.as_str())
        .collect();
    if !indexes.is_empty() {
        text.push_str(&format!("\nIndexes: {}\n", indexes.join(", ")));
    }

    text
}

/// Description of a foreign key and the table it points at.
pub fn relationship_text(
    table: &TableSchema,
    fk: &ForeignKey,
    snapshot: &SchemaSnapshot,
) -> String {
    let mut text = format!(
        "Relationship: {}.{} → {}.{}\n\n",
        table.name, fk.column, fk.target_table, fk.target_column
    );

    text.push_str(&format!("Source Table: {}\n", table.name));
    if let Some(source) = table.column(&fk.column) {
        text.push_str(&format!(
            "Source Column: {} [{}]\n",
            fk.column,
            source.display_type()
        ));
    }

    text.push_str(&format!("\nTarget Table: {}\n", fk.target_table));
    if let Some(target) = snapshot.table(&fk.target_table) {
        if let Some(target_col) = target.column(&fk.target_column) {
            text.push_str(&format!(
                "Target Column: {} [{}]\n",
                fk.target_column,
                target_col.display_type()
            ));
        }
        let columns: Vec<&str> = target.columns.iter().map(|c| c.name.as_str()).collect();
        text.push_str("\nTarget Table Schema:\n");
        text.push_str(&format!("  Type: {}\n", target.kind));
        text.push_str(&format!("  Columns: {}\n", columns.join(", ")));
        if !target.primary_keys.is_empty() {
            text.push_str(&format!(
                "  Primary Keys: {}\n",
                target.primary_keys.join(", ")
            ));
        }
    }

    text.push_str(&format!(
        "\nRelationship Type: Foreign Key (Many-to-One from {} to {})",
        table.name, fk.target_table
    ));
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shop() -> SchemaSnapshot {
        let customers = TableSchema::new("customers")
            .with_column(ColumnSchema::new("id", "integer").not_null())
            .with_column(ColumnSchema::new("name", "character varying").with_max_length(120))
            .with_primary_key("id");
        let orders = TableSchema::new("orders")
            .with_column(
                ColumnSchema::new("id", "integer")
                    .not_null()
                    .with_default("nextval('orders_id_seq'::regclass)"),
            )
            .with_column(ColumnSchema::new("customer_id", "integer"))
            .with_primary_key("id")
            .with_foreign_key("customer_id", "customers", "id")
            .with_index(
                "orders_customer_idx",
                "CREATE INDEX orders_customer_idx ON public.orders USING btree (customer_id)",
            );
        SchemaSnapshot::new(vec![orders, customers])
    }

    #[test]
    fn test_table_without_primary_key_has_no_documents() {
        let table = TableSchema::new("log").with_column(ColumnSchema::new("msg", "text"));
        let snapshot = SchemaSnapshot::new(vec![table.clone()]);
        assert!(table_documents(&table, &snapshot).is_empty());

        let dangling = TableSchema::new("log")
            .with_column(ColumnSchema::new("msg", "text"))
            .with_primary_key("missing");
        assert!(table_documents(&dangling, &snapshot).is_empty());
    }

    #[test]
    fn test_one_document_per_column_and_foreign_key() {
        let snapshot = shop();
        let orders = snapshot.table("orders").unwrap();
        let docs = table_documents(orders, &snapshot);
        assert_eq!(docs.len(), 3);
        assert_eq!(docs.iter().filter(|d| d.is_relationship).count(), 1);
        assert!(docs[1].foreign_key.is_some());
        assert!(!docs[1].is_relationship);
    }

    #[test]
    fn test_column_text_layout() {
        let snapshot = shop();
        let orders = snapshot.table("orders").unwrap();
        let docs = table_documents(orders, &snapshot);

        assert_eq!(
            docs[0].text,
            "Table: orders\nType: BASE TABLE\n\n\
             Primary Key: id [integer]\n\n\
             Column: id [integer]\n\
             Constraints: PRIMARY KEY, NOT NULL, DEFAULT: nextval('orders_id_seq'::regclass)\n"
        );
        assert_eq!(
            docs[1].text,
            "Table: orders\nType: BASE TABLE\n\n\
             Primary Key: id [integer]\n\n\
             Column: customer_id [integer]\n\
             Foreign Key: References customers.id\n\
             Constraints: REFERENCES customers.id\n\
             \nIndexes: orders_customer_idx\n"
        );
    }

    #[test]
    fn test_relationship_text_layout() {
        let snapshot = shop();
        let orders = snapshot.table("orders").unwrap();
        let text = relationship_text(orders, &orders.foreign_keys[0], &snapshot);
        assert_eq!(
            text,
            "Relationship: orders.customer_id → customers.id\n\n\
             Source Table: orders\n\
             Source Column: customer_id [integer]\n\
             \nTarget Table: customers\n\
             Target Column: id [integer]\n\
             \nTarget Table Schema:\n  Type: BASE TABLE\n  Columns: id, name\n  Primary Keys: id\n\
             \nRelationship Type: Foreign Key (Many-to-One from orders to customers)"
        );
    }

    #[test]
    fn test_relationship_text_unknown_target() {
        let table = TableSchema::new("a")
            .with_column(ColumnSchema::new("id", "integer"))
            .with_column(ColumnSchema::new("b_id", "integer"))
            .with_primary_key("id")
            .with_foreign_key("b_id", "b", "id");
        let snapshot = SchemaSnapshot::new(vec![table.clone()]);
        let text = relationship_text(&table, &table.foreign_keys[0], &snapshot);
        assert!(text.contains("\nTarget Table: b\n\nRelationship Type"));
    }
}
