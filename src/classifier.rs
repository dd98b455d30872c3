//! Rule-based column classification.
//!
//! Assigns every column a [`ColumnRole`] and links same-table columns that
//! are likely to be queried together. Everything here is pure and depends
//! only on the table definition, never on column iteration order.

use std::collections::BTreeSet;

use crate::models::{
    ColumnClassification, ColumnRole, ColumnSchema, TableClassification, TableSchema,
};

/// Longest `character varying` still treated as a short label.
const SHORT_TEXT_MAX_LEN: i32 = 100;
/// Character lengths above this are free text.
const LONG_TEXT_MIN_LEN: i32 = 1000;

/// Classify every column of `table`.
pub fn classify_table(table: &TableSchema) -> TableClassification {
    let index_groups: Vec<Vec<String>> = table
        .indexes
        .iter()
        .map(|idx| index_columns(&idx.definition))
        .collect();

    let mut classification = TableClassification::default();
    for column in &table.columns {
        classification.columns.insert(
            column.name.clone(),
            ColumnClassification {
                role: column_role(table, column),
                related_columns: BTreeSet::new(),
            },
        );
    }

    for (i, a) in table.columns.iter().enumerate() {
        for b in &table.columns[i + 1..] {
            if a.name == b.name || !related(table, &index_groups, a, b) {
                continue;
            }
            if let Some(entry) = classification.columns.get_mut(&a.name) {
                entry.related_columns.insert(b.name.clone());
            }
            if let Some(entry) = classification.columns.get_mut(&b.name) {
                entry.related_columns.insert(a.name.clone());
            }
        }
    }

    classification
}

/// First matching rule wins.
pub fn column_role(table: &TableSchema, column: &ColumnSchema) -> ColumnRole {
    let data_type = column.data_type.to_ascii_lowercase();
    let is_textual = ["varchar", "text", "char"]
        .iter()
        .any(|t| data_type.contains(t));
    let is_short_text = data_type.contains("varchar") || data_type.contains("char");
    let unique = table.is_unique(&column.name);
    let length = column.max_length.unwrap_or(0);

    if table.is_primary_key(&column.name) || table.foreign_key_for(&column.name).is_some() {
        ColumnRole::Identifier
    } else if unique && is_textual {
        ColumnRole::Identifier
    } else if data_type.contains("uuid") || data_type.contains("guid") {
        ColumnRole::Identifier
    } else if data_type.contains("text") || length > LONG_TEXT_MIN_LEN {
        ColumnRole::Description
    } else if length > 0 && length <= SHORT_TEXT_MAX_LEN && is_short_text && !unique {
        ColumnRole::Identifier
    } else {
        ColumnRole::Attribute
    }
}

/// Symmetric relation predicate between two distinct columns.
fn related(
    table: &TableSchema,
    index_groups: &[Vec<String>],
    a: &ColumnSchema,
    b: &ColumnSchema,
) -> bool {
    let same_type = a.data_type == b.data_type;

    let share_index = index_groups
        .iter()
        .any(|cols| cols.contains(&a.name) && cols.contains(&b.name));
    let composite_key = table.primary_keys.len() > 1
        && table.is_primary_key(&a.name)
        && table.is_primary_key(&b.name);
    let adjacent = (a.ordinal_position - b.ordinal_position).abs() == 1 && same_type;
    let similar = same_type && names_similar(&a.name, &b.name);
    let both_foreign = same_type
        && table.foreign_key_for(&a.name).is_some()
        && table.foreign_key_for(&b.name).is_some();

    share_index || composite_key || adjacent || similar || both_foreign
}

/// Underscore-token similarity between two column names.
pub fn names_similar(a: &str, b: &str) -> bool {
    let a = a.to_lowercase();
    let b = b.to_lowercase();
    let a_parts: Vec<&str> = a.split('_').collect();
    let b_parts: Vec<&str> = b.split('_').collect();

    let shared_token = a_parts
        .iter()
        .any(|p| p.len() > 2 && b_parts.contains(p));
    if shared_token {
        return true;
    }

    if a_parts.len() > 1 && b_parts.len() > 1 {
        let prefix = a_parts[0];
        let suffix = a_parts[a_parts.len() - 1];
        if (prefix.len() > 2 && prefix == b_parts[0])
            || (suffix.len() > 2 && suffix == b_parts[b_parts.len() - 1])
        {
            return true;
        }
    }

    let (shorter, longer) = if a.len() <= b.len() { (&a, &b) } else { (&b, &a) };
    shorter.len() > 3 && longer.contains(shorter.as_str())
}

/// Column names listed in the key part of a `CREATE INDEX` definition.
///
/// `CREATE INDEX idx ON public.t USING btree ("Name", lower(email) DESC)`
/// yields `["Name", "lower"]`; expression keys keep only their leading word.
pub fn index_columns(definition: &str) -> Vec<String> {
    let Some(start) = definition.find('(') else {
        return Vec::new();
    };

    let mut depth = 0usize;
    let mut parts = Vec::new();
    let mut current = String::new();
    for ch in definition[start + 1..].chars() {
        match ch {
            '(' => {
                depth += 1;
                current.push(ch);
            }
            ')' if depth == 0 => break,
            ')' => {
                depth -= 1;
                current.push(ch);
            }
            ',' if depth == 0 => parts.push(std::mem::take(&mut current)),
            _ => current.push(ch),
        }
    }
    parts.push(current);

    parts
        .iter()
        .filter_map(|part| {
            let cleaned = part.trim().replace('"', "");
            let name = cleaned
                .split('(')
                .next()
                .and_then(|s| s.split(' ').next())
                .and_then(|s| s.split("::").next())
                .unwrap_or_default()
                .trim()
                .to_string();
            (!name.is_empty()).then_some(name)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users() -> TableSchema {
        TableSchema::new("users")
            .with_column(ColumnSchema::new("id", "integer").not_null())
            .with_column(ColumnSchema::new("name", "character varying"))
            .with_column(ColumnSchema::new("email", "character varying").with_max_length(255))
            .with_primary_key("id")
            .with_unique("email")
            .with_index(
                "users_email_key",
                "CREATE UNIQUE INDEX users_email_key ON public.users USING btree (email)",
            )
    }

    #[test]
    fn test_users_roles() {
        let classification = classify_table(&users());
        assert_eq!(classification.role("id"), Some(ColumnRole::Identifier));
        assert_eq!(classification.role("email"), Some(ColumnRole::Identifier));
        assert_eq!(classification.role("name"), Some(ColumnRole::Attribute));
    }

    #[test]
    fn test_role_precedence() {
        let table = TableSchema::new("docs")
            .with_column(ColumnSchema::new("id", "uuid"))
            .with_column(ColumnSchema::new("owner_id", "integer"))
            .with_column(ColumnSchema::new("external_ref", "uuid"))
            .with_column(ColumnSchema::new("body", "text"))
            .with_column(ColumnSchema::new("summary", "character varying").with_max_length(2000))
            .with_column(ColumnSchema::new("title", "character varying").with_max_length(80))
            .with_column(ColumnSchema::new("code", "character").with_max_length(3))
            .with_column(ColumnSchema::new("slug", "text"))
            .with_column(ColumnSchema::new("views", "integer"))
            .with_primary_key("id")
            .with_foreign_key("owner_id", "users", "id")
            .with_unique("slug");
        let c = classify_table(&table);
        assert_eq!(c.role("id"), Some(ColumnRole::Identifier));
        assert_eq!(c.role("owner_id"), Some(ColumnRole::Identifier));
        assert_eq!(c.role("external_ref"), Some(ColumnRole::Identifier));
        assert_eq!(c.role("body"), Some(ColumnRole::Description));
        assert_eq!(c.role("summary"), Some(ColumnRole::Description));
        assert_eq!(c.role("title"), Some(ColumnRole::Identifier));
        assert_eq!(c.role("code"), Some(ColumnRole::Identifier));
        // unique short text outranks the free-text rule
        assert_eq!(c.role("slug"), Some(ColumnRole::Identifier));
        assert_eq!(c.role("views"), Some(ColumnRole::Attribute));
    }

    #[test]
    fn test_unique_short_varchar_is_identifier_not_fallback() {
        let table = TableSchema::new("t")
            .with_column(ColumnSchema::new("sku", "character varying").with_max_length(20))
            .with_unique("sku");
        assert_eq!(classify_table(&table).role("sku"), Some(ColumnRole::Identifier));
    }

    #[test]
    fn test_index_columns_parsing() {
        assert_eq!(
            index_columns("CREATE INDEX i ON public.t USING btree (first_name, last_name)"),
            vec!["first_name", "last_name"]
        );
        assert_eq!(
            index_columns("CREATE INDEX i ON public.t USING btree (\"Name\" DESC, created_at)"),
            vec!["Name", "created_at"]
        );
        assert_eq!(
            index_columns("CREATE INDEX i ON public.t USING btree (lower((email)::text))"),
            vec!["lower"]
        );
        assert_eq!(
            index_columns("CREATE INDEX i ON public.t USING btree (a) WHERE (b IS NOT NULL)"),
            vec!["a"]
        );
        assert!(index_columns("garbage").is_empty());
    }

    #[test]
    fn test_names_similar() {
        assert!(names_similar("first_name", "last_name"));
        assert!(names_similar("created_at", "created_by"));
        assert!(names_similar("email", "backup_email"));
        assert!(names_similar("status", "order_status_code"));
        assert!(!names_similar("id", "user_id"));
        assert!(!names_similar("price", "quantity"));
        assert!(!names_similar("abc", "abcdef"));
    }

    #[test]
    fn test_relations_by_rule() {
        let table = TableSchema::new("people")
            .with_column(ColumnSchema::new("id", "integer").with_position(1))
            .with_column(ColumnSchema::new("first_name", "text").with_position(2))
            .with_column(ColumnSchema::new("age", "integer").with_position(3))
            .with_column(ColumnSchema::new("last_name", "text").with_position(4))
            .with_column(ColumnSchema::new("team_id", "bigint").with_position(5))
            .with_column(ColumnSchema::new("manager_ref", "bigint").with_position(7))
            .with_column(ColumnSchema::new("city", "character varying").with_position(9))
            .with_column(ColumnSchema::new("zip", "integer").with_position(11))
            .with_primary_key("id")
            .with_foreign_key("team_id", "teams", "id")
            .with_foreign_key("manager_ref", "people", "id")
            .with_index("i", "CREATE INDEX i ON public.people USING btree (city, zip)");
        let c = classify_table(&table);

        let related = |name: &str| -> Vec<String> {
            c.get(name)
                .map(|cc| cc.related_columns.iter().cloned().collect())
                .unwrap_or_default()
        };

        // shared index
        assert!(related("city").contains(&"zip".to_string()));
        // similar names with matching type
        assert!(related("first_name").contains(&"last_name".to_string()));
        // two foreign keys of the same type
        assert!(related("team_id").contains(&"manager_ref".to_string()));
        // adjacent ordinals need matching types
        assert!(!related("id").contains(&"first_name".to_string()));
        assert!(!related("age").contains(&"first_name".to_string()));
    }

    #[test]
    fn test_composite_primary_key_members_related() {
        let table = TableSchema::new("order_items")
            .with_column(ColumnSchema::new("order_id", "integer").with_position(1))
            .with_column(ColumnSchema::new("line_no", "smallint").with_position(5))
            .with_primary_key("order_id")
            .with_primary_key("line_no");
        let c = classify_table(&table);
        assert!(c.related("order_id").any(|r| r == "line_no"));
        assert!(c.related("line_no").any(|r| r == "order_id"));
    }

    #[test]
    fn test_relations_are_symmetric() {
        let table = TableSchema::new("people")
            .with_column(ColumnSchema::new("id", "integer"))
            .with_column(ColumnSchema::new("home_city", "text"))
            .with_column(ColumnSchema::new("work_city", "text"))
            .with_column(ColumnSchema::new("home_phone", "text"))
            .with_column(ColumnSchema::new("score", "integer"))
            .with_primary_key("id");
        let c = classify_table(&table);
        for (name, entry) in &c.columns {
            for other in &entry.related_columns {
                assert!(
                    c.related(other).any(|r| r == name),
                    "{name} -> {other} has no reverse edge"
                );
            }
        }
        assert!(c.relation_count() > 0);
    }

    #[test]
    fn test_classification_independent_of_column_order() {
        let table = TableSchema::new("accounts")
            .with_column(ColumnSchema::new("id", "uuid").with_position(1))
            .with_column(
                ColumnSchema::new("display_name", "character varying")
                    .with_max_length(50)
                    .with_position(2),
            )
            .with_column(
                ColumnSchema::new("legal_name", "character varying")
                    .with_max_length(50)
                    .with_position(3),
            )
            .with_column(ColumnSchema::new("bio", "text").with_position(4))
            .with_column(ColumnSchema::new("balance", "numeric").with_position(5))
            .with_primary_key("id")
            .with_index("i", "CREATE INDEX i ON public.accounts USING btree (bio, balance)");

        let mut reversed = table.clone();
        reversed.columns.reverse();

        assert_eq!(classify_table(&table), classify_table(&reversed));
    }
}
