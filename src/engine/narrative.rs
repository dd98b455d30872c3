//! Plain-text answers for each way a question can end.

use std::fmt::Write;

use crate::db::types::display_value;
use crate::models::{NARRATIVE_ROW_LIMIT, Row, TableDescriptor};

pub fn no_relevant_tables(question: &str) -> String {
    format!(
        "I couldn't find specific information related to \"{}\" in the database schema.\n\n\
         Try asking about:\n\
         - Table names\n\
         - Column names\n\
         - Relationships between tables\n\
         - Specific data types",
        question
    )
}

/// Answer when the schema search itself failed, before any SQL existed.
pub fn retrieval_failed(error: &str) -> String {
    format!(
        "I couldn't search the database schema for your question:\n\n\
         Error: {}\n\nPlease try again later.",
        error
    )
}

/// Schema-only answer when no query could be generated.
pub fn generation_failed(message: &str, tables: &[TableDescriptor]) -> String {
    let mut text = format!(
        "I found relevant schema information but couldn't generate a query:\n\n{}\n\nRelevant Tables:\n",
        message
    );
    for (i, table) in tables.iter().enumerate() {
        let _ = writeln!(text, "{}. {} (PK: {})", i + 1, table.table_name, table.primary_key);
    }
    text
}

pub fn validation_failed(error: &str, sql: &str) -> String {
    format!(
        "I generated a SQL query but it did not pass validation, so it was not executed:\n\n\
         Error: {}\n\nGenerated Query:\n```sql\n{}\n```\n\nPlease try rephrasing your question.",
        error, sql
    )
}

pub fn execution_failed(error: &str, sql: &str) -> String {
    format!(
        "I generated a SQL query but encountered an error executing it:\n\n\
         Error: {}\n\nGenerated Query:\n```sql\n{}\n```\n\nPlease try rephrasing your question.",
        error, sql
    )
}

pub fn no_results(sql: &str) -> String {
    format!(
        "I executed the query but found no results.\n\nQuery used:\n```sql\n{}\n```\n\n\
         This could mean:\n\
         - The data doesn't exist in the database\n\
         - The search criteria might need adjustment",
        sql
    )
}

/// Row listing: the first rows, one `column: value` line each.
pub fn results(columns: &[String], rows: &[Row], row_count: usize, sql: &str) -> String {
    let mut text = format!(
        "Query Results ({} row{}):\n\n",
        row_count,
        if row_count == 1 { "" } else { "s" }
    );

    if !columns.is_empty() {
        let _ = write!(text, "Columns: {}\n\n", columns.join(", "));
        for (i, row) in rows.iter().take(NARRATIVE_ROW_LIMIT).enumerate() {
            let _ = writeln!(text, "Row {}:", i + 1);
            for column in columns {
                let value = row
                    .get(column)
                    .map(display_value)
                    .unwrap_or_else(|| "null".to_string());
                let _ = writeln!(text, "  {}: {}", column, value);
            }
            text.push('\n');
        }
        if rows.len() > NARRATIVE_ROW_LIMIT {
            let _ = writeln!(
                text,
                "\n... and {} more row(s)",
                rows.len() - NARRATIVE_ROW_LIMIT
            );
        }
    }

    let _ = write!(text, "\nSQL Query used:\n```sql\n{}\n```", sql);
    text
}
