//! Prompt construction and SQL generation from a retrieved schema subset.

use std::sync::Arc;
use tracing::{debug, info};

use crate::clients::{CompletionRequest, TextGenerator};
use crate::error::{EngineError, EngineResult};
use crate::models::TableDescriptor;

const SYSTEM_PROMPT: &str = "You are a SQL expert. Generate only the SQL query without any explanation, markdown, or additional text.

Rules:
1. Use double quotes for PostgreSQL identifiers
2. Use ILIKE for text searches
3. Use proper JOINs for relationships
4. No LIMIT unless requested
5. Ensure all quotes are balanced and closed";

const INSTRUCTIONS: &str = "Given the following database schema and user query, generate a SQL query to answer the question.

IMPORTANT RULES:
1. Always use double quotes around table and column names in PostgreSQL
2. Use ILIKE for case-insensitive text matching
3. When searching for names or text, use ILIKE with wildcards: column ILIKE '%term%'
4. Use appropriate JOINs based on the schema relationships
5. Use table aliases for better readability
6. Only include necessary columns in the SELECT clause
7. DO NOT use LIMIT unless specifically asked in the user query
8. Ensure all quotes are properly closed
9. Use proper PostgreSQL syntax";

/// Column referenced when a foreign key's target column is unknown.
const DEFAULT_TARGET_COLUMN: &str = "id";

pub struct SqlSynthesizer {
    generator: Arc<dyn TextGenerator>,
    temperature: f32,
    max_tokens: u32,
}

impl SqlSynthesizer {
    pub fn new(generator: Arc<dyn TextGenerator>, temperature: f32, max_tokens: u32) -> Self {
        Self {
            generator,
            temperature,
            max_tokens,
        }
    }

    /// Generate one SQL statement answering `question` over `tables`.
    pub async fn generate(
        &self,
        tables: &[TableDescriptor],
        question: &str,
    ) -> EngineResult<String> {
        let request = CompletionRequest {
            system: SYSTEM_PROMPT.to_string(),
            user: build_prompt(tables, question),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };
        debug!(tables = tables.len(), "Requesting SQL generation");

        let raw = self.generator.complete(request).await?;
        let sql = clean_response(&raw);
        if sql.is_empty() {
            return Err(EngineError::generation("No response content from the model"));
        }
        if !sql.to_uppercase().contains("SELECT") {
            return Err(EngineError::generation(
                "Generated query must include SELECT statement",
            ));
        }
        info!(sql = %sql, "Generated SQL");
        Ok(sql)
    }
}

/// Strip code fences and surrounding whitespace from model output.
pub fn clean_response(raw: &str) -> String {
    raw.trim()
        .replace("```sql\n", "")
        .replace("```sql", "")
        .replace("```\n", "")
        .replace("```", "")
        .trim()
        .to_string()
}

/// User prompt: instructions, schema section, relationships section, question.
pub fn build_prompt(tables: &[TableDescriptor], question: &str) -> String {
    format!(
        "{}\n\nSchema:\n{}\n\nRelationships:\n{}\n\nUser Query: {}\n\nGenerate ONLY the SQL query without any explanation or markdown formatting.",
        INSTRUCTIONS,
        schema_section(tables),
        relationships_section(tables),
        question
    )
}

fn schema_section(tables: &[TableDescriptor]) -> String {
    tables
        .iter()
        .map(|table| {
            let foreign_keys = table
                .columns
                .iter()
                .filter(|c| c.is_foreign_key)
                .map(|c| {
                    format!(
                        "{} → {}",
                        c.name,
                        c.related_table.as_deref().unwrap_or_default()
                    )
                })
                .collect::<Vec<_>>()
                .join(", ");
            let columns = table
                .columns
                .iter()
                .map(|c| {
                    let marker = if c.is_foreign_key { " [FK]" } else { "" };
                    format!("{} ({}){}", c.name, c.data_type, marker)
                })
                .collect::<Vec<_>>()
                .join(", ");
            let primary_key = if table.primary_key.is_empty() {
                "None"
            } else {
                table.primary_key.as_str()
            };
            let foreign_keys = if foreign_keys.is_empty() {
                "None"
            } else {
                foreign_keys.as_str()
            };

            format!(
                "\nTable: \"{}\"\n- Primary Key: {}\n- Foreign Keys: {}\n- Columns: {}\n",
                table.table_name, primary_key, foreign_keys, columns
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn relationships_section(tables: &[TableDescriptor]) -> String {
    let lines: Vec<String> = tables
        .iter()
        .flat_map(|table| {
            table.columns.iter().filter_map(move |c| {
                let target = c.related_table.as_deref().filter(|_| c.is_foreign_key)?;
                Some(format!(
                    "- \"{}\".\"{}\" → \"{}\".\"{}\"",
                    table.table_name,
                    c.name,
                    target,
                    c.related_column.as_deref().unwrap_or(DEFAULT_TARGET_COLUMN)
                ))
            })
        })
        .collect();
    if lines.is_empty() {
        "None".to_string()
    } else {
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ColumnDescriptor;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct Scripted {
        reply: String,
        seen: Mutex<Option<CompletionRequest>>,
    }

    impl Scripted {
        fn new(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: reply.to_string(),
                seen: Mutex::new(None),
            })
        }
    }

    #[async_trait]
    impl TextGenerator for Scripted {
        async fn complete(&self, request: CompletionRequest) -> EngineResult<String> {
            *self.seen.lock().unwrap() = Some(request);
            Ok(self.reply.clone())
        }
    }

    fn orders() -> TableDescriptor {
        TableDescriptor {
            table_name: "orders".into(),
            primary_key: "id".into(),
            columns: vec![
                ColumnDescriptor::new("id", "integer"),
                ColumnDescriptor::new("customer_id", "integer")
                    .with_reference("customers", Some("customer_no")),
            ],
            relevance_score: 0.9,
        }
    }

    #[test]
    fn test_schema_section_format() {
        let section = schema_section(&[orders()]);
        assert_eq!(
            section,
            "\nTable: \"orders\"\n- Primary Key: id\n- Foreign Keys: customer_id → customers\n- Columns: id (integer), customer_id (integer) [FK]\n"
        );
    }

    #[test]
    fn test_relationships_use_known_target_column() {
        let section = relationships_section(&[orders()]);
        assert_eq!(
            section,
            "- \"orders\".\"customer_id\" → \"customers\".\"customer_no\""
        );
    }

    #[test]
    fn test_relationships_fall_back_to_id() {
        let mut table = orders();
        table.columns[1].related_column = None;
        assert!(relationships_section(&[table]).ends_with("\"customers\".\"id\""));
    }

    #[test]
    fn test_empty_sections_say_none() {
        let table = TableDescriptor {
            table_name: "tags".into(),
            primary_key: String::new(),
            columns: vec![ColumnDescriptor::new("label", "text")],
            relevance_score: 0.1,
        };
        let prompt = build_prompt(&[table], "list tags");
        assert!(prompt.contains("- Primary Key: None"));
        assert!(prompt.contains("- Foreign Keys: None"));
        assert!(prompt.contains("Relationships:\nNone"));
        assert!(prompt.contains("User Query: list tags"));
        assert!(prompt.starts_with("Given the following database schema"));
        assert!(prompt.contains("7. DO NOT use LIMIT"));
    }

    #[test]
    fn test_clean_response_strips_fences() {
        assert_eq!(
            clean_response("```sql\nSELECT 1\n```"),
            "SELECT 1"
        );
        assert_eq!(clean_response("  SELECT 2  "), "SELECT 2");
    }

    #[tokio::test]
    async fn test_generate_uses_fixed_parameters() {
        let generator = Scripted::new("```sql\nSELECT \"id\" FROM \"orders\"\n```");
        let synthesizer = SqlSynthesizer::new(generator.clone(), 0.1, 500);

        let sql = synthesizer.generate(&[orders()], "all orders").await.unwrap();
        assert_eq!(sql, "SELECT \"id\" FROM \"orders\"");

        let seen = generator.seen.lock().unwrap().clone().unwrap();
        assert_eq!(seen.temperature, 0.1);
        assert_eq!(seen.max_tokens, 500);
        assert!(seen.system.starts_with("You are a SQL expert."));
        assert!(seen.user.contains("Table: \"orders\""));
    }

    #[tokio::test]
    async fn test_non_select_output_is_a_generation_error() {
        let synthesizer = SqlSynthesizer::new(Scripted::new("I cannot help with that."), 0.1, 500);
        let err = synthesizer.generate(&[orders()], "drop it").await.unwrap_err();
        assert_eq!(err.to_string(), "Generated query must include SELECT statement");
    }

    #[tokio::test]
    async fn test_empty_output_is_a_generation_error() {
        let synthesizer = SqlSynthesizer::new(Scripted::new("```sql\n```"), 0.1, 500);
        let err = synthesizer.generate(&[orders()], "x").await.unwrap_err();
        assert!(matches!(err, EngineError::Generation { .. }));
    }
}
