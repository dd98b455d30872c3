//! Question to schema subset: similarity search plus graph expansion.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::clients::{EmbeddingModel, VectorIndex};
use crate::error::EngineResult;
use crate::graph::{ExpansionRequest, GraphColumn, GraphStore};
use crate::models::{
    ColumnDescriptor, Relationship, RetrievalOutcome, TableDescriptor, VectorFilter, VectorMatch,
};

/// Words that make identifier columns worth returning.
const IDENTITY_TERMS: &[&str] = &["who", "user", "person", "people"];

const UNKNOWN_TYPE: &str = "unknown";

pub struct RetrievalOrchestrator {
    embedder: Arc<dyn EmbeddingModel>,
    index: Arc<dyn VectorIndex>,
    graph: Arc<dyn GraphStore>,
    top_k: usize,
}

impl RetrievalOrchestrator {
    pub fn new(
        embedder: Arc<dyn EmbeddingModel>,
        index: Arc<dyn VectorIndex>,
        graph: Arc<dyn GraphStore>,
        top_k: usize,
    ) -> Self {
        Self {
            embedder,
            index,
            graph,
            top_k: top_k.max(1),
        }
    }

    /// Retrieve the tables and relationships relevant to `question`.
    ///
    /// Embedding and vector search errors propagate. Graph errors do not:
    /// the affected table keeps its vector-only columns.
    pub async fn retrieve(
        &self,
        connection_id: &str,
        question: &str,
    ) -> EngineResult<RetrievalOutcome> {
        let vector = self.embedder.embed_one(question).await?;
        let matches = self
            .index
            .query(vector, &VectorFilter::schema(connection_id), self.top_k)
            .await?;
        debug!(connection_id, matches = matches.len(), "Similarity search done");

        let match_count = matches.len();
        let (tables, relationships) = fold_matches(&matches);
        let tables = self.expand(connection_id, question, tables).await;

        Ok(RetrievalOutcome {
            tables,
            relationships,
            match_count,
        })
    }

    async fn expand(
        &self,
        connection_id: &str,
        question: &str,
        tables: Vec<TableDescriptor>,
    ) -> Vec<TableDescriptor> {
        let include_identifiers = wants_identifiers(question);
        let mut expanded = Vec::with_capacity(tables.len());

        for table in tables {
            let request = ExpansionRequest {
                connection_id: connection_id.to_string(),
                table_name: table.table_name.clone(),
                existing: table.columns.iter().map(|c| c.name.clone()).collect(),
                include_identifiers,
            };
            match self.graph.expand_columns(&request).await {
                Ok(found) => expanded.push(merge_expansion(table, found)),
                Err(e) => {
                    warn!(
                        connection_id,
                        table = %table.table_name,
                        error = %e,
                        "Graph expansion unavailable, using vector matches only"
                    );
                    expanded.push(table);
                }
            }
        }
        expanded
    }
}

fn wants_identifiers(question: &str) -> bool {
    let lowered = question.to_lowercase();
    IDENTITY_TERMS.iter().any(|t| lowered.contains(t))
}

/// Group matches per table in ranking order and collect foreign-key matches.
fn fold_matches(matches: &[VectorMatch]) -> (Vec<TableDescriptor>, Vec<Relationship>) {
    let mut tables: Vec<TableDescriptor> = Vec::new();
    let mut relationships = Vec::new();

    for m in matches {
        let meta = &m.metadata;
        let position = match tables.iter().position(|t| t.table_name == meta.table_name) {
            Some(p) => p,
            None => {
                tables.push(TableDescriptor {
                    table_name: meta.table_name.clone(),
                    primary_key: meta.primary_key.clone(),
                    columns: Vec::new(),
                    relevance_score: m.score,
                });
                tables.len() - 1
            }
        };
        let table = &mut tables[position];
        if m.score > table.relevance_score {
            table.relevance_score = m.score;
        }

        if let Some(name) = meta.column_name.as_ref().filter(|n| !table.has_column(n)) {
            let mut column = ColumnDescriptor::new(
                name.clone(),
                meta.data_type.as_deref().unwrap_or(UNKNOWN_TYPE),
            );
            if let Some(target) = meta.related_table.as_ref().filter(|_| meta.is_foreign_key) {
                column = column.with_reference(target.clone(), meta.related_column.clone());
            }
            table.columns.push(column);
        }

        if let Some(target) = meta.related_table.as_ref().filter(|_| meta.is_relationship()) {
            relationships.push(Relationship {
                from_table: meta.table_name.clone(),
                to_table: target.clone(),
                score: m.score,
            });
        }
    }

    (tables, relationships)
}

/// Replace a table's columns with the graph's ordering, unless that would drop columns.
fn merge_expansion(mut table: TableDescriptor, found: Vec<GraphColumn>) -> TableDescriptor {
    if found.len() < table.columns.len() {
        return table;
    }

    let mut columns = Vec::with_capacity(found.len());
    for graph_column in found {
        let column = match table
            .columns
            .iter()
            .find(|c| c.name == graph_column.column_name)
        {
            Some(existing) => existing.clone(),
            None => {
                let mut column = ColumnDescriptor::new(
                    graph_column.column_name,
                    graph_column.data_type.as_deref().unwrap_or(UNKNOWN_TYPE),
                );
                let target = graph_column
                    .related_table
                    .filter(|_| graph_column.is_foreign_key);
                if let Some(target) = target {
                    column = column.with_reference(target, None::<String>);
                }
                column
            }
        };
        columns.push(column);
    }
    // keep vector matches the graph did not know about
    for existing in &table.columns {
        if !columns.iter().any(|c| c.name == existing.name) {
            columns.push(existing.clone());
        }
    }
    table.columns = columns;
    table
}
