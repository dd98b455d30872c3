//! Semantic indexing of schema snapshots.
//!
//! Turns every keyed table into column and relationship documents, embeds
//! them in token-bounded batches and writes the resulting records to the
//! vector index in fixed-size groups.

pub mod batching;
pub mod documents;

use std::sync::Arc;
use tracing::{debug, info};

use crate::clients::{EmbeddingModel, VectorIndex};
use crate::config::PipelineSettings;
use crate::error::{EngineError, EngineResult};
use crate::models::{
    ConnectionProfile, DB_TYPE_POSTGRES, FOREIGN_KEY_RELATIONSHIP, RecordMetadata,
    SCHEMA_RECORD_KIND, SchemaEmbeddingRecord, SchemaSnapshot,
};

pub use batching::{batch_by_token_limit, estimate_tokens};
pub use documents::{SchemaDocument, table_documents};

/// A document with its deterministic record id.
#[derive(Debug, Clone)]
struct PendingDocument {
    id: String,
    document: SchemaDocument,
}

pub struct SemanticIndexer {
    embedder: Arc<dyn EmbeddingModel>,
    index: Arc<dyn VectorIndex>,
    token_ceiling: usize,
    upsert_batch_size: usize,
}

impl SemanticIndexer {
    pub fn new(
        embedder: Arc<dyn EmbeddingModel>,
        index: Arc<dyn VectorIndex>,
        settings: &PipelineSettings,
    ) -> Self {
        Self {
            embedder,
            index,
            token_ceiling: settings.token_ceiling,
            upsert_batch_size: settings.upsert_batch_size.max(1),
        }
    }

    /// Index every keyed table of `snapshot` and return the number of records written.
    ///
    /// Any embedding or upsert failure aborts the run; records already
    /// written stay in the index.
    pub async fn index_snapshot(
        &self,
        profile: &ConnectionProfile,
        snapshot: &SchemaSnapshot,
    ) -> EngineResult<usize> {
        let pending = Self::pending_documents(&profile.id, snapshot);
        if pending.is_empty() {
            info!(connection_id = %profile.id, "No keyed tables to index");
            return Ok(0);
        }

        let batches = batch_by_token_limit(pending, self.token_ceiling, |p| {
            p.document.text.as_str()
        });
        info!(
            connection_id = %profile.id,
            batches = batches.len(),
            model = self.embedder.model_name(),
            "Indexing schema"
        );

        let mut buffer: Vec<SchemaEmbeddingRecord> = Vec::with_capacity(self.upsert_batch_size);
        let mut written = 0usize;

        for (batch_no, batch) in batches.into_iter().enumerate() {
            let texts: Vec<String> = batch.iter().map(|p| p.document.text.clone()).collect();
            let vectors = self
                .embedder
                .embed(&texts)
                .await
                .map_err(|e| stage_error("embed", e))?;
            if vectors.len() != batch.len() {
                return Err(EngineError::indexing(
                    "embed",
                    format!(
                        "batch {} returned {} vectors for {} documents",
                        batch_no,
                        vectors.len(),
                        batch.len()
                    ),
                ));
            }
            debug!(batch = batch_no, size = batch.len(), "Embedded batch");

            for (pending, values) in batch.into_iter().zip(vectors) {
                buffer.push(Self::record(profile, pending, values));
                if buffer.len() >= self.upsert_batch_size {
                    written += self.flush(&mut buffer).await?;
                }
            }
        }
        written += self.flush(&mut buffer).await?;

        info!(connection_id = %profile.id, records = written, "Schema indexed");
        Ok(written)
    }

    async fn flush(&self, buffer: &mut Vec<SchemaEmbeddingRecord>) -> EngineResult<usize> {
        if buffer.is_empty() {
            return Ok(0);
        }
        let records = std::mem::take(buffer);
        let count = records.len();
        self.index
            .upsert(records)
            .await
            .map_err(|e| stage_error("upsert", e))?;
        Ok(count)
    }

    /// Documents of all tables with ids `schema-{connection}-{table}-{n}`.
    fn pending_documents(connection_id: &str, snapshot: &SchemaSnapshot) -> Vec<PendingDocument> {
        snapshot
            .tables
            .iter()
            .flat_map(|table| {
                table_documents(table, snapshot)
                    .into_iter()
                    .enumerate()
                    .map(|(n, document)| PendingDocument {
                        id: SchemaEmbeddingRecord::record_id(connection_id, &table.name, n),
                        document,
                    })
            })
            .collect()
    }

    fn record(
        profile: &ConnectionProfile,
        pending: PendingDocument,
        values: Vec<f32>,
    ) -> SchemaEmbeddingRecord {
        let doc = pending.document;
        let (related_table, related_column) = match &doc.foreign_key {
            Some(fk) => (Some(fk.target_table.clone()), Some(fk.target_column.clone())),
            None => (None, None),
        };
        SchemaEmbeddingRecord {
            id: pending.id,
            values,
            metadata: RecordMetadata {
                connection_id: profile.id.clone(),
                connection_name: profile.name.clone(),
                db_type: DB_TYPE_POSTGRES.to_string(),
                table_name: doc.table_name,
                column_name: Some(doc.column_name),
                primary_key: doc.primary_key,
                data_type: Some(doc.data_type).filter(|t| !t.is_empty()),
                is_foreign_key: doc.foreign_key.is_some(),
                related_table,
                related_column,
                relationship_type: doc
                    .is_relationship
                    .then(|| FOREIGN_KEY_RELATIONSHIP.to_string()),
                text: doc.text,
                kind: SCHEMA_RECORD_KIND.to_string(),
            },
        }
    }
}

/// Tag a failure with its stage. Transient upstream errors stay retryable.
fn stage_error(stage: &str, error: EngineError) -> EngineError {
    if error.is_retryable() {
        error
    } else {
        EngineError::indexing(stage, error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::{HashingEmbedder, MemoryVectorIndex};
    use crate::models::{ColumnSchema, NewConnection, SchemaEmbeddingRecord, TableSchema};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts upsert calls and their sizes.
    #[derive(Default)]
    struct RecordingIndex {
        inner: MemoryVectorIndex,
        calls: std::sync::Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl VectorIndex for RecordingIndex {
        async fn upsert(&self, records: Vec<SchemaEmbeddingRecord>) -> EngineResult<()> {
            self.calls.lock().unwrap().push(records.len());
            self.inner.upsert(records).await
        }

        async fn query(
            &self,
            vector: Vec<f32>,
            filter: &crate::models::VectorFilter,
            top_k: usize,
        ) -> EngineResult<Vec<crate::models::VectorMatch>> {
            self.inner.query(vector, filter, top_k).await
        }

        async fn delete_connection(&self, connection_id: &str) -> EngineResult<()> {
            self.inner.delete_connection(connection_id).await
        }
    }

    /// Fails on the n-th embed call.
    struct FailingEmbedder {
        calls: AtomicUsize,
        fail_on: usize,
    }

    #[async_trait]
    impl EmbeddingModel for FailingEmbedder {
        fn model_name(&self) -> &str {
            "failing"
        }

        async fn embed(&self, texts: &[String]) -> EngineResult<Vec<Vec<f32>>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call == self.fail_on {
                return Err(EngineError::upstream("openai", "HTTP 400"));
            }
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    fn profile() -> ConnectionProfile {
        ConnectionProfile::new(
            "shop",
            NewConnection {
                owner_id: "u1".into(),
                name: "Shop".into(),
                host: "localhost".into(),
                port: None,
                database: "shop".into(),
                username: "app".into(),
                password: "pw".into(),
            },
        )
        .unwrap()
    }

    fn wide_snapshot(columns: usize) -> SchemaSnapshot {
        let mut table = TableSchema::new("wide")
            .with_column(ColumnSchema::new("id", "integer"))
            .with_primary_key("id");
        for i in 1..columns {
            table = table.with_column(ColumnSchema::new(format!("c{i}"), "text"));
        }
        SchemaSnapshot::new(vec![table])
    }

    fn settings(token_ceiling: usize) -> PipelineSettings {
        PipelineSettings {
            token_ceiling,
            ..PipelineSettings::default()
        }
    }

    #[tokio::test]
    async fn test_upserts_in_groups_of_ten() {
        let index = Arc::new(RecordingIndex::default());
        let indexer = SemanticIndexer::new(
            Arc::new(HashingEmbedder::new(32)),
            index.clone(),
            &settings(4000),
        );

        let written = indexer
            .index_snapshot(&profile(), &wide_snapshot(23))
            .await
            .unwrap();

        assert_eq!(written, 23);
        assert_eq!(*index.calls.lock().unwrap(), vec![10, 10, 3]);
    }

    #[tokio::test]
    async fn test_record_ids_are_deterministic() {
        let index = Arc::new(MemoryVectorIndex::new());
        let indexer = SemanticIndexer::new(
            Arc::new(HashingEmbedder::new(32)),
            index.clone(),
            &settings(4000),
        );
        indexer
            .index_snapshot(&profile(), &wide_snapshot(3))
            .await
            .unwrap();
        let ids: Vec<String> = index
            .records_for("shop")
            .await
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(
            ids,
            vec![
                "schema-4:shop-4:wide-0",
                "schema-4:shop-4:wide-1",
                "schema-4:shop-4:wide-2"
            ]
        );
    }

    #[tokio::test]
    async fn test_records_carry_structured_type() {
        let index = Arc::new(MemoryVectorIndex::new());
        let indexer = SemanticIndexer::new(
            Arc::new(HashingEmbedder::new(32)),
            index.clone(),
            &settings(4000),
        );
        indexer
            .index_snapshot(&profile(), &wide_snapshot(2))
            .await
            .unwrap();
        let records = index.records_for("shop").await;
        assert_eq!(records[0].metadata.data_type.as_deref(), Some("integer"));
        assert_eq!(records[1].metadata.data_type.as_deref(), Some("text"));
        assert_eq!(records[1].metadata.primary_key, "id");
        assert_eq!(records[1].metadata.kind, "schema");
        assert_eq!(records[1].metadata.db_type, "postgresql");
    }

    #[tokio::test]
    async fn test_foreign_key_records_point_at_target() {
        let index = Arc::new(MemoryVectorIndex::new());
        let indexer = SemanticIndexer::new(
            Arc::new(HashingEmbedder::new(32)),
            index.clone(),
            &settings(4000),
        );
        let customers = TableSchema::new("customers")
            .with_column(ColumnSchema::new("id", "integer"))
            .with_primary_key("id");
        let orders = TableSchema::new("orders")
            .with_column(ColumnSchema::new("id", "integer"))
            .with_column(ColumnSchema::new("customer_id", "integer"))
            .with_primary_key("id")
            .with_foreign_key("customer_id", "customers", "id");
        indexer
            .index_snapshot(&profile(), &SchemaSnapshot::new(vec![orders, customers]))
            .await
            .unwrap();

        let records = index.records_for("shop").await;
        let customer_id: Vec<_> = records
            .iter()
            .filter(|r| r.metadata.column_name.as_deref() == Some("customer_id"))
            .collect();
        // column document plus relationship document
        assert_eq!(customer_id.len(), 2);
        for record in &customer_id {
            assert_eq!(record.metadata.table_name, "orders");
            assert!(record.metadata.is_foreign_key);
            assert_eq!(record.metadata.related_table.as_deref(), Some("customers"));
            assert_eq!(record.metadata.related_column.as_deref(), Some("id"));
        }
        let relationship = customer_id
            .iter()
            .find(|r| r.metadata.is_relationship())
            .unwrap();
        assert_eq!(
            relationship.metadata.relationship_type.as_deref(),
            Some(FOREIGN_KEY_RELATIONSHIP)
        );
        assert!(relationship.metadata.text.contains("customers"));

        let plain = records
            .iter()
            .find(|r| r.metadata.column_name.as_deref() == Some("id"))
            .unwrap();
        assert!(!plain.metadata.is_foreign_key);
        assert!(plain.metadata.relationship_type.is_none());
    }

    #[tokio::test]
    async fn test_embedding_failure_aborts_and_keeps_flushed_records() {
        let index = Arc::new(RecordingIndex::default());
        let embedder = Arc::new(FailingEmbedder {
            calls: AtomicUsize::new(0),
            fail_on: 1,
        });
        // tiny ceiling: one document per embedding batch
        let indexer = SemanticIndexer::new(embedder, index.clone(), &settings(1));

        let err = indexer
            .index_snapshot(&profile(), &wide_snapshot(5))
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::Indexing { ref stage, .. } if stage == "embed"));
        // first document was buffered but never flushed
        assert!(index.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_snapshot_writes_nothing() {
        let index = Arc::new(RecordingIndex::default());
        let indexer =
            SemanticIndexer::new(Arc::new(HashingEmbedder::new(8)), index.clone(), &settings(10));
        let written = indexer
            .index_snapshot(&profile(), &SchemaSnapshot::default())
            .await
            .unwrap();
        assert_eq!(written, 0);
        assert!(index.calls.lock().unwrap().is_empty());
    }
}
