//! Mirrors a schema snapshot and its classification into the graph store.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{ColumnNode, ForeignKeyEdge, GraphStore, TableNode};
use crate::classifier::classify_table;
use crate::config::PipelineSettings;
use crate::error::EngineResult;
use crate::models::{ConnectionProfile, DB_TYPE_POSTGRES, SchemaSnapshot, TableSchema};

/// Outcome of one graph sync.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GraphSyncReport {
    pub synced_tables: usize,
    /// Tables whose writes failed; the rest of the sync continued.
    pub failed_tables: Vec<String>,
    pub foreign_keys: usize,
}

pub struct GraphSynchronizer {
    store: Arc<dyn GraphStore>,
    batch_size: usize,
    batch_pause: Duration,
}

impl GraphSynchronizer {
    pub fn new(store: Arc<dyn GraphStore>, settings: &PipelineSettings) -> Self {
        Self {
            store,
            batch_size: settings.graph_batch_size.max(1),
            batch_pause: settings.graph_batch_pause,
        }
    }

    /// Replace the connection's graph with `snapshot`, in batches.
    ///
    /// Existing entities of the connection are purged first. Nodes,
    /// `HAS_COLUMN` and semantic edges are written per table; foreign-key
    /// edges follow once every target column exists. A table that fails is
    /// logged and skipped. When the purge fails nothing is written.
    pub async fn sync(
        &self,
        profile: &ConnectionProfile,
        snapshot: &SchemaSnapshot,
    ) -> GraphSyncReport {
        let mut report = GraphSyncReport::default();
        if let Err(e) = self.store.purge_connection(&profile.id).await {
            warn!(
                connection_id = %profile.id,
                error = %e,
                "Failed to purge previous graph entities, skipping graph sync"
            );
            report.failed_tables = snapshot.tables.iter().map(|t| t.name.clone()).collect();
            return report;
        }
        let batch_count = snapshot.tables.len().div_ceil(self.batch_size);

        for (n, batch) in snapshot.tables.chunks(self.batch_size).enumerate() {
            debug!(
                connection_id = %profile.id,
                batch = n + 1,
                of = batch_count,
                tables = batch.len(),
                "Syncing graph batch"
            );
            for table in batch {
                match self.sync_table(profile, table).await {
                    Ok(()) => report.synced_tables += 1,
                    Err(e) => {
                        warn!(
                            connection_id = %profile.id,
                            table = %table.name,
                            error = %e,
                            "Graph sync failed for table"
                        );
                        report.failed_tables.push(table.name.clone());
                    }
                }
            }
            if n + 1 < batch_count {
                tokio::time::sleep(self.batch_pause).await;
            }
        }

        for table in &snapshot.tables {
            if report.failed_tables.contains(&table.name) {
                continue;
            }
            for fk in &table.foreign_keys {
                let edge = ForeignKeyEdge {
                    from_table: table.name.clone(),
                    from_column: fk.column.clone(),
                    to_table: fk.target_table.clone(),
                    to_column: fk.target_column.clone(),
                };
                match self.store.merge_foreign_key(&profile.id, &edge).await {
                    Ok(()) => report.foreign_keys += 1,
                    Err(e) => warn!(
                        connection_id = %profile.id,
                        table = %table.name,
                        column = %fk.column,
                        error = %e,
                        "Failed to write foreign key edge"
                    ),
                }
            }
        }

        info!(
            connection_id = %profile.id,
            tables = report.synced_tables,
            failed = report.failed_tables.len(),
            foreign_keys = report.foreign_keys,
            "Graph sync complete"
        );
        report
    }

    async fn sync_table(
        &self,
        profile: &ConnectionProfile,
        table: &TableSchema,
    ) -> EngineResult<()> {
        self.store
            .merge_table(&TableNode {
                connection_id: profile.id.clone(),
                table_name: table.name.clone(),
                primary_key: table.primary_key().map(String::from),
                table_type: table.kind.catalog_name().to_string(),
                connection_name: profile.name.clone(),
                db_type: DB_TYPE_POSTGRES.to_string(),
            })
            .await?;

        let classification = classify_table(table);

        for column in &table.columns {
            let fk = table.foreign_key_for(&column.name);
            let role = classification
                .role(&column.name)
                .unwrap_or(crate::models::ColumnRole::Attribute);
            self.store
                .merge_column(&ColumnNode {
                    connection_id: profile.id.clone(),
                    table_name: table.name.clone(),
                    column_name: column.name.clone(),
                    data_type: column.data_type.clone(),
                    is_primary_key: table.is_primary_key(&column.name),
                    is_foreign_key: fk.is_some(),
                    is_nullable: column.nullable,
                    role,
                    related_table: fk.map(|f| f.target_table.clone()),
                })
                .await?;
        }

        for column in &table.columns {
            for related in classification.related(&column.name) {
                if related == column.name || table.column(related).is_none() {
                    continue;
                }
                self.store
                    .merge_semantic_link(&profile.id, &table.name, &column.name, related)
                    .await?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::MemoryGraphStore;
    use crate::models::{ColumnRole, ColumnSchema, NewConnection};

    fn profile() -> ConnectionProfile {
        ConnectionProfile::new(
            "c1",
            NewConnection {
                owner_id: "u".into(),
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

    fn snapshot() -> SchemaSnapshot {
        SchemaSnapshot::new(vec![
            TableSchema::new("orders")
                .with_column(ColumnSchema::new("id", "integer").not_null())
                .with_column(ColumnSchema::new("customer_id", "integer"))
                .with_column(ColumnSchema::new("ship_city", "text"))
                .with_column(ColumnSchema::new("bill_city", "text"))
                .with_primary_key("id")
                .with_foreign_key("customer_id", "customers", "id"),
            TableSchema::new("customers")
                .with_column(ColumnSchema::new("id", "integer").not_null())
                .with_primary_key("id"),
        ])
    }

    fn synchronizer(store: Arc<MemoryGraphStore>) -> GraphSynchronizer {
        GraphSynchronizer::new(
            store,
            &PipelineSettings {
                graph_batch_pause: Duration::ZERO,
                ..PipelineSettings::default()
            },
        )
    }

    #[tokio::test]
    async fn test_sync_writes_nodes_and_edges() {
        let store = Arc::new(MemoryGraphStore::new());
        let report = synchronizer(store.clone()).sync(&profile(), &snapshot()).await;

        assert_eq!(report.synced_tables, 2);
        assert!(report.failed_tables.is_empty());
        // target table comes after the source, edge still written
        assert_eq!(report.foreign_keys, 1);

        let stats = store.stats("c1").await.unwrap();
        assert_eq!(stats.tables, 2);
        assert_eq!(stats.columns, 5);
        assert_eq!(stats.has_column, 5);
        assert_eq!(stats.foreign_keys, 1);
        assert!(stats.semantic_links >= 2);

        let fk = store.column("c1", "orders", "customer_id").await.unwrap();
        assert!(fk.is_foreign_key);
        assert_eq!(fk.role, ColumnRole::Identifier);
        assert_eq!(fk.related_table.as_deref(), Some("customers"));
    }

    #[tokio::test]
    async fn test_sync_is_idempotent() {
        let store = Arc::new(MemoryGraphStore::new());
        let sync = synchronizer(store.clone());
        sync.sync(&profile(), &snapshot()).await;
        let once = store.stats("c1").await.unwrap();
        sync.sync(&profile(), &snapshot()).await;
        let twice = store.stats("c1").await.unwrap();
        assert_eq!(once, twice);
    }

    #[tokio::test]
    async fn test_resync_drops_entities_missing_from_snapshot() {
        let store = Arc::new(MemoryGraphStore::new());
        let sync = synchronizer(store.clone());
        sync.sync(&profile(), &snapshot()).await;

        let changed = SchemaSnapshot::new(vec![
            TableSchema::new("products")
                .with_column(ColumnSchema::new("id", "integer").not_null())
                .with_column(ColumnSchema::new("title", "text"))
                .with_primary_key("id"),
        ]);
        sync.sync(&profile(), &changed).await;

        let stats = store.stats("c1").await.unwrap();
        assert_eq!(stats.tables, 1);
        assert_eq!(stats.columns, 2);
        assert_eq!(stats.foreign_keys, 0);
        assert!(store.column("c1", "orders", "customer_id").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pauses_between_batches_only() {
        let store = Arc::new(MemoryGraphStore::new());
        let sync = GraphSynchronizer::new(store, &PipelineSettings::default());
        let tables = (0..11)
            .map(|i| {
                TableSchema::new(format!("t{i}"))
                    .with_column(ColumnSchema::new("id", "integer"))
                    .with_primary_key("id")
            })
            .collect();

        let start = tokio::time::Instant::now();
        sync.sync(&profile(), &SchemaSnapshot::new(tables)).await;
        // 11 tables in batches of 5: two pauses of 100ms
        assert_eq!(start.elapsed(), Duration::from_millis(200));
    }
}
