//! Supervised background synchronization.
//!
//! Registering a connection starts a sync task that introspects the target
//! database, replaces the connection's vector records and mirrors the schema
//! into the graph store. The [`SyncSupervisor`] owns every such task, keeps
//! the latest [`SyncStatus`] per connection and broadcasts each change as a
//! [`SyncEvent`].
//!
//! # Retries
//!
//! Connection failures and transient upstream errors are retried with
//! exponential backoff (`retry_base * 2^(attempt - 1)`) up to `max_attempts`.
//! Everything else fails the sync on the first attempt.
//!
//! Starting a sync for a connection aborts the task already running for it.
//! Status writes are tagged with a generation number so an aborted task can
//! never overwrite the status of its successor.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::clients::VectorIndex;
use crate::config::PipelineSettings;
use crate::db::{PoolRegistry, SchemaIntrospector};
use crate::error::{EngineError, EngineResult};
use crate::graph::GraphSynchronizer;
use crate::indexing::SemanticIndexer;
use crate::models::{ConnectionProfile, SchemaSnapshot, SyncEvent, SyncReport, SyncStatus};

const EVENT_CAPACITY: usize = 64;

/// Where schema snapshots come from.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn snapshot(&self, profile: &ConnectionProfile) -> EngineResult<SchemaSnapshot>;
}

/// Introspects the live database through the pool registry.
pub struct PostgresSnapshotSource {
    pools: Arc<PoolRegistry>,
}

impl PostgresSnapshotSource {
    pub fn new(pools: Arc<PoolRegistry>) -> Self {
        Self { pools }
    }
}

#[async_trait]
impl SnapshotSource for PostgresSnapshotSource {
    async fn snapshot(&self, profile: &ConnectionProfile) -> EngineResult<SchemaSnapshot> {
        let lease = self.pools.get_or_create(profile).await?;
        let result = SchemaIntrospector::introspect(lease.pool(), profile).await;
        drop(lease);
        if let Err(EngineError::Connection { .. }) = &result {
            self.pools.invalidate(&profile.id).await;
        }
        result
    }
}

/// Introspect, purge stale vectors, index, then sync the graph.
pub struct SyncPipeline {
    source: Arc<dyn SnapshotSource>,
    index: Arc<dyn VectorIndex>,
    indexer: SemanticIndexer,
    graph: GraphSynchronizer,
}

impl SyncPipeline {
    pub fn new(
        source: Arc<dyn SnapshotSource>,
        index: Arc<dyn VectorIndex>,
        indexer: SemanticIndexer,
        graph: GraphSynchronizer,
    ) -> Self {
        Self {
            source,
            index,
            indexer,
            graph,
        }
    }

    /// Run one full sync. Graph failures are counted, not returned.
    pub async fn run(&self, profile: &ConnectionProfile) -> EngineResult<SyncReport> {
        let snapshot = self.source.snapshot(profile).await?;

        self.index
            .delete_connection(&profile.id)
            .await
            .map_err(|e| match e {
                e if e.is_retryable() => e,
                e => EngineError::indexing("purge", e.to_string()),
            })?;
        debug!(connection_id = %profile.id, "Purged previous vector records");

        let records = self.indexer.index_snapshot(profile, &snapshot).await?;
        let graph = self.graph.sync(profile, &snapshot).await;

        Ok(SyncReport {
            tables: snapshot.tables.len(),
            records,
            graph_tables: graph.synced_tables,
            graph_failures: graph.failed_tables.len(),
        })
    }
}

/// Status map shared between the supervisor and its tasks.
struct SupervisorState {
    /// connection id -> (generation, status)
    statuses: Mutex<HashMap<String, (u64, SyncStatus)>>,
    events: broadcast::Sender<SyncEvent>,
}

impl SupervisorState {
    /// Record `status` if `generation` still owns the connection.
    fn update(&self, connection_id: &str, generation: u64, status: SyncStatus) {
        let Ok(mut statuses) = self.statuses.lock() else {
            return;
        };
        match statuses.get_mut(connection_id) {
            Some(entry) if entry.0 == generation => entry.1 = status.clone(),
            _ => return,
        }
        drop(statuses);
        let _ = self.events.send(SyncEvent {
            connection_id: connection_id.to_string(),
            status,
        });
    }
}

pub struct SyncSupervisor {
    pipeline: Arc<SyncPipeline>,
    state: Arc<SupervisorState>,
    tasks: Mutex<HashMap<String, JoinHandle<()>>>,
    next_generation: AtomicU64,
    max_attempts: u32,
    retry_base: Duration,
}

impl SyncSupervisor {
    pub fn new(pipeline: Arc<SyncPipeline>, settings: &PipelineSettings) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            pipeline,
            state: Arc::new(SupervisorState {
                statuses: Mutex::new(HashMap::new()),
                events,
            }),
            tasks: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
            max_attempts: settings.sync_max_attempts.max(1),
            retry_base: settings.sync_retry_base,
        }
    }

    /// Receive every status change from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.state.events.subscribe()
    }

    /// Start a sync for `profile`, replacing any sync already running for it.
    pub fn start(&self, profile: ConnectionProfile) {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let connection_id = profile.id.clone();

        self.abort_task(&connection_id);
        if let Ok(mut statuses) = self.state.statuses.lock() {
            statuses.insert(connection_id.clone(), (generation, SyncStatus::Pending));
        }
        let _ = self.state.events.send(SyncEvent {
            connection_id: connection_id.clone(),
            status: SyncStatus::Pending,
        });

        let task = SyncTask {
            pipeline: Arc::clone(&self.pipeline),
            state: Arc::clone(&self.state),
            generation,
            max_attempts: self.max_attempts,
            retry_base: self.retry_base,
        };
        let handle = tokio::spawn(task.run(profile));

        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.retain(|_, h| !h.is_finished());
            tasks.insert(connection_id, handle);
        }
    }

    pub fn status(&self, connection_id: &str) -> Option<SyncStatus> {
        self.state
            .statuses
            .lock()
            .ok()
            .and_then(|s| s.get(connection_id).map(|(_, status)| status.clone()))
    }

    /// Wait until the connection's sync reaches `ready` or `failed`.
    ///
    /// Returns None when the connection has no sync.
    pub async fn wait_until_settled(&self, connection_id: &str) -> Option<SyncStatus> {
        let mut events = self.subscribe();
        loop {
            match self.status(connection_id) {
                None => return None,
                Some(status) if status.is_terminal() => return Some(status),
                Some(_) => {}
            }
            match events.recv().await {
                Ok(event) if event.connection_id == connection_id && event.status.is_terminal() => {
                    return Some(event.status);
                }
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return self.status(connection_id),
            }
        }
    }

    /// Abort the connection's sync and drop its status.
    pub fn forget(&self, connection_id: &str) {
        self.abort_task(connection_id);
        if let Ok(mut statuses) = self.state.statuses.lock() {
            statuses.remove(connection_id);
        }
    }

    /// Abort every running sync.
    pub fn shutdown(&self) {
        let Ok(mut tasks) = self.tasks.lock() else {
            return;
        };
        let running = tasks.len();
        for (_, handle) in tasks.drain() {
            handle.abort();
        }
        if running > 0 {
            info!(tasks = running, "Aborted sync tasks");
        }
    }

    fn abort_task(&self, connection_id: &str) {
        let previous = self
            .tasks
            .lock()
            .ok()
            .and_then(|mut tasks| tasks.remove(connection_id));
        if let Some(handle) = previous.filter(|h| !h.is_finished()) {
            debug!(connection_id, "Aborting previous sync");
            handle.abort();
        }
    }
}

impl Drop for SyncSupervisor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct SyncTask {
    pipeline: Arc<SyncPipeline>,
    state: Arc<SupervisorState>,
    generation: u64,
    max_attempts: u32,
    retry_base: Duration,
}

impl SyncTask {
    async fn run(self, profile: ConnectionProfile) {
        let mut attempt = 1;
        loop {
            self.state
                .update(&profile.id, self.generation, SyncStatus::Running { attempt });
            info!(connection_id = %profile.id, attempt, "Sync started");

            let error = match self.pipeline.run(&profile).await {
                Ok(report) => {
                    info!(
                        connection_id = %profile.id,
                        tables = report.tables,
                        records = report.records,
                        graph_tables = report.graph_tables,
                        graph_failures = report.graph_failures,
                        "Sync finished"
                    );
                    self.state.update(
                        &profile.id,
                        self.generation,
                        SyncStatus::Ready {
                            tables: report.tables,
                            records: report.records,
                            graph_tables: report.graph_tables,
                            graph_failures: report.graph_failures,
                            finished_at: Utc::now(),
                        },
                    );
                    return;
                }
                Err(e) => e,
            };

            if error.is_retryable() && attempt < self.max_attempts {
                let delay = self.backoff(attempt);
                warn!(
                    connection_id = %profile.id,
                    attempt,
                    error = %error,
                    retry_in_ms = delay.as_millis() as u64,
                    "Sync attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
                continue;
            }

            error!(
                connection_id = %profile.id,
                attempt,
                stage = error.stage(),
                error = %error,
                "Sync failed"
            );
            self.state.update(
                &profile.id,
                self.generation,
                SyncStatus::Failed {
                    stage: error.stage().to_string(),
                    message: error.to_string(),
                    attempts: attempt,
                    finished_at: Utc::now(),
                },
            );
            return;
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.retry_base
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}
