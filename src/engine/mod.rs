//! The question-answering engine.
//!
//! [`QueryEngine`] is the application root. It owns the profile store, the
//! pool registry and the sync supervisor, and runs the query path:
//! retrieve → generate → validate → execute. Each query-path stage failure
//! becomes an explanatory answer instead of an error.

pub mod narrative;

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};
use uuid::Uuid;

use crate::clients::{
    EmbeddingModel, HashingEmbedder, MemoryVectorIndex, OpenAiChat, OpenAiEmbeddings,
    PineconeIndex, TextGenerator, UnavailableGenerator, VectorIndex,
};
use crate::config::{Config, ModelSettings, PipelineSettings};
use crate::db::{MemoryProfileStore, PoolRegistry, ProfileStore, QueryExecutor, SqlRunner};
use crate::error::{EngineError, EngineResult};
use crate::graph::{GraphStore, GraphSynchronizer, MemoryGraphStore, Neo4jGraphStore};
use crate::indexing::SemanticIndexer;
use crate::models::{
    AskResponse, ConnectionProfile, ExecutionOutcome, NewConnection, QueryResultPayload,
    SyncEvent, SyncStatus,
};
use crate::retrieval::RetrievalOrchestrator;
use crate::sql::{SqlSynthesizer, prepare_statement};
use crate::sync::{PostgresSnapshotSource, SnapshotSource, SyncPipeline, SyncSupervisor};

/// Collaborators the engine is assembled from.
pub struct EngineParts {
    pub profiles: Arc<dyn ProfileStore>,
    pub pools: Arc<PoolRegistry>,
    pub embedder: Arc<dyn EmbeddingModel>,
    pub generator: Arc<dyn TextGenerator>,
    pub index: Arc<dyn VectorIndex>,
    pub graph: Arc<dyn GraphStore>,
    pub snapshots: Arc<dyn SnapshotSource>,
    pub runner: Arc<dyn SqlRunner>,
}

impl EngineParts {
    /// Hosted collaborators where configured, in-memory ones otherwise.
    pub fn from_config(config: &Config) -> EngineResult<Self> {
        let pipeline = config.pipeline_settings();
        let models = config.model_settings();
        let vectors = config.vector_settings();
        let graph_settings = config.graph_settings();
        let pools = PoolRegistry::new(config.pool_settings());

        let (embedder, generator): (Arc<dyn EmbeddingModel>, Arc<dyn TextGenerator>) =
            match &models.api_key {
                Some(key) => (
                    Arc::new(OpenAiEmbeddings::new(&models, key.clone())?),
                    Arc::new(OpenAiChat::new(&models, key.clone())?),
                ),
                None => {
                    warn!(
                        "No OpenAI API key: using local hashing embeddings, SQL generation disabled"
                    );
                    (
                        Arc::new(HashingEmbedder::new(models.hash_dimensions)),
                        Arc::new(UnavailableGenerator),
                    )
                }
            };

        let index: Arc<dyn VectorIndex> = match vectors.host {
            Some(_) => Arc::new(PineconeIndex::new(&vectors, models.request_timeout)?),
            None => {
                info!("Using in-memory vector index");
                Arc::new(MemoryVectorIndex::new())
            }
        };

        let graph: Arc<dyn GraphStore> = match graph_settings.uri {
            Some(_) => Arc::new(Neo4jGraphStore::new(&graph_settings, models.request_timeout)?),
            None => {
                info!("Using in-memory graph store");
                Arc::new(MemoryGraphStore::new())
            }
        };

        Ok(Self {
            profiles: Arc::new(MemoryProfileStore::new()),
            snapshots: Arc::new(PostgresSnapshotSource::new(Arc::clone(&pools))),
            runner: Arc::new(QueryExecutor::new(Arc::clone(&pools), pipeline.query_timeout)),
            pools,
            embedder,
            generator,
            index,
            graph,
        })
    }
}

pub struct QueryEngine {
    profiles: Arc<dyn ProfileStore>,
    pools: Arc<PoolRegistry>,
    index: Arc<dyn VectorIndex>,
    graph: Arc<dyn GraphStore>,
    runner: Arc<dyn SqlRunner>,
    retriever: RetrievalOrchestrator,
    synthesizer: SqlSynthesizer,
    supervisor: SyncSupervisor,
}

impl QueryEngine {
    pub fn new(parts: EngineParts, pipeline: &PipelineSettings, models: &ModelSettings) -> Self {
        let sync = SyncPipeline::new(
            parts.snapshots,
            Arc::clone(&parts.index),
            SemanticIndexer::new(Arc::clone(&parts.embedder), Arc::clone(&parts.index), pipeline),
            GraphSynchronizer::new(Arc::clone(&parts.graph), pipeline),
        );

        Self {
            retriever: RetrievalOrchestrator::new(
                parts.embedder,
                Arc::clone(&parts.index),
                Arc::clone(&parts.graph),
                pipeline.top_k,
            ),
            synthesizer: SqlSynthesizer::new(
                parts.generator,
                models.temperature,
                models.max_tokens,
            ),
            supervisor: SyncSupervisor::new(Arc::new(sync), pipeline),
            profiles: parts.profiles,
            pools: parts.pools,
            index: parts.index,
            graph: parts.graph,
            runner: parts.runner,
        }
    }

    /// Build the engine and register the configured seed connections.
    pub async fn from_config(config: &Config) -> EngineResult<Self> {
        let engine = Self::new(
            EngineParts::from_config(config)?,
            &config.pipeline_settings(),
            &config.model_settings(),
        );

        let seeds = config.parse_connections().map_err(EngineError::invalid_input)?;
        for seed in seeds {
            let profile = ConnectionProfile::new(
                seed.id,
                NewConnection {
                    owner_id: config.default_owner.clone(),
                    name: seed.name,
                    host: seed.host,
                    port: Some(seed.port),
                    database: seed.database,
                    username: seed.username,
                    password: seed.password,
                },
            )
            .map_err(|e| EngineError::invalid_input(e.to_string()))?;
            engine.register(profile).await?;
        }
        Ok(engine)
    }

    /// Store a new connection and start syncing it in the background.
    pub async fn create_connection(
        &self,
        request: NewConnection,
    ) -> EngineResult<ConnectionProfile> {
        let profile = ConnectionProfile::new(Uuid::new_v4().to_string(), request)
            .map_err(|e| EngineError::invalid_input(e.to_string()))?;
        self.register(profile).await
    }

    async fn register(&self, profile: ConnectionProfile) -> EngineResult<ConnectionProfile> {
        let profile = self.profiles.insert(profile).await?;
        info!(
            connection_id = %profile.id,
            owner_id = %profile.owner_id,
            dsn = %profile.masked_dsn(),
            "Registered connection"
        );
        self.supervisor.start(profile.clone());
        Ok(profile)
    }

    pub async fn list_connections(&self, owner_id: &str) -> EngineResult<Vec<ConnectionProfile>> {
        self.profiles.list_by_owner(owner_id).await
    }

    pub async fn get_connection(&self, connection_id: &str) -> EngineResult<ConnectionProfile> {
        self.profiles
            .get(connection_id)
            .await?
            .ok_or_else(|| EngineError::connection_not_found(connection_id))
    }

    /// Remove a connection with its pool, sync state, vectors and graph entities.
    ///
    /// Purge failures are logged; the profile is removed regardless.
    pub async fn delete_connection(&self, connection_id: &str) -> EngineResult<ConnectionProfile> {
        let profile = self
            .profiles
            .remove(connection_id)
            .await?
            .ok_or_else(|| EngineError::connection_not_found(connection_id))?;

        self.supervisor.forget(connection_id);
        self.pools.close(connection_id).await;
        if let Err(e) = self.index.delete_connection(connection_id).await {
            warn!(connection_id, error = %e, "Failed to purge vector records");
        }
        if let Err(e) = self.graph.purge_connection(connection_id).await {
            warn!(connection_id, error = %e, "Failed to purge graph entities");
        }
        info!(connection_id, "Deleted connection");
        Ok(profile)
    }

    /// Answer a natural-language question about a connection's database.
    pub async fn ask(&self, connection_id: &str, question: &str) -> EngineResult<AskResponse> {
        let question = question.trim();
        if question.is_empty() {
            return Err(EngineError::invalid_input("Question cannot be empty"));
        }
        let profile = self.get_connection(connection_id).await?;
        info!(connection_id, question, "Question received");

        let retrieval = match self.retriever.retrieve(connection_id, question).await {
            Ok(retrieval) => retrieval,
            Err(e) => {
                let message = e.to_string();
                warn!(connection_id, error = %message, "Schema retrieval failed");
                return Ok(AskResponse {
                    response: narrative::retrieval_failed(&message),
                    relevant_tables: Vec::new(),
                    relationships: Vec::new(),
                    matches_count: 0,
                    sql_query: None,
                    query_result: None,
                    error: Some(message),
                });
            }
        };
        let mut answer = AskResponse {
            response: String::new(),
            relevant_tables: retrieval.tables,
            relationships: retrieval.relationships,
            matches_count: retrieval.match_count,
            sql_query: None,
            query_result: None,
            error: None,
        };

        if answer.relevant_tables.is_empty() {
            answer.response = narrative::no_relevant_tables(question);
            return Ok(answer);
        }

        let generated = match self
            .synthesizer
            .generate(&answer.relevant_tables, question)
            .await
        {
            Ok(sql) => sql,
            Err(e) => {
                warn!(connection_id, error = %e, "SQL generation failed");
                answer.response =
                    narrative::generation_failed(&e.to_string(), &answer.relevant_tables);
                return Ok(answer);
            }
        };

        let prepared = match prepare_statement(&generated) {
            Ok(prepared) => prepared,
            Err(e) => {
                let message = e.to_string();
                warn!(connection_id, error = %message, sql = %generated, "Generated SQL rejected");
                answer.response = narrative::validation_failed(&message, &generated);
                answer.sql_query = Some(generated);
                answer.error = Some(message);
                return Ok(answer);
            }
        };

        match self.runner.run(&profile, &prepared.sql).await {
            ExecutionOutcome::Success {
                columns,
                rows,
                row_count,
            } => {
                info!(connection_id, rows = row_count, "Question answered");
                answer.response = if row_count == 0 {
                    narrative::no_results(&prepared.sql)
                } else {
                    narrative::results(&columns, &rows, row_count, &prepared.sql)
                };
                answer.query_result = Some(QueryResultPayload::from_rows(&rows, row_count));
            }
            ExecutionOutcome::Failure { error } => {
                answer.response = narrative::execution_failed(&error, &prepared.sql);
                answer.error = Some(error);
            }
        }
        answer.sql_query = Some(prepared.sql);
        Ok(answer)
    }

    /// Latest sync state of a connection.
    pub async fn sync_status(&self, connection_id: &str) -> EngineResult<SyncStatus> {
        self.get_connection(connection_id).await?;
        Ok(self
            .supervisor
            .status(connection_id)
            .unwrap_or(SyncStatus::Pending))
    }

    /// Re-run introspection, indexing and graph sync.
    pub async fn resync(&self, connection_id: &str) -> EngineResult<SyncStatus> {
        let profile = self.get_connection(connection_id).await?;
        info!(connection_id, "Resync requested");
        self.supervisor.start(profile);
        Ok(SyncStatus::Pending)
    }

    /// Wait for the connection's current sync to finish.
    pub async fn wait_for_sync(&self, connection_id: &str) -> EngineResult<SyncStatus> {
        self.get_connection(connection_id).await?;
        Ok(self
            .supervisor
            .wait_until_settled(connection_id)
            .await
            .unwrap_or(SyncStatus::Pending))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.supervisor.subscribe()
    }

    /// Abort background syncs and close every pool.
    pub async fn shutdown(&self) {
        info!("Shutting down engine");
        self.supervisor.shutdown();
        self.pools.close_all().await;
    }
}
