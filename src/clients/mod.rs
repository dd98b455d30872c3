//! External model and vector index collaborators.
//!
//! Each collaborator sits behind an `async_trait` so the pipeline can run
//! against the hosted services or fully in memory.

pub mod memory;
pub mod openai;
pub mod pinecone;

use async_trait::async_trait;

use crate::error::{EngineError, EngineResult};
use crate::models::{SchemaEmbeddingRecord, VectorFilter, VectorMatch};

pub use memory::{HashingEmbedder, MemoryVectorIndex, UnavailableGenerator};
pub use openai::{OpenAiChat, OpenAiEmbeddings};
pub use pinecone::PineconeIndex;

/// Text to fixed-dimension vector.
#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    fn model_name(&self) -> &str;

    /// Embed `texts`, returning one vector per input in the same order.
    async fn embed(&self, texts: &[String]) -> EngineResult<Vec<Vec<f32>>>;

    async fn embed_one(&self, text: &str) -> EngineResult<Vec<f32>> {
        self.embed(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| EngineError::indexing("embed", "embedding response was empty"))
    }
}

/// One chat-style completion call.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> EngineResult<String>;
}

/// Nearest-neighbour index over schema embeddings.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn upsert(&self, records: Vec<SchemaEmbeddingRecord>) -> EngineResult<()>;

    /// Top `top_k` matches passing `filter`, best first.
    async fn query(
        &self,
        vector: Vec<f32>,
        filter: &VectorFilter,
        top_k: usize,
    ) -> EngineResult<Vec<VectorMatch>>;

    /// Remove every record of one connection.
    async fn delete_connection(&self, connection_id: &str) -> EngineResult<()>;
}

/// Build the shared HTTP client with a per-request timeout.
pub(crate) fn http_client(timeout: std::time::Duration) -> EngineResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| EngineError::internal(format!("Failed to create HTTP client: {}", e)))
}

/// Turn a non-2xx response into an [`EngineError::Upstream`], keeping a body excerpt.
pub(crate) async fn ensure_success(
    service: &str,
    response: reqwest::Response,
) -> EngineResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let excerpt: String = body.chars().take(300).collect();
    let message = format!("HTTP {}: {}", status, excerpt.trim());
    if status.is_server_error() || status.as_u16() == 429 {
        Err(EngineError::upstream_transient(service, message))
    } else {
        Err(EngineError::upstream(service, message))
    }
}
