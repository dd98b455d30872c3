//! In-process collaborators used when no hosted service is configured.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

use super::{CompletionRequest, EmbeddingModel, TextGenerator, VectorIndex};
use crate::error::{EngineError, EngineResult};
use crate::models::{SchemaEmbeddingRecord, VectorFilter, VectorMatch};

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Deterministic bag-of-words embedder.
///
/// Each lowercase alphanumeric token is hashed into one of `dimensions`
/// buckets with a hash-derived sign, then the vector is L2-normalized.
/// Texts sharing vocabulary land close together.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions];
        let lower = text.to_lowercase();
        for token in lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let hash = fnv1a(token.as_bytes());
            let bucket = (hash % self.dimensions as u64) as usize;
            let sign = if (hash >> 63) == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
            // singular form shares the bucket of its plural
            if let Some(stem) = token.strip_suffix('s').filter(|s| s.len() > 2) {
                let hash = fnv1a(stem.as_bytes());
                let bucket = (hash % self.dimensions as u64) as usize;
                let sign = if (hash >> 63) == 0 { 1.0 } else { -1.0 };
                vector[bucket] += sign;
            }
        }
        normalize(&mut vector);
        vector
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET, |hash, b| {
        (hash ^ u64::from(*b)).wrapping_mul(FNV_PRIME)
    })
}

fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        vector.iter_mut().for_each(|v| *v /= norm);
    }
}

#[async_trait]
impl EmbeddingModel for HashingEmbedder {
    fn model_name(&self) -> &str {
        "local-hashing"
    }

    async fn embed(&self, texts: &[String]) -> EngineResult<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}

/// Cosine similarity; 0 for mismatched or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|v| v * v).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// Vector index held in memory, keyed by record id.
#[derive(Debug, Default)]
pub struct MemoryVectorIndex {
    records: RwLock<HashMap<String, SchemaEmbeddingRecord>>,
}

impl MemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Records of one connection, ordered by id.
    pub async fn records_for(&self, connection_id: &str) -> Vec<SchemaEmbeddingRecord> {
        let records = self.records.read().await;
        let mut found: Vec<_> = records
            .values()
            .filter(|r| r.metadata.connection_id == connection_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        found
    }
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    async fn upsert(&self, records: Vec<SchemaEmbeddingRecord>) -> EngineResult<()> {
        let mut map = self.records.write().await;
        for record in records {
            map.insert(record.id.clone(), record);
        }
        Ok(())
    }

    async fn query(
        &self,
        vector: Vec<f32>,
        filter: &VectorFilter,
        top_k: usize,
    ) -> EngineResult<Vec<VectorMatch>> {
        let records = self.records.read().await;
        let mut matches: Vec<VectorMatch> = records
            .values()
            .filter(|r| filter.matches(&r.metadata))
            .map(|r| VectorMatch {
                id: r.id.clone(),
                score: cosine_similarity(&vector, &r.values),
                metadata: r.metadata.clone(),
            })
            .collect();
        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        matches.truncate(top_k);
        debug!(count = matches.len(), "Memory vector query");
        Ok(matches)
    }

    async fn delete_connection(&self, connection_id: &str) -> EngineResult<()> {
        self.records
            .write()
            .await
            .retain(|_, r| r.metadata.connection_id != connection_id);
        Ok(())
    }
}

/// Generator used when no model endpoint is configured.
#[derive(Debug, Clone, Default)]
pub struct UnavailableGenerator;

#[async_trait]
impl TextGenerator for UnavailableGenerator {
    async fn complete(&self, _request: CompletionRequest) -> EngineResult<String> {
        Err(EngineError::generation(
            "No text generation model is configured (set OPENAI_API_KEY)",
        ))
    }
}
