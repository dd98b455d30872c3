//! Pinecone REST client.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use super::{VectorIndex, ensure_success, http_client};
use crate::config::VectorSettings;
use crate::error::{EngineError, EngineResult};
use crate::models::{RecordMetadata, SchemaEmbeddingRecord, VectorFilter, VectorMatch};

const SERVICE: &str = "pinecone";

#[derive(Serialize)]
struct UpsertRequest<'a> {
    vectors: &'a [SchemaEmbeddingRecord],
    #[serde(skip_serializing_if = "Option::is_none")]
    namespace: Option<&'a str>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    vector: &'a [f32],
    top_k: usize,
    filter: serde_json::Value,
    include_metadata: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    namespace: Option<&'a str>,
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<QueryMatch>,
}

#[derive(Deserialize)]
struct QueryMatch {
    id: String,
    #[serde(default)]
    score: f32,
    #[serde(default)]
    metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct PineconeIndex {
    client: reqwest::Client,
    host: String,
    api_key: String,
    namespace: Option<String>,
}

impl PineconeIndex {
    pub fn new(
        settings: &VectorSettings,
        timeout: std::time::Duration,
    ) -> EngineResult<Self> {
        let host = settings
            .host
            .clone()
            .ok_or_else(|| EngineError::invalid_input("Pinecone host is not configured"))?;
        let api_key = settings
            .api_key
            .clone()
            .ok_or_else(|| EngineError::invalid_input("Pinecone API key is not configured"))?;
        let host = if host.starts_with("http://") || host.starts_with("https://") {
            host
        } else {
            format!("https://{}", host)
        };
        Ok(Self {
            client: http_client(timeout)?,
            host: host.trim_end_matches('/').to_string(),
            api_key,
            namespace: settings.namespace.clone(),
        })
    }

    async fn post<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> EngineResult<reqwest::Response> {
        let response = self
            .client
            .post(format!("{}{}", self.host, path))
            .header("Api-Key", &self.api_key)
            .json(body)
            .send()
            .await?;
        ensure_success(SERVICE, response).await
    }
}

#[async_trait]
impl VectorIndex for PineconeIndex {
    async fn upsert(&self, records: Vec<SchemaEmbeddingRecord>) -> EngineResult<()> {
        if records.is_empty() {
            return Ok(());
        }
        self.post(
            "/vectors/upsert",
            &UpsertRequest {
                vectors: &records,
                namespace: self.namespace.as_deref(),
            },
        )
        .await?;
        debug!(count = records.len(), "Upserted vectors");
        Ok(())
    }

    async fn query(
        &self,
        vector: Vec<f32>,
        filter: &VectorFilter,
        top_k: usize,
    ) -> EngineResult<Vec<VectorMatch>> {
        let request = QueryRequest {
            vector: &vector,
            top_k,
            filter: json!({
                "connectionId": { "$eq": filter.connection_id },
                "type": { "$eq": filter.kind },
            }),
            include_metadata: true,
            namespace: self.namespace.as_deref(),
        };
        let body: QueryResponse = self.post("/query", &request).await?.json().await?;

        let mut matches = Vec::with_capacity(body.matches.len());
        for m in body.matches {
            let Some(raw) = m.metadata else {
                continue;
            };
            match serde_json::from_value::<RecordMetadata>(raw) {
                Ok(metadata) if filter.matches(&metadata) => matches.push(VectorMatch {
                    id: m.id,
                    score: m.score,
                    metadata,
                }),
                Ok(_) => {}
                Err(e) => warn!(id = %m.id, error = %e, "Skipping match with unreadable metadata"),
            }
        }
        Ok(matches)
    }

    async fn delete_connection(&self, connection_id: &str) -> EngineResult<()> {
        let mut body = json!({
            "filter": { "connectionId": { "$eq": connection_id } },
        });
        if let Some(ns) = &self.namespace {
            body["namespace"] = json!(ns);
        }
        self.post("/vectors/delete", &body).await?;
        debug!(connection_id = %connection_id, "Deleted connection vectors");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_gets_scheme() {
        let settings = VectorSettings {
            host: Some("schema-abc.svc.pinecone.io/".to_string()),
            api_key: Some("k".to_string()),
            namespace: None,
        };
        let index = PineconeIndex::new(&settings, std::time::Duration::from_secs(5)).unwrap();
        assert_eq!(index.host, "https://schema-abc.svc.pinecone.io");
    }

    #[test]
    fn test_missing_key_rejected() {
        let settings = VectorSettings {
            host: Some("https://idx".to_string()),
            api_key: None,
            namespace: None,
        };
        assert!(PineconeIndex::new(&settings, std::time::Duration::from_secs(5)).is_err());
    }

    #[test]
    fn test_query_request_shape() {
        let request = QueryRequest {
            vector: &[0.5],
            top_k: 15,
            filter: json!({ "connectionId": { "$eq": "c1" } }),
            include_metadata: true,
            namespace: None,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["topK"], 15);
        assert_eq!(value["includeMetadata"], true);
        assert!(value.get("namespace").is_none());
    }
}
