//! OpenAI-compatible embedding and chat completion clients.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    CompletionRequest, EmbeddingModel, TextGenerator, ensure_success, http_client,
};
use crate::config::ModelSettings;
use crate::error::{EngineError, EngineResult};

const SERVICE: &str = "openai";

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

/// `/embeddings` client.
#[derive(Debug, Clone)]
pub struct OpenAiEmbeddings {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiEmbeddings {
    pub fn new(settings: &ModelSettings, api_key: impl Into<String>) -> EngineResult<Self> {
        Ok(Self {
            client: http_client(settings.request_timeout)?,
            base_url: settings.base_url.clone(),
            api_key: api_key.into(),
            model: settings.embedding_model.clone(),
        })
    }
}

#[async_trait]
impl EmbeddingModel for OpenAiEmbeddings {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, texts: &[String]) -> EngineResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&EmbeddingRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .await?;
        let mut body: EmbeddingResponse = ensure_success(SERVICE, response).await?.json().await?;

        if body.data.len() != texts.len() {
            return Err(EngineError::indexing(
                "embed",
                format!(
                    "expected {} embeddings, received {}",
                    texts.len(),
                    body.data.len()
                ),
            ));
        }
        body.data.sort_by_key(|d| d.index);
        debug!(count = texts.len(), model = %self.model, "Embedded batch");
        Ok(body.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// `/chat/completions` client.
#[derive(Debug, Clone)]
pub struct OpenAiChat {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiChat {
    pub fn new(settings: &ModelSettings, api_key: impl Into<String>) -> EngineResult<Self> {
        Ok(Self {
            client: http_client(settings.request_timeout)?,
            base_url: settings.base_url.clone(),
            api_key: api_key.into(),
            model: settings.generation_model.clone(),
        })
    }
}

#[async_trait]
impl TextGenerator for OpenAiChat {
    async fn complete(&self, request: CompletionRequest) -> EngineResult<String> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&ChatRequest {
                model: &self.model,
                messages: [
                    ChatMessage {
                        role: "system",
                        content: &request.system,
                    },
                    ChatMessage {
                        role: "user",
                        content: &request.user,
                    },
                ],
                temperature: request.temperature,
                max_tokens: request.max_tokens,
            })
            .send()
            .await?;
        let body: ChatResponse = ensure_success(SERVICE, response).await?.json().await?;

        body.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| EngineError::generation("No response content from the model"))
    }
}
