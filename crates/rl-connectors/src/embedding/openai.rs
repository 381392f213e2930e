//! Embedding client for OpenAI-compatible `/embeddings` endpoints.

use crate::http::{HttpClient, RateLimitConfig};
use crate::traits::{ConnectorConfig, ConnectorError, ConnectorResult, Embedder};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::instrument;

/// Default vector size of `text-embedding-3-small`.
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 1536;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiEmbeddingConfig {
    #[serde(flatten)]
    pub connector: ConnectorConfig,
    pub model: String,
    #[serde(default = "default_dimension")]
    pub dimension: usize,
}

fn default_dimension() -> usize {
    DEFAULT_EMBEDDING_DIMENSION
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

/// Embedder backed by a remote embedding model.
pub struct OpenAiEmbedder {
    config: OpenAiEmbeddingConfig,
    client: HttpClient,
}

impl OpenAiEmbedder {
    pub fn new(config: OpenAiEmbeddingConfig) -> ConnectorResult<Self> {
        let client = HttpClient::with_rate_limit(
            config.connector.clone(),
            Some(RateLimitConfig {
                requests_per_minute: 300,
                burst_size: 20,
            }),
        )?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> ConnectorResult<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text]).await?;
        vectors
            .pop()
            .ok_or_else(|| ConnectorError::InvalidResponse("no embedding returned".into()))
    }

    #[instrument(skip(self, texts), fields(model = %self.config.model, count = texts.len()))]
    async fn embed_batch(&self, texts: &[&str]) -> ConnectorResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let body = EmbeddingRequest {
            model: &self.config.model,
            input: texts,
        };
        let mut response: EmbeddingResponse = self.client.post_json("embeddings", &body).await?;

        if response.data.len() != texts.len() {
            return Err(ConnectorError::InvalidResponse(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                response.data.len()
            )));
        }

        response.data.sort_by_key(|d| d.index);
        let mut vectors = Vec::with_capacity(response.data.len());
        for item in response.data {
            if item.embedding.len() != self.config.dimension {
                return Err(ConnectorError::InvalidResponse(format!(
                    "embedding dimension {} does not match configured {}",
                    item.embedding.len(),
                    self.config.dimension
                )));
            }
            vectors.push(item.embedding);
        }
        Ok(vectors)
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }

    fn model_id(&self) -> &str {
        &self.config.model
    }
}
