//! Embedding providers.
//!
//! The model itself runs out of process; providers are thin adapters that
//! batch texts, validate the returned dimension, and L2-normalize every
//! vector so that inner product equals cosine similarity both at index time
//! and at query time.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

use crate::Embedding;
use crate::error::{EmbeddingError, Result};
use crate::similarity::normalize;

/// Trait for embedding providers.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Get the name of this provider.
    fn name(&self) -> &str;

    /// Dimension of every vector this provider returns.
    fn dimension(&self) -> usize;

    /// Embed a batch of texts, returning one unit-length vector per text in
    /// input order.
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Embedding>>;

    /// Embed a single text.
    async fn embed_one(&self, text: String) -> Result<Embedding> {
        self.embed(vec![text]).await?.pop().ok_or_else(|| {
            EmbeddingError::InvalidResponse("no embedding returned".to_string())
        })
    }
}

/// Embedding provider for OpenAI-compatible `/embeddings` endpoints
/// (llama.cpp server, LM Studio, Ollama, OpenAI).
pub struct HttpEmbeddingProvider {
    /// API key, sent as a bearer token when present.
    api_key: Option<String>,

    /// API base URL, e.g. `http://localhost:8081/v1`.
    base_url: String,

    /// HTTP client.
    client: reqwest::Client,

    /// Model name sent with every request.
    model: String,

    /// Expected output dimension.
    dimension: usize,

    /// Maximum texts per request.
    batch_size: usize,
}

impl HttpEmbeddingProvider {
    /// Create a new provider.
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, dimension: usize) -> Self {
        Self {
            api_key: None,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            model: model.into(),
            dimension,
            batch_size: 32,
        }
    }

    /// Set the API key.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Set the batch size.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Use a preconfigured HTTP client (timeouts, proxies).
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        debug!(
            "Generating batch embeddings for {} texts with model: {}",
            texts.len(),
            self.model
        );

        let body = serde_json::json!({
            "input": texts,
            "model": self.model,
        });

        let mut request = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .json(&body);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }
        let response = request.send().await?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok())
                .unwrap_or(60);

            return Err(EmbeddingError::RateLimited {
                retry_after_secs: retry_after,
            });
        }

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::ApiRequest(format!(
                "{status}: {error_text}"
            )));
        }

        let mut result: EmbeddingApiResponse = response.json().await?;
        if result.data.len() != texts.len() {
            return Err(EmbeddingError::InvalidResponse(format!(
                "requested {} embeddings, received {}",
                texts.len(),
                result.data.len()
            )));
        }

        result.data.sort_by_key(|item| item.index);

        let mut embeddings = Vec::with_capacity(result.data.len());
        for item in result.data {
            let mut embedding = item.embedding;
            if embedding.len() != self.dimension {
                return Err(EmbeddingError::DimensionMismatch {
                    expected: self.dimension,
                    actual: embedding.len(),
                });
            }
            normalize(&mut embedding);
            embeddings.push(embedding);
        }

        Ok(embeddings)
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    fn name(&self) -> &str {
        "http"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Embedding>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            embeddings.extend(self.embed_batch(batch).await?);
        }

        info!("Generated {} embeddings", embeddings.len());
        Ok(embeddings)
    }
}

/// OpenAI-compatible response format.
#[derive(Debug, Deserialize)]
struct EmbeddingApiResponse {
    data: Vec<EmbeddingApiData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingApiData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}
