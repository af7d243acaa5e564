//! Cross-encoder rerank providers.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::error::{EmbeddingError, Result};

/// Trait for rerank providers.
///
/// Scoring is stateless from the caller's side: one score per candidate, in
/// the same order as the input.
#[async_trait]
pub trait RerankProvider: Send + Sync {
    /// Get the name of this provider.
    fn name(&self) -> &str;

    /// Score every candidate against the query.
    async fn score(&self, query: &str, candidates: &[String]) -> Result<Vec<f32>>;
}

/// Rerank provider for `/rerank` endpoints (llama.cpp server, Jina,
/// text-embeddings-inference) backed by a cross-encoder such as
/// `ms-marco-MiniLM-L-6-v2`.
pub struct HttpRerankProvider {
    /// API base URL.
    base_url: String,

    /// HTTP client.
    client: reqwest::Client,

    /// Model name, if the server hosts more than one.
    model: Option<String>,
}

impl HttpRerankProvider {
    /// Create a new provider.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            model: None,
        }
    }

    /// Set the model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Use a preconfigured HTTP client.
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }
}

#[async_trait]
impl RerankProvider for HttpRerankProvider {
    fn name(&self) -> &str {
        "http"
    }

    async fn score(&self, query: &str, candidates: &[String]) -> Result<Vec<f32>> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        debug!("Reranking {} candidates", candidates.len());

        let mut body = serde_json::json!({
            "query": query,
            "documents": candidates,
            "top_n": candidates.len(),
        });
        if let Some(model) = &self.model {
            body["model"] = serde_json::json!(model);
        }

        let response = self
            .client
            .post(format!("{}/rerank", self.base_url))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::ApiRequest(format!(
                "{status}: {error_text}"
            )));
        }

        let items = match response.json::<RerankApiResponse>().await? {
            RerankApiResponse::Wrapped { results } => results,
            RerankApiResponse::Bare(results) => results,
        };

        let mut scores: Vec<Option<f32>> = vec![None; candidates.len()];
        for item in items {
            let slot = scores.get_mut(item.index).ok_or_else(|| {
                EmbeddingError::InvalidResponse(format!(
                    "rerank index {} out of range for {} candidates",
                    item.index,
                    candidates.len()
                ))
            })?;
            *slot = Some(item.relevance_score);
        }

        scores
            .into_iter()
            .enumerate()
            .map(|(i, score)| {
                score.ok_or_else(|| {
                    EmbeddingError::InvalidResponse(format!("no rerank score for candidate {i}"))
                })
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RerankApiResponse {
    Wrapped { results: Vec<RerankApiItem> },
    Bare(Vec<RerankApiItem>),
}

#[derive(Debug, Deserialize)]
struct RerankApiItem {
    index: usize,
    #[serde(alias = "score")]
    relevance_score: f32,
}
