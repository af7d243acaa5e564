//! Configuration for the document question-answering engine.

use std::path::PathBuf;
use std::time::Duration;

use docqa_documents::ChunkerConfig;
use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};

/// Configuration for [`crate::RagService`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    /// Directory holding the documents to index.
    pub documents_dir: PathBuf,

    /// Directory holding the index snapshot.
    pub persist_dir: PathBuf,

    /// Chunking configuration.
    pub chunking: ChunkerConfig,

    /// Retrieval pipeline configuration.
    pub retrieval: RetrievalConfig,

    /// Context assembly configuration.
    pub context: ContextConfig,

    /// Ingestion configuration.
    pub ingest: IngestConfig,

    /// Filesystem watcher configuration.
    pub watcher: WatcherConfig,

    /// Per-request timeouts.
    pub timeouts: TimeoutConfig,

    /// Behaviour before models are loaded.
    pub readiness: ReadinessConfig,

    /// Embedding server.
    pub embedding: EmbeddingConfig,

    /// Rerank server.
    pub reranker: RerankerConfig,

    /// Generation server.
    pub generation: GenerationConfig,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            documents_dir: dirs::document_dir().unwrap_or_default(),
            persist_dir: dirs::data_dir().unwrap_or_default().join("docqa/index"),
            chunking: ChunkerConfig::default(),
            retrieval: RetrievalConfig::default(),
            context: ContextConfig::default(),
            ingest: IngestConfig::default(),
            watcher: WatcherConfig::default(),
            timeouts: TimeoutConfig::default(),
            readiness: ReadinessConfig::default(),
            embedding: EmbeddingConfig::default(),
            reranker: RerankerConfig::default(),
            generation: GenerationConfig::default(),
        }
    }
}

impl RagConfig {
    /// Create a configuration with default values for the given documents
    /// directory.
    pub fn new(documents_dir: impl Into<PathBuf>) -> Self {
        Self {
            documents_dir: documents_dir.into(),
            ..Self::default()
        }
    }

    /// Set the snapshot directory.
    pub fn with_persist_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.persist_dir = dir.into();
        self
    }

    /// Set the chunking configuration.
    pub fn with_chunking(mut self, config: ChunkerConfig) -> Self {
        self.chunking = config;
        self
    }

    /// Set the retrieval configuration.
    pub fn with_retrieval(mut self, config: RetrievalConfig) -> Self {
        self.retrieval = config;
        self
    }

    /// Set the context configuration.
    pub fn with_context(mut self, config: ContextConfig) -> Self {
        self.context = config;
        self
    }

    /// Set the embedding dimension.
    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.embedding.dimension = dimension;
        self
    }

    /// Set the readiness policy.
    pub fn with_readiness_policy(mut self, policy: ReadinessPolicy) -> Self {
        self.readiness.policy = policy;
        self
    }

    /// Check the configuration for values the engine cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.chunking.chunk_size == 0 {
            return Err(RagError::Config("chunk_size must be positive".to_string()));
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            return Err(RagError::Config(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunking.chunk_overlap, self.chunking.chunk_size
            )));
        }
        if self.retrieval.retrieval_top_k == 0 || self.retrieval.rerank_top_k == 0 {
            return Err(RagError::Config(
                "retrieval_top_k and rerank_top_k must be positive".to_string(),
            ));
        }
        if self.retrieval.rerank_top_k > self.retrieval.retrieval_top_k {
            return Err(RagError::Config(format!(
                "rerank_top_k ({}) cannot exceed retrieval_top_k ({})",
                self.retrieval.rerank_top_k, self.retrieval.retrieval_top_k
            )));
        }
        if self.embedding.dimension == 0 {
            return Err(RagError::Config(
                "embedding dimension must be positive".to_string(),
            ));
        }
        if self.ingest.max_workers == 0 {
            return Err(RagError::Config("max_workers must be positive".to_string()));
        }
        Ok(())
    }
}

/// Configuration for the retrieval pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Candidates fetched from the vector index.
    pub retrieval_top_k: usize,

    /// Results kept after reranking.
    pub rerank_top_k: usize,

    /// Candidates scoring below this are dropped.
    pub min_rerank_score: f32,

    /// Conversation turns given to the query rephraser.
    pub rephrase_history_turns: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            retrieval_top_k: 20,
            rerank_top_k: 5,
            min_rerank_score: 0.5,
            rephrase_history_turns: 4,
        }
    }
}

/// Configuration for context assembly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Token budget for the assembled context.
    pub max_context_tokens: usize,

    /// Tokens reserved for the question and the answer.
    pub safety_margin_tokens: usize,

    /// Characters of each supporting result shown.
    pub preview_chars: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_context_tokens: 3500,
            safety_margin_tokens: 500,
            preview_chars: 400,
        }
    }
}

/// Configuration for ingestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Files prepared concurrently.
    pub max_workers: usize,

    /// Texts per embedding request.
    pub embedding_batch_size: usize,

    /// Extensions (without the dot) that are indexed.
    pub supported_extensions: Vec<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_workers: 8,
            embedding_batch_size: 32,
            supported_extensions: ["pdf", "docx", "txt", "md", "csv"]
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }
}

/// Configuration for the filesystem watcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    /// Quiet period before a changed file is re-indexed.
    pub debounce_ms: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self { debounce_ms: 2000 }
    }
}

impl WatcherConfig {
    /// The debounce delay.
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// Per-request timeouts for calls to external models.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Limit for each of rephrase, embed, search and rerank.
    pub request_timeout_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 30_000,
        }
    }
}

impl TimeoutConfig {
    /// The per-request timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// What requests do while models are still loading.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadinessPolicy {
    /// Wait until loading finishes.
    #[default]
    Block,

    /// Fail immediately with [`RagError::NotReady`].
    FailFast,
}

/// Readiness configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadinessConfig {
    /// Policy for requests issued before warm-up completes.
    pub policy: ReadinessPolicy,
}

/// Configuration for the embedding server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// OpenAI-compatible API base URL.
    pub base_url: String,

    /// Model name.
    pub model: String,

    /// Output dimension.
    pub dimension: usize,

    /// Environment variable holding the API key, if the server needs one.
    pub api_key_env: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8081/v1".to_string(),
            model: "all-MiniLM-L6-v2".to_string(),
            dimension: docqa_embeddings::DEFAULT_DIMENSION,
            api_key_env: None,
        }
    }
}

/// Configuration for the rerank server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankerConfig {
    /// API base URL.
    pub base_url: String,

    /// Cross-encoder model name.
    pub model: Option<String>,
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8082/v1".to_string(),
            model: Some("cross-encoder/ms-marco-MiniLM-L-6-v2".to_string()),
        }
    }
}

/// Configuration for the generation server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// OpenAI-compatible API base URL.
    pub base_url: String,

    /// Model name.
    pub model: String,

    /// Sampling temperature.
    pub temperature: f32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080/v1".to_string(),
            model: "local".to_string(),
            temperature: 0.2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults_are_valid() {
        let config = RagConfig::new("/docs");
        config.validate().unwrap();
        assert_eq!(config.chunking.chunk_size, 1000);
        assert_eq!(config.chunking.chunk_overlap, 150);
        assert_eq!(config.retrieval.retrieval_top_k, 20);
        assert_eq!(config.retrieval.rerank_top_k, 5);
        assert_eq!(config.context.max_context_tokens, 3500);
        assert_eq!(config.watcher.debounce(), Duration::from_secs(2));
    }

    #[test]
    fn test_validate_rejects_overlap_not_below_size() {
        let config = RagConfig::new("/docs").with_chunking(ChunkerConfig {
            chunk_size: 100,
            chunk_overlap: 100,
        });
        assert!(matches!(config.validate(), Err(RagError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_rerank_above_retrieval() {
        let config = RagConfig::new("/docs").with_retrieval(RetrievalConfig {
            retrieval_top_k: 3,
            rerank_top_k: 5,
            ..RetrievalConfig::default()
        });
        assert!(matches!(config.validate(), Err(RagError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_zero_dimension() {
        let config = RagConfig::new("/docs").with_dimension(0);
        assert!(matches!(config.validate(), Err(RagError::Config(_))));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: RagConfig = toml::from_str(
            r#"
            documents_dir = "/srv/notes"

            [retrieval]
            rerank_top_k = 3

            [readiness]
            policy = "fail_fast"
            "#,
        )
        .unwrap();

        assert_eq!(config.documents_dir, PathBuf::from("/srv/notes"));
        assert_eq!(config.retrieval.rerank_top_k, 3);
        assert_eq!(config.retrieval.retrieval_top_k, 20);
        assert_eq!(config.readiness.policy, ReadinessPolicy::FailFast);
        assert_eq!(config.embedding.dimension, 384);
    }
}
