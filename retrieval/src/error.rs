//! Error types for the document question-answering engine.

use std::fmt;
use std::path::PathBuf;

use docqa_embeddings::EmbeddingError;
use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, RagError>;

/// Pipeline stage that ran out of time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalStage {
    /// Query embedding.
    Embed,
    /// Vector index search.
    Search,
    /// Cross-encoder scoring.
    Rerank,
}

impl fmt::Display for RetrievalStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Embed => "embed",
            Self::Search => "search",
            Self::Rerank => "rerank",
        })
    }
}

/// Errors that can occur in the engine.
#[derive(Error, Debug)]
pub enum RagError {
    /// A document could not be turned into text.
    #[error("extraction error: {0}")]
    Extraction(#[from] docqa_documents::ExtractionError),

    /// An embedding or rerank call failed.
    #[error("embedding error: {0}")]
    Embedding(EmbeddingError),

    /// A vector's length differs from the index dimension.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Persisted snapshots are missing, unreadable or disagree.
    #[error("index corruption: {0}")]
    IndexCorruption(String),

    /// Models have not finished loading.
    #[error("models not ready: {0}")]
    NotReady(String),

    /// An embed, search or rerank call exceeded the request timeout.
    #[error("retrieval timed out during {stage}")]
    RetrievalTimeout { stage: RetrievalStage },

    /// Embedding a document's chunks exceeded the request timeout.
    #[error("embedding {} timed out", .0.display())]
    IngestTimeout(PathBuf),

    /// Generation failed.
    #[error("generation error: {0}")]
    Generation(String),

    /// Directory watcher error.
    #[error("watcher error: {0}")]
    Watcher(#[from] docqa_directory_watcher::WatcherError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<EmbeddingError> for RagError {
    fn from(err: EmbeddingError) -> Self {
        match err {
            EmbeddingError::DimensionMismatch { expected, actual } => {
                Self::DimensionMismatch { expected, actual }
            }
            EmbeddingError::InvalidSnapshot(reason) => Self::IndexCorruption(reason),
            other => Self::Embedding(other),
        }
    }
}

impl RagError {
    /// Whether the error concerns one file only, so directory ingestion can
    /// record it and continue.
    pub fn is_per_file(&self) -> bool {
        !matches!(
            self,
            Self::DimensionMismatch { .. } | Self::NotReady(_) | Self::Config(_)
        )
    }
}
