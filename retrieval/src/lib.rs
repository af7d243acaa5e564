//! # Retrieval
//!
//! This crate ties the document assistant together:
//!
//! - **Ingestion**: Extract, chunk and embed files, then append them to the
//!   vector index and the position-aligned chunk store
//! - **Retrieval**: Rephrase, embed, search, rerank and filter
//! - **Context Assembly**: Budgeted, cited prompt context
//! - **Incremental Indexing**: Debounced filesystem events applied to the index
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          RagService                             │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │  files ──► DocumentExtractor ──► TextChunker ──► Embedder       │
//! │                                                    │            │
//! │                                                    ▼            │
//! │                     ┌──────────────────────────────────┐        │
//! │                     │ RwLock<VectorIndex + ChunkStore> │        │
//! │                     └──────────────────────────────────┘        │
//! │                                  │                              │
//! │  query ──► rephrase ──► embed ──► search ──► rerank ──► filter  │
//! │                                                    │            │
//! │                                                    ▼            │
//! │                                           ContextBuilder        │
//! │                                                                 │
//! │  IncrementalIndexer: DirectoryWatcher ──► Debouncer ──► apply   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use docqa_retrieval::{RagConfig, RagService};
//!
//! let service = RagService::new(RagConfig::new("~/Documents"))?;
//! service.set_models(models)?;
//! service.ingest_directory("~/Documents", false).await?;
//!
//! let results = service.retrieve("What is the capital of France?", &[]).await?;
//! let context = service.build_context(&results, 3500);
//! ```

pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod generation;
pub mod pipeline;
pub mod readiness;
pub mod store;
pub mod watch;

pub use config::{
    ContextConfig, EmbeddingConfig, GenerationConfig, IngestConfig, RagConfig, ReadinessConfig,
    ReadinessPolicy, RerankerConfig, RetrievalConfig, TimeoutConfig, WatcherConfig,
};
pub use context::{AssembledContext, ContextBuilder, SourceRef, estimate_tokens};
pub use engine::{DocumentOutcome, FailedDocument, IndexStatus, IngestReport, RagService};
pub use error::{RagError, Result, RetrievalStage};
pub use generation::{
    ChatMessage, GenerationService, HttpGenerationService, Role, StreamEvent, TokenStream,
};
pub use pipeline::{RetrievalResult, ScoredChunk};
pub use readiness::{ModelState, Models, ReadinessGate};
pub use store::{Chunk, ChunkStore, SourceEntry, content_hash};
pub use watch::{IncrementalIndexer, apply};

// Re-export from dependencies for convenience
pub use docqa_documents::ChunkerConfig;
pub use docqa_embeddings::{
    Embedding, EmbeddingProvider, HttpEmbeddingProvider, HttpRerankProvider, RerankProvider,
};
