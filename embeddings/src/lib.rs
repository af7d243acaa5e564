//! # Embeddings
//!
//! This crate provides the vector side of the document assistant:
//!
//! - **Embedding Providers**: Turn text into unit-length vectors
//! - **Rerank Providers**: Score (query, passage) pairs with a cross-encoder
//! - **Vector Index**: Append-only inner-product index with binary snapshots
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Embeddings System                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  EmbeddingProvider ──► Embedding ──► VectorIndex               │
//! │       │                                  │                      │
//! │       ▼                                  ▼                      │
//! │  HttpEmbeddingProvider             index.bin snapshot          │
//! │                                                                 │
//! │  RerankProvider ──► HttpRerankProvider                          │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod index;
pub mod provider;
pub mod rerank;
pub mod similarity;

pub use error::{EmbeddingError, Result};
pub use index::{SearchHit, VectorIndex};
pub use provider::{EmbeddingProvider, HttpEmbeddingProvider};
pub use rerank::{HttpRerankProvider, RerankProvider};
pub use similarity::{cosine_similarity, dot_product, normalize};

/// A dense vector embedding.
pub type Embedding = Vec<f32>;

/// Dimension of `all-MiniLM-L6-v2`, the default local embedding model.
pub const DEFAULT_DIMENSION: usize = 384;
