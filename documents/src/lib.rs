//! # Documents
//!
//! Turns files on disk into retrieval-sized text chunks.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Documents                                │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  path ──► FileKind ──► Extractor ──► Vec<Element>               │
//! │            (txt, md, csv, docx, pdf)        │                   │
//! │                                             ▼                   │
//! │                         clean_text ──► TextChunker::split       │
//! │                                             │                   │
//! │                                             ▼                   │
//! │                                        Vec<String>              │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Extraction errors are scoped to one file so directory ingestion can skip
//! a bad document and continue.

pub mod chunker;
pub mod error;
pub mod extraction;

pub use chunker::{ChunkerConfig, TextChunker, clean_text, split};
pub use error::{ExtractionError, Result};
pub use extraction::{
    CsvExtractor, DocumentExtractor, DocxExtractor, Element, ElementMetadata, Extractor,
    FileKind, MarkdownExtractor, PdfExtractor, PlainTextExtractor,
};
