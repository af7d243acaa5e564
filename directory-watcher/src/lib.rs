//! # Directory Watcher
//!
//! This crate provides file system monitoring for the document index. It
//! scans the document directory once at startup and then reports changes to
//! supported files as debounced indexing actions.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Directory Watcher                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  WatchConfig ──► DirectoryWatcher ──► FileEvent                 │
//! │       │                                   │                     │
//! │       ▼                                   ▼                     │
//! │  FileIndexer (walk)               Debouncer ──► FileAction      │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod debounce;
pub mod error;
pub mod event;
pub mod indexer;
pub mod watcher;

pub use config::WatchConfig;
pub use debounce::Debouncer;
pub use error::{Result, WatcherError};
pub use event::{FileAction, FileEvent, FileEventKind};
pub use indexer::{FileIndexer, ScanResult};
pub use watcher::DirectoryWatcher;
