//! Command-line front end for local document question answering.
//!
//! The `docqa` binary wires a [`DocqaHandler`] to a TOML configuration and
//! a handful of subcommands: ingest, query, ask, watch, status, persist and
//! compact.

pub mod config;
pub mod handler;
pub mod prompt;

pub use config::{default_config_path, load_config};
pub use handler::{Answer, DocqaHandler, QueryResponse, StreamedAnswer};
pub use prompt::{NO_DOCUMENTS_ANSWER, PromptStyle, collapse_repeated_citations};
