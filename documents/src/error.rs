//! Error types for document extraction.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for extraction operations.
pub type Result<T> = std::result::Result<T, ExtractionError>;

/// Errors that can occur while turning a file into text elements.
///
/// Every variant is scoped to a single file; callers ingesting a directory
/// log the error and move on to the next file.
#[derive(Error, Debug)]
pub enum ExtractionError {
    /// The file extension is not one of the supported kinds.
    #[error("unsupported file type: {}", path.display())]
    Unsupported { path: PathBuf },

    /// The file could not be read.
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file was read but its contents could not be decoded.
    #[error("corrupt document {}: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },
}

impl ExtractionError {
    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn corrupt(path: &std::path::Path, reason: impl std::fmt::Display) -> Self {
        Self::Corrupt {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }

    /// Path of the file that failed.
    pub fn path(&self) -> &std::path::Path {
        match self {
            Self::Unsupported { path } | Self::Io { path, .. } | Self::Corrupt { path, .. } => {
                path
            }
        }
    }
}
