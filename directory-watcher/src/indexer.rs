//! Full directory scans.

use std::path::PathBuf;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::config::WatchConfig;
use crate::error::Result;
use crate::watcher::validate_root;

/// Lists the supported files under a directory.
pub struct FileIndexer {
    /// Configuration.
    config: WatchConfig,
}

impl FileIndexer {
    /// Create a new file indexer.
    pub fn new(config: WatchConfig) -> Self {
        Self { config }
    }

    /// Walk the directory and collect every supported, non-excluded file,
    /// sorted by path. Unreadable entries are logged and skipped.
    pub fn scan(&self) -> Result<ScanResult> {
        validate_root(&self.config.root)?;

        let start = Instant::now();
        let mut files = Vec::new();
        let mut ignored = 0;

        let walker = WalkDir::new(&self.config.root)
            .follow_links(self.config.follow_symlinks)
            .max_depth(self.config.max_depth.unwrap_or(usize::MAX));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable entry: {e}");
                    continue;
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.into_path();
            if self.config.accepts(&path) {
                files.push(path);
            } else {
                ignored += 1;
            }
        }

        files.sort();

        let duration = start.elapsed();
        info!(
            "Scanned {} in {duration:?} ({} supported, {ignored} ignored)",
            self.config.root.display(),
            files.len(),
        );

        Ok(ScanResult {
            files,
            ignored,
            duration_ms: duration.as_millis() as u64,
        })
    }
}

/// Result of a directory scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResult {
    /// Supported files, sorted by path.
    pub files: Vec<PathBuf>,

    /// Files skipped for extension or exclusion.
    pub ignored: usize,

    /// Time taken in milliseconds.
    pub duration_ms: u64,
}
