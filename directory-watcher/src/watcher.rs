//! Directory watcher implementation.

use std::path::Path;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace};

use crate::config::WatchConfig;
use crate::error::{Result, WatcherError};
use crate::event::{self, FileEvent};

/// Watches a document directory and reports changes to supported files.
pub struct DirectoryWatcher {
    /// What to watch.
    config: WatchConfig,

    /// Internal notify watcher, present while running.
    watcher: Option<RecommendedWatcher>,
}

impl DirectoryWatcher {
    /// Create a new directory watcher.
    pub fn new(config: WatchConfig) -> Self {
        Self {
            config,
            watcher: None,
        }
    }

    /// Get the configuration.
    pub fn config(&self) -> &WatchConfig {
        &self.config
    }

    /// Start watching, returning the stream of raw (undebounced) events.
    pub fn start(&mut self) -> Result<mpsc::Receiver<FileEvent>> {
        let root = &self.config.root;
        if self.watcher.is_some() {
            return Err(WatcherError::AlreadyWatching(root.display().to_string()));
        }
        validate_root(root)?;

        let (event_tx, event_rx) = mpsc::channel(1000);
        let config = self.config.clone();

        // Runs on notify's own thread, so blocking sends are fine here.
        let mut watcher = notify::recommended_watcher(
            move |res: std::result::Result<notify::Event, notify::Error>| match res {
                Ok(raw) => {
                    for file_event in event::from_notify(&raw) {
                        if !config.accepts(&file_event.path) || file_event.path.is_dir() {
                            trace!("Ignoring event for {}", file_event.path.display());
                            continue;
                        }
                        if let Err(e) = event_tx.blocking_send(file_event) {
                            error!("Failed to send file event: {e}");
                        }
                    }
                }
                Err(e) => {
                    error!("Watch error: {e}");
                }
            },
        )?;

        let mode = if self.config.max_depth == Some(0) {
            RecursiveMode::NonRecursive
        } else {
            RecursiveMode::Recursive
        };
        watcher.watch(root, mode)?;
        debug!("Started watching: {}", root.display());

        self.watcher = Some(watcher);
        info!("Directory watcher started");

        Ok(event_rx)
    }

    /// Stop watching. The event stream ends once the watcher is dropped.
    pub fn stop(&mut self) {
        if let Some(mut watcher) = self.watcher.take() {
            let _ = watcher.unwatch(&self.config.root);
            info!("Directory watcher stopped");
        }
    }

    /// Check if the watcher is running.
    pub fn is_running(&self) -> bool {
        self.watcher.is_some()
    }
}

pub(crate) fn validate_root(root: &Path) -> Result<()> {
    if !root.exists() {
        return Err(WatcherError::DirectoryNotFound(root.display().to_string()));
    }
    if !root.is_dir() {
        return Err(WatcherError::NotADirectory(root.display().to_string()));
    }
    Ok(())
}
