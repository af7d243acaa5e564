//! Incremental indexing driven by filesystem events.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use docqa_directory_watcher::{Debouncer, DirectoryWatcher, FileAction, WatchConfig};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::engine::{DocumentOutcome, RagService};
use crate::error::Result;

/// Keeps the index in sync with a documents directory.
///
/// Raw events are debounced per path; each settled action is applied to the
/// service one at a time.
pub struct IncrementalIndexer {
    service: Arc<RagService>,
    root: PathBuf,
    debounce: Duration,
}

impl IncrementalIndexer {
    /// Watch the service's configured documents directory.
    pub fn new(service: Arc<RagService>) -> Self {
        let root = service.config().documents_dir.clone();
        let debounce = service.config().watcher.debounce();
        Self {
            service,
            root,
            debounce,
        }
    }

    /// Watch `root` instead of the configured directory.
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    /// Override the debounce delay.
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Start watching. The returned task runs until `cancel` fires.
    pub fn start(self, cancel: CancellationToken) -> Result<JoinHandle<()>> {
        let config = WatchConfig::new(&self.root)
            .with_extensions(&self.service.config().ingest.supported_extensions)
            .with_debounce(self.debounce);

        let mut watcher = DirectoryWatcher::new(config);
        let mut events = watcher.start()?;
        let (debouncer, mut actions) = Debouncer::new(self.debounce);
        let service = self.service;

        info!(
            "Watching {} for changes (debounce {:?})",
            self.root.display(),
            self.debounce
        );

        Ok(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = events.recv() => match event {
                        Some(event) => debouncer.push(event).await,
                        None => break,
                    },
                    action = actions.recv() => match action {
                        Some(action) => {
                            if let Err(e) = apply(&service, &action).await {
                                error!("Failed to apply {action:?}: {e}");
                            }
                        }
                        None => break,
                    },
                }
            }

            debouncer.cancel_all().await;
            watcher.stop();
            info!("Stopped watching for changes");
        }))
    }
}

/// Apply one settled filesystem action to the service.
pub async fn apply(service: &RagService, action: &FileAction) -> Result<()> {
    let outcome = match action {
        FileAction::Process(path) => service.process_document(path).await?,
        FileAction::Update(path) => service.update_document(path).await?,
        FileAction::Remove(path) => {
            service.remove_document(path).await?;
            return Ok(());
        }
    };

    if outcome == DocumentOutcome::Unchanged {
        debug!("{} is already indexed", action.path().display());
    }
    Ok(())
}
