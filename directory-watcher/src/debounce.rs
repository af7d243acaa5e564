//! Per-path event debouncing.
//!
//! Every path has at most one pending timer. A new event for the same path
//! aborts the pending timer and starts a fresh one carrying the new event's
//! action, so a burst of events turns into a single action derived from the
//! last event in the burst.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tokio::task::AbortHandle;
use tracing::{debug, trace};

use crate::event::{FileAction, FileEvent};

struct Pending {
    generation: u64,
    handle: AbortHandle,
}

/// Coalesces bursts of file events into one [`FileAction`] per path.
pub struct Debouncer {
    /// Quiet period before an action is dispatched.
    delay: Duration,

    /// Pending timers by path.
    pending: Arc<Mutex<HashMap<PathBuf, Pending>>>,

    /// Monotonic timer id, used to tell a superseded timer from the live one.
    generation: AtomicU64,

    /// Action sender.
    action_tx: mpsc::Sender<FileAction>,
}

impl Debouncer {
    /// Create a debouncer and the receiver its actions are dispatched to.
    pub fn new(delay: Duration) -> (Self, mpsc::Receiver<FileAction>) {
        let (action_tx, action_rx) = mpsc::channel(1000);

        let debouncer = Self {
            delay,
            pending: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
            action_tx,
        };

        (debouncer, action_rx)
    }

    /// The quiet period.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Schedule the action for `event`, replacing any pending one for the
    /// same path.
    pub async fn push(&self, event: FileEvent) {
        let action = event.action();
        let path = event.path;
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);

        let mut pending = self.pending.lock().await;
        if let Some(previous) = pending.remove(&path) {
            previous.handle.abort();
            trace!("Restarted debounce timer for {}", path.display());
        }

        let timers = self.pending.clone();
        let action_tx = self.action_tx.clone();
        let delay = self.delay;
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            {
                let mut timers = timers.lock().await;
                match timers.get(action.path()) {
                    Some(live) if live.generation == generation => {
                        timers.remove(action.path());
                    }
                    // Superseded after the sleep finished but before the
                    // abort landed.
                    _ => return,
                }
            }

            debug!("Dispatching {action:?}");
            if action_tx.send(action).await.is_err() {
                debug!("Action receiver dropped");
            }
        });

        pending.insert(
            path,
            Pending {
                generation,
                handle: task.abort_handle(),
            },
        );
    }

    /// Number of paths with a pending timer.
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Abort every pending timer without dispatching.
    pub async fn cancel_all(&self) {
        let mut pending = self.pending.lock().await;
        for (_, timer) in pending.drain() {
            timer.handle.abort();
        }
    }
}
