//! Readiness gate for background model loading.
//!
//! The service is constructed before its models are warm. Loading runs on
//! a spawned task and publishes the loaded [`Models`] through a watch
//! channel; requests either wait for it or fail fast, depending on the
//! configured [`ReadinessPolicy`].

use std::future::Future;
use std::sync::Arc;

use docqa_embeddings::{EmbeddingProvider, RerankProvider};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::ReadinessPolicy;
use crate::error::{RagError, Result};

/// The external model adapters a loaded service works with.
#[derive(Clone)]
pub struct Models {
    /// Text embedder.
    pub embedder: Arc<dyn EmbeddingProvider>,

    /// Cross-encoder reranker.
    pub reranker: Arc<dyn RerankProvider>,
}

impl Models {
    /// Bundle an embedder and a reranker.
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, reranker: Arc<dyn RerankProvider>) -> Self {
        Self { embedder, reranker }
    }
}

impl std::fmt::Debug for Models {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Models")
            .field("embedder", &self.embedder.name())
            .field("reranker", &self.reranker.name())
            .finish()
    }
}

/// Loading state.
#[derive(Debug, Clone)]
pub enum ModelState {
    /// Loading has not finished.
    Loading,

    /// Models are usable.
    Ready(Arc<Models>),

    /// Loading failed; requests keep failing with this reason.
    Failed(String),
}

/// Gate that hands out loaded models.
#[derive(Debug, Clone)]
pub struct ReadinessGate {
    policy: ReadinessPolicy,
    state_tx: Arc<watch::Sender<ModelState>>,
}

impl ReadinessGate {
    /// Create a gate in the loading state.
    pub fn new(policy: ReadinessPolicy) -> Self {
        let (state_tx, _) = watch::channel(ModelState::Loading);
        Self {
            policy,
            state_tx: Arc::new(state_tx),
        }
    }

    /// The configured policy.
    pub fn policy(&self) -> ReadinessPolicy {
        self.policy
    }

    /// Whether models are loaded.
    pub fn is_ready(&self) -> bool {
        matches!(*self.state_tx.borrow(), ModelState::Ready(_))
    }

    /// Publish loaded models, waking every waiting request.
    pub fn set_ready(&self, models: Models) {
        self.state_tx.send_replace(ModelState::Ready(Arc::new(models)));
        info!("Models ready");
    }

    /// Record a loading failure.
    pub fn set_failed(&self, reason: impl Into<String>) {
        let reason = reason.into();
        error!("Model loading failed: {reason}");
        self.state_tx.send_replace(ModelState::Failed(reason));
    }

    /// Run `loader` on a background task and publish its outcome.
    pub fn spawn_loader<F>(&self, loader: F) -> JoinHandle<()>
    where
        F: Future<Output = Result<Models>> + Send + 'static,
    {
        let gate = self.clone();
        tokio::spawn(async move {
            info!("Loading models in the background");
            match loader.await {
                Ok(models) => gate.set_ready(models),
                Err(e) => gate.set_failed(e.to_string()),
            }
        })
    }

    /// Get the loaded models, waiting or failing according to the policy.
    pub async fn models(&self) -> Result<Arc<Models>> {
        let mut state_rx = self.state_tx.subscribe();

        let state = match self.policy {
            ReadinessPolicy::FailFast => state_rx.borrow().clone(),
            ReadinessPolicy::Block => state_rx
                .wait_for(|state| !matches!(state, ModelState::Loading))
                .await
                .map(|state| state.clone())
                .map_err(|_| RagError::NotReady("model loader went away".to_string()))?,
        };

        match state {
            ModelState::Ready(models) => Ok(models),
            ModelState::Loading => Err(RagError::NotReady("models are still loading".to_string())),
            ModelState::Failed(reason) => Err(RagError::NotReady(reason)),
        }
    }
}
