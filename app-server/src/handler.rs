//! Document question-answering handler for the `docqa` binary.
//!
//! Owns the long-lived [`RagService`], loads the index snapshot on start,
//! warms the model adapters in the background, and turns questions into
//! prompts for the generation server.

use std::sync::Arc;

use anyhow::{Context, Result};
use docqa_retrieval::{
    AssembledContext, ChatMessage, EmbeddingProvider, GenerationService, HttpEmbeddingProvider,
    HttpGenerationService, HttpRerankProvider, IncrementalIndexer, IndexStatus, IngestReport,
    Models, RagConfig, RagError, RagService, RetrievalResult, SourceRef, TokenStream,
};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::prompt::{NO_DOCUMENTS_ANSWER, PromptStyle, collapse_repeated_citations};

const WARM_UP_TEXT: &str = "warm up";

/// Retrieved results and the context assembled from them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub results: Vec<RetrievalResult>,
    pub context: AssembledContext,
}

/// A complete answer with the sources its citations refer to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub content: String,
    pub sources: Vec<SourceRef>,
}

/// An answer being streamed from the generation server.
pub struct StreamedAnswer {
    pub tokens: TokenStream,
    pub sources: Vec<SourceRef>,
}

/// Handler for document question answering.
pub struct DocqaHandler {
    service: Arc<RagService>,
    generator: Arc<dyn GenerationService>,
    prompt_style: PromptStyle,
}

impl DocqaHandler {
    /// Create a handler talking to the configured model servers.
    ///
    /// Loads an existing index snapshot from the persist directory, if any,
    /// and starts warming the embedding and rerank adapters in the
    /// background.
    pub async fn new(config: RagConfig) -> Result<Self> {
        // Answers stream for as long as they take; only connecting is bounded.
        let generation_client = reqwest::Client::builder()
            .connect_timeout(config.timeouts.request_timeout())
            .build()
            .context("failed to build the generation HTTP client")?;
        let generator: Arc<dyn GenerationService> = Arc::new(
            HttpGenerationService::new(&config.generation.base_url, &config.generation.model)
                .with_temperature(config.generation.temperature)
                .with_client(generation_client),
        );
        let client = model_client(&config)?;

        let models_config = config.clone();
        let service = RagService::new(config)?.with_generator(Arc::clone(&generator));

        if service.load().await? {
            info!(
                "Loaded existing index from {}",
                service.config().persist_dir.display()
            );
        } else {
            info!("Starting with an empty index");
        }

        service.load_models_in_background(load_http_models(models_config, client));

        Ok(Self::from_service(Arc::new(service), generator))
    }

    /// Wrap an existing service.
    pub fn from_service(service: Arc<RagService>, generator: Arc<dyn GenerationService>) -> Self {
        Self {
            service,
            generator,
            prompt_style: PromptStyle::default(),
        }
    }

    /// Use a different prompt style for answers.
    pub fn with_prompt_style(mut self, style: PromptStyle) -> Self {
        self.prompt_style = style;
        self
    }

    /// The underlying service.
    pub fn service(&self) -> &Arc<RagService> {
        &self.service
    }

    /// Index the documents directory and persist the result.
    pub async fn ingest(&self, force: bool) -> Result<IngestReport> {
        let root = self.service.config().documents_dir.clone();
        let report = self
            .service
            .ingest_directory(&root, force)
            .await
            .with_context(|| format!("failed to index {}", root.display()))?;

        for failure in &report.failed {
            warn!("Skipped {}: {}", failure.path.display(), failure.error);
        }

        self.service.persist().await?;
        Ok(report)
    }

    /// Retrieve results for `question` and assemble their context.
    pub async fn query(&self, question: &str, history: &[ChatMessage]) -> Result<QueryResponse> {
        let results = self.service.retrieve(question, history).await?;
        let context = self
            .service
            .build_context(&results, self.service.config().context.max_context_tokens);
        Ok(QueryResponse { results, context })
    }

    /// Answer `question` from the indexed documents in one piece.
    pub async fn ask(&self, question: &str, history: &[ChatMessage]) -> Result<Answer> {
        let QueryResponse { context, .. } = self.query(question, history).await?;
        if context.is_empty() {
            return Ok(Answer {
                content: NO_DOCUMENTS_ANSWER.to_string(),
                sources: Vec::new(),
            });
        }

        let messages = self.prompt_style.messages(&context.context, question);
        let raw = self
            .generator
            .complete(messages)
            .await
            .context("generation server request failed")?;

        Ok(Answer {
            content: collapse_repeated_citations(&raw),
            sources: context.sources,
        })
    }

    /// Answer `question` token by token. Returns `None` when no document is
    /// relevant.
    pub async fn ask_stream(
        &self,
        question: &str,
        history: &[ChatMessage],
    ) -> Result<Option<StreamedAnswer>> {
        let QueryResponse { context, .. } = self.query(question, history).await?;
        if context.is_empty() {
            return Ok(None);
        }

        let messages = self.prompt_style.messages(&context.context, question);
        let tokens = self
            .generator
            .stream(messages)
            .await
            .context("generation server request failed")?;

        Ok(Some(StreamedAnswer {
            tokens,
            sources: context.sources,
        }))
    }

    /// Start incremental indexing of the documents directory.
    pub fn watch(&self, cancel: CancellationToken) -> Result<JoinHandle<()>> {
        let handle = IncrementalIndexer::new(Arc::clone(&self.service)).start(cancel)?;
        Ok(handle)
    }

    /// Index statistics.
    pub async fn status(&self) -> IndexStatus {
        self.service.status().await
    }

    /// Write the index snapshot.
    pub async fn persist(&self) -> Result<()> {
        self.service.persist().await?;
        Ok(())
    }

    /// Drop retired chunks and persist the compacted index.
    pub async fn compact(&self) -> Result<usize> {
        let dropped = self.service.compact().await?;
        self.service.persist().await?;
        Ok(dropped)
    }
}

/// HTTP client for the embedding and rerank servers, bounded by the request
/// timeout.
fn model_client(config: &RagConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(config.timeouts.request_timeout())
        .build()
        .context("failed to build the model HTTP client")
}

/// Build the HTTP model adapters and check that the embedding server is up
/// and produces vectors of the configured dimension.
async fn load_http_models(
    config: RagConfig,
    client: reqwest::Client,
) -> docqa_retrieval::Result<Models> {
    let mut embedder = HttpEmbeddingProvider::new(
        &config.embedding.base_url,
        &config.embedding.model,
        config.embedding.dimension,
    )
    .with_batch_size(config.ingest.embedding_batch_size)
    .with_client(client.clone());

    if let Some(var) = &config.embedding.api_key_env {
        match std::env::var(var) {
            Ok(key) => embedder = embedder.with_api_key(key),
            Err(_) => {
                return Err(RagError::Config(format!(
                    "environment variable {var} is not set"
                )));
            }
        }
    }

    let mut reranker = HttpRerankProvider::new(&config.reranker.base_url).with_client(client);
    if let Some(model) = &config.reranker.model {
        reranker = reranker.with_model(model);
    }

    let vector = embedder.embed_one(WARM_UP_TEXT.to_string()).await?;
    if vector.len() != config.embedding.dimension {
        return Err(RagError::DimensionMismatch {
            expected: config.embedding.dimension,
            actual: vector.len(),
        });
    }

    info!(
        "Embedding model {} ready at {}",
        config.embedding.model, config.embedding.base_url
    );
    Ok(Models::new(Arc::new(embedder), Arc::new(reranker)))
}
