//! The document question-answering service.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use docqa_directory_watcher::{FileIndexer, WatchConfig};
use docqa_documents::{DocumentExtractor, TextChunker};
use docqa_embeddings::{Embedding, EmbeddingError, VectorIndex};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::RagConfig;
use crate::error::{RagError, Result};
use crate::generation::GenerationService;
use crate::readiness::{Models, ReadinessGate};
use crate::store::{Chunk, ChunkStore, content_hash};

const INDEX_FILE: &str = "index.bin";
const CHUNKS_FILE: &str = "chunks.bin";

/// The vector index and the chunk store, always mutated together.
#[derive(Debug)]
pub(crate) struct IndexState {
    pub(crate) index: VectorIndex,
    pub(crate) store: ChunkStore,
}

impl IndexState {
    fn new(dimension: usize) -> Self {
        Self {
            index: VectorIndex::new(dimension),
            store: ChunkStore::new(),
        }
    }

    fn check_aligned(&self) -> Result<()> {
        if self.index.len() == self.store.len() {
            Ok(())
        } else {
            Err(RagError::IndexCorruption(format!(
                "index holds {} vectors but the chunk store holds {} chunks",
                self.index.len(),
                self.store.len()
            )))
        }
    }

    /// Append a prepared file, replacing any chunks it had before.
    fn append(&mut self, path: &Path, prepared: Prepared, mode: WriteMode) -> Result<DocumentOutcome> {
        let Prepared::Ready {
            hash,
            chunks,
            vectors,
        } = prepared
        else {
            return Ok(DocumentOutcome::Unchanged);
        };

        // Another writer may have indexed the same content meanwhile.
        if mode == WriteMode::IfChanged && self.store.is_current(path, &hash) {
            return Ok(DocumentOutcome::Unchanged);
        }

        self.index.add(&vectors)?;
        let count = chunks.len();
        self.store.replace_source(path, hash, chunks);
        self.check_aligned()?;

        info!(
            "Indexed {count} chunks from {}",
            path.file_name()
                .map(|name| name.to_string_lossy())
                .unwrap_or_default()
        );
        Ok(DocumentOutcome::Indexed { chunks: count })
    }
}

/// Whether an unchanged file is skipped or re-indexed anyway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteMode {
    IfChanged,
    Always,
}

/// A file's chunks and vectors, ready to be appended.
enum Prepared {
    Unchanged,
    Ready {
        hash: String,
        chunks: Vec<Chunk>,
        vectors: Vec<Embedding>,
    },
}

/// What happened to a single document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentOutcome {
    /// The document's chunks were (re)written.
    Indexed { chunks: usize },

    /// The document was already indexed with the same content.
    Unchanged,
}

/// A file that could not be indexed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedDocument {
    pub path: PathBuf,
    pub error: String,
}

/// Summary of a directory ingestion run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReport {
    /// Files whose chunks were written.
    pub processed: usize,

    /// Files already indexed with identical content.
    pub skipped: usize,

    /// Files that failed, with the reason.
    pub failed: Vec<FailedDocument>,

    /// Indexed files that no longer exist under the root.
    pub removed: usize,

    /// Chunks appended during the run.
    pub chunks_added: usize,
}

impl IngestReport {
    /// Number of failed files.
    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }
}

/// Index statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStatus {
    /// Searchable chunks.
    pub chunk_count: usize,

    /// Indexed source files.
    pub source_count: usize,

    /// Retired chunks awaiting compaction.
    pub tombstoned: usize,

    /// Vectors held by the index, retired ones included.
    pub vector_count: usize,

    /// Chunks held by the store, retired ones included.
    pub stored_chunks: usize,

    /// Embedding dimension.
    pub dimension: usize,

    /// Whether models are loaded.
    pub ready: bool,
}

/// Retrieval-augmented question answering over a local document folder.
///
/// The service owns the single vector index and chunk store pair. Ingestion
/// prepares files concurrently but appends to the pair from one task at a
/// time, under the write lock, so readers always see equal lengths.
pub struct RagService {
    pub(crate) config: RagConfig,
    pub(crate) state: Arc<RwLock<IndexState>>,
    pub(crate) readiness: ReadinessGate,
    extractor: DocumentExtractor,
    chunker: TextChunker,
    pub(crate) generator: Option<Arc<dyn GenerationService>>,
}

impl RagService {
    /// Create an empty service. Models must be supplied through
    /// [`RagService::set_models`] or [`RagService::load_models_in_background`].
    pub fn new(config: RagConfig) -> Result<Self> {
        config.validate()?;

        let state = IndexState::new(config.embedding.dimension);
        let readiness = ReadinessGate::new(config.readiness.policy);
        let extractor = DocumentExtractor::with_extensions(&config.ingest.supported_extensions);
        let chunker = TextChunker::new(config.chunking);

        info!(
            "Created document service (dimension {}, chunk size {})",
            config.embedding.dimension, config.chunking.chunk_size
        );

        Ok(Self {
            config,
            state: Arc::new(RwLock::new(state)),
            readiness,
            extractor,
            chunker,
            generator: None,
        })
    }

    /// Use `generator` to rephrase follow-up questions.
    pub fn with_generator(mut self, generator: Arc<dyn GenerationService>) -> Self {
        self.generator = Some(generator);
        self
    }

    /// The configuration.
    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    /// The readiness gate.
    pub fn readiness(&self) -> &ReadinessGate {
        &self.readiness
    }

    /// The embedding dimension of the index.
    pub fn dimension(&self) -> usize {
        self.config.embedding.dimension
    }

    /// Publish loaded models.
    pub fn set_models(&self, models: Models) -> Result<()> {
        check_dimension(self.dimension(), &models)?;
        self.readiness.set_ready(models);
        Ok(())
    }

    /// Load models on a background task; requests wait or fail according to
    /// the readiness policy until it finishes.
    pub fn load_models_in_background<F>(&self, loader: F) -> JoinHandle<()>
    where
        F: Future<Output = Result<Models>> + Send + 'static,
    {
        let dimension = self.dimension();
        self.readiness.spawn_loader(async move {
            let models = loader.await?;
            check_dimension(dimension, &models)?;
            Ok(models)
        })
    }

    /// Index every supported file under `root`.
    ///
    /// Unchanged files are skipped unless `force` is set. A forced rebuild
    /// indexes every file into a fresh index and store that replace the live
    /// pair only once the run completes, so searches keep using the old
    /// index meanwhile; if every file fails, the old index is kept. Indexed
    /// files that have disappeared from `root` are retired. A failing file
    /// is recorded in the report; a dimension mismatch aborts the run.
    pub async fn ingest_directory(&self, root: impl AsRef<Path>, force: bool) -> Result<IngestReport> {
        let models = self.readiness.models().await?;
        let root = normalize_source(root.as_ref());

        let watch_config =
            WatchConfig::new(&root).with_extensions(&self.config.ingest.supported_extensions);
        let scan = tokio::task::spawn_blocking(move || FileIndexer::new(watch_config).scan())
            .await
            .map_err(|e| RagError::Io(std::io::Error::other(e)))??;

        let mut report = IngestReport::default();

        let (mode, mut staging) = if force {
            info!("Rebuilding the index of {}", root.display());
            (WriteMode::Always, Some(IndexState::new(self.dimension())))
        } else {
            report.removed = self.retire_missing(&root, &scan.files).await;
            (WriteMode::IfChanged, None)
        };

        let mut prepared = futures::stream::iter(scan.files)
            .map(|path| {
                let models = Arc::clone(&models);
                async move {
                    let result = self.prepare(&models, &path, mode).await;
                    (path, result)
                }
            })
            .buffered(self.config.ingest.max_workers);

        while let Some((path, result)) = prepared.next().await {
            let outcome = match (result, staging.as_mut()) {
                (Ok(prepared), Some(staging)) => staging.append(&path, prepared, mode),
                (Ok(prepared), None) => self.commit(&path, prepared, mode).await,
                (Err(e), _) => Err(e),
            };

            match outcome {
                Ok(DocumentOutcome::Indexed { chunks }) => {
                    report.processed += 1;
                    report.chunks_added += chunks;
                }
                Ok(DocumentOutcome::Unchanged) => report.skipped += 1,
                Err(e) if e.is_per_file() => {
                    warn!("Failed to index {}: {e}", path.display());
                    report.failed.push(FailedDocument {
                        path,
                        error: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }

        if let Some(staging) = staging {
            if report.processed == 0 && !report.failed.is_empty() {
                warn!(
                    "Every file under {} failed to index; keeping the current index",
                    root.display()
                );
            } else {
                staging.check_aligned()?;
                *self.state.write().await = staging;
            }
        }

        info!(
            "Indexed {} files from {} ({} unchanged, {} failed, {} removed)",
            report.processed,
            root.display(),
            report.skipped,
            report.failed_count(),
            report.removed
        );
        Ok(report)
    }

    /// Index a document unless it is already indexed with the same content.
    pub async fn process_document(&self, path: impl AsRef<Path>) -> Result<DocumentOutcome> {
        self.write_document(path.as_ref(), WriteMode::IfChanged).await
    }

    /// Re-extract a document and replace its chunks.
    pub async fn update_document(&self, path: impl AsRef<Path>) -> Result<DocumentOutcome> {
        self.write_document(path.as_ref(), WriteMode::Always).await
    }

    /// Retire a document's chunks. Returns false if it was not indexed.
    pub async fn remove_document(&self, path: impl AsRef<Path>) -> Result<bool> {
        let path = normalize_source(path.as_ref());
        let mut state = self.state.write().await;
        match state.store.retire_source(&path) {
            Some(retired) => {
                info!("Removed {retired} chunks from {}", path.display());
                Ok(true)
            }
            None => {
                debug!("Ignoring removal of unindexed {}", path.display());
                Ok(false)
            }
        }
    }

    /// Physically drop retired chunks from the index and the store. Returns
    /// the number of chunks dropped.
    pub async fn compact(&self) -> Result<usize> {
        let mut state = self.state.write().await;
        let dropped = state.store.tombstoned();
        if dropped == 0 {
            return Ok(0);
        }

        let live: Vec<bool> = (0..state.store.len())
            .map(|position| state.store.is_live(position))
            .collect();
        state
            .index
            .retain(|position| live.get(position).copied().unwrap_or(false));
        state.store.compact();
        state.check_aligned()?;

        Ok(dropped)
    }

    /// Write the index and chunk store snapshots to the configured directory.
    pub async fn persist(&self) -> Result<()> {
        self.persist_to(&self.config.persist_dir).await
    }

    /// Write the index and chunk store snapshots to `dir`.
    pub async fn persist_to(&self, dir: impl AsRef<Path>) -> Result<()> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).await?;

        let state = self.state.read().await;
        state.check_aligned()?;
        state.index.persist(dir.join(INDEX_FILE)).await?;
        state.store.persist(dir.join(CHUNKS_FILE)).await?;

        info!(
            "Persisted {} chunks from {} sources to {}",
            state.store.len(),
            state.store.source_count(),
            dir.display()
        );
        Ok(())
    }

    /// Load snapshots from the configured directory.
    pub async fn load(&self) -> Result<bool> {
        self.load_from(&self.config.persist_dir).await
    }

    /// Load snapshots from `dir`, replacing the in-memory index.
    ///
    /// Returns false when `dir` holds no snapshot. A snapshot with only one
    /// of its two files, or whose files disagree, is an
    /// [`RagError::IndexCorruption`].
    pub async fn load_from(&self, dir: impl AsRef<Path>) -> Result<bool> {
        let dir = dir.as_ref();
        let index_path = dir.join(INDEX_FILE);
        let chunks_path = dir.join(CHUNKS_FILE);

        match (
            fs::try_exists(&index_path).await?,
            fs::try_exists(&chunks_path).await?,
        ) {
            (false, false) => {
                debug!("No snapshot in {}", dir.display());
                return Ok(false);
            }
            (true, false) => {
                return Err(RagError::IndexCorruption(format!(
                    "{} has no matching {CHUNKS_FILE}",
                    index_path.display()
                )));
            }
            (false, true) => {
                return Err(RagError::IndexCorruption(format!(
                    "{} has no matching {INDEX_FILE}",
                    chunks_path.display()
                )));
            }
            (true, true) => {}
        }

        let index = VectorIndex::load(&index_path).await?;
        let store = ChunkStore::load(&chunks_path).await?;

        if index.dimension() != self.dimension() {
            return Err(RagError::DimensionMismatch {
                expected: self.dimension(),
                actual: index.dimension(),
            });
        }

        let loaded = IndexState { index, store };
        loaded.check_aligned()?;

        info!(
            "Loaded {} chunks from {} sources from {}",
            loaded.store.live_len(),
            loaded.store.source_count(),
            dir.display()
        );
        *self.state.write().await = loaded;
        Ok(true)
    }

    /// Index statistics.
    pub async fn status(&self) -> IndexStatus {
        let state = self.state.read().await;
        IndexStatus {
            chunk_count: state.store.live_len(),
            source_count: state.store.source_count(),
            tombstoned: state.store.tombstoned(),
            vector_count: state.index.len(),
            stored_chunks: state.store.len(),
            dimension: state.index.dimension(),
            ready: self.readiness.is_ready(),
        }
    }

    /// Whether `path` is currently indexed.
    pub async fn is_indexed(&self, path: impl AsRef<Path>) -> bool {
        let path = normalize_source(path.as_ref());
        self.state.read().await.store.source(&path).is_some()
    }

    async fn write_document(&self, path: &Path, mode: WriteMode) -> Result<DocumentOutcome> {
        let models = self.readiness.models().await?;
        let path = normalize_source(path);
        self.extractor.kind_of(&path)?;

        let prepared = self.prepare(&models, &path, mode).await?;
        self.commit(&path, prepared, mode).await
    }

    /// Extract, chunk and embed one file without touching the index.
    async fn prepare(&self, models: &Models, path: &Path, mode: WriteMode) -> Result<Prepared> {
        let bytes = fs::read(path).await?;
        let hash = content_hash(&bytes);

        if mode == WriteMode::IfChanged && self.state.read().await.store.is_current(path, &hash) {
            debug!("Skipping unchanged {}", path.display());
            return Ok(Prepared::Unchanged);
        }

        let extractor = self.extractor.clone();
        let source = path.to_path_buf();
        let elements = tokio::task::spawn_blocking(move || extractor.extract(&source))
            .await
            .map_err(|e| RagError::Io(std::io::Error::other(e)))??;

        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut chunks = Vec::new();
        for element in &elements {
            for content in self.chunker.chunk(&element.content) {
                chunks.push(Chunk {
                    content,
                    source: path.to_path_buf(),
                    filename: filename.clone(),
                    page_number: element.metadata.page,
                    chunk_index: chunks.len(),
                });
            }
        }

        if chunks.is_empty() {
            warn!("No text extracted from {}", path.display());
            return Ok(Prepared::Ready {
                hash,
                chunks,
                vectors: Vec::new(),
            });
        }

        let texts = chunks.iter().map(|chunk| chunk.content.clone()).collect();
        let timeout = self.config.timeouts.request_timeout();
        let vectors = match tokio::time::timeout(timeout, models.embedder.embed(texts)).await {
            Ok(vectors) => vectors?,
            Err(_) => {
                warn!("Embedding {} timed out after {timeout:?}", path.display());
                return Err(RagError::IngestTimeout(path.to_path_buf()));
            }
        };
        if vectors.len() != chunks.len() {
            return Err(RagError::Embedding(EmbeddingError::InvalidResponse(format!(
                "expected {} embeddings, got {}",
                chunks.len(),
                vectors.len()
            ))));
        }

        Ok(Prepared::Ready {
            hash,
            chunks,
            vectors,
        })
    }

    /// Append a prepared file to the index and the store.
    async fn commit(&self, path: &Path, prepared: Prepared, mode: WriteMode) -> Result<DocumentOutcome> {
        if matches!(prepared, Prepared::Unchanged) {
            return Ok(DocumentOutcome::Unchanged);
        }
        self.state.write().await.append(path, prepared, mode)
    }

    /// Retire indexed sources under `root` that the scan no longer found.
    async fn retire_missing(&self, root: &Path, found: &[PathBuf]) -> usize {
        let mut state = self.state.write().await;
        let missing: Vec<PathBuf> = state
            .store
            .sources()
            .filter(|source| source.starts_with(root))
            .filter(|source| found.binary_search_by(|f| f.as_path().cmp(source)).is_err())
            .map(Path::to_path_buf)
            .collect();

        for source in &missing {
            state.store.retire_source(source);
            info!("Removed vanished {}", source.display());
        }
        missing.len()
    }
}

impl std::fmt::Debug for RagService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RagService")
            .field("documents_dir", &self.config.documents_dir)
            .field("ready", &self.readiness.is_ready())
            .field("generator", &self.generator.is_some())
            .finish_non_exhaustive()
    }
}

fn check_dimension(expected: usize, models: &Models) -> Result<()> {
    let actual = models.embedder.dimension();
    if actual == expected {
        Ok(())
    } else {
        Err(RagError::DimensionMismatch { expected, actual })
    }
}

/// Absolute, symlink-free form of a source path, so the same file always
/// maps to the same registry entry. Deleted files cannot be canonicalized
/// directly; their parent directory is resolved instead.
pub(crate) fn normalize_source(path: &Path) -> PathBuf {
    if let Ok(canonical) = path.canonicalize() {
        return canonical;
    }

    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => parent
            .canonicalize()
            .map(|parent| parent.join(name))
            .unwrap_or_else(|_| path.to_path_buf()),
        _ => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use docqa_embeddings::{EmbeddingProvider, RerankProvider};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    /// Embeds every text as the same unit vector in two dimensions.
    struct FlatEmbedder {
        dimension: usize,
    }

    #[async_trait]
    impl EmbeddingProvider for FlatEmbedder {
        fn name(&self) -> &str {
            "flat"
        }

        fn dimension(&self) -> usize {
            self.dimension
        }

        async fn embed(&self, texts: Vec<String>) -> docqa_embeddings::Result<Vec<Embedding>> {
            let mut vector = vec![0.0; self.dimension];
            vector[0] = 1.0;
            Ok(texts.iter().map(|_| vector.clone()).collect())
        }
    }

    struct ConstantReranker;

    #[async_trait]
    impl RerankProvider for ConstantReranker {
        fn name(&self) -> &str {
            "constant"
        }

        async fn score(&self, _query: &str, candidates: &[String]) -> docqa_embeddings::Result<Vec<f32>> {
            Ok(vec![1.0; candidates.len()])
        }
    }

    fn models(dimension: usize) -> Models {
        Models::new(
            Arc::new(FlatEmbedder { dimension }),
            Arc::new(ConstantReranker),
        )
    }

    fn service(docs: &TempDir) -> RagService {
        let config = RagConfig::new(docs.path())
            .with_persist_dir(docs.path().join(".index"))
            .with_dimension(4);
        let service = RagService::new(config).unwrap();
        service.set_models(models(4)).unwrap();
        service
    }

    #[tokio::test]
    async fn test_set_models_checks_dimension() {
        let docs = TempDir::new().unwrap();
        let service = RagService::new(RagConfig::new(docs.path()).with_dimension(4)).unwrap();

        let err = service.set_models(models(3)).unwrap_err();
        assert!(matches!(
            err,
            RagError::DimensionMismatch {
                expected: 4,
                actual: 3
            }
        ));
        assert!(!service.readiness().is_ready());
    }

    #[tokio::test]
    async fn test_process_document_is_idempotent() {
        let docs = TempDir::new().unwrap();
        let path = docs.path().join("a.txt");
        std::fs::write(&path, "Paris is the capital of France.").unwrap();
        let service = service(&docs);

        let first = service.process_document(&path).await.unwrap();
        let second = service.process_document(&path).await.unwrap();

        assert_eq!(first, DocumentOutcome::Indexed { chunks: 1 });
        assert_eq!(second, DocumentOutcome::Unchanged);
        let status = service.status().await;
        assert_eq!(status.chunk_count, 1);
        assert_eq!(status.vector_count, status.stored_chunks);
    }

    #[tokio::test]
    async fn test_update_document_replaces_chunks() {
        let docs = TempDir::new().unwrap();
        let path = docs.path().join("a.txt");
        std::fs::write(&path, "First version.").unwrap();
        let service = service(&docs);

        service.process_document(&path).await.unwrap();
        let outcome = service.update_document(&path).await.unwrap();

        assert_eq!(outcome, DocumentOutcome::Indexed { chunks: 1 });
        let status = service.status().await;
        assert_eq!(status.chunk_count, 1);
        assert_eq!(status.tombstoned, 1);
        assert_eq!(status.source_count, 1);
    }

    #[tokio::test]
    async fn test_remove_and_compact() {
        let docs = TempDir::new().unwrap();
        let path = docs.path().join("a.txt");
        std::fs::write(&path, "Some text.").unwrap();
        let service = service(&docs);

        service.process_document(&path).await.unwrap();
        assert!(service.remove_document(&path).await.unwrap());
        assert!(!service.remove_document(&path).await.unwrap());
        assert!(!service.is_indexed(&path).await);

        assert_eq!(service.compact().await.unwrap(), 1);
        let status = service.status().await;
        assert_eq!(status.vector_count, 0);
        assert_eq!(status.stored_chunks, 0);
    }

    #[tokio::test]
    async fn test_unsupported_document_is_rejected() {
        let docs = TempDir::new().unwrap();
        let path = docs.path().join("image.png");
        std::fs::write(&path, [0u8; 8]).unwrap();
        let service = service(&docs);

        let err = service.process_document(&path).await.unwrap_err();
        assert!(matches!(err, RagError::Extraction(_)));
        assert_eq!(service.status().await.source_count, 0);
    }

    #[tokio::test]
    async fn test_load_without_snapshot() {
        let docs = TempDir::new().unwrap();
        let service = service(&docs);
        assert!(!service.load().await.unwrap());
    }

    #[tokio::test]
    async fn test_load_rejects_lone_index_file() {
        let docs = TempDir::new().unwrap();
        let service = service(&docs);
        let dir = docs.path().join(".index");
        service.persist().await.unwrap();
        std::fs::remove_file(dir.join(CHUNKS_FILE)).unwrap();

        let err = service.load().await.unwrap_err();
        assert!(matches!(err, RagError::IndexCorruption(_)));
    }

    #[tokio::test]
    async fn test_requests_fail_fast_before_models() {
        let docs = TempDir::new().unwrap();
        let config = RagConfig::new(docs.path())
            .with_dimension(4)
            .with_readiness_policy(crate::config::ReadinessPolicy::FailFast);
        let service = RagService::new(config).unwrap();

        let err = service
            .process_document(docs.path().join("a.txt"))
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::NotReady(_)));
    }

    #[test]
    fn test_normalize_source_of_deleted_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gone.txt");
        let canonical_dir = dir.path().canonicalize().unwrap();
        assert_eq!(normalize_source(&path), canonical_dir.join("gone.txt"));
    }
}
