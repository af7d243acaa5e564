//! Chunk store kept position-aligned with the vector index.
//!
//! Position `i` of the store holds the chunk whose embedding sits at
//! position `i` of the [`VectorIndex`](docqa_embeddings::VectorIndex). Both
//! only grow by appending; retired chunks are tombstoned and skipped at
//! search time until [`ChunkStore::compact`] rewrites the store.
//!
//! The store also keeps the per-source registry that makes ingestion
//! idempotent: the content hash of every indexed file and the positions of
//! its chunks.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::{debug, info};

use crate::error::{RagError, Result};

const SNAPSHOT_MAGIC: &[u8; 4] = b"DQCS";
const SNAPSHOT_VERSION: u32 = 1;

/// A bounded span of document text plus its source metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// The chunk text.
    pub content: String,

    /// Path of the source file.
    pub source: PathBuf,

    /// File name of the source, for citations.
    pub filename: String,

    /// 1-based page for paged formats.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_number: Option<u32>,

    /// Position of the chunk within its source.
    pub chunk_index: usize,
}

/// Registry entry for one indexed source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceEntry {
    /// SHA-256 of the file bytes at indexing time, hex encoded.
    pub content_hash: String,

    /// Store positions holding the file's chunks.
    pub positions: Vec<usize>,
}

/// Hex SHA-256 of a file's raw bytes.
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Ordered chunk storage with tombstones and a source registry.
#[derive(Debug, Clone, Default)]
pub struct ChunkStore {
    /// Chunks by position.
    chunks: Vec<Chunk>,

    /// Retired positions.
    tombstones: BTreeSet<usize>,

    /// Indexed sources.
    sources: BTreeMap<PathBuf, SourceEntry>,
}

#[derive(Serialize, Deserialize)]
struct SnapshotTrailer {
    tombstones: BTreeSet<usize>,
    sources: BTreeMap<PathBuf, SourceEntry>,
}

impl ChunkStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored positions, retired ones included. Always equal to
    /// the vector index length.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Number of chunks that are still searchable.
    pub fn live_len(&self) -> usize {
        self.chunks.len() - self.tombstones.len()
    }

    /// Number of retired positions awaiting compaction.
    pub fn tombstoned(&self) -> usize {
        self.tombstones.len()
    }

    /// Number of indexed sources.
    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Get the chunk at a position.
    pub fn get(&self, position: usize) -> Option<&Chunk> {
        self.chunks.get(position)
    }

    /// Whether a position exists and has not been retired.
    pub fn is_live(&self, position: usize) -> bool {
        position < self.chunks.len() && !self.tombstones.contains(&position)
    }

    /// Registry entry for a source.
    pub fn source(&self, path: &Path) -> Option<&SourceEntry> {
        self.sources.get(path)
    }

    /// Indexed source paths.
    pub fn sources(&self) -> impl Iterator<Item = &Path> {
        self.sources.keys().map(PathBuf::as_path)
    }

    /// Whether `path` is indexed with exactly this content.
    pub fn is_current(&self, path: &Path, hash: &str) -> bool {
        self.sources
            .get(path)
            .is_some_and(|entry| entry.content_hash == hash)
    }

    /// Retire the chunks of `path`, if any, and append `chunks` in its
    /// place. Returns the first new position.
    ///
    /// The caller must append the matching vectors to the index in the same
    /// critical section.
    pub fn replace_source(&mut self, path: &Path, hash: String, chunks: Vec<Chunk>) -> usize {
        self.retire_source(path);

        let first = self.chunks.len();
        let positions = (first..first + chunks.len()).collect();
        self.chunks.extend(chunks);
        self.sources.insert(
            path.to_path_buf(),
            SourceEntry {
                content_hash: hash,
                positions,
            },
        );

        first
    }

    /// Tombstone every chunk of `path` and forget the source. Returns the
    /// number of chunks retired, or `None` if the source was not indexed.
    pub fn retire_source(&mut self, path: &Path) -> Option<usize> {
        let entry = self.sources.remove(path)?;
        let retired = entry.positions.len();
        self.tombstones.extend(entry.positions);
        debug!("Retired {retired} chunks from {}", path.display());
        Some(retired)
    }

    /// Drop retired positions and renumber the rest densely.
    ///
    /// Apply the same filter to the vector index (keeping every position
    /// for which [`ChunkStore::is_live`] held before this call) to keep the
    /// two aligned.
    pub fn compact(&mut self) {
        if self.tombstones.is_empty() {
            return;
        }

        let mut remap = vec![None; self.chunks.len()];
        let mut chunks = Vec::with_capacity(self.live_len());
        for (position, chunk) in std::mem::take(&mut self.chunks).into_iter().enumerate() {
            if !self.tombstones.contains(&position) {
                remap[position] = Some(chunks.len());
                chunks.push(chunk);
            }
        }

        for entry in self.sources.values_mut() {
            entry.positions = entry
                .positions
                .iter()
                .filter_map(|position| remap.get(*position).copied().flatten())
                .collect();
        }

        info!(
            "Compacted chunk store, dropped {} retired chunks",
            self.tombstones.len()
        );
        self.chunks = chunks;
        self.tombstones.clear();
    }

    /// Encode the store as a binary snapshot.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = BytesMut::new();
        buf.put_slice(SNAPSHOT_MAGIC);
        buf.put_u32_le(SNAPSHOT_VERSION);
        buf.put_u64_le(self.chunks.len() as u64);

        for chunk in &self.chunks {
            put_record(&mut buf, &serde_json::to_vec(chunk)?)?;
        }

        let trailer = SnapshotTrailer {
            tombstones: self.tombstones.clone(),
            sources: self.sources.clone(),
        };
        put_record(&mut buf, &serde_json::to_vec(&trailer)?)?;

        Ok(buf.to_vec())
    }

    /// Decode a binary snapshot produced by [`ChunkStore::to_bytes`].
    pub fn from_bytes(mut bytes: &[u8]) -> Result<Self> {
        if bytes.remaining() < 16 {
            return Err(corrupt("chunk snapshot shorter than its header"));
        }

        let mut magic = [0u8; 4];
        bytes.copy_to_slice(&mut magic);
        if &magic != SNAPSHOT_MAGIC {
            return Err(corrupt("bad chunk snapshot magic bytes"));
        }

        let version = bytes.get_u32_le();
        if version != SNAPSHOT_VERSION {
            return Err(corrupt(format!("unsupported chunk snapshot version {version}")));
        }

        let count = bytes.get_u64_le() as usize;
        let mut chunks = Vec::new();
        for i in 0..count {
            let record = take_record(&mut bytes)
                .ok_or_else(|| corrupt(format!("chunk record {i} of {count} is truncated")))?;
            let chunk: Chunk = serde_json::from_slice(record)
                .map_err(|e| corrupt(format!("chunk record {i} is invalid: {e}")))?;
            chunks.push(chunk);
        }

        let trailer = take_record(&mut bytes)
            .ok_or_else(|| corrupt("chunk snapshot trailer is missing"))?;
        let trailer: SnapshotTrailer = serde_json::from_slice(trailer)
            .map_err(|e| corrupt(format!("chunk snapshot trailer is invalid: {e}")))?;
        if bytes.has_remaining() {
            return Err(corrupt("trailing bytes after chunk snapshot"));
        }

        let out_of_range = trailer
            .tombstones
            .iter()
            .chain(trailer.sources.values().flat_map(|e| e.positions.iter()))
            .find(|position| **position >= count);
        if let Some(position) = out_of_range {
            return Err(corrupt(format!(
                "position {position} out of range for {count} chunks"
            )));
        }

        Ok(Self {
            chunks,
            tombstones: trailer.tombstones,
            sources: trailer.sources,
        })
    }

    /// Write the snapshot to `path`, replacing any existing file atomically.
    pub async fn persist(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let tmp = path.with_extension("bin.tmp");
        fs::write(&tmp, self.to_bytes()?).await?;
        fs::rename(&tmp, path).await?;
        info!("Persisted {} chunks to {}", self.chunks.len(), path.display());
        Ok(())
    }

    /// Load a snapshot from `path`.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).await?;
        let store = Self::from_bytes(&bytes)?;
        info!("Loaded {} chunks from {}", store.chunks.len(), path.display());
        Ok(store)
    }
}

fn corrupt(reason: impl Into<String>) -> RagError {
    RagError::IndexCorruption(reason.into())
}

fn put_record(buf: &mut BytesMut, record: &[u8]) -> Result<()> {
    let len = u32::try_from(record.len())
        .map_err(|_| RagError::Config(format!("record of {} bytes is too large", record.len())))?;
    buf.put_u32_le(len);
    buf.put_slice(record);
    Ok(())
}

fn take_record<'a>(bytes: &mut &'a [u8]) -> Option<&'a [u8]> {
    if bytes.remaining() < 4 {
        return None;
    }
    let len = bytes.get_u32_le() as usize;
    if bytes.remaining() < len {
        return None;
    }
    let (record, rest) = bytes.split_at(len);
    *bytes = rest;
    Some(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn chunk(source: &str, index: usize, content: &str) -> Chunk {
        Chunk {
            content: content.to_string(),
            source: PathBuf::from(source),
            filename: Path::new(source)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            page_number: None,
            chunk_index: index,
        }
    }

    fn sample_store() -> ChunkStore {
        let mut store = ChunkStore::new();
        store.replace_source(
            Path::new("/docs/a.txt"),
            "hash-a".to_string(),
            vec![chunk("/docs/a.txt", 0, "a0"), chunk("/docs/a.txt", 1, "a1")],
        );
        store.replace_source(
            Path::new("/docs/b.txt"),
            "hash-b".to_string(),
            vec![chunk("/docs/b.txt", 0, "b0")],
        );
        store
    }

    #[test]
    fn test_content_hash_is_sha256_hex() {
        assert_eq!(
            content_hash(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_replace_source_tombstones_old_chunks() {
        let mut store = sample_store();
        let first = store.replace_source(
            Path::new("/docs/a.txt"),
            "hash-a2".to_string(),
            vec![chunk("/docs/a.txt", 0, "a0 v2")],
        );

        assert_eq!(first, 3);
        assert_eq!(store.len(), 4);
        assert_eq!(store.live_len(), 2);
        assert!(!store.is_live(0));
        assert!(!store.is_live(1));
        assert!(store.is_live(3));
        assert!(store.is_current(Path::new("/docs/a.txt"), "hash-a2"));
        assert!(!store.is_current(Path::new("/docs/a.txt"), "hash-a"));
    }

    #[test]
    fn test_retire_unknown_source() {
        let mut store = sample_store();
        assert_eq!(store.retire_source(Path::new("/docs/missing.txt")), None);
        assert_eq!(store.retire_source(Path::new("/docs/b.txt")), Some(1));
        assert_eq!(store.source_count(), 1);
        assert_eq!(store.tombstoned(), 1);
    }

    #[test]
    fn test_compact_renumbers_positions() {
        let mut store = sample_store();
        store.retire_source(Path::new("/docs/a.txt"));
        store.compact();

        assert_eq!(store.len(), 1);
        assert_eq!(store.tombstoned(), 0);
        assert_eq!(store.get(0).map(|c| c.content.as_str()), Some("b0"));
        assert_eq!(
            store.source(Path::new("/docs/b.txt")).map(|e| e.positions.clone()),
            Some(vec![0])
        );
    }

    #[test]
    fn test_snapshot_keeps_tombstones_and_registry() {
        let mut store = sample_store();
        store.retire_source(Path::new("/docs/b.txt"));

        let restored = ChunkStore::from_bytes(&store.to_bytes().unwrap()).unwrap();
        assert_eq!(restored.len(), 3);
        assert!(!restored.is_live(2));
        assert!(restored.is_current(Path::new("/docs/a.txt"), "hash-a"));
        assert_eq!(restored.get(1), store.get(1));
    }

    #[test]
    fn test_snapshot_rejects_truncation() {
        let bytes = sample_store().to_bytes().unwrap();
        for cut in [3, 20, bytes.len() - 1] {
            let result = ChunkStore::from_bytes(&bytes[..cut]);
            assert!(matches!(result, Err(RagError::IndexCorruption(_))));
        }
    }

    #[tokio::test]
    async fn test_persist_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("chunks.bin");
        let store = sample_store();
        store.persist(&path).await.unwrap();

        let loaded = ChunkStore::load(&path).await.unwrap();
        assert_eq!(loaded.len(), store.len());
        assert_eq!(loaded.source_count(), 2);
    }
}
