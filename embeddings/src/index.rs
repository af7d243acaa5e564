//! Append-only vector index scored by inner product.
//!
//! Vectors are stored contiguously and addressed by their insertion
//! position, which callers use to keep a parallel store of payloads aligned
//! with the index. Nothing is ever removed in place; [`VectorIndex::retain`]
//! rebuilds the storage without the dropped positions.

use std::path::Path;

use bytes::{Buf, BufMut, BytesMut};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info};

use crate::Embedding;
use crate::error::{EmbeddingError, Result};
use crate::similarity::{dot_product, normalize};

const SNAPSHOT_MAGIC: &[u8; 4] = b"DQVI";
const SNAPSHOT_VERSION: u32 = 1;
const HEADER_LEN: usize = 4 + 4 + 4 + 8;

/// A search hit: the position of a stored vector and its score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    /// Insertion position of the vector.
    pub position: usize,

    /// Inner product with the query.
    pub score: f32,
}

/// An exact nearest-neighbour index over unit-length vectors.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    /// Row-major vector storage, `count * dimension` floats.
    data: Vec<f32>,

    /// Number of stored vectors.
    count: usize,

    /// Expected dimension of embeddings.
    dimension: usize,
}

impl VectorIndex {
    /// Create a new empty index.
    pub fn new(dimension: usize) -> Self {
        Self {
            data: Vec::new(),
            count: 0,
            dimension,
        }
    }

    /// Dimension every stored vector has.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Get the number of entries in the index.
    pub fn len(&self) -> usize {
        self.count
    }

    /// Check if the index is empty.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Append vectors to the index.
    ///
    /// The batch is validated up front, so a dimension mismatch leaves the
    /// index untouched.
    pub fn add(&mut self, vectors: &[Embedding]) -> Result<()> {
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dimension) {
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.dimension,
                actual: bad.len(),
            });
        }

        self.data.reserve(vectors.len() * self.dimension);
        for vector in vectors {
            let start = self.data.len();
            self.data.extend_from_slice(vector);
            normalize(&mut self.data[start..]);
        }
        self.count += vectors.len();

        debug!("Added {} vectors to index ({} total)", vectors.len(), self.count);
        Ok(())
    }

    /// Get the stored vector at a position.
    pub fn vector(&self, position: usize) -> Option<&[f32]> {
        if position >= self.count {
            return None;
        }
        let start = position * self.dimension;
        Some(&self.data[start..start + self.dimension])
    }

    /// Search for the `k` vectors with the highest inner product.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        self.search_filtered(query, k, |_| true)
    }

    /// Search, considering only positions for which `keep` returns true.
    ///
    /// Results are ordered by descending score; equal scores keep insertion
    /// order. Fewer than `k` hits come back when fewer candidates qualify.
    pub fn search_filtered<F>(&self, query: &[f32], k: usize, keep: F) -> Result<Vec<SearchHit>>
    where
        F: Fn(usize) -> bool,
    {
        if query.len() != self.dimension {
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }

        if k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }

        let mut query = query.to_vec();
        normalize(&mut query);

        let mut scores: Vec<(OrderedFloat<f32>, usize)> = Vec::new();
        for (position, vector) in self.data.chunks_exact(self.dimension).enumerate() {
            if keep(position) {
                scores.push((OrderedFloat(dot_product(&query, vector)?), position));
            }
        }

        scores.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
        scores.truncate(k);

        Ok(scores
            .into_iter()
            .map(|(score, position)| SearchHit {
                position,
                score: score.0,
            })
            .collect())
    }

    /// Drop every position for which `keep` returns false, compacting the
    /// remaining vectors so positions stay dense.
    pub fn retain<F>(&mut self, keep: F)
    where
        F: Fn(usize) -> bool,
    {
        if self.dimension == 0 {
            return;
        }

        let mut data = Vec::with_capacity(self.data.len());
        let mut count = 0;
        for (position, vector) in self.data.chunks_exact(self.dimension).enumerate() {
            if keep(position) {
                data.extend_from_slice(vector);
                count += 1;
            }
        }

        info!("Compacted vector index from {} to {count} entries", self.count);
        self.data = data;
        self.count = count;
    }

    /// Encode the index as a binary snapshot.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.data.len() * 4);
        buf.put_slice(SNAPSHOT_MAGIC);
        buf.put_u32_le(SNAPSHOT_VERSION);
        buf.put_u32_le(self.dimension as u32);
        buf.put_u64_le(self.count as u64);
        for value in &self.data {
            buf.put_f32_le(*value);
        }
        buf.to_vec()
    }

    /// Decode a binary snapshot produced by [`VectorIndex::to_bytes`].
    pub fn from_bytes(mut bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(EmbeddingError::InvalidSnapshot(format!(
                "snapshot is {} bytes, shorter than the header",
                bytes.len()
            )));
        }

        let mut magic = [0u8; 4];
        bytes.copy_to_slice(&mut magic);
        if &magic != SNAPSHOT_MAGIC {
            return Err(EmbeddingError::InvalidSnapshot(
                "bad magic bytes".to_string(),
            ));
        }

        let version = bytes.get_u32_le();
        if version != SNAPSHOT_VERSION {
            return Err(EmbeddingError::InvalidSnapshot(format!(
                "unsupported version {version}"
            )));
        }

        let dimension = bytes.get_u32_le() as usize;
        let count = bytes.get_u64_le() as usize;
        let expected = count
            .checked_mul(dimension)
            .and_then(|n| n.checked_mul(4))
            .ok_or_else(|| EmbeddingError::InvalidSnapshot("size overflow".to_string()))?;
        if bytes.remaining() != expected {
            return Err(EmbeddingError::InvalidSnapshot(format!(
                "expected {expected} bytes of vector data for {count} x {dimension}, found {}",
                bytes.remaining()
            )));
        }

        let mut data = Vec::with_capacity(count * dimension);
        while bytes.has_remaining() {
            data.push(bytes.get_f32_le());
        }

        Ok(Self {
            data,
            count,
            dimension,
        })
    }

    /// Write the snapshot to `path`, replacing any existing file atomically.
    pub async fn persist(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let tmp = path.with_extension("bin.tmp");
        fs::write(&tmp, self.to_bytes()).await?;
        fs::rename(&tmp, path).await?;
        info!("Persisted {} vectors to {}", self.count, path.display());
        Ok(())
    }

    /// Load a snapshot from `path`.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).await?;
        let index = Self::from_bytes(&bytes)?;
        info!("Loaded {} vectors from {}", index.count, path.display());
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn sample_index() -> VectorIndex {
        let mut index = VectorIndex::new(3);
        index
            .add(&[
                vec![1.0, 0.0, 0.0],
                vec![0.0, 1.0, 0.0],
                vec![0.7, 0.7, 0.0],
            ])
            .unwrap();
        index
    }

    #[test]
    fn test_index_search() {
        let index = sample_index();
        let results = index.search(&[1.0, 0.0, 0.0], 2).unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].position, 0);
        assert_eq!(results[1].position, 2);
        assert!(results[0].score >= results[1].score);
    }

    #[test]
    fn test_search_returns_fewer_than_k() {
        let index = sample_index();
        let results = index.search(&[0.0, 0.0, 1.0], 10).unwrap();
        assert_eq!(results.len(), 3);
    }

    #[test]
    fn test_search_empty_index() {
        let index = VectorIndex::new(3);
        assert!(index.search(&[1.0, 0.0, 0.0], 5).unwrap().is_empty());
    }

    #[test]
    fn test_ties_keep_insertion_order() {
        let mut index = VectorIndex::new(2);
        index
            .add(&[vec![0.0, 1.0], vec![1.0, 0.0], vec![1.0, 0.0]])
            .unwrap();

        let results = index.search(&[1.0, 0.0], 2).unwrap();
        let positions: Vec<usize> = results.iter().map(|h| h.position).collect();
        assert_eq!(positions, vec![1, 2]);
    }

    #[test]
    fn test_dimension_mismatch_leaves_index_unchanged() {
        let mut index = sample_index();
        let result = index.add(&[vec![1.0, 0.0, 0.0], vec![1.0, 0.0]]);

        assert!(matches!(
            result,
            Err(EmbeddingError::DimensionMismatch {
                expected: 3,
                actual: 2
            })
        ));
        assert_eq!(index.len(), 3);
    }

    #[test]
    fn test_search_filtered_skips_positions() {
        let index = sample_index();
        let results = index
            .search_filtered(&[1.0, 0.0, 0.0], 1, |position| position != 0)
            .unwrap();
        assert_eq!(results[0].position, 2);
    }

    #[test]
    fn test_retain_compacts() {
        let mut index = sample_index();
        index.retain(|position| position != 1);

        assert_eq!(index.len(), 2);
        let results = index.search(&[0.7, 0.7, 0.0], 1).unwrap();
        assert_eq!(results[0].position, 1);
    }

    #[test]
    fn test_unnormalized_input_is_stored_unit_length() {
        let mut index = VectorIndex::new(2);
        index.add(&[vec![3.0, 4.0]]).unwrap();

        let restored = VectorIndex::from_bytes(&index.to_bytes()).unwrap();

        assert_eq!(restored.vector(0), Some(&[0.6, 0.8][..]));
        let before = index.search(&[6.0, 8.0], 1).unwrap();
        let after = restored.search(&[6.0, 8.0], 1).unwrap();
        assert_eq!(before, after);
        assert!((after[0].score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_snapshot_rejects_truncated_data() {
        let bytes = sample_index().to_bytes();
        let result = VectorIndex::from_bytes(&bytes[..bytes.len() - 4]);
        assert!(matches!(result, Err(EmbeddingError::InvalidSnapshot(_))));
    }

    #[tokio::test]
    async fn test_persist_and_load_preserve_search() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("index.bin");
        let index = sample_index();
        index.persist(&path).await.unwrap();

        let loaded = VectorIndex::load(&path).await.unwrap();
        assert_eq!(loaded.len(), index.len());
        for query in [[1.0, 0.0, 0.0], [0.2, 0.9, 0.1], [0.5, 0.5, 0.5]] {
            assert_eq!(
                loaded.search(&query, 3).unwrap(),
                index.search(&query, 3).unwrap()
            );
        }
    }
}
