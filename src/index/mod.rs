//! Vector index: persistent storage of chunk embeddings with nearest-neighbour
//! lookup.
//!
//! [`VectorIndex`] is the seam between the pipeline and storage. Two
//! implementations ship with the crate:
//!
//! | Implementation | Module | Use |
//! |----------------|--------|-----|
//! | [`SqliteIndex`] | [`sqlite`] | Persistent, WAL-mode SQLite shared with the ledger |
//! | [`InMemoryIndex`] | [`memory`] | Tests and throwaway sessions |
//!
//! Both do an exact brute-force scan. Results are ordered by ascending
//! distance under the index's [`DistanceMetric`]; ties break on
//! `(document_id, ordinal)` so repeated queries return identical lists.

pub mod memory;
pub mod sqlite;

pub use memory::InMemoryIndex;
pub use sqlite::SqliteIndex;

use async_trait::async_trait;
use std::collections::HashSet;

use crate::error::{DocletError, Result};
use crate::models::{EmbeddingRecord, IndexedDocument, LoadedDocument, ScoredChunk};

/// How distance between two embeddings is measured. Lower is closer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistanceMetric {
    /// Squared Euclidean distance.
    L2,
    /// `1 - cosine_similarity`.
    Cosine,
}

impl DistanceMetric {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "l2" => Some(Self::L2),
            "cosine" => Some(Self::Cosine),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::L2 => "l2",
            Self::Cosine => "cosine",
        }
    }

    /// Distance between two vectors of equal length.
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f64 {
        match self {
            Self::L2 => squared_l2(a, b),
            Self::Cosine => 1.0 - cosine_similarity(a, b) as f64,
        }
    }
}

/// Storage for embedding records.
///
/// Implementations must make [`upsert`](VectorIndex::upsert) atomic per
/// document: readers never observe a mix of old and new records.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    fn metric(&self) -> DistanceMetric;

    /// Replace every record of `document` with `records`.
    async fn upsert(&self, document: &LoadedDocument, records: &[EmbeddingRecord]) -> Result<()>;

    /// The `k` nearest records to `embedding`, optionally restricted to the
    /// `allowed` document ids.
    async fn query(
        &self,
        embedding: &[f32],
        k: usize,
        allowed: Option<&HashSet<String>>,
    ) -> Result<Vec<ScoredChunk>>;

    /// Remove a document and all of its records. Unknown ids are a no-op.
    async fn delete(&self, document_id: &str) -> Result<()>;

    async fn list_documents(&self) -> Result<Vec<IndexedDocument>>;

    async fn document_count(&self) -> Result<u64>;

    async fn chunk_count(&self) -> Result<u64>;

    /// Drop every document and record.
    async fn reset(&self) -> Result<()>;
}

/// Validate a record batch for `document` and return its dimensionality.
pub(crate) fn check_records(document: &LoadedDocument, records: &[EmbeddingRecord]) -> Result<usize> {
    let first = records
        .first()
        .ok_or_else(|| DocletError::index_write(format!("no records for {}", document.id)))?;
    let dims = first.vector.len();
    if dims == 0 {
        return Err(DocletError::index_write("empty embedding vector"));
    }
    for record in records {
        if record.vector.len() != dims {
            return Err(DocletError::index_write(format!(
                "dimension mismatch in {}: expected {}, got {}",
                document.id,
                dims,
                record.vector.len()
            )));
        }
        if record.chunk.document_id != document.id {
            return Err(DocletError::index_write(format!(
                "record for {} passed with document {}",
                record.chunk.document_id, document.id
            )));
        }
    }
    Ok(dims)
}

pub(crate) fn summarize(document: &LoadedDocument, chunk_count: usize) -> IndexedDocument {
    IndexedDocument {
        id: document.id.clone(),
        format: document.format,
        fingerprint: document.fingerprint.clone(),
        char_count: document.text.chars().count() as i64,
        chunk_count: chunk_count as i64,
        indexed_at: chrono::Utc::now().timestamp(),
    }
}

/// Sort ascending by distance and keep the first `k`.
pub(crate) fn rank(mut scored: Vec<ScoredChunk>, k: usize) -> Vec<ScoredChunk> {
    scored.sort_by(|a, b| {
        a.distance
            .partial_cmp(&b.distance)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk.document_id.cmp(&b.chunk.document_id))
            .then_with(|| a.chunk.ordinal.cmp(&b.chunk.ordinal))
    });
    scored.truncate(k);
    scored
}

pub(crate) fn check_query_dims(query: &[f32], stored: usize) -> Result<()> {
    if query.len() != stored {
        return Err(DocletError::index_read(format!(
            "query has {} dimensions, index holds {}",
            query.len(),
            stored
        )));
    }
    Ok(())
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB produced by [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`; `0.0` for empty, mismatched, or
/// zero-norm vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }
    dot / denom
}

pub fn squared_l2(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = (*x as f64) - (*y as f64);
            d * d
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_roundtrip() {
        let v = vec![1.0f32, -2.5, 3.125, 0.0];
        let blob = vec_to_blob(&v);
        assert_eq!(blob.len(), 16);
        assert_eq!(blob_to_vec(&blob), v);
    }

    #[test]
    fn metrics() {
        let a = [1.0f32, 0.0];
        let b = [0.0f32, 1.0];
        assert!((DistanceMetric::L2.distance(&a, &b) - 2.0).abs() < 1e-9);
        assert!((DistanceMetric::Cosine.distance(&a, &b) - 1.0).abs() < 1e-6);
        assert!(DistanceMetric::Cosine.distance(&a, &a).abs() < 1e-6);
        assert_eq!(DistanceMetric::L2.distance(&a, &a), 0.0);
    }

    #[test]
    fn metric_names() {
        assert_eq!(DistanceMetric::parse("l2"), Some(DistanceMetric::L2));
        assert_eq!(DistanceMetric::parse("cosine"), Some(DistanceMetric::Cosine));
        assert_eq!(DistanceMetric::parse("dot"), None);
    }

    #[test]
    fn cosine_edge_cases() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }
}
