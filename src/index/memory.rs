//! In-memory [`VectorIndex`] for tests and throwaway sessions.
//!
//! Documents and records live in a `HashMap` behind `std::sync::RwLock`.
//! Nothing is persisted.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use super::{check_query_dims, check_records, rank, summarize, DistanceMetric, VectorIndex};
use crate::error::{DocletError, Result};
use crate::models::{EmbeddingRecord, IndexedDocument, LoadedDocument, ScoredChunk};

struct StoredDocument {
    summary: IndexedDocument,
    records: Vec<EmbeddingRecord>,
}

pub struct InMemoryIndex {
    metric: DistanceMetric,
    docs: RwLock<HashMap<String, StoredDocument>>,
}

impl InMemoryIndex {
    pub fn new(metric: DistanceMetric) -> Self {
        Self {
            metric,
            docs: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryIndex {
    fn default() -> Self {
        Self::new(DistanceMetric::L2)
    }
}

fn poisoned<T>(_: T) -> DocletError {
    DocletError::index_read("in-memory index lock poisoned")
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    fn metric(&self) -> DistanceMetric {
        self.metric
    }

    async fn upsert(&self, document: &LoadedDocument, records: &[EmbeddingRecord]) -> Result<()> {
        let dims = check_records(document, records)?;
        let mut docs = self.docs.write().map_err(poisoned)?;

        let existing = docs
            .iter()
            .filter(|(id, _)| **id != document.id)
            .find_map(|(_, stored)| stored.records.first())
            .map(|r| r.vector.len());
        if let Some(existing) = existing {
            if existing != dims {
                return Err(DocletError::index_write(format!(
                    "index holds {}-dimensional vectors, {} has {}",
                    existing, document.id, dims
                )));
            }
        }

        docs.insert(
            document.id.clone(),
            StoredDocument {
                summary: summarize(document, records.len()),
                records: records.to_vec(),
            },
        );
        Ok(())
    }

    async fn query(
        &self,
        embedding: &[f32],
        k: usize,
        allowed: Option<&HashSet<String>>,
    ) -> Result<Vec<ScoredChunk>> {
        let docs = self.docs.read().map_err(poisoned)?;
        let mut scored = Vec::new();
        for (id, stored) in docs.iter() {
            if allowed.is_some_and(|ids| !ids.contains(id)) {
                continue;
            }
            for record in &stored.records {
                check_query_dims(embedding, record.vector.len())?;
                scored.push(ScoredChunk {
                    chunk: record.chunk.clone(),
                    distance: self.metric.distance(embedding, &record.vector),
                });
            }
        }
        Ok(rank(scored, k))
    }

    async fn delete(&self, document_id: &str) -> Result<()> {
        self.docs.write().map_err(poisoned)?.remove(document_id);
        Ok(())
    }

    async fn list_documents(&self) -> Result<Vec<IndexedDocument>> {
        let docs = self.docs.read().map_err(poisoned)?;
        let mut list: Vec<_> = docs.values().map(|s| s.summary.clone()).collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(list)
    }

    async fn document_count(&self) -> Result<u64> {
        Ok(self.docs.read().map_err(poisoned)?.len() as u64)
    }

    async fn chunk_count(&self) -> Result<u64> {
        let docs = self.docs.read().map_err(poisoned)?;
        Ok(docs.values().map(|s| s.records.len() as u64).sum())
    }

    async fn reset(&self) -> Result<()> {
        self.docs.write().map_err(poisoned)?.clear();
        Ok(())
    }
}
