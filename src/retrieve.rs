//! Query-time retrieval: embed, search, threshold, truncate.

use std::collections::HashSet;

use crate::embedding::{embed_query, EmbeddingProvider};
use crate::error::Result;
use crate::index::VectorIndex;
use crate::models::{Retrieval, ScoredChunk};

/// Finds the chunks relevant to a query.
///
/// The embedding provider must be the one the index was built with;
/// distances between vectors of different models are meaningless.
pub struct Retriever<'a> {
    embedder: &'a dyn EmbeddingProvider,
    index: &'a dyn VectorIndex,
}

impl<'a> Retriever<'a> {
    pub fn new(embedder: &'a dyn EmbeddingProvider, index: &'a dyn VectorIndex) -> Self {
        Self { embedder, index }
    }

    /// Return up to `k` chunks with `distance <= relevance_threshold`,
    /// ascending by distance, optionally restricted to `allowed` documents.
    ///
    /// An empty index yields [`Retrieval::NoDocumentsIndexed`]; a blank
    /// query yields an empty match list without calling the embedder.
    pub async fn retrieve(
        &self,
        query: &str,
        k: usize,
        relevance_threshold: f64,
        allowed: Option<&HashSet<String>>,
    ) -> Result<Retrieval> {
        if query.trim().is_empty() {
            return Ok(Retrieval::Matches(Vec::new()));
        }
        if self.index.document_count().await? == 0 {
            return Ok(Retrieval::NoDocumentsIndexed);
        }

        let embedding = embed_query(self.embedder, query).await?;
        let candidates = self.index.query(&embedding, k, allowed).await?;
        let considered = candidates.len();
        let matches = filter_by_threshold(candidates, relevance_threshold);

        tracing::debug!(
            considered,
            kept = matches.len(),
            threshold = relevance_threshold,
            "retrieval finished"
        );
        Ok(Retrieval::Matches(matches))
    }
}

/// Drop every result whose distance exceeds `threshold`. Order is kept.
pub fn filter_by_threshold(results: Vec<ScoredChunk>, threshold: f64) -> Vec<ScoredChunk> {
    results
        .into_iter()
        .filter(|r| r.distance <= threshold)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DocletError;
    use crate::index::{DistanceMetric, InMemoryIndex};
    use crate::models::{Chunk, EmbeddingRecord, LoadedDocument, SourceFormat};
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Always embeds to the origin and counts calls.
    struct OriginEmbedder {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingProvider for OriginEmbedder {
        fn model_name(&self) -> &str {
            "origin"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts.iter().map(|_| vec![0.0, 0.0]).collect())
        }
    }

    fn embedder() -> OriginEmbedder {
        OriginEmbedder {
            calls: AtomicUsize::new(0),
        }
    }

    /// One document per distance; the record sits at `sqrt(distance)` on
    /// the x axis so its squared L2 distance from the origin is `distance`.
    async fn index_with_distances(distances: &[f64]) -> InMemoryIndex {
        let index = InMemoryIndex::new(DistanceMetric::L2);
        for (i, d) in distances.iter().enumerate() {
            let id = format!("doc-{}", i);
            let document = LoadedDocument {
                id: id.clone(),
                path: PathBuf::from(&id),
                format: SourceFormat::PlainText,
                text: "text".into(),
                fingerprint: "fp".into(),
            };
            let record = EmbeddingRecord {
                chunk: Chunk {
                    id: format!("{}#0", id),
                    document_id: id.clone(),
                    ordinal: 0,
                    text: format!("chunk at {}", d),
                    start: 0,
                    end: 4,
                },
                vector: vec![d.sqrt() as f32, 0.0],
            };
            index.upsert(&document, &[record]).await.unwrap();
        }
        index
    }

    #[tokio::test]
    async fn threshold_keeps_two_of_five() {
        let index = index_with_distances(&[2.0, 0.8, 1.9, 1.1, 1.4]).await;
        let embedder = embedder();
        let retrieval = Retriever::new(&embedder, &index)
            .retrieve("what is covered?", 5, 1.3, None)
            .await
            .unwrap();

        let distances: Vec<f64> = retrieval.matches().iter().map(|m| m.distance).collect();
        assert_eq!(distances.len(), 2);
        assert!((distances[0] - 0.8).abs() < 1e-5);
        assert!((distances[1] - 1.1).abs() < 1e-5);
    }

    #[tokio::test]
    async fn raising_threshold_never_removes_results() {
        let index = index_with_distances(&[0.2, 0.7, 1.2, 1.7, 2.2, 2.7]).await;
        let embedder = embedder();
        let retriever = Retriever::new(&embedder, &index);

        let mut previous: Vec<String> = Vec::new();
        for threshold in [0.0, 0.5, 1.0, 1.3, 2.0, 3.0] {
            let ids: Vec<String> = retriever
                .retrieve("q", 10, threshold, None)
                .await
                .unwrap()
                .matches()
                .iter()
                .map(|m| m.chunk.document_id.clone())
                .collect();
            assert!(previous.iter().all(|id| ids.contains(id)));
            assert!(ids.len() >= previous.len());
            previous = ids;
        }
        assert_eq!(previous.len(), 6);
    }

    #[tokio::test]
    async fn empty_index_is_distinct_from_no_matches() {
        let empty = InMemoryIndex::default();
        let embedder = embedder();
        let retrieval = Retriever::new(&embedder, &empty)
            .retrieve("anything", 5, 1.3, None)
            .await
            .unwrap();
        assert!(matches!(retrieval, Retrieval::NoDocumentsIndexed));

        let far = index_with_distances(&[3.5]).await;
        let retrieval = Retriever::new(&embedder, &far)
            .retrieve("anything", 5, 1.3, None)
            .await
            .unwrap();
        assert!(matches!(retrieval, Retrieval::Matches(ref m) if m.is_empty()));
    }

    #[tokio::test]
    async fn blank_query_skips_embedding() {
        let index = index_with_distances(&[0.1]).await;
        let embedder = embedder();
        let retrieval = Retriever::new(&embedder, &index)
            .retrieve("   ", 5, 1.3, None)
            .await
            .unwrap();
        assert!(retrieval.matches().is_empty());
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn allowed_documents_scope_results() {
        let index = index_with_distances(&[0.1, 0.2, 0.3]).await;
        let embedder = embedder();
        let allowed: HashSet<String> = ["doc-2".to_string()].into_iter().collect();
        let retrieval = Retriever::new(&embedder, &index)
            .retrieve("q", 5, 1.3, Some(&allowed))
            .await
            .unwrap();
        let ids: Vec<_> = retrieval
            .matches()
            .iter()
            .map(|m| m.chunk.document_id.as_str())
            .collect();
        assert_eq!(ids, vec!["doc-2"]);
    }

    #[tokio::test]
    async fn embedder_failure_propagates() {
        let index = index_with_distances(&[0.1]).await;
        let err = Retriever::new(&crate::embedding::DisabledProvider, &index)
            .retrieve("q", 5, 1.3, None)
            .await
            .unwrap_err();
        assert!(matches!(err, DocletError::Embedding(_)));
    }
}
