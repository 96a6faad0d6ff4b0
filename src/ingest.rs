//! Ingestion pipeline orchestration.
//!
//! Coordinates one ingestion run: scan → fingerprint → diff against the
//! ledger → delete removed documents → load → chunk → embed → index write →
//! ledger commit. Only new and modified files are loaded and embedded.
//!
//! Per-document failures (unsupported format, unreadable file, embedding
//! failure) are collected into the [`IngestReport`] and leave that
//! document's ledger entry untouched. Index write failures abort the run.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::chunk::Chunker;
use crate::config::Config;
use crate::embedding::{embed_texts, EmbeddingProvider};
use crate::error::{DocletError, Result};
use crate::index::VectorIndex;
use crate::ledger::{fingerprint_file, FileState, Ledger};
use crate::loader;
use crate::models::{EmbeddingRecord, IngestReport, LoadedDocument, SourceFile};
use crate::progress::{IngestProgressEvent, IngestProgressReporter};
use crate::scan::{scan, IngestTarget};

/// Cooperative cancellation shared between the caller and a running
/// ingestion.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(DocletError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Collaborators for one ingestion run.
pub struct Ingestor<'a> {
    pub config: &'a Config,
    pub chunker: Chunker,
    pub embedder: &'a dyn EmbeddingProvider,
    pub index: &'a dyn VectorIndex,
    pub ledger: &'a Ledger,
}

impl Ingestor<'_> {
    pub async fn run(
        &self,
        target: &IngestTarget,
        progress: &dyn IngestProgressReporter,
        cancel: &CancelFlag,
    ) -> Result<IngestReport> {
        cancel.check()?;
        progress.report(IngestProgressEvent::Scanning {
            target: describe(target),
        });

        let scanned = scan(target, &self.config.docs)?;
        let files = scanned.files;
        let mut report = IngestReport::default();
        if !scanned.skipped.is_empty() {
            tracing::warn!(
                count = scanned.skipped.len(),
                "files not matched by docs.include_globs were skipped"
            );
        }
        report.skipped = scanned.skipped;

        let indexed: HashSet<String> = self
            .index
            .list_documents()
            .await?
            .into_iter()
            .map(|d| d.id)
            .collect();
        self.ledger.reconcile(&indexed).await?;

        let mut states = Vec::with_capacity(files.len());
        let mut unreadable = HashSet::new();
        for file in files {
            match fingerprint_file(&file.path) {
                Ok(fingerprint) => states.push(FileState { file, fingerprint }),
                Err(e) => {
                    tracing::warn!(document = %file.id, error = %e, "cannot read file");
                    unreadable.insert(file.id.clone());
                    report.failed.push((file.id, format!("cannot read file: {}", e)));
                }
            }
        }

        let current: HashSet<String> = states
            .iter()
            .map(|s| s.file.id.clone())
            .chain(unreadable.iter().cloned())
            .collect();
        let ledger_ids: HashSet<String> = self.ledger.entries().await?.into_keys().collect();

        // Index rows without a ledger entry whose source is gone would never
        // be visited again.
        for orphan in indexed
            .iter()
            .filter(|id| !ledger_ids.contains(*id) && !current.contains(*id))
        {
            cancel.check()?;
            progress.report(IngestProgressEvent::Removing {
                document_id: orphan.clone(),
            });
            self.index.delete(orphan).await?;
            report.removed.push(orphan.clone());
        }

        let mut changes = self.ledger.diff(states).await?;
        changes.to_remove.retain(|id| !unreadable.contains(id));
        if changes.is_empty() {
            tracing::debug!(unchanged = changes.unchanged.len(), "index is up to date");
        }

        for id in &changes.to_remove {
            cancel.check()?;
            progress.report(IngestProgressEvent::Removing {
                document_id: id.clone(),
            });
            self.index.delete(id).await?;
            self.ledger.forget(id).await?;
            tracing::debug!(document = %id, "removed");
            report.removed.push(id.clone());
        }

        let work: Vec<(FileState, bool)> = changes
            .to_add
            .into_iter()
            .map(|s| (s, false))
            .chain(changes.to_update.into_iter().map(|s| (s, true)))
            .collect();
        let total = work.len() as u64;

        for (n, (state, is_update)) in work.into_iter().enumerate() {
            cancel.check()?;
            let id = state.file.id.clone();
            progress.report(IngestProgressEvent::Processing {
                document_id: id.clone(),
                n: n as u64 + 1,
                total,
            });

            let outcome = match self.load(state.file).await {
                Ok(document) => self.index_document(&document, cancel).await,
                Err(e) => Err(e),
            };

            match outcome {
                Ok(chunks) => {
                    tracing::debug!(document = %id, chunks, update = is_update, "indexed");
                    report.chunks_written += chunks as u64;
                    if is_update {
                        report.updated.push(id);
                    } else {
                        report.added.push(id);
                    }
                }
                Err(e) if e.is_per_document() => {
                    tracing::warn!(document = %id, error = %e, "skipping document");
                    report.failed.push((id, e.to_string()));
                }
                Err(e) => return Err(e),
            }
        }

        report.unchanged = changes.unchanged;
        tracing::info!(
            added = report.added.len(),
            updated = report.updated.len(),
            removed = report.removed.len(),
            unchanged = report.unchanged.len(),
            failed = report.failed.len(),
            chunks = report.chunks_written,
            "ingestion finished"
        );
        Ok(report)
    }

    async fn load(&self, file: SourceFile) -> Result<LoadedDocument> {
        let max_bytes = self.config.docs.max_file_bytes;
        let path = file.path.clone();
        tokio::task::spawn_blocking(move || loader::load_document(&file, max_bytes))
            .await
            .map_err(|e| DocletError::load(path, e))?
    }

    /// Chunk, embed and store one document, then record it in the ledger.
    ///
    /// The ledger commit happens strictly after the index write. If the
    /// process dies in between, or cancellation is observed there, the
    /// document is simply reprocessed next run: `upsert` replaces whatever
    /// records were written.
    pub async fn index_document(
        &self,
        document: &LoadedDocument,
        cancel: &CancelFlag,
    ) -> Result<usize> {
        let chunks: Vec<_> = self.chunker.chunks(&document.id, &document.text).collect();
        let batch_size = self.config.embedding.batch_size.max(1);

        let mut records = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let vectors = embed_texts(self.embedder, &texts).await?;
            records.extend(
                batch
                    .iter()
                    .cloned()
                    .zip(vectors)
                    .map(|(chunk, vector)| EmbeddingRecord { chunk, vector }),
            );
        }

        self.index.upsert(document, &records).await?;
        cancel.check()?;
        self.ledger
            .commit(&document.id, &document.fingerprint, document.format)
            .await?;
        Ok(records.len())
    }
}

fn describe(target: &IngestTarget) -> String {
    match target {
        IngestTarget::Directory(root) => root.display().to_string(),
        IngestTarget::Files(paths) => format!("{} files", paths.len()),
    }
}
