//! Ingestion ledger: which document version is currently indexed.
//!
//! The ledger maps a document id to the SHA-256 fingerprint of the file
//! bytes that produced its index records. Comparing the current file set
//! against it yields a [`ChangeSet`], so a re-run only touches files that
//! are new, modified, or gone.
//!
//! Ordering contract: [`Ledger::commit`] is called only after the index
//! write for that document succeeded, and [`Ledger::forget`] only after the
//! index delete succeeded. A crash in between leaves the file looking
//! not-yet-ingested, and the next run reprocesses it.

use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};
use std::collections::{BTreeMap, HashSet};
use std::io::Read;
use std::path::Path;

use crate::error::{DocletError, Result};
use crate::models::{SourceFile, SourceFormat};

const READ_BUF_BYTES: usize = 8 * 1024;

/// Hex SHA-256 of an in-memory buffer.
pub fn fingerprint_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Hex SHA-256 of a file, streamed in 8 KiB blocks.
pub fn fingerprint_file(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; READ_BUF_BYTES];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub document_id: String,
    pub fingerprint: String,
    pub format: String,
    pub committed_at: i64,
}

/// A file in the current set together with its fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileState {
    pub file: SourceFile,
    pub fingerprint: String,
}

/// Result of comparing the current file set against the ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub to_add: Vec<FileState>,
    pub to_update: Vec<FileState>,
    pub to_remove: Vec<String>,
    pub unchanged: Vec<String>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_update.is_empty() && self.to_remove.is_empty()
    }
}

/// Classify `current` against a ledger snapshot of `id -> fingerprint`.
pub fn diff_against(ledger: &BTreeMap<String, String>, current: Vec<FileState>) -> ChangeSet {
    let mut changes = ChangeSet::default();
    let mut seen = HashSet::new();

    for state in current {
        seen.insert(state.file.id.clone());
        match ledger.get(&state.file.id) {
            None => changes.to_add.push(state),
            Some(fp) if *fp != state.fingerprint => changes.to_update.push(state),
            Some(_) => changes.unchanged.push(state.file.id),
        }
    }

    changes.to_remove = ledger
        .keys()
        .filter(|id| !seen.contains(*id))
        .cloned()
        .collect();

    changes
}

/// SQLite-backed ledger sharing the index database.
#[derive(Clone)]
pub struct Ledger {
    pool: SqlitePool,
}

impl Ledger {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn entries(&self) -> Result<BTreeMap<String, LedgerEntry>> {
        let rows = sqlx::query(
            "SELECT document_id, fingerprint, format, committed_at FROM ledger ORDER BY document_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(DocletError::index_read)?;

        Ok(rows
            .iter()
            .map(|row| {
                let entry = LedgerEntry {
                    document_id: row.get("document_id"),
                    fingerprint: row.get("fingerprint"),
                    format: row.get("format"),
                    committed_at: row.get("committed_at"),
                };
                (entry.document_id.clone(), entry)
            })
            .collect())
    }

    /// Compare the current file set against the persisted ledger.
    pub async fn diff(&self, current: Vec<FileState>) -> Result<ChangeSet> {
        let snapshot = self
            .entries()
            .await?
            .into_iter()
            .map(|(id, entry)| (id, entry.fingerprint))
            .collect();
        Ok(diff_against(&snapshot, current))
    }

    /// Record `document_id` as indexed at `fingerprint`. Single-row upsert.
    pub async fn commit(
        &self,
        document_id: &str,
        fingerprint: &str,
        format: SourceFormat,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO ledger (document_id, fingerprint, format, committed_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(document_id) DO UPDATE SET
                fingerprint = excluded.fingerprint,
                format = excluded.format,
                committed_at = excluded.committed_at
            "#,
        )
        .bind(document_id)
        .bind(fingerprint)
        .bind(format.as_str())
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(DocletError::index_write)?;
        Ok(())
    }

    pub async fn forget(&self, document_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM ledger WHERE document_id = ?")
            .bind(document_id)
            .execute(&self.pool)
            .await
            .map_err(DocletError::index_write)?;
        Ok(())
    }

    /// Drop entries whose document has no records in the index. Returns the
    /// ids that were dropped.
    pub async fn reconcile(&self, indexed: &HashSet<String>) -> Result<Vec<String>> {
        let mut dropped = Vec::new();
        for id in self.entries().await?.into_keys() {
            if !indexed.contains(&id) {
                self.forget(&id).await?;
                dropped.push(id);
            }
        }
        if !dropped.is_empty() {
            tracing::warn!(
                count = dropped.len(),
                "ledger entries without index records dropped; documents will be reprocessed"
            );
        }
        Ok(dropped)
    }

    pub async fn clear(&self) -> Result<()> {
        sqlx::query("DELETE FROM ledger")
            .execute(&self.pool)
            .await
            .map_err(DocletError::index_write)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db, migrate};
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn state(id: &str, fp: &str) -> FileState {
        FileState {
            file: SourceFile {
                id: id.to_string(),
                path: PathBuf::from(id),
            },
            fingerprint: fp.to_string(),
        }
    }

    fn snapshot(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn one_modified_file_is_the_only_update() {
        let ledger = snapshot(&[("a.md", "h1"), ("b.md", "h2"), ("c.md", "h3")]);
        let changes = diff_against(
            &ledger,
            vec![state("a.md", "h1"), state("b.md", "h2"), state("c.md", "h3x")],
        );
        assert!(changes.to_add.is_empty());
        assert!(changes.to_remove.is_empty());
        assert_eq!(changes.to_update, vec![state("c.md", "h3x")]);
        assert_eq!(changes.unchanged, vec!["a.md", "b.md"]);
    }

    #[test]
    fn unchanged_file_needs_no_work() {
        let ledger = snapshot(&[("a.md", "h1")]);
        let changes = diff_against(&ledger, vec![state("a.md", "h1")]);
        assert!(changes.is_empty());
        assert_eq!(changes.unchanged, vec!["a.md"]);
    }

    #[test]
    fn new_and_removed_files() {
        let ledger = snapshot(&[("gone.md", "h1"), ("kept.md", "h2")]);
        let changes = diff_against(&ledger, vec![state("kept.md", "h2"), state("new.md", "h9")]);
        assert_eq!(changes.to_add, vec![state("new.md", "h9")]);
        assert_eq!(changes.to_remove, vec!["gone.md"]);
        assert!(!changes.is_empty());
    }

    #[test]
    fn fingerprint_streaming_matches_in_memory() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("big.txt");
        let body = "0123456789".repeat(5000);
        std::fs::write(&path, &body).unwrap();
        assert_eq!(
            fingerprint_file(&path).unwrap(),
            fingerprint_bytes(body.as_bytes())
        );
        assert_eq!(
            fingerprint_bytes(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[tokio::test]
    async fn commit_forget_and_reconcile() {
        let tmp = TempDir::new().unwrap();
        let pool = db::connect(&tmp.path().join("l.sqlite"), true).await.unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        let ledger = Ledger::new(pool);

        ledger.commit("a.md", "h1", SourceFormat::Markdown).await.unwrap();
        ledger.commit("b.txt", "h2", SourceFormat::PlainText).await.unwrap();
        ledger.commit("a.md", "h1b", SourceFormat::Markdown).await.unwrap();

        let entries = ledger.entries().await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries["a.md"].fingerprint, "h1b");
        assert_eq!(entries["b.txt"].format, "text");

        let indexed: HashSet<String> = ["a.md".to_string()].into_iter().collect();
        let dropped = ledger.reconcile(&indexed).await.unwrap();
        assert_eq!(dropped, vec!["b.txt"]);

        ledger.forget("a.md").await.unwrap();
        assert!(ledger.entries().await.unwrap().is_empty());
    }
}
