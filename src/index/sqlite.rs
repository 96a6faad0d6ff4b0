//! SQLite-backed [`VectorIndex`].
//!
//! Records live in `chunk_records` (text, span, little-endian f32 blob) with
//! a per-document summary row in `documents`. `index_meta` pins the
//! distance metric and embedding model the index was built with.

use async_trait::async_trait;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use super::{
    blob_to_vec, check_query_dims, check_records, rank, summarize, vec_to_blob, DistanceMetric,
    VectorIndex,
};
use crate::error::{DocletError, Result};
use crate::migrate;
use crate::models::{
    Chunk, EmbeddingRecord, IndexedDocument, LoadedDocument, ScoredChunk, SourceFormat,
};

pub struct SqliteIndex {
    pool: SqlitePool,
    path: PathBuf,
    metric: DistanceMetric,
    model: String,
}

impl SqliteIndex {
    /// Open an initialized index.
    ///
    /// Fails with [`DocletError::IndexCorrupt`] when the schema is missing
    /// and with [`DocletError::Config`] when the index was built with a
    /// different metric. A different model name only logs a warning.
    pub async fn open(
        pool: SqlitePool,
        path: &Path,
        metric: DistanceMetric,
        model: &str,
    ) -> Result<Self> {
        migrate::verify_schema(&pool, path).await?;
        let index = Self {
            pool,
            path: path.to_path_buf(),
            metric,
            model: model.to_string(),
        };

        match index.meta("metric").await? {
            Some(recorded) if recorded != metric.as_str() => {
                return Err(DocletError::Config(format!(
                    "index at {} was built with metric '{}' but retrieval.metric is '{}'; \
                     run `doclet reset --yes` to rebuild it",
                    path.display(),
                    recorded,
                    metric.as_str()
                )));
            }
            Some(_) => {}
            None => index.set_meta("metric", metric.as_str()).await?,
        }

        match index.meta("model").await? {
            Some(recorded) if recorded != model => {
                tracing::warn!(
                    recorded = %recorded,
                    configured = %model,
                    "index was built with a different embedding model; distances are not comparable"
                );
            }
            Some(_) => {}
            None => index.set_meta("model", model).await?,
        }

        Ok(index)
    }

    pub async fn meta(&self, key: &str) -> Result<Option<String>> {
        sqlx::query_scalar("SELECT value FROM index_meta WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(DocletError::index_read)
    }

    async fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO index_meta (key, value) VALUES (?, ?) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(DocletError::index_write)?;
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for SqliteIndex {
    fn metric(&self) -> DistanceMetric {
        self.metric
    }

    async fn upsert(&self, document: &LoadedDocument, records: &[EmbeddingRecord]) -> Result<()> {
        let dims = check_records(document, records)?;
        let mut tx = self.pool.begin().await.map_err(DocletError::index_write)?;

        let existing: Option<i64> = sqlx::query_scalar(
            "SELECT dims FROM chunk_records WHERE document_id != ? LIMIT 1",
        )
        .bind(&document.id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(DocletError::index_write)?;
        if let Some(existing) = existing {
            if existing as usize != dims {
                return Err(DocletError::index_write(format!(
                    "index holds {}-dimensional vectors, {} has {}",
                    existing, document.id, dims
                )));
            }
        }

        sqlx::query("DELETE FROM chunk_records WHERE document_id = ?")
            .bind(&document.id)
            .execute(&mut *tx)
            .await
            .map_err(DocletError::index_write)?;

        let summary = summarize(document, records.len());
        sqlx::query(
            r#"
            INSERT INTO documents (id, format, fingerprint, char_count, chunk_count, indexed_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                format = excluded.format,
                fingerprint = excluded.fingerprint,
                char_count = excluded.char_count,
                chunk_count = excluded.chunk_count,
                indexed_at = excluded.indexed_at
            "#,
        )
        .bind(&summary.id)
        .bind(summary.format.as_str())
        .bind(&summary.fingerprint)
        .bind(summary.char_count)
        .bind(summary.chunk_count)
        .bind(summary.indexed_at)
        .execute(&mut *tx)
        .await
        .map_err(DocletError::index_write)?;

        for record in records {
            let chunk = &record.chunk;
            sqlx::query(
                r#"
                INSERT INTO chunk_records
                    (id, document_id, ordinal, text, start_char, end_char, dims, embedding)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&chunk.id)
            .bind(&chunk.document_id)
            .bind(chunk.ordinal)
            .bind(&chunk.text)
            .bind(chunk.start as i64)
            .bind(chunk.end as i64)
            .bind(dims as i64)
            .bind(vec_to_blob(&record.vector))
            .execute(&mut *tx)
            .await
            .map_err(DocletError::index_write)?;
        }

        tx.commit().await.map_err(DocletError::index_write)?;
        Ok(())
    }

    async fn query(
        &self,
        embedding: &[f32],
        k: usize,
        allowed: Option<&HashSet<String>>,
    ) -> Result<Vec<ScoredChunk>> {
        if k == 0 || allowed.is_some_and(|ids| ids.is_empty()) {
            return Ok(Vec::new());
        }

        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT id, document_id, ordinal, text, start_char, end_char, embedding \
             FROM chunk_records",
        );
        if let Some(ids) = allowed {
            builder.push(" WHERE document_id IN (");
            let mut separated = builder.separated(", ");
            for id in ids {
                separated.push_bind(id.as_str());
            }
            separated.push_unseparated(")");
        }

        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(DocletError::index_read)?;

        let mut scored = Vec::with_capacity(rows.len());
        for row in &rows {
            let blob: Vec<u8> = row.get("embedding");
            let vector = blob_to_vec(&blob);
            check_query_dims(embedding, vector.len())?;
            let start: i64 = row.get("start_char");
            let end: i64 = row.get("end_char");
            scored.push(ScoredChunk {
                chunk: Chunk {
                    id: row.get("id"),
                    document_id: row.get("document_id"),
                    ordinal: row.get("ordinal"),
                    text: row.get("text"),
                    start: start as usize,
                    end: end as usize,
                },
                distance: self.metric.distance(embedding, &vector),
            });
        }

        Ok(rank(scored, k))
    }

    async fn delete(&self, document_id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(DocletError::index_write)?;
        sqlx::query("DELETE FROM chunk_records WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await
            .map_err(DocletError::index_write)?;
        sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await
            .map_err(DocletError::index_write)?;
        tx.commit().await.map_err(DocletError::index_write)?;
        Ok(())
    }

    async fn list_documents(&self) -> Result<Vec<IndexedDocument>> {
        let rows = sqlx::query(
            "SELECT id, format, fingerprint, char_count, chunk_count, indexed_at \
             FROM documents ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(DocletError::index_read)?;

        rows.iter()
            .map(|row| {
                let format: String = row.get("format");
                let format = SourceFormat::parse(&format).ok_or_else(|| DocletError::IndexCorrupt {
                    path: self.path.clone(),
                    reason: format!("unknown document format '{}'", format),
                })?;
                Ok(IndexedDocument {
                    id: row.get("id"),
                    format,
                    fingerprint: row.get("fingerprint"),
                    char_count: row.get("char_count"),
                    chunk_count: row.get("chunk_count"),
                    indexed_at: row.get("indexed_at"),
                })
            })
            .collect()
    }

    async fn document_count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await
            .map_err(DocletError::index_read)?;
        Ok(count as u64)
    }

    async fn chunk_count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunk_records")
            .fetch_one(&self.pool)
            .await
            .map_err(DocletError::index_read)?;
        Ok(count as u64)
    }

    /// Empty the index and re-pin it to the metric and model it is open with.
    async fn reset(&self) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(DocletError::index_write)?;
        for table in ["chunk_records", "documents", "index_meta"] {
            sqlx::query(&format!("DELETE FROM {}", table))
                .execute(&mut *tx)
                .await
                .map_err(DocletError::index_write)?;
        }
        for (key, value) in [("metric", self.metric.as_str()), ("model", self.model.as_str())] {
            sqlx::query("INSERT INTO index_meta (key, value) VALUES (?, ?)")
                .bind(key)
                .bind(value)
                .execute(&mut *tx)
                .await
                .map_err(DocletError::index_write)?;
        }
        tx.commit().await.map_err(DocletError::index_write)?;
        Ok(())
    }
}
