use sqlx::SqlitePool;
use std::path::Path;

use crate::error::{DocletError, Result};

/// Tables every initialized database must contain.
pub const REQUIRED_TABLES: &[&str] = &["documents", "chunk_records", "index_meta", "ledger"];

/// Create the index and ledger schema. Idempotent.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // One row per indexed document
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            format TEXT NOT NULL,
            fingerprint TEXT NOT NULL,
            char_count INTEGER NOT NULL,
            chunk_count INTEGER NOT NULL,
            indexed_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(DocletError::index_write)?;

    // Chunk text plus its embedding, little-endian f32 blob
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunk_records (
            id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            ordinal INTEGER NOT NULL,
            text TEXT NOT NULL,
            start_char INTEGER NOT NULL,
            end_char INTEGER NOT NULL,
            dims INTEGER NOT NULL,
            embedding BLOB NOT NULL,
            UNIQUE(document_id, ordinal),
            FOREIGN KEY (document_id) REFERENCES documents(id)
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(DocletError::index_write)?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS index_meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(DocletError::index_write)?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ledger (
            document_id TEXT PRIMARY KEY,
            fingerprint TEXT NOT NULL,
            format TEXT NOT NULL,
            committed_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(DocletError::index_write)?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_chunk_records_document_id ON chunk_records(document_id)",
    )
    .execute(pool)
    .await
    .map_err(DocletError::index_write)?;

    Ok(())
}

/// Fail with [`DocletError::IndexCorrupt`] unless every required table exists.
pub async fn verify_schema(pool: &SqlitePool, path: &Path) -> Result<()> {
    let corrupt = |reason: String| DocletError::IndexCorrupt {
        path: path.to_path_buf(),
        reason,
    };

    let tables: Vec<String> =
        sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type = 'table'")
            .fetch_all(pool)
            .await
            .map_err(|e| corrupt(e.to_string()))?;

    for required in REQUIRED_TABLES {
        if !tables.iter().any(|t| t == required) {
            return Err(corrupt(format!("missing table {}", required)));
        }
    }
    Ok(())
}
