//! Error taxonomy for the retrieval-and-grounding core.
//!
//! Errors fall into two groups. **Per-document** errors ([`DocletError::Load`],
//! [`DocletError::UnsupportedFormat`], [`DocletError::Embedding`]) are collected
//! into the ingestion report and never abort a batch. **Operation-fatal**
//! errors ([`DocletError::IndexWrite`], [`DocletError::IndexUnavailable`],
//! [`DocletError::IndexCorrupt`]) stop the current operation and are returned
//! to the caller.
//!
//! An empty retrieval is not an error; see
//! [`AnswerKind::NoRelevantContext`](crate::models::AnswerKind::NoRelevantContext).

use std::path::PathBuf;

/// Result alias used across the library.
pub type Result<T> = std::result::Result<T, DocletError>;

#[derive(Debug, thiserror::Error)]
pub enum DocletError {
    /// The file extension does not map to a supported [`SourceFormat`](crate::models::SourceFormat).
    #[error("unsupported format for {path}: {extension:?}")]
    UnsupportedFormat {
        path: PathBuf,
        extension: Option<String>,
    },

    /// The source file could not be read, decoded, or yielded no text.
    #[error("failed to load {path}: {reason}")]
    Load { path: PathBuf, reason: String },

    /// The embedding model is unavailable or rejected the input.
    #[error("embedding failed: {0}")]
    Embedding(String),

    /// The vector index could not be written (storage unavailable or full).
    #[error("index write failed: {0}")]
    IndexWrite(String),

    /// The index database does not exist or cannot be opened.
    #[error("index unavailable at {path}: {reason}")]
    IndexUnavailable { path: PathBuf, reason: String },

    /// The index exists but is missing its schema or is unreadable.
    /// Recovery requires an explicit reset.
    #[error("index at {path} is corrupt ({reason}); run `doclet reset --yes` to rebuild it")]
    IndexCorrupt { path: PathBuf, reason: String },

    /// Reading from the index failed.
    #[error("index query failed: {0}")]
    IndexRead(String),

    /// No language model is loaded.
    #[error("language model not ready: {0}")]
    ModelUnavailable(String),

    /// The language model was loaded but generation failed.
    #[error("generation failed: {0}")]
    Generation(String),

    /// The operation observed a cancellation request.
    #[error("operation cancelled")]
    Cancelled,

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl DocletError {
    pub fn load(path: impl Into<PathBuf>, reason: impl std::fmt::Display) -> Self {
        Self::Load {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn embedding(reason: impl std::fmt::Display) -> Self {
        Self::Embedding(reason.to_string())
    }

    pub fn index_write(reason: impl std::fmt::Display) -> Self {
        Self::IndexWrite(reason.to_string())
    }

    pub fn index_read(reason: impl std::fmt::Display) -> Self {
        Self::IndexRead(reason.to_string())
    }

    /// Whether this error only concerns a single document during ingestion.
    pub fn is_per_document(&self) -> bool {
        matches!(
            self,
            Self::Load { .. } | Self::UnsupportedFormat { .. } | Self::Embedding(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_document_classification() {
        assert!(DocletError::load("a.md", "boom").is_per_document());
        assert!(DocletError::embedding("no model").is_per_document());
        assert!(DocletError::UnsupportedFormat {
            path: "a.docx".into(),
            extension: Some("docx".into())
        }
        .is_per_document());
        assert!(!DocletError::index_write("disk full").is_per_document());
        assert!(!DocletError::Cancelled.is_per_document());
    }

    #[test]
    fn corrupt_index_message_names_reset() {
        let err = DocletError::IndexCorrupt {
            path: "data/doclet.sqlite".into(),
            reason: "missing table chunk_records".into(),
        };
        assert!(err.to_string().contains("doclet reset --yes"));
    }
}
