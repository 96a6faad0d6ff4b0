//! Core data models used throughout Doclet.
//!
//! These types represent the documents, chunks, retrieval results, and
//! answers that flow through the ingestion and query pipelines.

use serde::Serialize;
use std::path::PathBuf;

/// Supported source formats. Each variant has its own loader in
/// [`loader`](crate::loader).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    Markdown,
    #[serde(rename = "text")]
    PlainText,
    Pdf,
}

impl SourceFormat {
    /// Resolve a format from a file extension (case-insensitive, no dot).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "md" | "markdown" => Some(Self::Markdown),
            "txt" | "text" => Some(Self::PlainText),
            "pdf" => Some(Self::Pdf),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Markdown => "markdown",
            Self::PlainText => "text",
            Self::Pdf => "pdf",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "markdown" => Some(Self::Markdown),
            "text" => Some(Self::PlainText),
            "pdf" => Some(Self::Pdf),
            _ => None,
        }
    }
}

impl std::fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A file discovered by the scanner, before it is loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// Stable document identifier (root-relative path with `/` separators).
    pub id: String,
    /// Absolute or caller-supplied path on disk.
    pub path: PathBuf,
}

/// A source file after loading and normalization.
#[derive(Debug, Clone)]
pub struct LoadedDocument {
    pub id: String,
    pub path: PathBuf,
    pub format: SourceFormat,
    pub text: String,
    /// SHA-256 of the file bytes, hex encoded.
    pub fingerprint: String,
}

/// A contiguous span of a document's normalized text.
///
/// Offsets are in characters, not bytes. Identity is
/// `(document_id, ordinal)`; `id` is a UUIDv5 derived from that pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub ordinal: i64,
    pub text: String,
    pub start: usize,
    pub end: usize,
}

impl Chunk {
    pub fn char_len(&self) -> usize {
        self.end - self.start
    }
}

/// One stored vector plus the chunk it was computed from.
#[derive(Debug, Clone)]
pub struct EmbeddingRecord {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

/// Per-document row kept by the vector index.
#[derive(Debug, Clone, Serialize)]
pub struct IndexedDocument {
    pub id: String,
    pub format: SourceFormat,
    pub fingerprint: String,
    pub char_count: i64,
    pub chunk_count: i64,
    pub indexed_at: i64,
}

/// A chunk returned by the index with its distance to the query.
///
/// Lower distance means more similar. Distances are not clipped.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub distance: f64,
}

/// Outcome of a retrieval call.
#[derive(Debug, Clone)]
pub enum Retrieval {
    /// The index holds no documents at all.
    NoDocumentsIndexed,
    /// Matches that passed the relevance threshold, ascending by distance.
    /// May be empty.
    Matches(Vec<ScoredChunk>),
}

impl Retrieval {
    pub fn matches(&self) -> &[ScoredChunk] {
        match self {
            Retrieval::NoDocumentsIndexed => &[],
            Retrieval::Matches(m) => m,
        }
    }
}

/// A reference from an answer back to a retrieved chunk.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Citation {
    /// 1-based `[Source N]` tag used in the prompt.
    pub source_number: usize,
    pub document_id: String,
    pub ordinal: i64,
    /// Distance at retrieval time.
    pub score: f64,
    pub excerpt: String,
}

/// How an [`Answer`] was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerKind {
    /// Generated from retrieved context.
    Grounded,
    /// Generation ran but produced nothing usable; citations still listed.
    Inconclusive,
    /// Nothing passed the relevance threshold. The model was not invoked.
    NoRelevantContext,
    /// The index is empty.
    NoDocumentsIndexed,
    /// No language model is loaded.
    ModelNotReady,
}

#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub kind: AnswerKind,
    pub text: String,
    pub citations: Vec<Citation>,
}

impl Answer {
    pub fn without_context(kind: AnswerKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
            citations: Vec::new(),
        }
    }
}

/// Summary of one ingestion run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    pub added: Vec<String>,
    pub updated: Vec<String>,
    pub removed: Vec<String>,
    pub unchanged: Vec<String>,
    /// `(document id, reason)` for every file that could not be indexed.
    pub failed: Vec<(String, String)>,
    /// Files under the document root that no include glob matched.
    pub skipped: Vec<String>,
    pub chunks_written: u64,
}

impl IngestReport {
    pub fn is_noop(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_from_extension() {
        assert_eq!(SourceFormat::from_extension("MD"), Some(SourceFormat::Markdown));
        assert_eq!(SourceFormat::from_extension("txt"), Some(SourceFormat::PlainText));
        assert_eq!(SourceFormat::from_extension("pdf"), Some(SourceFormat::Pdf));
        assert_eq!(SourceFormat::from_extension("docx"), None);
    }

    #[test]
    fn format_string_roundtrip() {
        for f in [SourceFormat::Markdown, SourceFormat::PlainText, SourceFormat::Pdf] {
            assert_eq!(SourceFormat::parse(f.as_str()), Some(f));
        }
    }
}
