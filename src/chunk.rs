//! Overlapping fixed-size text chunker.
//!
//! Splits normalized document text into [`Chunk`]s of at most `chunk_size`
//! characters, where consecutive chunks share exactly `chunk_overlap`
//! characters. Sizes are counted in characters (Unicode scalar values), so
//! a cut never lands inside a UTF-8 sequence.
//!
//! # Algorithm
//!
//! 1. The first chunk starts at character 0.
//! 2. The target end is `start + chunk_size`. If that reaches the end of the
//!    text, the remainder becomes the final (possibly shorter) chunk.
//! 3. Otherwise the end snaps back to the nearest preferred break inside
//!    `[target - boundary_window, target]`: a paragraph break, then a line
//!    break, then a sentence end, then a space. With no break in the
//!    window the chunk is hard-cut at `chunk_size`.
//! 4. The next chunk starts at `end - chunk_overlap`.
//!
//! Chunking is lazy: [`Chunker::chunks`] returns an iterator that computes
//! each chunk on demand, and can be cloned or recreated to restart.
//! [`dechunk`] inverts the process exactly.
//!
//! # Example
//!
//! ```rust
//! use doclet::chunk::{dechunk, Chunker};
//!
//! let chunker = Chunker::new(500, 50, 50).unwrap();
//! let text = "x".repeat(1200);
//! let chunks: Vec<_> = chunker.chunks("doc-1", &text).collect();
//! let spans: Vec<_> = chunks.iter().map(|c| (c.start, c.end)).collect();
//! assert_eq!(spans, vec![(0, 500), (450, 950), (900, 1200)]);
//! assert_eq!(dechunk(&chunks), text);
//! ```

use uuid::Uuid;

use crate::config::ChunkingConfig;
use crate::error::{DocletError, Result};
use crate::models::Chunk;

/// Chunking parameters, validated once.
#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    chunk_size: usize,
    chunk_overlap: usize,
    boundary_window: usize,
}

impl Chunker {
    /// Build a chunker. `chunk_overlap` must be smaller than `chunk_size`.
    ///
    /// `boundary_window` is clamped below `chunk_size - chunk_overlap` so that
    /// every chunk advances the cursor.
    pub fn new(chunk_size: usize, chunk_overlap: usize, boundary_window: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(DocletError::Config("chunk_size must be > 0".into()));
        }
        if chunk_overlap >= chunk_size {
            return Err(DocletError::Config(format!(
                "chunk_overlap ({}) must be < chunk_size ({})",
                chunk_overlap, chunk_size
            )));
        }
        let stride = chunk_size - chunk_overlap;
        Ok(Self {
            chunk_size,
            chunk_overlap,
            boundary_window: boundary_window.min(stride - 1),
        })
    }

    pub fn from_config(config: &ChunkingConfig) -> Result<Self> {
        Self::new(
            config.chunk_size,
            config.chunk_overlap,
            config.boundary_window,
        )
    }

    /// Lazily chunk `text`. Empty text yields no chunks.
    pub fn chunks<'a>(&self, document_id: &'a str, text: &'a str) -> Chunks<'a> {
        Chunks {
            params: *self,
            document_id,
            text,
            cursor: Some(Cursor { char: 0, byte: 0 }),
            ordinal: 0,
        }
    }
}

/// Iterator over the chunks of one document.
///
/// Only the byte offsets of the chunk being cut are held in memory.
#[derive(Debug, Clone)]
pub struct Chunks<'a> {
    params: Chunker,
    document_id: &'a str,
    text: &'a str,
    cursor: Option<Cursor>,
    ordinal: i64,
}

/// Start of the next chunk, as a character index and its byte offset.
#[derive(Debug, Clone, Copy)]
struct Cursor {
    char: usize,
    byte: usize,
}

/// Byte offsets of the characters in `[start, start + len]` of one chunk.
struct Window<'a> {
    text: &'a str,
    offsets: Vec<usize>,
}

impl Window<'_> {
    fn char_at(&self, idx: usize) -> char {
        self.text[self.offsets[idx]..]
            .chars()
            .next()
            .unwrap_or('\0')
    }

    /// Whether a chunk ending at `end` (exclusive, window-relative) ends
    /// right after `kind`.
    fn ends_with(&self, end: usize, kind: Break) -> bool {
        let last = self.char_at(end - 1);
        match kind {
            Break::Paragraph => end >= 2 && last == '\n' && self.char_at(end - 2) == '\n',
            Break::Line => last == '\n',
            Break::Sentence => {
                end >= 2 && last == ' ' && matches!(self.char_at(end - 2), '.' | '!' | '?')
            }
            Break::Space => last == ' ',
        }
    }
}

impl Chunks<'_> {
    fn find_end(&self, window: &Window<'_>) -> usize {
        let target = self.params.chunk_size;
        let floor = (self.params.chunk_overlap + 1)
            .max(target.saturating_sub(self.params.boundary_window));
        for kind in [Break::Paragraph, Break::Line, Break::Sentence, Break::Space] {
            let mut end = target;
            while end >= floor {
                if window.ends_with(end, kind) {
                    return end;
                }
                end -= 1;
            }
        }
        target
    }
}

#[derive(Debug, Clone, Copy)]
enum Break {
    Paragraph,
    Line,
    Sentence,
    Space,
}

impl Iterator for Chunks<'_> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        let start = self.cursor?;
        if start.byte >= self.text.len() {
            self.cursor = None;
            return None;
        }

        let size = self.params.chunk_size;
        let mut offsets = Vec::with_capacity(size + 1);
        offsets.extend(
            self.text[start.byte..]
                .char_indices()
                .take(size + 1)
                .map(|(i, _)| start.byte + i),
        );
        // Fewer than `size + 1` characters left: this is the final chunk.
        let last = offsets.len() <= size;
        if last {
            offsets.push(self.text.len());
        }
        let window = Window {
            text: self.text,
            offsets,
        };

        let len = if last {
            window.offsets.len() - 1
        } else {
            self.find_end(&window)
        };

        let chunk = make_chunk(
            self.document_id,
            self.ordinal,
            &self.text[window.offsets[0]..window.offsets[len]],
            start.char,
            start.char + len,
        );

        self.ordinal += 1;
        self.cursor = if last {
            None
        } else {
            let advance = len - self.params.chunk_overlap;
            Some(Cursor {
                char: start.char + advance,
                byte: window.offsets[advance],
            })
        };
        Some(chunk)
    }
}

impl std::iter::FusedIterator for Chunks<'_> {}

/// Reassemble the original text from an ordered chunk sequence, trimming
/// each chunk's overlap with its predecessor.
pub fn dechunk(chunks: &[Chunk]) -> String {
    let mut out = String::new();
    let mut covered = 0usize;
    for chunk in chunks {
        let skip = covered.saturating_sub(chunk.start);
        out.extend(chunk.text.chars().skip(skip));
        covered = covered.max(chunk.end);
    }
    out
}

/// Deterministic chunk id for `(document_id, ordinal)`.
pub fn chunk_id(document_id: &str, ordinal: i64) -> String {
    let name = format!("{}#{}", document_id, ordinal);
    Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()).to_string()
}

fn make_chunk(document_id: &str, ordinal: i64, text: &str, start: usize, end: usize) -> Chunk {
    Chunk {
        id: chunk_id(document_id, ordinal),
        document_id: document_id.to_string(),
        ordinal,
        text: text.to_string(),
        start,
        end,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker(size: usize, overlap: usize) -> Chunker {
        Chunker::new(size, overlap, 50).unwrap()
    }

    fn overlap_text(a: &Chunk, b: &Chunk) -> (String, String) {
        let n = a.end - b.start;
        let tail: String = a.text.chars().skip(a.char_len() - n).collect();
        let head: String = b.text.chars().take(n).collect();
        (tail, head)
    }

    #[test]
    fn test_small_text_single_chunk() {
        let chunks: Vec<_> = chunker(500, 50).chunks("doc1", "Hello, world!").collect();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].ordinal, 0);
        assert_eq!(chunks[0].text, "Hello, world!");
    }

    #[test]
    fn test_empty_text_yields_nothing() {
        assert_eq!(chunker(500, 50).chunks("doc1", "").count(), 0);
    }

    #[test]
    fn test_1200_chars_three_chunks() {
        let text = "a".repeat(1200);
        let chunks: Vec<_> = chunker(500, 50).chunks("doc1", &text).collect();
        let spans: Vec<_> = chunks.iter().map(|c| (c.start, c.end)).collect();
        assert_eq!(spans, vec![(0, 500), (450, 950), (900, 1200)]);
    }

    #[test]
    fn test_1200_chars_of_prose_overlap_exact() {
        let sentence = "The quick brown fox jumps over the lazy dog. ";
        let text: String = sentence.repeat(30).chars().take(1200).collect();
        let chunks: Vec<_> = chunker(500, 50).chunks("doc1", &text).collect();
        assert_eq!(chunks.len(), 3);
        for pair in chunks.windows(2) {
            assert_eq!(pair[0].end - pair[1].start, 50);
            let (tail, head) = overlap_text(&pair[0], &pair[1]);
            assert_eq!(tail, head);
        }
        // Boundaries snapped near the targets, never past them.
        assert!(chunks[0].end <= 500 && chunks[0].end >= 450);
        assert_eq!(chunks[2].end, 1200);
    }

    #[test]
    fn test_prefers_paragraph_break() {
        let mut text = "word ".repeat(88); // 440 chars
        text.push_str("\n\n");
        text.push_str(&"more ".repeat(100));
        let chunks: Vec<_> = chunker(460, 20).chunks("doc1", &text).collect();
        assert_eq!(chunks[0].end, 442);
        assert!(chunks[0].text.ends_with("\n\n"));
    }

    #[test]
    fn test_hard_cut_without_breaks() {
        let text = "z".repeat(130);
        let chunks: Vec<_> = chunker(100, 10).chunks("doc1", &text).collect();
        assert_eq!(chunks[0].end, 100);
        assert_eq!(chunks[1].start, 90);
        assert_eq!(chunks[1].end, 130);
    }

    #[test]
    fn test_roundtrip_lossless() {
        let text = "First paragraph with several sentences. Another one here!\n\n\
                    Second paragraph, which is a bit longer and keeps going for a while? Yes.\n\
                    A line break, then more text so that the chunker has to cut a few times.";
        for (size, overlap) in [(40, 5), (64, 16), (25, 24), (500, 50)] {
            let chunks: Vec<_> = chunker(size, overlap).chunks("d", text).collect();
            assert_eq!(dechunk(&chunks), text, "size={} overlap={}", size, overlap);
        }
    }

    #[test]
    fn test_multibyte_utf8_chars() {
        let text = "┌──────────────────┐\n│ Héllo wörld      │\n└──────────────────┘";
        let chunks: Vec<_> = chunker(12, 3).chunks("doc1", text).collect();
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.text.chars().count() <= 12);
            assert_eq!(c.text.chars().count(), c.char_len());
        }
        assert_eq!(dechunk(&chunks), text);
    }

    #[test]
    fn test_ordinals_contiguous_and_ids_deterministic() {
        let text = (0..50)
            .map(|i| format!("Paragraph number {}.", i))
            .collect::<Vec<_>>()
            .join("\n\n");
        let c1: Vec<_> = chunker(60, 10).chunks("doc1", &text).collect();
        let c2: Vec<_> = chunker(60, 10).chunks("doc1", &text).collect();
        assert_eq!(c1, c2);
        for (i, c) in c1.iter().enumerate() {
            assert_eq!(c.ordinal, i as i64, "Index mismatch at position {}", i);
            assert_eq!(c.id, chunk_id("doc1", i as i64));
        }
        assert_ne!(chunk_id("doc1", 0), chunk_id("doc2", 0));
    }

    #[test]
    fn test_iterator_is_restartable() {
        let text = "abc ".repeat(100);
        let chunker = chunker(50, 5);
        let mut iter = chunker.chunks("d", &text);
        let first = iter.next().unwrap();
        let restarted = iter.clone().count();
        assert_eq!(restarted, iter.count());
        assert_eq!(chunker.chunks("d", &text).next().unwrap(), first);
    }

    #[test]
    fn test_long_multibyte_text_spans_match_characters() {
        let text = "Grüße aus Köln. Ünïcödé is fine.\n\n".repeat(400);
        let chars: Vec<char> = text.chars().collect();
        let chunks: Vec<_> = chunker(300, 40).chunks("d", &text).collect();
        assert!(chunks.len() > 40);
        for c in &chunks {
            let expected: String = chars[c.start..c.end].iter().collect();
            assert_eq!(c.text, expected);
            assert!(c.char_len() <= 300);
        }
        assert_eq!(chunks.last().unwrap().end, chars.len());
        assert_eq!(dechunk(&chunks), text);
    }

    #[test]
    fn test_invalid_parameters_rejected() {
        assert!(Chunker::new(0, 0, 0).is_err());
        assert!(Chunker::new(100, 100, 10).is_err());
        assert!(Chunker::new(100, 150, 10).is_err());
        assert!(Chunker::new(100, 99, 50).is_ok());
    }
}
