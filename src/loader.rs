//! Document loading and text normalization.
//!
//! Each [`SourceFormat`] has its own load function; [`load_document`]
//! resolves the format from the file extension, reads the bytes once,
//! fingerprints them, extracts text, and normalizes it.
//!
//! Normalization applies to every format:
//!
//! - CRLF and lone CR become LF.
//! - Runs of spaces and tabs collapse to a single space; trailing spaces
//!   on each line are removed.
//! - Three or more consecutive newlines collapse to one paragraph break.
//! - Leading and trailing whitespace is trimmed.
//!
//! Markdown additionally loses its YAML front matter. PDF text has form
//! feeds turned into paragraph breaks and page-number lines removed.
//!
//! A file that yields no text after normalization is a load error, so that
//! every ledger entry corresponds to at least one indexed chunk.

use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

use crate::error::{DocletError, Result};
use crate::ledger::fingerprint_bytes;
use crate::models::{LoadedDocument, SourceFile, SourceFormat};

/// Lines that are nothing but a page marker: `12`, `- 12 -`, `Page 3`,
/// `Page 3 of 10`.
static PAGE_ARTIFACT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:-\s*\d{1,4}\s*-|\d{1,4}|page\s+\d{1,4}(?:\s+of\s+\d{1,4})?)\s*$")
        .expect("page artifact pattern")
});

/// Resolve the format of `path` from its extension.
pub fn detect_format(path: &Path) -> Result<SourceFormat> {
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_string());
    extension
        .as_deref()
        .and_then(SourceFormat::from_extension)
        .ok_or_else(|| DocletError::UnsupportedFormat {
            path: path.to_path_buf(),
            extension,
        })
}

/// Load, fingerprint and normalize one source file.
pub fn load_document(file: &SourceFile, max_file_bytes: u64) -> Result<LoadedDocument> {
    let format = detect_format(&file.path)?;

    let metadata = std::fs::metadata(&file.path).map_err(|e| DocletError::load(&file.path, e))?;
    if metadata.len() > max_file_bytes {
        return Err(DocletError::load(
            &file.path,
            format!(
                "file is {} bytes, larger than the {} byte limit",
                metadata.len(),
                max_file_bytes
            ),
        ));
    }

    let bytes = std::fs::read(&file.path).map_err(|e| DocletError::load(&file.path, e))?;
    let fingerprint = fingerprint_bytes(&bytes);

    let text = match format {
        SourceFormat::Markdown => load_markdown(&bytes),
        SourceFormat::PlainText => load_plain_text(&bytes),
        SourceFormat::Pdf => load_pdf(&bytes),
    }
    .map_err(|reason| DocletError::load(&file.path, reason))?;

    if text.is_empty() {
        return Err(DocletError::load(&file.path, "no extractable text"));
    }

    Ok(LoadedDocument {
        id: file.id.clone(),
        path: file.path.clone(),
        format,
        text,
        fingerprint,
    })
}

fn decode_utf8(bytes: &[u8]) -> std::result::Result<&str, String> {
    std::str::from_utf8(bytes).map_err(|e| format!("invalid UTF-8: {}", e))
}

fn load_plain_text(bytes: &[u8]) -> std::result::Result<String, String> {
    Ok(normalize_text(decode_utf8(bytes)?))
}

fn load_markdown(bytes: &[u8]) -> std::result::Result<String, String> {
    let raw = decode_utf8(bytes)?;
    let unified = unify_newlines(raw);
    Ok(normalize_text(strip_front_matter(&unified)))
}

fn load_pdf(bytes: &[u8]) -> std::result::Result<String, String> {
    let raw = pdf_extract::extract_text_from_mem(bytes)
        .map_err(|e| format!("PDF extraction failed: {}", e))?;
    Ok(normalize_text(&strip_page_artifacts(&raw)))
}

fn unify_newlines(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

/// Remove a leading `---` fenced YAML block. An unterminated fence is kept.
pub fn strip_front_matter(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("---\n") else {
        return text;
    };
    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        offset += line.len();
        let marker = line.trim_end();
        if marker == "---" || marker == "..." {
            return &rest[offset..];
        }
    }
    text
}

/// Turn form feeds into paragraph breaks and drop page-number lines.
pub fn strip_page_artifacts(text: &str) -> String {
    let text = unify_newlines(text).replace('\u{000C}', "\n\n");
    text.lines()
        .filter(|line| !PAGE_ARTIFACT.is_match(line))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Apply the whitespace normalization shared by all formats.
pub fn normalize_text(text: &str) -> String {
    let text = unify_newlines(text);
    let mut out = String::with_capacity(text.len());
    let mut pending_breaks = 0usize;

    for line in text.split('\n') {
        let collapsed = collapse_spaces(line);
        if collapsed.is_empty() {
            pending_breaks += 1;
            continue;
        }
        if !out.is_empty() {
            out.push_str(if pending_breaks > 0 { "\n\n" } else { "\n" });
        }
        out.push_str(&collapsed);
        pending_breaks = 0;
    }

    out.trim().to_string()
}

fn collapse_spaces(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut in_space = false;
    for c in line.chars() {
        if c == ' ' || c == '\t' {
            if !in_space {
                out.push(' ');
            }
            in_space = true;
        } else {
            out.push(c);
            in_space = false;
        }
    }
    out.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn source(dir: &TempDir, name: &str, body: &[u8]) -> SourceFile {
        let path = dir.path().join(name);
        fs::write(&path, body).unwrap();
        SourceFile {
            id: name.to_string(),
            path,
        }
    }

    #[test]
    fn normalize_whitespace() {
        let raw = "Title\r\n\r\n\r\n\r\nFirst\t\tline   here   \r\nsecond line\n\n\n\nEnd  ";
        assert_eq!(
            normalize_text(raw),
            "Title\n\nFirst line here\nsecond line\n\nEnd"
        );
    }

    #[test]
    fn normalize_keeps_single_paragraph_break() {
        assert_eq!(normalize_text("a\n\nb"), "a\n\nb");
        assert_eq!(normalize_text("a\n  \nb"), "a\n\nb");
        assert_eq!(normalize_text("\n\n  a  \n\n"), "a");
    }

    #[test]
    fn front_matter_is_stripped() {
        let md = "---\ntitle: Notes\ntags: [a]\n---\n# Heading\n\nBody";
        assert_eq!(strip_front_matter(md), "# Heading\n\nBody");
        assert_eq!(strip_front_matter("# No front matter"), "# No front matter");
        assert_eq!(
            strip_front_matter("---\nnever closed"),
            "---\nnever closed"
        );
    }

    #[test]
    fn page_artifacts_are_removed() {
        let raw = "Intro text\n12\n- 13 -\nPage 3\nPAGE 4 of 10\nReal 12 content\u{000C}Next page";
        let cleaned = normalize_text(&strip_page_artifacts(raw));
        assert_eq!(cleaned, "Intro text\nReal 12 content\n\nNext page");
    }

    #[test]
    fn load_markdown_file() {
        let tmp = TempDir::new().unwrap();
        let file = source(&tmp, "guide.md", b"---\nauthor: x\n---\n\n# Guide\n\n\n\nStep one.");
        let doc = load_document(&file, u64::MAX).unwrap();
        assert_eq!(doc.format, SourceFormat::Markdown);
        assert_eq!(doc.text, "# Guide\n\nStep one.");
        assert_eq!(doc.fingerprint.len(), 64);
    }

    #[test]
    fn unsupported_extension() {
        let tmp = TempDir::new().unwrap();
        let file = source(&tmp, "report.docx", b"PK");
        let err = load_document(&file, u64::MAX).unwrap_err();
        assert!(matches!(err, DocletError::UnsupportedFormat { .. }));
    }

    #[test]
    fn empty_and_invalid_files_fail() {
        let tmp = TempDir::new().unwrap();
        let blank = source(&tmp, "blank.txt", b"  \n\n\t\n");
        assert!(matches!(
            load_document(&blank, u64::MAX),
            Err(DocletError::Load { .. })
        ));

        let binary = source(&tmp, "bad.txt", &[0xff, 0xfe, 0x00, 0x41]);
        assert!(matches!(
            load_document(&binary, u64::MAX),
            Err(DocletError::Load { .. })
        ));

        let pdf = source(&tmp, "broken.pdf", b"not a pdf");
        assert!(matches!(
            load_document(&pdf, u64::MAX),
            Err(DocletError::Load { .. })
        ));
    }

    #[test]
    fn oversized_file_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let file = source(&tmp, "big.txt", &[b'a'; 64]);
        let err = load_document(&file, 16).unwrap_err();
        assert!(err.to_string().contains("byte limit"));
    }
}
