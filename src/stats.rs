//! Index statistics and health overview.
//!
//! Summarizes what is indexed: document and chunk counts, a per-format
//! breakdown, and whether the ledger agrees with the index. Used by
//! `doclet stats`.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::models::IndexedDocument;

#[derive(Debug, Clone, Serialize)]
pub struct FormatStats {
    pub format: String,
    pub documents: u64,
    pub chunks: u64,
    pub chars: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub db_path: PathBuf,
    pub db_bytes: u64,
    pub metric: String,
    pub embedding_model: String,
    pub documents: u64,
    pub chunks: u64,
    pub ledger_entries: u64,
    pub last_indexed_at: Option<i64>,
    pub by_format: Vec<FormatStats>,
    pub model_loaded: bool,
}

impl IndexStats {
    /// Whether every indexed document has exactly one ledger entry.
    pub fn is_consistent(&self) -> bool {
        self.documents == self.ledger_entries
    }
}

/// Per-format totals over `documents`, ordered by format name.
pub fn breakdown(documents: &[IndexedDocument]) -> Vec<FormatStats> {
    let mut by_format: BTreeMap<&'static str, FormatStats> = BTreeMap::new();
    for doc in documents {
        let entry = by_format
            .entry(doc.format.as_str())
            .or_insert_with(|| FormatStats {
                format: doc.format.as_str().to_string(),
                documents: 0,
                chunks: 0,
                chars: 0,
            });
        entry.documents += 1;
        entry.chunks += doc.chunk_count as u64;
        entry.chars += doc.char_count as u64;
    }
    by_format.into_values().collect()
}

/// Print a human-readable summary to stdout.
pub fn print_stats(stats: &IndexStats) {
    println!("Doclet Index Stats");
    println!("==================");
    println!();
    println!("  Database:    {}", stats.db_path.display());
    println!("  Size:        {}", human_size(stats.db_bytes));
    println!("  Metric:      {}", stats.metric);
    println!("  Embedding:   {}", stats.embedding_model);
    println!();
    println!("  Documents:   {}", stats.documents);
    println!("  Chunks:      {}", stats.chunks);
    println!(
        "  Ledger:      {} entries{}",
        stats.ledger_entries,
        if stats.is_consistent() {
            ""
        } else {
            " (out of sync; next ingest will repair)"
        }
    );
    println!(
        "  Last ingest: {}",
        stats
            .last_indexed_at
            .map(|ts| describe_age(ts, Utc::now()))
            .unwrap_or_else(|| "never".to_string())
    );

    if !stats.by_format.is_empty() {
        println!();
        println!("  By format:");
        println!("  {:<12} {:>6} {:>8} {:>12}", "FORMAT", "DOCS", "CHUNKS", "CHARS");
        println!("  {}", "-".repeat(42));
        for f in &stats.by_format {
            println!(
                "  {:<12} {:>6} {:>8} {:>12}",
                f.format, f.documents, f.chunks, f.chars
            );
        }
    }
    println!();
}

/// Byte count with a binary unit, e.g. `3.4 MiB`.
pub fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = UNITS[0];
    for next in &UNITS[1..] {
        if value < 1024.0 {
            break;
        }
        value /= 1024.0;
        unit = next;
    }
    format!("{:.1} {}", value, unit)
}

/// Coarse age of a Unix timestamp relative to `now`. Timestamps in the
/// future or older than four weeks fall back to [`format_timestamp`].
pub fn describe_age(ts: i64, now: DateTime<Utc>) -> String {
    let age = now.signed_duration_since(DateTime::from_timestamp(ts, 0).unwrap_or(now));
    let (count, unit) = if age < Duration::zero() || age >= Duration::weeks(4) {
        return format_timestamp(ts);
    } else if age < Duration::minutes(1) {
        return "just now".to_string();
    } else if age < Duration::hours(1) {
        (age.num_minutes(), "minute")
    } else if age < Duration::days(1) {
        (age.num_hours(), "hour")
    } else {
        (age.num_days(), "day")
    };
    let plural = if count == 1 { "" } else { "s" };
    format!("{} {}{} ago", count, unit, plural)
}

/// Unix timestamp as `YYYY-MM-DD HH:MM` in UTC.
pub fn format_timestamp(ts: i64) -> String {
    match DateTime::from_timestamp(ts, 0) {
        Some(dt) => dt.format("%Y-%m-%d %H:%M").to_string(),
        None => ts.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceFormat;

    fn doc(id: &str, format: SourceFormat, chunks: i64) -> IndexedDocument {
        IndexedDocument {
            id: id.into(),
            format,
            fingerprint: "fp".into(),
            char_count: 100,
            chunk_count: chunks,
            indexed_at: 0,
        }
    }

    #[test]
    fn breakdown_groups_by_format() {
        let docs = vec![
            doc("a.md", SourceFormat::Markdown, 2),
            doc("b.pdf", SourceFormat::Pdf, 5),
            doc("c.md", SourceFormat::Markdown, 1),
        ];
        let stats = breakdown(&docs);
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].format, "markdown");
        assert_eq!(stats[0].documents, 2);
        assert_eq!(stats[0].chunks, 3);
        assert_eq!(stats[1].format, "pdf");
        assert_eq!(stats[1].chars, 100);
    }

    #[test]
    fn sizes_use_binary_units() {
        assert_eq!(human_size(0), "0 B");
        assert_eq!(human_size(1023), "1023 B");
        assert_eq!(human_size(2048), "2.0 KiB");
        assert_eq!(human_size(5 * 1024 * 1024 + 512 * 1024), "5.5 MiB");
        assert_eq!(human_size(3 << 40), "3.0 TiB");
    }

    #[test]
    fn ages_are_relative_to_now() {
        let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let ts = now.timestamp();
        assert_eq!(describe_age(ts - 5, now), "just now");
        assert_eq!(describe_age(ts - 60, now), "1 minute ago");
        assert_eq!(describe_age(ts - 7200, now), "2 hours ago");
        assert_eq!(describe_age(ts - 3 * 86400, now), "3 days ago");
        assert_eq!(describe_age(ts - 40 * 86400, now), format_timestamp(ts - 40 * 86400));
        assert_eq!(describe_age(ts + 600, now), format_timestamp(ts + 600));
        assert_eq!(format_timestamp(0), "1970-01-01 00:00");
    }
}
