//! Ingestion progress reporting.
//!
//! Reports observable progress during `doclet ingest` so users see what is
//! being scanned and how much is left. Progress is emitted on **stderr** so
//! stdout remains parseable for scripts.

use std::io::Write;

/// A single progress event for an ingestion run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IngestProgressEvent {
    /// Walking the target and fingerprinting files. Total unknown.
    Scanning { target: String },
    /// About to process document `n` of `total` (1-based).
    Processing {
        document_id: String,
        n: u64,
        total: u64,
    },
    /// Removing a document whose source disappeared.
    Removing { document_id: String },
}

/// Reports ingestion progress. Implementations write to stderr (human or JSON).
pub trait IngestProgressReporter: Send + Sync {
    /// Emit a progress event. Called from the ingest pipeline.
    fn report(&self, event: IngestProgressEvent);
}

/// Human-friendly progress on stderr: "ingest  processing  12 / 1,234  notes/a.md".
pub struct StderrProgress;

impl IngestProgressReporter for StderrProgress {
    fn report(&self, event: IngestProgressEvent) {
        let line = match &event {
            IngestProgressEvent::Scanning { target } => {
                format!("ingest {}  scanning...\n", target)
            }
            IngestProgressEvent::Processing {
                document_id,
                n,
                total,
            } => format!(
                "ingest  processing  {} / {}  {}\n",
                format_number(*n),
                format_number(*total),
                document_id
            ),
            IngestProgressEvent::Removing { document_id } => {
                format!("ingest  removing  {}\n", document_id)
            }
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl IngestProgressReporter for JsonProgress {
    fn report(&self, event: IngestProgressEvent) {
        let obj = match &event {
            IngestProgressEvent::Scanning { target } => serde_json::json!({
                "event": "progress",
                "phase": "scanning",
                "target": target
            }),
            IngestProgressEvent::Processing {
                document_id,
                n,
                total,
            } => serde_json::json!({
                "event": "progress",
                "phase": "processing",
                "document": document_id,
                "n": n,
                "total": total
            }),
            IngestProgressEvent::Removing { document_id } => serde_json::json!({
                "event": "progress",
                "phase": "removing",
                "document": document_id
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl IngestProgressReporter for NoProgress {
    fn report(&self, _event: IngestProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn IngestProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
