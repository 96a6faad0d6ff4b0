//! # Doclet CLI (`doclet`)
//!
//! The `doclet` binary drives a local knowledge base: create it, keep it in
//! sync with a folder of documents, and ask questions against it.
//!
//! ## Usage
//!
//! ```bash
//! doclet --config ./config/doclet.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `doclet init` | Create the SQLite database and run schema migrations |
//! | `doclet ingest` | Incrementally index `[docs].root` (or `--files ...`) |
//! | `doclet ask "<question>"` | Answer a question with cited sources |
//! | `doclet docs` | List indexed documents |
//! | `doclet stats` | Show index statistics |
//! | `doclet reset --yes` | Delete the database and start empty |
//!
//! Logs go to stderr and are controlled with `RUST_LOG` (default `warn`).

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use doclet::config::{self, Config};
use doclet::db;
use doclet::embedding::create_provider;
use doclet::engine::Doclet;
use doclet::error::DocletError;
use doclet::ingest::CancelFlag;
use doclet::models::{Answer, IndexedDocument, IngestReport};
use doclet::progress::ProgressMode;
use doclet::scan::IngestTarget;
use doclet::stats::{format_timestamp, print_stats};

/// Doclet: ask questions about your own documents, answered by a local model.
#[derive(Parser)]
#[command(name = "doclet", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/doclet.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database and schema. Safe to run repeatedly.
    Init,

    /// Bring the index up to date with the documents on disk.
    ///
    /// Only new and modified files are loaded and embedded; files that no
    /// longer exist are removed from the index.
    Ingest {
        /// Index exactly these files instead of `[docs].root`. The list is
        /// treated as the whole corpus.
        #[arg(long, num_args = 1..)]
        files: Vec<PathBuf>,

        /// Progress output on stderr. Defaults to `human` on a TTY.
        #[arg(long, value_enum)]
        progress: Option<ProgressArg>,

        /// Print the ingestion report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Answer a question from the indexed documents.
    Ask {
        question: String,

        /// Restrict retrieval to these document ids (repeatable).
        #[arg(long = "doc")]
        docs: Vec<String>,

        /// Print the answer as JSON.
        #[arg(long)]
        json: bool,
    },

    /// List indexed documents.
    Docs {
        #[arg(long)]
        json: bool,
    },

    /// Show index statistics.
    Stats {
        #[arg(long)]
        json: bool,
    },

    /// Delete every indexed document and the ledger.
    Reset {
        /// Confirm the deletion.
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ProgressArg {
    Off,
    Human,
    Json,
}

impl From<ProgressArg> for ProgressMode {
    fn from(arg: ProgressArg) -> Self {
        match arg {
            ProgressArg::Off => ProgressMode::Off,
            ProgressArg::Human => ProgressMode::Human,
            ProgressArg::Json => ProgressMode::Json,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let doclet = init(&cfg).await?;
            doclet.close().await;
            println!("Database initialized at {}", cfg.db.path.display());
        }
        Commands::Ingest {
            files,
            progress,
            json,
        } => {
            let target = if files.is_empty() {
                IngestTarget::Directory(cfg.docs.root.clone())
            } else {
                IngestTarget::Files(files)
            };
            let mode = progress
                .map(ProgressMode::from)
                .unwrap_or_else(ProgressMode::default_for_tty);

            let doclet = open(&cfg).await?;
            let cancel = CancelFlag::new();
            let on_ctrl_c = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    eprintln!("Cancelling after the current document...");
                    on_ctrl_c.cancel();
                }
            });

            let report = doclet
                .ingest(&target, mode.reporter().as_ref(), &cancel)
                .await
                .context("Ingestion failed")?;
            doclet.close().await;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report);
            }
        }
        Commands::Ask {
            question,
            docs,
            json,
        } => {
            let doclet = open(&cfg).await?;
            if cfg.llm.is_enabled() {
                match doclet.load_model().await {
                    Ok(()) => {}
                    Err(DocletError::ModelUnavailable(reason)) => {
                        tracing::warn!(%reason, "language model unavailable");
                    }
                    Err(e) => return Err(e).context("Failed to load language model"),
                }
            }

            let selected = (!docs.is_empty()).then_some(docs.as_slice());
            let answer = doclet.ask(&question, selected).await?;
            doclet.close().await;

            if json {
                println!("{}", serde_json::to_string_pretty(&answer)?);
            } else {
                print_answer(&answer);
            }
        }
        Commands::Docs { json } => {
            let doclet = open(&cfg).await?;
            let documents = doclet.documents().await?;
            doclet.close().await;

            if json {
                println!("{}", serde_json::to_string_pretty(&documents)?);
            } else {
                print_documents(&documents);
            }
        }
        Commands::Stats { json } => {
            let doclet = open(&cfg).await?;
            let stats = doclet.stats().await?;
            doclet.close().await;

            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                print_stats(&stats);
            }
        }
        Commands::Reset { yes } => {
            if !yes {
                bail!("Refusing to delete the index without --yes");
            }
            // Works on a corrupt database too: the files are removed, not read.
            db::remove_database(&cfg.db.path)?;
            let doclet = init(&cfg).await?;
            doclet.close().await;
            println!("Index reset: {}", cfg.db.path.display());
        }
    }

    Ok(())
}

async fn init(cfg: &Config) -> Result<Doclet> {
    let embedder = create_provider(&cfg.embedding)?;
    Doclet::init(cfg.clone(), embedder)
        .await
        .with_context(|| format!("Failed to initialize {}", cfg.db.path.display()))
}

async fn open(cfg: &Config) -> Result<Doclet> {
    let embedder = create_provider(&cfg.embedding)?;
    Ok(Doclet::open(cfg.clone(), embedder).await?)
}

fn print_report(report: &IngestReport) {
    println!("Ingest complete:");
    println!("  added:     {}", report.added.len());
    println!("  updated:   {}", report.updated.len());
    println!("  removed:   {}", report.removed.len());
    println!("  unchanged: {}", report.unchanged.len());
    println!("  chunks:    {}", report.chunks_written);
    if !report.skipped.is_empty() {
        println!("  skipped:   {} (no include glob matches)", report.skipped.len());
    }
    if !report.failed.is_empty() {
        println!("  failed:    {}", report.failed.len());
        for (id, reason) in &report.failed {
            println!("    {}: {}", id, reason);
        }
    }
}

fn print_answer(answer: &Answer) {
    println!("{}", answer.text);
    if !answer.citations.is_empty() {
        println!();
        println!("Sources:");
        for c in &answer.citations {
            println!(
                "  [{}] {} (chunk {}, distance {:.3})",
                c.source_number, c.document_id, c.ordinal, c.score
            );
        }
    }
}

fn print_documents(documents: &[IndexedDocument]) {
    if documents.is_empty() {
        println!("No documents indexed.");
        return;
    }
    println!(
        "{:<48} {:<9} {:>7} {:>9}  {}",
        "DOCUMENT", "FORMAT", "CHUNKS", "CHARS", "INDEXED"
    );
    for d in documents {
        println!(
            "{:<48} {:<9} {:>7} {:>9}  {}",
            d.id,
            d.format,
            d.chunk_count,
            d.char_count,
            format_timestamp(d.indexed_at)
        );
    }
}
