//! # Doclet
//!
//! A local question-answering pipeline over a folder of documents.
//!
//! Doclet loads Markdown, plain-text and PDF files, splits them into
//! overlapping chunks, embeds the chunks, and keeps the vectors in a
//! persistent SQLite index. A content-hash ledger makes ingestion
//! incremental: only new and modified files are re-processed, and files that
//! disappeared are removed from the index. Questions are answered by
//! retrieving the nearest chunks, dropping those beyond a relevance
//! threshold, and asking a local language model to answer from what is left,
//! with numbered source citations.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────┐   ┌────────┐   ┌────────┐   ┌─────────┐   ┌──────────┐
//! │  Scan  │──▶│ Ledger │──▶│ Loader │──▶│ Chunker │──▶│ Embedder │
//! └────────┘   │  diff  │   └────────┘   └─────────┘   └────┬─────┘
//!              └────────┘                                   ▼
//!                   ┌──────────┐   ┌───────────┐   ┌──────────────┐
//!    Answer ◀───────│ Composer │◀──│ Retriever │◀──│ Index SQLite │
//!                   │ (LLM)    │   └───────────┘   └──────────────┘
//!                   └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! doclet init                           # create database
//! doclet ingest                         # index ./docs incrementally
//! doclet ask "What is the refund policy?"
//! doclet stats
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Error taxonomy |
//! | [`scan`] | File discovery |
//! | [`loader`] | Document loading and text normalization |
//! | [`chunk`] | Overlapping chunker |
//! | [`ledger`] | Content fingerprints and change detection |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | Vector index (SQLite and in-memory) |
//! | [`ingest`] | Ingestion pipeline |
//! | [`retrieve`] | Nearest-neighbour retrieval with threshold |
//! | [`generation`] | Local language model clients |
//! | [`compose`] | Prompt building and answer cleaning |
//! | [`engine`] | The [`Doclet`](engine::Doclet) handle |
//! | [`stats`] | Index statistics |
//! | [`progress`] | Ingestion progress reporting |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod chunk;
pub mod compose;
pub mod config;
pub mod db;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod generation;
pub mod index;
pub mod ingest;
pub mod ledger;
pub mod loader;
pub mod migrate;
pub mod models;
pub mod progress;
pub mod retrieve;
pub mod scan;
pub mod stats;

pub use engine::Doclet;
pub use error::{DocletError, Result};
