//! The [`Doclet`] handle: one knowledge base, its collaborators, and the
//! lock that keeps ingestion and queries apart.
//!
//! An ingestion run holds the write half of the index lock for its whole
//! duration; queries, listings and stats hold the read half. Readers
//! therefore never observe a run in progress.
//!
//! ```rust,no_run
//! # async fn demo() -> doclet::error::Result<()> {
//! use doclet::config::Config;
//! use doclet::embedding::create_provider;
//! use doclet::engine::Doclet;
//! use doclet::ingest::CancelFlag;
//! use doclet::progress::NoProgress;
//! use doclet::scan::IngestTarget;
//!
//! let config = Config::with_db_path("./data/doclet.sqlite");
//! let embedder = create_provider(&config.embedding)?;
//! let doclet = Doclet::init(config, embedder).await?;
//! doclet
//!     .ingest(&IngestTarget::Directory("./docs".into()), &NoProgress, &CancelFlag::new())
//!     .await?;
//! doclet.load_model().await?;
//! let answer = doclet.ask("What is the refund policy?", None).await?;
//! println!("{}", answer.text);
//! doclet.close().await;
//! # Ok(())
//! # }
//! ```

use sqlx::SqlitePool;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::chunk::Chunker;
use crate::compose::{compose, ComposeOptions, NO_DOCUMENTS_MESSAGE};
use crate::config::Config;
use crate::db;
use crate::embedding::EmbeddingProvider;
use crate::error::{DocletError, Result};
use crate::generation::{create_language_model, LanguageModel};
use crate::index::{DistanceMetric, SqliteIndex, VectorIndex};
use crate::ingest::{CancelFlag, Ingestor};
use crate::ledger::Ledger;
use crate::migrate;
use crate::models::{Answer, AnswerKind, IndexedDocument, IngestReport, Retrieval};
use crate::progress::IngestProgressReporter;
use crate::retrieve::Retriever;
use crate::scan::IngestTarget;
use crate::stats::{breakdown, IndexStats};

pub struct Doclet {
    config: Config,
    pool: SqlitePool,
    index: Arc<dyn VectorIndex>,
    ledger: Ledger,
    embedder: Arc<dyn EmbeddingProvider>,
    model: RwLock<Option<Arc<dyn LanguageModel>>>,
    gate: RwLock<()>,
    chunker: Chunker,
    compose_options: ComposeOptions,
}

impl Doclet {
    /// Create the database if needed, apply the schema, and open it.
    pub async fn init(config: Config, embedder: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        let pool = db::connect(&config.db.path, true).await?;
        migrate::run_migrations(&pool).await?;
        Self::open_pool(config, pool, embedder).await
    }

    /// Open an existing knowledge base. A missing database is
    /// [`DocletError::IndexUnavailable`]; a database without the schema is
    /// [`DocletError::IndexCorrupt`]. Neither is repaired automatically.
    pub async fn open(config: Config, embedder: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        let pool = db::connect(&config.db.path, false).await?;
        Self::open_pool(config, pool, embedder).await
    }

    async fn open_pool(
        config: Config,
        pool: SqlitePool,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self> {
        let metric = DistanceMetric::parse(&config.retrieval.metric).ok_or_else(|| {
            DocletError::Config(format!("unknown metric: {}", config.retrieval.metric))
        })?;
        let index = SqliteIndex::open(pool.clone(), &config.db.path, metric, embedder.model_name())
            .await?;
        Self::from_parts(config, pool, Arc::new(index), embedder)
    }

    /// Assemble a handle from explicit collaborators. The ledger lives in
    /// `pool`, which must already carry the schema.
    pub fn from_parts(
        config: Config,
        pool: SqlitePool,
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self> {
        let chunker = Chunker::from_config(&config.chunking)?;
        let compose_options = ComposeOptions::from_config(&config)?;
        Ok(Self {
            ledger: Ledger::new(pool.clone()),
            config,
            pool,
            index,
            embedder,
            model: RwLock::new(None),
            gate: RwLock::new(()),
            chunker,
            compose_options,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Bring the index up to date with `target`.
    pub async fn ingest(
        &self,
        target: &IngestTarget,
        progress: &dyn IngestProgressReporter,
        cancel: &CancelFlag,
    ) -> Result<IngestReport> {
        let _write = self.gate.write().await;
        Ingestor {
            config: &self.config,
            chunker: self.chunker,
            embedder: self.embedder.as_ref(),
            index: self.index.as_ref(),
            ledger: &self.ledger,
        }
        .run(target, progress, cancel)
        .await
    }

    /// Retrieve the chunks relevant to `question`, optionally limited to
    /// `selected` document ids.
    pub async fn retrieve(&self, question: &str, selected: Option<&[String]>) -> Result<Retrieval> {
        let _read = self.gate.read().await;
        self.retrieve_locked(question, selected).await
    }

    async fn retrieve_locked(&self, question: &str, selected: Option<&[String]>) -> Result<Retrieval> {
        let allowed: Option<HashSet<String>> = selected.map(|ids| ids.iter().cloned().collect());
        Retriever::new(self.embedder.as_ref(), self.index.as_ref())
            .retrieve(
                question,
                self.config.retrieval.k,
                self.config.retrieval.relevance_threshold,
                allowed.as_ref(),
            )
            .await
    }

    /// Answer `question` from the indexed documents.
    pub async fn ask(&self, question: &str, selected: Option<&[String]>) -> Result<Answer> {
        let _read = self.gate.read().await;
        let matches = match self.retrieve_locked(question, selected).await? {
            Retrieval::NoDocumentsIndexed => {
                return Ok(Answer::without_context(
                    AnswerKind::NoDocumentsIndexed,
                    NO_DOCUMENTS_MESSAGE,
                ))
            }
            Retrieval::Matches(matches) => matches,
        };

        let model = self.model.read().await.clone();
        compose(question, &matches, model.as_deref(), &self.compose_options).await
    }

    pub async fn documents(&self) -> Result<Vec<IndexedDocument>> {
        let _read = self.gate.read().await;
        self.index.list_documents().await
    }

    pub async fn stats(&self) -> Result<IndexStats> {
        let _read = self.gate.read().await;
        let documents = self.index.list_documents().await?;
        let ledger_entries = self.ledger.entries().await?.len() as u64;
        let db_bytes = std::fs::metadata(&self.config.db.path)
            .map(|m| m.len())
            .unwrap_or(0);

        Ok(IndexStats {
            db_path: self.config.db.path.clone(),
            db_bytes,
            metric: self.index.metric().as_str().to_string(),
            embedding_model: self.embedder.model_name().to_string(),
            documents: documents.len() as u64,
            chunks: self.index.chunk_count().await?,
            ledger_entries,
            last_indexed_at: documents.iter().map(|d| d.indexed_at).max(),
            by_format: breakdown(&documents),
            model_loaded: self.model_loaded().await,
        })
    }

    /// Destroy all indexed knowledge and the ledger with it.
    pub async fn reset(&self) -> Result<()> {
        let _write = self.gate.write().await;
        self.index.reset().await?;
        self.ledger.clear().await?;
        tracing::info!(db = %self.config.db.path.display(), "knowledge base reset");
        Ok(())
    }

    /// Create the configured language model and check that it responds.
    pub async fn load_model(&self) -> Result<()> {
        let model = create_language_model(&self.config.llm)?
            .ok_or_else(|| DocletError::ModelUnavailable("llm.provider is \"disabled\"".into()))?;
        model.health_check().await?;
        tracing::info!(model = model.model_name(), "language model loaded");
        self.set_model(model).await;
        Ok(())
    }

    /// Install an already constructed language model.
    pub async fn set_model(&self, model: Arc<dyn LanguageModel>) {
        *self.model.write().await = Some(model);
    }

    pub async fn unload_model(&self) {
        if self.model.write().await.take().is_some() {
            tracing::info!("language model unloaded");
        }
    }

    pub async fn model_loaded(&self) -> bool {
        self.model.read().await.is_some()
    }

    /// Close the database pool.
    pub async fn close(self) {
        self.pool.close().await;
    }
}
