//! TOML configuration parsing and validation.
//!
//! Every tunable of the pipeline lives here, including the relevance
//! threshold: its useful range depends on the embedding model and distance
//! metric, so it is never hard-coded.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub docs: DocsConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DocsConfig {
    #[serde(default = "default_docs_root")]
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
}

impl Default for DocsConfig {
    fn default() -> Self {
        Self {
            root: default_docs_root(),
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
            max_file_bytes: default_max_file_bytes(),
        }
    }
}

fn default_docs_root() -> PathBuf {
    PathBuf::from("./docs")
}
fn default_include_globs() -> Vec<String> {
    vec![
        "**/*.md".to_string(),
        "**/*.markdown".to_string(),
        "**/*.txt".to_string(),
        "**/*.pdf".to_string(),
    ]
}
fn default_max_file_bytes() -> u64 {
    50 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default = "default_boundary_window")]
    pub boundary_window: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            boundary_window: default_boundary_window(),
        }
    }
}

fn default_chunk_size() -> usize {
    500
}
fn default_chunk_overlap() -> usize {
    50
}
fn default_boundary_window() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_k")]
    pub k: usize,
    #[serde(default = "default_relevance_threshold")]
    pub relevance_threshold: f64,
    #[serde(default = "default_max_context_chunks")]
    pub max_context_chunks: usize,
    #[serde(default = "default_max_chunk_chars")]
    pub max_chunk_chars: usize,
    #[serde(default = "default_metric")]
    pub metric: String,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k: default_k(),
            relevance_threshold: default_relevance_threshold(),
            max_context_chunks: default_max_context_chunks(),
            max_chunk_chars: default_max_chunk_chars(),
            metric: default_metric(),
        }
    }
}

fn default_k() -> usize {
    5
}
fn default_relevance_threshold() -> f64 {
    1.3
}
fn default_max_context_chunks() -> usize {
    3
}
fn default_max_chunk_chars() -> usize {
    400
}
fn default_metric() -> String {
    "l2".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            timeout_secs: default_embedding_timeout_secs(),
        }
    }
}

fn default_embedding_provider() -> String {
    "local".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_embedding_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_template")]
    pub template: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_stop")]
    pub stop: Vec<String>,
    #[serde(default = "default_max_answer_chars")]
    pub max_answer_chars: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model: None,
            url: None,
            template: default_template(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_llm_timeout_secs(),
            stop: default_stop(),
            max_answer_chars: default_max_answer_chars(),
        }
    }
}

fn default_llm_provider() -> String {
    "disabled".to_string()
}
fn default_template() -> String {
    "plain".to_string()
}
fn default_max_tokens() -> u32 {
    200
}
fn default_temperature() -> f32 {
    0.1
}
fn default_llm_timeout_secs() -> u64 {
    120
}
fn default_stop() -> Vec<String> {
    [
        "<|eot_id|>",
        "<|end_of_text|>",
        "\n\nQuestion:",
        "\n\nUser:",
        "\n\nHuman:",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_max_answer_chars() -> usize {
    1200
}

impl LlmConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

impl Config {
    /// Configuration with every default applied and the database at `db_path`.
    pub fn with_db_path(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig {
                path: db_path.into(),
            },
            docs: DocsConfig::default(),
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingConfig::default(),
            llm: LlmConfig::default(),
        }
    }

    /// Check cross-field constraints. Called by [`load_config`].
    pub fn validate(&self) -> Result<()> {
        // Validate chunking
        if self.chunking.chunk_size == 0 {
            bail!("chunking.chunk_size must be > 0");
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            bail!(
                "chunking.chunk_overlap ({}) must be < chunking.chunk_size ({})",
                self.chunking.chunk_overlap,
                self.chunking.chunk_size
            );
        }

        // Validate retrieval
        if self.retrieval.k < 1 {
            bail!("retrieval.k must be >= 1");
        }
        if self.retrieval.max_context_chunks < 1 {
            bail!("retrieval.max_context_chunks must be >= 1");
        }
        if !self.retrieval.relevance_threshold.is_finite()
            || self.retrieval.relevance_threshold < 0.0
        {
            bail!("retrieval.relevance_threshold must be a finite number >= 0");
        }
        match self.retrieval.metric.as_str() {
            "l2" | "cosine" => {}
            other => bail!(
                "Unknown retrieval.metric: '{}'. Must be l2 or cosine.",
                other
            ),
        }

        // Validate embedding
        match self.embedding.provider.as_str() {
            "disabled" | "local" | "ollama" | "hashing" => {}
            other => bail!(
                "Unknown embedding provider: '{}'. Must be disabled, local, ollama, or hashing.",
                other
            ),
        }
        if self.embedding.provider == "ollama" {
            if self.embedding.model.is_none() {
                bail!("embedding.model must be specified when provider is 'ollama'");
            }
            if self.embedding.dims.is_none() {
                bail!("embedding.dims must be specified when provider is 'ollama'");
            }
        }
        if self.embedding.dims == Some(0) {
            bail!("embedding.dims must be > 0");
        }
        if self.embedding.batch_size == 0 {
            bail!("embedding.batch_size must be > 0");
        }

        // Validate llm
        match self.llm.provider.as_str() {
            "disabled" | "llamacpp" | "ollama" => {}
            other => bail!(
                "Unknown llm provider: '{}'. Must be disabled, llamacpp, or ollama.",
                other
            ),
        }
        if self.llm.provider == "ollama" && self.llm.model.is_none() {
            bail!("llm.model must be specified when provider is 'ollama'");
        }
        match self.llm.template.as_str() {
            "plain" | "llama3" => {}
            other => bail!("Unknown llm.template: '{}'. Must be plain or llama3.", other),
        }
        if self.llm.max_tokens == 0 {
            bail!("llm.max_tokens must be >= 1");
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            bail!("llm.temperature must be in [0.0, 2.0]");
        }

        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;

    Ok(config)
}
