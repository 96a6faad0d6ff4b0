//! Language model abstraction for answer generation.
//!
//! A [`LanguageModel`] turns a fully built prompt into raw text. Prompt
//! construction and output cleaning live in [`compose`](crate::compose);
//! implementations here only move bytes to and from a local inference
//! server:
//!
//! | Provider | Endpoint |
//! |----------|----------|
//! | `llamacpp` | llama.cpp server, `POST /completion` |
//! | `ollama` | Ollama, `POST /api/generate` (raw prompt, no server-side template) |
//!
//! Calls are bounded by `llm.timeout_secs`. Nothing is retried.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::config::LlmConfig;
use crate::error::{DocletError, Result};

/// Sampling limits passed with every generation request.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    pub max_tokens: u32,
    pub temperature: f32,
    pub stop: Vec<String>,
}

impl GenerationParams {
    pub fn from_config(config: &LlmConfig) -> Self {
        Self {
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            stop: config.stop.clone(),
        }
    }
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn model_name(&self) -> &str;

    /// Check that the backing server is reachable. Called once when the
    /// model is loaded.
    async fn health_check(&self) -> Result<()> {
        Ok(())
    }

    async fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<String>;
}

fn build_client(config: &LlmConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
        .map_err(|e| DocletError::Config(e.to_string()))
}

async fn post_json(
    client: &reqwest::Client,
    url: &str,
    body: &serde_json::Value,
) -> Result<serde_json::Value> {
    let response = client
        .post(url)
        .json(body)
        .send()
        .await
        .map_err(|e| {
            if e.is_timeout() {
                DocletError::Generation(format!("request to {} timed out", url))
            } else {
                DocletError::ModelUnavailable(format!("cannot reach {}: {}", url, e))
            }
        })?;

    let status = response.status();
    if !status.is_success() {
        let body_text = response.text().await.unwrap_or_default();
        return Err(DocletError::Generation(format!(
            "{} returned {}: {}",
            url, status, body_text
        )));
    }

    response
        .json()
        .await
        .map_err(|e| DocletError::Generation(format!("invalid response from {}: {}", url, e)))
}

async fn probe(client: &reqwest::Client, url: &str) -> Result<()> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| DocletError::ModelUnavailable(format!("cannot reach {}: {}", url, e)))?;
    if !response.status().is_success() {
        return Err(DocletError::ModelUnavailable(format!(
            "{} returned {}",
            url,
            response.status()
        )));
    }
    Ok(())
}

// ============ llama.cpp server ============

pub struct LlamaCppGenerator {
    model: String,
    url: String,
    client: reqwest::Client,
}

impl LlamaCppGenerator {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        Ok(Self {
            model: config.model.clone().unwrap_or_else(|| "llama.cpp".to_string()),
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "http://127.0.0.1:8080".to_string())
                .trim_end_matches('/')
                .to_string(),
            client: build_client(config)?,
        })
    }
}

#[async_trait]
impl LanguageModel for LlamaCppGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn health_check(&self) -> Result<()> {
        probe(&self.client, &format!("{}/health", self.url)).await
    }

    async fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<String> {
        let body = serde_json::json!({
            "prompt": prompt,
            "n_predict": params.max_tokens,
            "temperature": params.temperature,
            "stop": params.stop,
            "cache_prompt": false,
        });
        let json = post_json(&self.client, &format!("{}/completion", self.url), &body).await?;
        json.get("content")
            .and_then(|c| c.as_str())
            .map(str::to_string)
            .ok_or_else(|| DocletError::Generation("llama.cpp response missing content".into()))
    }
}

// ============ Ollama ============

pub struct OllamaGenerator {
    model: String,
    url: String,
    client: reqwest::Client,
}

impl OllamaGenerator {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| DocletError::Config("llm.model required for Ollama provider".into()))?;
        Ok(Self {
            model,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "http://localhost:11434".to_string())
                .trim_end_matches('/')
                .to_string(),
            client: build_client(config)?,
        })
    }
}

#[async_trait]
impl LanguageModel for OllamaGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn health_check(&self) -> Result<()> {
        probe(&self.client, &format!("{}/api/tags", self.url)).await
    }

    async fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "raw": true,
            "stream": false,
            "options": {
                "num_predict": params.max_tokens,
                "temperature": params.temperature,
                "stop": params.stop,
            },
        });
        let json = post_json(&self.client, &format!("{}/api/generate", self.url), &body).await?;
        json.get("response")
            .and_then(|c| c.as_str())
            .map(str::to_string)
            .ok_or_else(|| DocletError::Generation("Ollama response missing 'response'".into()))
    }
}

/// Create the language model named by `config.provider`. Returns `None`
/// when generation is disabled.
pub fn create_language_model(config: &LlmConfig) -> Result<Option<Arc<dyn LanguageModel>>> {
    match config.provider.as_str() {
        "disabled" => Ok(None),
        "llamacpp" => Ok(Some(Arc::new(LlamaCppGenerator::new(config)?))),
        "ollama" => Ok(Some(Arc::new(OllamaGenerator::new(config)?))),
        other => Err(DocletError::Config(format!("unknown llm provider: {}", other))),
    }
}
