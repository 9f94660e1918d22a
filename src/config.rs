//! Configuration parsing and validation.
//!
//! Settings are layered: built-in defaults, then an optional TOML file
//! (`--config path`, every section optional), then environment variables.
//! [`load_config`] validates the merged result and bails with a descriptive
//! message on the first problem.
//!
//! # Example
//!
//! ```toml
//! [app]
//! name = "Endee Support Copilot"
//! environment = "staging"
//!
//! [endee]
//! base_url = "http://endee:8080/api/v1"
//! index_name = "support_knowledge"
//!
//! [embedding]
//! provider = "local"
//! model = "all-minilm-l6-v2"
//!
//! [llm]
//! model = "gpt-4o-mini"
//! timeout_secs = 20
//! max_retries = 2
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use support_copilot_core::search::RetrievalParams;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub app: AppConfig,
    pub server: ServerConfig,
    pub endee: EndeeConfig,
    pub embedding: EmbeddingConfig,
    pub llm: LlmConfig,
    pub retrieval: RetrievalConfig,
    pub ingest: IngestConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AppConfig {
    pub name: String,
    pub environment: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: "Endee Support Copilot".to_string(),
            environment: "local".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub static_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8000".to_string(),
            static_dir: PathBuf::from("static"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EndeeConfig {
    pub base_url: String,
    pub auth_token: Option<String>,
    pub index_name: String,
    pub space_type: String,
    pub precision: String,
    pub timeout_secs: u64,
}

impl Default for EndeeConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/api/v1".to_string(),
            auth_token: None,
            index_name: "support_knowledge".to_string(),
            space_type: "cosine".to_string(),
            precision: "int8d".to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: String,
    pub model: String,
    /// Base URL for the `openai` provider. Defaults to the OpenAI API.
    pub url: Option<String>,
    /// API key for the `openai` provider; falls back to `OPENAI_API_KEY`.
    pub api_key: Option<String>,
    pub batch_size: usize,
    pub max_retries: u32,
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "local".to_string(),
            model: "all-minilm-l6-v2".to_string(),
            url: None,
            api_key: None,
            batch_size: 64,
            max_retries: 5,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: String,
    pub model: String,
    /// Answers are disabled while this is unset.
    pub api_key: Option<String>,
    pub base_url: String,
    pub timeout_secs: u64,
    /// Total attempts per answer, including the first.
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            base_url: "https://api.openai.com/v1".to_string(),
            timeout_secs: 20,
            max_retries: 2,
            retry_backoff_ms: 1000,
            temperature: 0.3,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    pub max_top_k: usize,
    pub headroom: usize,
    pub candidate_cap: usize,
    pub search_ef: u32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        let params = RetrievalParams::default();
        Self {
            max_top_k: params.max_top_k,
            headroom: params.headroom,
            candidate_cap: params.candidate_cap,
            search_ef: params.ef,
        }
    }
}

impl RetrievalConfig {
    pub fn params(&self) -> RetrievalParams {
        RetrievalParams {
            max_top_k: self.max_top_k,
            headroom: self.headroom,
            candidate_cap: self.candidate_cap,
            ef: self.search_ef,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct IngestConfig {
    pub max_batch_size: usize,
    pub data_dir: PathBuf,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 100,
            data_dir: PathBuf::from("data"),
        }
    }
}

/// Load configuration from an optional TOML file plus the process
/// environment.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let mut config = match path {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            toml::from_str(&content).with_context(|| "Failed to parse config file")?
        }
        None => Config::default(),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    validate(&config)?;
    Ok(config)
}

/// Apply environment overrides using `lookup` to read variables.
///
/// Empty values for optional secrets clear the setting.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = lookup("APP_NAME") {
        config.app.name = v;
    }
    if let Some(v) = lookup("ENVIRONMENT") {
        config.app.environment = v;
    }
    if let Some(v) = lookup("BIND_ADDR") {
        config.server.bind = v;
    }
    if let Some(v) = lookup("STATIC_DIR") {
        config.server.static_dir = PathBuf::from(v);
    }

    if let Some(v) = lookup("ENDEE_BASE_URL") {
        config.endee.base_url = v;
    }
    if let Some(v) = lookup("ENDEE_AUTH_TOKEN") {
        config.endee.auth_token = Some(v);
    }
    if let Some(v) = lookup("ENDEE_INDEX_NAME") {
        config.endee.index_name = v;
    }
    if let Some(v) = lookup("ENDEE_SPACE_TYPE") {
        config.endee.space_type = v;
    }
    if let Some(v) = lookup("ENDEE_PRECISION") {
        config.endee.precision = v;
    }
    if let Some(v) = lookup("ENDEE_TIMEOUT_SECS") {
        config.endee.timeout_secs = parse_env("ENDEE_TIMEOUT_SECS", &v)?;
    }

    if let Some(v) = lookup("EMBEDDING_PROVIDER") {
        config.embedding.provider = v;
    }
    if let Some(v) = lookup("EMBEDDING_MODEL_NAME") {
        config.embedding.model = v;
    }
    if let Some(v) = lookup("EMBEDDING_URL") {
        config.embedding.url = Some(v);
    }
    if let Some(v) = lookup("EMBEDDING_API_KEY") {
        config.embedding.api_key = Some(v);
    }
    if config
        .embedding
        .api_key
        .as_deref()
        .map_or(true, |k| k.trim().is_empty())
    {
        if let Some(v) = lookup("OPENAI_API_KEY") {
            config.embedding.api_key = Some(v);
        }
    }

    if let Some(v) = lookup("LLM_PROVIDER") {
        config.llm.provider = v;
    }
    if let Some(v) = lookup("LLM_MODEL") {
        config.llm.model = v;
    }
    if let Some(v) = lookup("LLM_API_KEY") {
        config.llm.api_key = Some(v);
    }
    if let Some(v) = lookup("LLM_BASE_URL") {
        config.llm.base_url = v;
    }
    if let Some(v) = lookup("LLM_TIMEOUT_SECS") {
        config.llm.timeout_secs = parse_env("LLM_TIMEOUT_SECS", &v)?;
    }
    if let Some(v) = lookup("LLM_MAX_RETRIES") {
        config.llm.max_retries = parse_env("LLM_MAX_RETRIES", &v)?;
    }

    if let Some(v) = lookup("SEARCH_MAX_TOP_K") {
        config.retrieval.max_top_k = parse_env("SEARCH_MAX_TOP_K", &v)?;
    }
    if let Some(v) = lookup("SEARCH_EF") {
        config.retrieval.search_ef = parse_env("SEARCH_EF", &v)?;
    }

    if let Some(v) = lookup("INGEST_MAX_BATCH_SIZE") {
        config.ingest.max_batch_size = parse_env("INGEST_MAX_BATCH_SIZE", &v)?;
    }
    if let Some(v) = lookup("DATA_DIR") {
        config.ingest.data_dir = PathBuf::from(v);
    }

    // Blank secrets mean "not configured".
    for secret in [
        &mut config.endee.auth_token,
        &mut config.embedding.api_key,
        &mut config.llm.api_key,
        &mut config.embedding.url,
    ] {
        if secret.as_deref().is_some_and(|s| s.trim().is_empty()) {
            *secret = None;
        }
    }

    Ok(())
}

fn parse_env<T>(key: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| anyhow::anyhow!("Invalid value for {}: '{}' ({})", key, raw, e))
}

pub fn validate(config: &Config) -> Result<()> {
    if !(1..=50).contains(&config.retrieval.max_top_k) {
        bail!(
            "retrieval.max_top_k must be in [1, 50], got {}",
            config.retrieval.max_top_k
        );
    }
    if config.retrieval.candidate_cap < 1 {
        bail!("retrieval.candidate_cap must be >= 1");
    }

    if config.ingest.max_batch_size < 1 {
        bail!("ingest.max_batch_size must be >= 1");
    }

    if config.endee.index_name.trim().is_empty() {
        bail!("endee.index_name must not be empty");
    }

    if config.embedding.batch_size < 1 {
        bail!("embedding.batch_size must be >= 1");
    }
    match config.embedding.provider.as_str() {
        "local" | "openai" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be local or openai.",
            other
        ),
    }

    if config.llm.provider != "openai" {
        bail!(
            "Unknown LLM provider: '{}'. Only openai is supported.",
            config.llm.provider
        );
    }
    if config.llm.max_retries < 1 {
        bail!("llm.max_retries must be >= 1");
    }
    if config.llm.timeout_secs < 1 {
        bail!("llm.timeout_secs must be >= 1");
    }

    Ok(())
}
