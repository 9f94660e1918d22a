//! Embedding provider implementations.
//!
//! - **[`LocalEmbedder`]** runs a fastembed ONNX model in-process. The model
//!   is loaded lazily on first use and shared by every later call.
//! - **[`OpenAIEmbedder`]** calls an OpenAI-compatible `/embeddings`
//!   endpoint with batching, retry, and backoff.
//!
//! Use [`create_embedder`] to build the provider named in the configuration.
//!
//! # Retry Strategy
//!
//! The OpenAI provider uses exponential backoff for transient errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use support_copilot_core::Embedder;

use crate::config::EmbeddingConfig;

/// Canonical name of the default local model.
pub const DEFAULT_LOCAL_MODEL: &str = "all-minilm-l6-v2";

const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";

/// Build the embedder named by `config.provider`.
///
/// No model is loaded and no network call is made here.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAIEmbedder::new(config)?)),
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(Arc::new(LocalEmbedder::new(config)?)),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => bail!(
            "Local embedding provider requires --features local-embeddings-fastembed"
        ),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

/// Map configured model names, including Hugging Face repository ids, to
/// the canonical local model name.
pub fn normalize_local_model(name: &str) -> String {
    let lower = name.trim().to_ascii_lowercase();
    let short = lower
        .strip_prefix("sentence-transformers/")
        .or_else(|| lower.strip_prefix("baai/"))
        .or_else(|| lower.strip_prefix("nomic-ai/"))
        .or_else(|| lower.strip_prefix("intfloat/"))
        .unwrap_or(&lower);
    short.to_string()
}

// ============ Local Provider (fastembed) ============

#[cfg(feature = "local-embeddings-fastembed")]
pub use local::LocalEmbedder;

#[cfg(feature = "local-embeddings-fastembed")]
mod local {
    use super::*;
    use anyhow::{anyhow, Context};
    use std::sync::Mutex;
    use tokio::sync::OnceCell;

    type SharedModel = Arc<Mutex<fastembed::TextEmbedding>>;

    /// Embedding provider backed by a fastembed model.
    ///
    /// Models are downloaded on first use from Hugging Face and cached on
    /// disk. The loaded model lives in a [`OnceCell`]: concurrent first
    /// callers wait for the same load, and a failed load is returned to the
    /// caller and attempted again on the next call.
    pub struct LocalEmbedder {
        model_name: String,
        model: fastembed::EmbeddingModel,
        batch_size: usize,
        loaded: OnceCell<SharedModel>,
    }

    impl LocalEmbedder {
        pub fn new(config: &EmbeddingConfig) -> Result<Self> {
            let model_name = normalize_local_model(&config.model);
            let model = to_fastembed_model(&model_name)?;
            Ok(Self {
                model_name,
                model,
                batch_size: config.batch_size,
                loaded: OnceCell::new(),
            })
        }

        /// Whether the model has been loaded.
        pub fn is_loaded(&self) -> bool {
            self.loaded.initialized()
        }

        /// Drop the loaded model so the next call loads it again.
        pub fn reset(&mut self) {
            self.loaded.take();
        }

        async fn model(&self) -> Result<SharedModel> {
            self.loaded
                .get_or_try_init(|| load_model(self.model.clone(), &self.model_name))
                .await
                .cloned()
        }
    }

    async fn load_model(model: fastembed::EmbeddingModel, name: &str) -> Result<SharedModel> {
        tracing::info!("Loading local embedding model '{}'", name);
        let loaded = tokio::task::spawn_blocking(move || {
            fastembed::TextEmbedding::try_new(
                fastembed::InitOptions::new(model).with_show_download_progress(false),
            )
            .map_err(|e| anyhow!("Failed to initialize local embedding model: {}", e))
        })
        .await
        .context("Embedding model loader panicked")??;
        Ok(Arc::new(Mutex::new(loaded)))
    }

    #[async_trait]
    impl Embedder for LocalEmbedder {
        fn model_name(&self) -> &str {
            &self.model_name
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            if texts.is_empty() {
                return Ok(Vec::new());
            }

            let model = self.model().await?;
            let texts = texts.to_vec();
            let batch_size = self.batch_size;

            tokio::task::spawn_blocking(move || {
                let mut model = model
                    .lock()
                    .map_err(|_| anyhow!("Embedding model lock poisoned"))?;
                model
                    .embed(texts, Some(batch_size))
                    .map_err(|e| anyhow!("Local embedding failed: {}", e))
            })
            .await
            .context("Embedding task panicked")?
        }
    }

    fn to_fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
        match name {
            "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
            "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
            "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
            "bge-large-en-v1.5" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
            "nomic-embed-text-v1" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV1),
            "nomic-embed-text-v1.5" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV15),
            "multilingual-e5-small" => Ok(fastembed::EmbeddingModel::MultilingualE5Small),
            "multilingual-e5-base" => Ok(fastembed::EmbeddingModel::MultilingualE5Base),
            "multilingual-e5-large" => Ok(fastembed::EmbeddingModel::MultilingualE5Large),
            other => bail!(
                "Unknown local embedding model: '{}'. Supported models: \
                 all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
                 nomic-embed-text-v1, nomic-embed-text-v1.5, \
                 multilingual-e5-small, multilingual-e5-base, multilingual-e5-large",
                other
            ),
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_known_models_resolve() {
            let mut config = EmbeddingConfig::default();
            config.model = "sentence-transformers/all-MiniLM-L6-v2".into();
            let embedder = LocalEmbedder::new(&config).unwrap();
            assert_eq!(embedder.model_name(), DEFAULT_LOCAL_MODEL);
            assert!(!embedder.is_loaded());
        }

        #[test]
        fn test_unknown_model_rejected() {
            let mut config = EmbeddingConfig::default();
            config.model = "word2vec".into();
            assert!(LocalEmbedder::new(&config).is_err());
        }

        #[tokio::test]
        async fn test_empty_batch_skips_model_load() {
            let mut embedder = LocalEmbedder::new(&EmbeddingConfig::default()).unwrap();
            assert!(embedder.embed_batch(&[]).await.unwrap().is_empty());
            assert!(!embedder.is_loaded());
            embedder.reset();
            assert!(!embedder.is_loaded());
        }
    }
}

// ============ OpenAI Provider ============

/// Embedding provider using an OpenAI-compatible API.
///
/// Calls `POST {url}/embeddings` with the configured model and
/// `embedding.api_key`.
pub struct OpenAIEmbedder {
    model: String,
    url: String,
    api_key: String,
    batch_size: usize,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAIEmbedder {
    /// # Errors
    ///
    /// Returns an error if no API key is configured.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = match config.api_key.clone() {
            Some(key) if !key.trim().is_empty() => key,
            _ => bail!("embedding.api_key (or OPENAI_API_KEY) is required for the openai provider"),
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model: config.model.clone(),
            url: config
                .url
                .clone()
                .unwrap_or_else(|| DEFAULT_OPENAI_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key,
            batch_size: config.batch_size.max(1),
            max_retries: config.max_retries,
            client,
        })
    }

    /// Send one request, retrying transient failures.
    async fn embed_request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(format!("{}/embeddings", self.url))
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        return parse_openai_response(&json, texts.len());
                    }

                    // Rate limited or server error: retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        tracing::warn!(
                            "Embedding API error {} (attempt {}): {}",
                            status,
                            attempt + 1,
                            body_text
                        );
                        last_err = Some(anyhow::anyhow!(
                            "Embedding API error {}: {}",
                            status,
                            body_text
                        ));
                        continue;
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    bail!("Embedding API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Embedding failed after retries")))
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.batch_size) {
            vectors.extend(self.embed_request(chunk).await?);
        }
        Ok(vectors)
    }
}

/// Parse an OpenAI embeddings response, ordering vectors by `index`.
fn parse_openai_response(json: &serde_json::Value, expected: usize) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid embedding response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());

    for (position, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow::anyhow!("Invalid embedding response: missing embedding"))?;

        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();

        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);
        indexed.push((index, vec));
    }

    if indexed.len() != expected {
        bail!(
            "Embedding API returned {} vectors for {} inputs",
            indexed.len(),
            expected
        );
    }

    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}
