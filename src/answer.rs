//! LLM answer generation.
//!
//! [`AnswerGenerator`] turns a query plus its top search results into a
//! proposed support response. It is disabled unless an LLM API key is
//! configured, and it never fails a search: timeouts and provider errors are
//! retried a bounded number of times and then degrade to "no answer".
//!
//! Each attempt runs as a spawned task that must hold the single slot of a
//! per-answer worker before calling the model. The caller waits up to the
//! configured timeout; on expiry it stops waiting but the task keeps running
//! until the provider returns, still holding the slot.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use support_copilot_core::SearchResultItem;

use crate::config::LlmConfig;

/// Results included in the prompt context.
pub const MAX_CONTEXT_ITEMS: usize = 5;

pub const SYSTEM_PROMPT: &str = "You are a senior support engineer. \
Given the user's issue and relevant historical tickets, FAQs, and runbooks, \
compose a clear, step-by-step response. \
If unsure, be honest about uncertainties.";

/// A chat-completion backend.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Returns the assistant message, or `None` if the provider produced
    /// no content.
    async fn complete(&self, system: &str, user: &str) -> Result<Option<String>>;
}

/// OpenAI-compatible `POST {base_url}/chat/completions` client.
pub struct OpenAiChat {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
    temperature: f32,
}

impl OpenAiChat {
    pub fn new(config: &LlmConfig, api_key: String) -> Result<Self> {
        Ok(Self {
            client: reqwest::Client::builder()
                .build()
                .context("Failed to build LLM HTTP client")?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
            temperature: config.temperature,
        })
    }
}

#[async_trait]
impl ChatModel for OpenAiChat {
    async fn complete(&self, system: &str, user: &str) -> Result<Option<String>> {
        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user },
            ],
            "temperature": self.temperature,
        });

        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("Failed to reach LLM endpoint")?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            bail!("LLM API error {}: {}", status, text);
        }

        let json: Value = resp.json().await.context("Invalid LLM response body")?;
        Ok(json
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(str::to_string))
    }
}

/// Retrying, time-boxed answer generation.
pub struct AnswerGenerator {
    model: Option<Arc<dyn ChatModel>>,
    timeout: Duration,
    max_attempts: u32,
    backoff: Duration,
    failures: AtomicU64,
}

impl AnswerGenerator {
    /// Build from configuration. Without an API key the generator is
    /// disabled.
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let model = match config.api_key.clone() {
            Some(key) => Some(Arc::new(OpenAiChat::new(config, key)?) as Arc<dyn ChatModel>),
            None => None,
        };
        Ok(Self::new(model, config))
    }

    /// Build around an explicit model, or a disabled generator with `None`.
    pub fn new(model: Option<Arc<dyn ChatModel>>, config: &LlmConfig) -> Self {
        Self {
            model,
            timeout: Duration::from_secs(config.timeout_secs),
            max_attempts: config.max_retries.max(1),
            backoff: Duration::from_millis(config.retry_backoff_ms),
            failures: AtomicU64::new(0),
        }
    }

    pub fn disabled() -> Self {
        Self::new(None, &LlmConfig::default())
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Whether an LLM credential is configured. Configuration does not
    /// change after load, so this is fixed at construction.
    pub fn is_enabled(&self) -> bool {
        self.model.is_some()
    }

    /// Timed-out or failed attempts since startup.
    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Generate an answer for `query` grounded in `results`.
    ///
    /// Returns `None` when disabled, when the provider returns no content,
    /// or when every attempt fails.
    pub async fn generate(&self, query: &str, results: &[SearchResultItem]) -> Option<String> {
        let model = self.model.as_ref()?;
        let prompt = Arc::new(build_user_prompt(query, &build_context(results)));
        let slot = Arc::new(Semaphore::new(1));

        for attempt in 1..=self.max_attempts {
            let model = model.clone();
            let prompt = prompt.clone();
            let slot = slot.clone();

            let handle = tokio::spawn(async move {
                let _permit = slot.acquire_owned().await?;
                model.complete(SYSTEM_PROMPT, &prompt).await
            });

            match tokio::time::timeout(self.timeout, handle).await {
                Ok(Ok(Ok(answer))) => return answer,
                Ok(Ok(Err(e))) => {
                    self.failures.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!("LLM attempt {}/{} failed: {:#}", attempt, self.max_attempts, e);
                }
                Ok(Err(e)) => {
                    self.failures.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!("LLM attempt {}/{} aborted: {}", attempt, self.max_attempts, e);
                }
                Err(_) => {
                    self.failures.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        "LLM attempt {}/{} timed out after {:?}",
                        attempt,
                        self.max_attempts,
                        self.timeout
                    );
                }
            }

            if attempt < self.max_attempts {
                tokio::time::sleep(self.backoff * attempt).await;
            }
        }

        tracing::error!(
            "LLM answer generation gave up after {} attempts",
            self.max_attempts
        );
        None
    }
}

/// Numbered context entries for the top [`MAX_CONTEXT_ITEMS`] results.
pub fn build_context(results: &[SearchResultItem]) -> String {
    results
        .iter()
        .take(MAX_CONTEXT_ITEMS)
        .enumerate()
        .map(|(i, item)| {
            format!(
                "[{}] ({}) {}\nSnippet: {}\nProduct: {} | Severity: {}\n",
                i + 1,
                item.kind.as_str().to_uppercase(),
                item.title,
                item.snippet,
                item.product.as_deref().unwrap_or("n/a"),
                item.severity.as_deref().unwrap_or("n/a"),
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn build_user_prompt(query: &str, context: &str) -> String {
    format!(
        "User issue:\n{}\n\nRelevant context:\n{}\n\n\
         Write a proposed response to the user and, if appropriate, \
         include concrete troubleshooting steps and references to the context items.",
        query, context
    )
}
