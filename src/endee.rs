//! Endee vector database client.
//!
//! [`EndeeClient`] implements [`VectorStore`] over Endee's JSON HTTP API.
//! [`StoreHandle`] owns the lazily-connected client shared by request
//! handlers: the first caller probes the embedding dimension, makes sure the
//! index exists, and caches the client for every later call.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;

use support_copilot_core::embedding::probe_dimension;
use support_copilot_core::store::{IndexSpec, QueryHit, VectorQuery, VectorRecord};
use support_copilot_core::{Embedder, VectorStore};

use crate::config::EndeeConfig;

/// HTTP client bound to a single Endee index.
pub struct EndeeClient {
    base_url: String,
    index_name: String,
    auth_token: Option<String>,
    client: reqwest::Client,
}

impl EndeeClient {
    pub fn new(config: &EndeeConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build Endee HTTP client")?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            index_name: config.index_name.clone(),
            auth_token: config.auth_token.clone(),
            client,
        })
    }

    /// Build a client and make sure its index exists, sized by probing the
    /// embedder.
    pub async fn connect(config: &EndeeConfig, embedder: &dyn Embedder) -> Result<Self> {
        let client = Self::new(config)?;
        let dimension = probe_dimension(embedder)
            .await
            .context("Failed to infer embedding dimension")?;

        let created = client
            .ensure_index(&IndexSpec {
                name: config.index_name.clone(),
                dimension,
                space_type: config.space_type.clone(),
                precision: config.precision.clone(),
            })
            .await?;

        if created {
            tracing::info!(
                "Created Endee index '{}' (dim={}, space={}, precision={})",
                config.index_name,
                dimension,
                config.space_type,
                config.precision
            );
        } else {
            tracing::info!("Using existing Endee index '{}'", config.index_name);
        }

        Ok(client)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}/{}", self.base_url, path));
        match self.auth_token {
            Some(ref token) => builder.header("Authorization", token),
            None => builder,
        }
    }

    fn index_path(&self, suffix: &str) -> String {
        format!("index/{}/{}", self.index_name, suffix)
    }

    async fn list_indexes(&self) -> Result<Vec<String>> {
        let resp = self
            .request(Method::GET, "index/list")
            .send()
            .await
            .context("Endee list indexes request failed")?;
        let body = read_json(resp, "list indexes").await?;
        Ok(index_names(&body))
    }
}

/// Read a JSON body, turning non-2xx statuses into errors.
async fn read_json(resp: reqwest::Response, action: &str) -> Result<Value> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        bail!("Endee {} failed with {}: {}", action, status, body);
    }
    let text = resp.text().await?;
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&text).with_context(|| format!("Invalid JSON from Endee {}", action))
}

/// Index names from a list response: `{"indexes":[...]}` or a bare array,
/// entries either strings or objects with a `name`.
fn index_names(body: &Value) -> Vec<String> {
    let entries = body
        .get("indexes")
        .and_then(Value::as_array)
        .or_else(|| body.as_array());

    entries
        .map(|entries| {
            entries
                .iter()
                .filter_map(|e| {
                    e.as_str()
                        .or_else(|| e.get("name").and_then(Value::as_str))
                        .map(str::to_string)
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Hits from a search response: a bare array or `{"results":[...]}`.
fn parse_hits(body: Value) -> Result<Vec<QueryHit>> {
    let hits = match body {
        Value::Null => return Ok(Vec::new()),
        Value::Array(hits) => Value::Array(hits),
        Value::Object(mut map) => map
            .remove("results")
            .ok_or_else(|| anyhow::anyhow!("Endee search response has no results"))?,
        other => bail!("Unexpected Endee search response: {}", other),
    };
    serde_json::from_value(hits).context("Malformed Endee search hit")
}

#[async_trait]
impl VectorStore for EndeeClient {
    fn index_name(&self) -> &str {
        &self.index_name
    }

    async fn ensure_index(&self, spec: &IndexSpec) -> Result<bool> {
        if self.list_indexes().await?.iter().any(|n| n == &spec.name) {
            return Ok(false);
        }

        let resp = self
            .request(Method::POST, "index/create")
            .json(&json!({
                "index_name": spec.name,
                "dim": spec.dimension,
                "space_type": spec.space_type,
                "precision": spec.precision,
            }))
            .send()
            .await
            .context("Endee create index request failed")?;

        // Another process may have created it between list and create.
        if resp.status() == StatusCode::CONFLICT {
            return Ok(false);
        }
        read_json(resp, "create index").await?;
        Ok(true)
    }

    async fn upsert(&self, records: &[VectorRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let resp = self
            .request(Method::POST, &self.index_path("vector/insert"))
            .json(records)
            .send()
            .await
            .context("Endee insert request failed")?;
        read_json(resp, "insert").await?;
        Ok(())
    }

    async fn query(&self, query: &VectorQuery) -> Result<Vec<QueryHit>> {
        let mut body = json!({
            "vector": query.vector,
            "k": query.top_k,
            "ef": query.ef,
            "include_vectors": false,
        });
        if !query.filters.is_empty() {
            let clauses: Vec<Value> = query.filters.iter().map(|c| c.to_json()).collect();
            body["filter"] = Value::Array(clauses);
        }

        let resp = self
            .request(Method::POST, &self.index_path("search"))
            .json(&body)
            .send()
            .await
            .context("Endee search request failed")?;
        parse_hits(read_json(resp, "search").await?)
    }

    async fn describe(&self) -> Result<Value> {
        let resp = self
            .request(Method::GET, &self.index_path("info"))
            .send()
            .await
            .context("Endee index info request failed")?;
        match read_json(resp, "index info").await? {
            Value::Null => Ok(json!({})),
            other => Ok(other),
        }
    }
}

/// Lazily-connected, shared vector store.
///
/// Connection happens at most once per successful attempt; concurrent first
/// callers wait on the same initialization. A failed connection is returned
/// to the caller and retried by the next one.
pub struct StoreHandle {
    endee: Option<EndeeConfig>,
    embedder: Option<Arc<dyn Embedder>>,
    cell: OnceCell<Arc<dyn VectorStore>>,
}

impl StoreHandle {
    /// A handle that connects to Endee on first use.
    pub fn lazy(endee: EndeeConfig, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            endee: Some(endee),
            embedder: Some(embedder),
            cell: OnceCell::new(),
        }
    }

    /// A handle around an already-connected store.
    pub fn ready(store: Arc<dyn VectorStore>) -> Self {
        Self {
            endee: None,
            embedder: None,
            cell: OnceCell::new_with(Some(store)),
        }
    }

    pub async fn get(&self) -> Result<Arc<dyn VectorStore>> {
        self.cell.get_or_try_init(|| self.connect()).await.cloned()
    }

    async fn connect(&self) -> Result<Arc<dyn VectorStore>> {
        match (&self.endee, &self.embedder) {
            (Some(endee), Some(embedder)) => {
                let client = EndeeClient::connect(endee, embedder.as_ref()).await?;
                Ok(Arc::new(client))
            }
            _ => bail!("Vector store is not configured"),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.cell.initialized()
    }

    /// Drop the cached client so the next call reconnects.
    pub fn reset(&mut self) {
        self.cell.take();
    }
}
