//! Ingestion pipeline.
//!
//! Two entry points share the same embed → upsert flow:
//!
//! - [`ingest_all`] loads the sample sources from the data directory
//!   (`tickets.csv`, `faqs.json`, `runbooks.json`, each optional) and writes
//!   them in one batch.
//! - [`ingest_items`] handles `POST /ingest` payloads and rejects batches
//!   larger than the configured maximum before touching the embedder or the
//!   store.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

use support_copilot_core::models::{lenient_priority, parse_priority, parse_resolved};
use support_copilot_core::store::upsert_support_items;
use support_copilot_core::{Embedder, SupportItem, SupportItemType, VectorStore};

use crate::endee::StoreHandle;

pub const TICKETS_FILE: &str = "tickets.csv";
pub const FAQS_FILE: &str = "faqs.json";
pub const RUNBOOKS_FILE: &str = "runbooks.json";

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Batch of {size} items exceeds the maximum of {max}")]
    BatchTooLarge { size: usize, max: usize },
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

/// A single item submitted through `POST /ingest`.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestItemRequest {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: SupportItemType,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub product: Option<String>,
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub resolved: Option<bool>,
    #[serde(default, deserialize_with = "lenient_priority")]
    pub priority: Option<i64>,
}

impl From<IngestItemRequest> for SupportItem {
    fn from(req: IngestItemRequest) -> Self {
        SupportItem::new(req.id, req.kind, req.title, req.body)
            .with_product(req.product)
            .with_severity(req.severity)
            .with_tags(req.tags.unwrap_or_default())
            .with_url(req.url)
            .with_resolved(req.resolved)
            .with_priority(req.priority)
    }
}

#[derive(Debug, Deserialize)]
struct TicketRow {
    id: String,
    title: String,
    description: String,
    #[serde(default)]
    product: Option<String>,
    #[serde(default)]
    severity: Option<String>,
    #[serde(default)]
    tags: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    resolved: Option<String>,
    #[serde(default)]
    priority: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FaqEntry {
    id: String,
    question: String,
    answer: String,
    #[serde(default)]
    product: Option<String>,
    #[serde(default)]
    tags: Option<Vec<String>>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default, deserialize_with = "lenient_priority")]
    priority: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RunbookEntry {
    id: String,
    title: String,
    #[serde(default)]
    steps: Vec<String>,
    #[serde(default)]
    product: Option<String>,
    #[serde(default)]
    severity: Option<String>,
    #[serde(default)]
    tags: Option<Vec<String>>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default, deserialize_with = "lenient_priority")]
    priority: Option<i64>,
}

/// Load tickets from a CSV file with a header row. Tags are comma-separated
/// within their column.
pub fn load_tickets(path: &Path) -> Result<Vec<SupportItem>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;

    let mut items = Vec::new();
    for (line, row) in reader.deserialize::<TicketRow>().enumerate() {
        let row = row.with_context(|| format!("{}: bad ticket row {}", path.display(), line + 1))?;
        let tags = row
            .tags
            .as_deref()
            .unwrap_or("")
            .split(',')
            .map(str::to_string)
            .collect();

        items.push(
            SupportItem::new(row.id, SupportItemType::Ticket, row.title, row.description)
                .with_product(row.product)
                .with_severity(row.severity)
                .with_tags(tags)
                .with_url(row.url)
                .with_resolved(row.resolved.as_deref().and_then(parse_resolved))
                .with_priority(row.priority.as_deref().and_then(parse_priority)),
        );
    }
    Ok(items)
}

pub fn load_faqs(path: &Path) -> Result<Vec<SupportItem>> {
    let entries: Vec<FaqEntry> = read_json(path)?;
    Ok(entries
        .into_iter()
        .map(|e| {
            SupportItem::new(e.id, SupportItemType::Faq, e.question, e.answer)
                .with_product(e.product)
                .with_tags(e.tags.unwrap_or_default())
                .with_url(e.url)
                .with_priority(e.priority)
        })
        .collect())
}

/// Load runbooks; the body is the steps joined by newlines.
pub fn load_runbooks(path: &Path) -> Result<Vec<SupportItem>> {
    let entries: Vec<RunbookEntry> = read_json(path)?;
    Ok(entries
        .into_iter()
        .map(|e| {
            SupportItem::new(e.id, SupportItemType::Runbook, e.title, e.steps.join("\n"))
                .with_product(e.product)
                .with_severity(e.severity)
                .with_tags(e.tags.unwrap_or_default())
                .with_url(e.url)
                .with_priority(e.priority)
        })
        .collect())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Load every source present under `data_dir`. Missing files are skipped.
pub fn collect_items(data_dir: &Path) -> Result<Vec<SupportItem>> {
    let mut items = Vec::new();

    let tickets = data_dir.join(TICKETS_FILE);
    if tickets.exists() {
        tracing::info!("Loading tickets from {}", tickets.display());
        items.extend(load_tickets(&tickets)?);
    }

    let faqs = data_dir.join(FAQS_FILE);
    if faqs.exists() {
        tracing::info!("Loading FAQs from {}", faqs.display());
        items.extend(load_faqs(&faqs)?);
    }

    let runbooks = data_dir.join(RUNBOOKS_FILE);
    if runbooks.exists() {
        tracing::info!("Loading runbooks from {}", runbooks.display());
        items.extend(load_runbooks(&runbooks)?);
    }

    Ok(items)
}

/// Embed all items in one batch and upsert them in one batch.
pub async fn embed_and_upsert(
    embedder: &dyn Embedder,
    store: &dyn VectorStore,
    items: &[SupportItem],
) -> Result<usize> {
    let texts: Vec<String> = items.iter().map(SupportItem::to_text).collect();
    let vectors = embedder
        .embed_batch(&texts)
        .await
        .context("Failed to embed support items")?;
    upsert_support_items(store, items, vectors).await
}

/// Ingest every source under `data_dir`. Returns the number of items
/// written; zero when no sources exist.
pub async fn ingest_all(
    data_dir: &Path,
    embedder: &dyn Embedder,
    store: &StoreHandle,
) -> Result<usize> {
    let items = collect_items(data_dir)?;
    if items.is_empty() {
        tracing::warn!(
            "No data found to ingest. Ensure {}, {}, or {} exist in {}.",
            TICKETS_FILE,
            FAQS_FILE,
            RUNBOOKS_FILE,
            data_dir.display()
        );
        return Ok(0);
    }

    let store = store.get().await?;
    let count = embed_and_upsert(embedder, store.as_ref(), &items).await?;
    tracing::info!("Ingested {} support items into '{}'", count, store.index_name());
    Ok(count)
}

/// Ingest a request-scoped batch.
pub async fn ingest_items(
    requests: Vec<IngestItemRequest>,
    max_batch_size: usize,
    embedder: &dyn Embedder,
    store: &StoreHandle,
) -> Result<usize, IngestError> {
    if requests.len() > max_batch_size {
        return Err(IngestError::BatchTooLarge {
            size: requests.len(),
            max: max_batch_size,
        });
    }
    if requests.is_empty() {
        return Ok(0);
    }

    let items: Vec<SupportItem> = requests.into_iter().map(SupportItem::from).collect();
    let store = store.get().await?;
    Ok(embed_and_upsert(embedder, store.as_ref(), &items).await?)
}
