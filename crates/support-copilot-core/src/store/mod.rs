//! Vector store abstraction for Support Copilot.
//!
//! The [`VectorStore`] trait defines the operations the ingestion and
//! retrieval pipelines need from a vector index: make sure the index exists,
//! write vectors with metadata and filter payloads, and run filtered
//! nearest-neighbor queries. The Endee HTTP client in the app crate and the
//! [`memory::InMemoryStore`] used in tests both implement it.
//!
//! Implementations must be `Send + Sync` to be shared across request
//! handlers.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::models::SupportItem;

/// Errors callers may want to match on.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Number of items ({items}) and vectors ({vectors}) must match")]
    CountMismatch { items: usize, vectors: usize },
}

/// Parameters for creating an index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    pub name: String,
    pub dimension: usize,
    /// Distance metric, e.g. `"cosine"`.
    pub space_type: String,
    /// Storage precision, e.g. `"int8d"`.
    pub precision: String,
}

/// A single vector write.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VectorRecord {
    pub id: String,
    pub vector: Vec<f32>,
    pub meta: Value,
    pub filter: Value,
}

/// A predicate evaluated by the store against each record's filter payload.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterClause {
    /// `{"field": {"$eq": value}}`
    Eq { field: String, value: Value },
    /// `{"field": {"$in": [values]}}`
    In { field: String, values: Vec<Value> },
}

impl FilterClause {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn one_of<V: Into<Value>>(field: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        Self::In {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Wire representation sent to the store.
    pub fn to_json(&self) -> Value {
        let (field, predicate) = match self {
            Self::Eq { field, value } => (field, json!({ "$eq": value })),
            Self::In { field, values } => (field, json!({ "$in": values })),
        };
        let mut clause = Map::new();
        clause.insert(field.clone(), predicate);
        Value::Object(clause)
    }

    /// Evaluate the clause against a record's filter payload.
    pub fn matches(&self, filter: &Value) -> bool {
        match self {
            Self::Eq { field, value } => filter.get(field) == Some(value),
            Self::In { field, values } => filter
                .get(field)
                .map(|v| values.contains(v))
                .unwrap_or(false),
        }
    }
}

/// A nearest-neighbor query. Clauses are combined with implicit AND.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorQuery {
    pub vector: Vec<f32>,
    pub top_k: usize,
    pub filters: Vec<FilterClause>,
    /// Search effort, passed through to the store unchanged.
    pub ef: u32,
}

/// A raw hit as returned by the store, before normalization.
///
/// Every field except `id` may be missing; the retrieval pipeline applies
/// the defaults.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct QueryHit {
    pub id: String,
    #[serde(default)]
    pub similarity: Option<f64>,
    #[serde(default)]
    pub meta: Option<Value>,
}

impl QueryHit {
    /// Metadata as a JSON object.
    ///
    /// Stores may return metadata either as an object or as a JSON-encoded
    /// string; both are accepted. Anything else is treated as empty.
    pub fn meta_object(&self) -> Map<String, Value> {
        match &self.meta {
            Some(Value::Object(map)) => map.clone(),
            Some(Value::String(raw)) => match serde_json::from_str::<Value>(raw) {
                Ok(Value::Object(map)) => map,
                _ => Map::new(),
            },
            _ => Map::new(),
        }
    }
}

/// Abstract vector index backend.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`ensure_index`](VectorStore::ensure_index) | Create the index if absent |
/// | [`upsert`](VectorStore::upsert) | Batch write vectors with payloads |
/// | [`query`](VectorStore::query) | Filtered nearest-neighbor search |
/// | [`describe`](VectorStore::describe) | Index statistics |
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Name of the index this client is bound to.
    fn index_name(&self) -> &str;

    /// Create the index unless one with the same name already exists.
    ///
    /// Returns `true` if the index was created, `false` if it already existed.
    async fn ensure_index(&self, spec: &IndexSpec) -> Result<bool>;

    /// Insert or replace records by id.
    async fn upsert(&self, records: &[VectorRecord]) -> Result<()>;

    /// Return hits ordered by similarity, highest first.
    async fn query(&self, query: &VectorQuery) -> Result<Vec<QueryHit>>;

    /// Index statistics as a JSON object.
    async fn describe(&self) -> Result<Value>;
}

/// Pair support items with their vectors.
///
/// Fails with [`StoreError::CountMismatch`] when the lengths differ.
pub fn build_records(
    items: &[SupportItem],
    vectors: Vec<Vec<f32>>,
) -> std::result::Result<Vec<VectorRecord>, StoreError> {
    if items.len() != vectors.len() {
        return Err(StoreError::CountMismatch {
            items: items.len(),
            vectors: vectors.len(),
        });
    }

    Ok(items
        .iter()
        .zip(vectors)
        .map(|(item, vector)| VectorRecord {
            id: item.id.clone(),
            vector,
            meta: item.meta(),
            filter: item.filter(),
        })
        .collect())
}

/// Upsert a batch of support items into the store.
///
/// An empty batch is a no-op. Returns the number of records written.
pub async fn upsert_support_items(
    store: &dyn VectorStore,
    items: &[SupportItem],
    vectors: Vec<Vec<f32>>,
) -> Result<usize> {
    if items.is_empty() && vectors.is_empty() {
        return Ok(0);
    }

    let records = build_records(items, vectors)?;
    tracing::info!(
        "Upserting {} items into index '{}'",
        records.len(),
        store.index_name()
    );
    store.upsert(&records).await?;
    Ok(records.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SupportItemType;

    #[test]
    fn test_filter_clause_wire_format() {
        assert_eq!(
            FilterClause::eq("product", "billing-api").to_json(),
            json!({ "product": { "$eq": "billing-api" } })
        );
        assert_eq!(
            FilterClause::one_of("type", ["faq", "runbook"]).to_json(),
            json!({ "type": { "$in": ["faq", "runbook"] } })
        );
    }

    #[test]
    fn test_filter_clause_matches() {
        let payload = json!({ "type": "faq", "product": "billing-api" });
        assert!(FilterClause::eq("product", "billing-api").matches(&payload));
        assert!(!FilterClause::eq("severity", "P1").matches(&payload));
        assert!(FilterClause::one_of("type", ["faq", "runbook"]).matches(&payload));
        assert!(!FilterClause::one_of("type", ["ticket"]).matches(&payload));
    }

    #[test]
    fn test_build_records_count_mismatch() {
        let items = vec![SupportItem::new("T1", SupportItemType::Ticket, "a", "b")];
        let err = build_records(&items, vec![]).unwrap_err();
        assert_eq!(err, StoreError::CountMismatch { items: 1, vectors: 0 });
    }

    #[test]
    fn test_build_records_carries_projections() {
        let item = SupportItem::new("T1", SupportItemType::Ticket, "X", "Y")
            .with_product(Some("billing-api".into()));
        let records = build_records(std::slice::from_ref(&item), vec![vec![0.1, 0.2]]).unwrap();
        assert_eq!(records[0].id, "T1");
        assert_eq!(records[0].meta, item.meta());
        assert_eq!(records[0].filter, item.filter());
    }

    #[test]
    fn test_hit_meta_from_string() {
        let hit: QueryHit = serde_json::from_value(json!({
            "id": "F1",
            "similarity": 0.7,
            "meta": "{\"type\":\"faq\",\"question\":\"How?\"}"
        }))
        .unwrap();
        let meta = hit.meta_object();
        assert_eq!(meta["type"], "faq");
        assert_eq!(meta["question"], "How?");
    }

    #[test]
    fn test_hit_missing_fields() {
        let hit: QueryHit = serde_json::from_value(json!({ "id": "T9" })).unwrap();
        assert_eq!(hit.similarity, None);
        assert!(hit.meta_object().is_empty());
    }
}
