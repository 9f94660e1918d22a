//! Retrieval pipeline: request → embedding → filtered vector query →
//! typed, bucketed results.
//!
//! The pipeline operates entirely through the [`Embedder`] and
//! [`VectorStore`] traits, with no configuration or transport dependencies.
//! The calling application validates the request, supplies
//! [`RetrievalParams`], and maps failures to its own error surface.
//!
//! # Algorithm
//!
//! 1. Clamp `top_k` to `max_top_k`.
//! 2. Embed the query text.
//! 3. Translate filters: `product` and `severity` → `$eq`, `types` → `$in`.
//! 4. Query the store for `top_k + headroom` hits (at most `candidate_cap`)
//!    with a fixed `ef`.
//! 5. Normalize each hit into a [`SearchResultItem`], applying defaults for
//!    missing metadata.
//! 6. Partition into ticket / FAQ / runbook buckets, keeping store order,
//!    and truncate each bucket to `top_k`.
//!
//! Any embedding or store error aborts the whole request; there are no
//! partial results.

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::embedding::Embedder;
use crate::models::{SearchFilters, SearchRequest, SearchResultItem, SupportItemType};
use crate::store::{FilterClause, QueryHit, VectorQuery, VectorStore};

/// Title used when a hit carries neither `title` nor `question`.
pub const UNTITLED: &str = "Untitled";

/// Retrieval tuning parameters, decoupled from application config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievalParams {
    /// Server-side cap on results per bucket.
    pub max_top_k: usize,
    /// Extra candidates requested beyond `top_k`, so per-type buckets still
    /// fill after partitioning.
    pub headroom: usize,
    /// Upper bound on candidates requested from the store.
    pub candidate_cap: usize,
    /// Search effort passed to the store.
    pub ef: u32,
}

impl Default for RetrievalParams {
    fn default() -> Self {
        Self {
            max_top_k: 50,
            headroom: 5,
            candidate_cap: 50,
            ef: 128,
        }
    }
}

impl RetrievalParams {
    /// Clamp a requested `top_k` into `1..=max_top_k`.
    pub fn clamp_top_k(&self, requested: usize) -> usize {
        requested.clamp(1, self.max_top_k.max(1))
    }

    /// Number of hits to request from the store for a clamped `top_k`.
    pub fn candidate_count(&self, top_k: usize) -> usize {
        (top_k + self.headroom).min(self.candidate_cap)
    }
}

/// Search results partitioned by item type.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BucketedResults {
    /// The clamped `top_k` the buckets were truncated to.
    pub top_k: usize,
    /// Every normalized hit in store order, before bucketing.
    pub ranked: Vec<SearchResultItem>,
    pub tickets: Vec<SearchResultItem>,
    pub faqs: Vec<SearchResultItem>,
    pub runbooks: Vec<SearchResultItem>,
}

/// Run a semantic search against a [`VectorStore`].
///
/// This is the function every frontend (HTTP, CLI) delegates to.
pub async fn search(
    embedder: &dyn Embedder,
    store: &dyn VectorStore,
    req: &SearchRequest,
    params: &RetrievalParams,
) -> Result<BucketedResults> {
    let top_k = params.clamp_top_k(req.top_k);

    let query_vector = embedder
        .embed(&req.query)
        .await
        .context("Failed to embed search query")?;

    let filters = build_filter_clauses(req.filters.as_ref());

    let query = VectorQuery {
        vector: query_vector,
        top_k: params.candidate_count(top_k),
        filters,
        ef: params.ef,
    };

    let hits = store
        .query(&query)
        .await
        .with_context(|| format!("Vector query against '{}' failed", store.index_name()))?;

    tracing::debug!(
        "Query returned {} hits (requested {}, top_k {})",
        hits.len(),
        query.top_k,
        top_k
    );

    let results: Vec<SearchResultItem> = hits.iter().map(hit_to_result).collect();
    Ok(bucket_results(results, top_k))
}

/// Translate declarative filters into store filter clauses.
///
/// Blank strings and empty type lists are ignored. Priority bounds are
/// accepted by the request schema but have no store clause.
pub fn build_filter_clauses(filters: Option<&SearchFilters>) -> Vec<FilterClause> {
    let Some(f) = filters else {
        return Vec::new();
    };

    let mut clauses = Vec::new();

    if let Some(product) = f.product.as_deref().filter(|p| !p.trim().is_empty()) {
        clauses.push(FilterClause::eq("product", product));
    }
    if let Some(severity) = f.severity.as_deref().filter(|s| !s.trim().is_empty()) {
        clauses.push(FilterClause::eq("severity", severity));
    }
    if let Some(types) = f.types.as_ref().filter(|t| !t.is_empty()) {
        clauses.push(FilterClause::one_of(
            "type",
            types.iter().map(|t| t.as_str()),
        ));
    }

    if f.priority_min.is_some() || f.priority_max.is_some() {
        tracing::debug!(
            "Priority range filter ({:?}..={:?}) is not applied to the vector query",
            f.priority_min,
            f.priority_max
        );
    }

    clauses
}

/// Normalize a raw store hit.
///
/// Defaults: `type` → ticket, `title` → `question` → [`UNTITLED`],
/// `snippet` → empty, `score` → 0.0.
pub fn hit_to_result(hit: &QueryHit) -> SearchResultItem {
    let meta = hit.meta_object();

    let kind = match meta.get("type").and_then(Value::as_str) {
        None => SupportItemType::Ticket,
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!("Hit '{}' has unknown type '{}'; treating as ticket", hit.id, raw);
            SupportItemType::Ticket
        }),
    };

    let title = non_empty_str(&meta, "title")
        .or_else(|| non_empty_str(&meta, "question"))
        .unwrap_or(UNTITLED)
        .to_string();

    SearchResultItem {
        id: hit.id.clone(),
        kind,
        title,
        snippet: non_empty_str(&meta, "snippet").unwrap_or_default().to_string(),
        product: non_empty_str(&meta, "product").map(str::to_string),
        severity: non_empty_str(&meta, "severity").map(str::to_string),
        score: hit.similarity.unwrap_or(0.0),
        url: non_empty_str(&meta, "url").map(str::to_string),
        resolved: meta.get("resolved").and_then(Value::as_bool),
    }
}

/// Partition results by type, keeping relative order, and truncate each
/// bucket to `top_k`.
pub fn bucket_results(results: Vec<SearchResultItem>, top_k: usize) -> BucketedResults {
    let mut buckets = BucketedResults {
        top_k,
        ..Default::default()
    };

    for item in &results {
        let bucket = match item.kind {
            SupportItemType::Ticket => &mut buckets.tickets,
            SupportItemType::Faq => &mut buckets.faqs,
            SupportItemType::Runbook => &mut buckets.runbooks,
        };
        if bucket.len() < top_k {
            bucket.push(item.clone());
        }
    }

    buckets.ranked = results;
    buckets
}

fn non_empty_str<'a>(meta: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    meta.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryStore;
    use crate::store::{IndexSpec, VectorRecord};
    use anyhow::bail;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    /// Embeds every text to the same vector.
    struct ConstEmbedder(Vec<f32>);

    #[async_trait]
    impl Embedder for ConstEmbedder {
        fn model_name(&self) -> &str {
            "const"
        }
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| self.0.clone()).collect())
        }
    }

    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        fn model_name(&self) -> &str {
            "failing"
        }
        async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            bail!("model not loaded")
        }
    }

    /// Returns canned hits and records the last query it received.
    struct CannedStore {
        hits: Vec<QueryHit>,
        last_query: Mutex<Option<VectorQuery>>,
        fail: bool,
    }

    impl CannedStore {
        fn new(hits: Vec<QueryHit>) -> Self {
            Self {
                hits,
                last_query: Mutex::new(None),
                fail: false,
            }
        }
    }

    #[async_trait]
    impl VectorStore for CannedStore {
        fn index_name(&self) -> &str {
            "canned"
        }
        async fn ensure_index(&self, _spec: &IndexSpec) -> Result<bool> {
            Ok(false)
        }
        async fn upsert(&self, _records: &[VectorRecord]) -> Result<()> {
            Ok(())
        }
        async fn query(&self, query: &VectorQuery) -> Result<Vec<QueryHit>> {
            *self.last_query.lock().unwrap() = Some(query.clone());
            if self.fail {
                bail!("connection refused");
            }
            Ok(self.hits.clone())
        }
        async fn describe(&self) -> Result<Value> {
            Ok(json!({}))
        }
    }

    fn hit(id: &str, kind: &str, score: f64) -> QueryHit {
        QueryHit {
            id: id.into(),
            similarity: Some(score),
            meta: Some(json!({ "type": kind, "title": format!("title {}", id) })),
        }
    }

    #[test]
    fn test_clamp_top_k() {
        let params = RetrievalParams::default();
        assert_eq!(params.clamp_top_k(5), 5);
        assert_eq!(params.clamp_top_k(500), 50);
        assert_eq!(params.clamp_top_k(0), 1);

        let small = RetrievalParams {
            max_top_k: 3,
            ..Default::default()
        };
        assert_eq!(small.clamp_top_k(10), 3);
    }

    #[test]
    fn test_candidate_count_has_headroom_and_cap() {
        let params = RetrievalParams::default();
        assert_eq!(params.candidate_count(10), 15);
        assert_eq!(params.candidate_count(45), 50);
        assert_eq!(params.candidate_count(50), 50);
    }

    #[test]
    fn test_filter_clauses() {
        let filters = SearchFilters {
            product: Some("billing-api".into()),
            severity: Some("P1".into()),
            types: Some(vec![SupportItemType::Faq, SupportItemType::Runbook]),
            priority_min: Some(1),
            priority_max: Some(10),
        };
        let clauses = build_filter_clauses(Some(&filters));
        let wire: Vec<Value> = clauses.iter().map(FilterClause::to_json).collect();
        assert_eq!(
            wire,
            vec![
                json!({ "product": { "$eq": "billing-api" } }),
                json!({ "severity": { "$eq": "P1" } }),
                json!({ "type": { "$in": ["faq", "runbook"] } }),
            ]
        );
    }

    #[test]
    fn test_filter_clauses_skip_blank_values() {
        let filters = SearchFilters {
            product: Some(String::new()),
            types: Some(vec![]),
            ..Default::default()
        };
        assert!(build_filter_clauses(Some(&filters)).is_empty());
        assert!(build_filter_clauses(None).is_empty());
    }

    #[test]
    fn test_hit_missing_type_is_ticket() {
        let raw = QueryHit {
            id: "X1".into(),
            similarity: Some(0.4),
            meta: Some(json!({ "title": "No type here" })),
        };
        assert_eq!(hit_to_result(&raw).kind, SupportItemType::Ticket);
    }

    #[test]
    fn test_hit_title_fallbacks() {
        let question = QueryHit {
            id: "F1".into(),
            similarity: None,
            meta: Some(json!({ "type": "faq", "title": "", "question": "How do I reset?" })),
        };
        assert_eq!(hit_to_result(&question).title, "How do I reset?");

        let bare = QueryHit {
            id: "F2".into(),
            similarity: None,
            meta: None,
        };
        let result = hit_to_result(&bare);
        assert_eq!(result.title, UNTITLED);
        assert_eq!(result.snippet, "");
        assert_eq!(result.score, 0.0);
        assert_eq!(result.kind, SupportItemType::Ticket);
    }

    #[test]
    fn test_hit_unknown_type_falls_back_to_ticket() {
        let raw = QueryHit {
            id: "I1".into(),
            similarity: Some(0.1),
            meta: Some(json!({ "type": "incident" })),
        };
        assert_eq!(hit_to_result(&raw).kind, SupportItemType::Ticket);
    }

    #[test]
    fn test_hit_carries_display_fields() {
        let raw = QueryHit {
            id: "TCK-1001".into(),
            similarity: Some(0.92),
            meta: Some(json!({
                "type": "ticket",
                "title": "Intermittent 504s on payments API",
                "snippet": "504 Gateway Timeout on /v1/payments for EU customers.",
                "product": "billing-api",
                "severity": "P1",
                "url": null,
                "resolved": true
            })),
        };
        let result = hit_to_result(&raw);
        assert_eq!(result.product.as_deref(), Some("billing-api"));
        assert_eq!(result.severity.as_deref(), Some("P1"));
        assert_eq!(result.url, None);
        assert_eq!(result.resolved, Some(true));
        assert!((result.score - 0.92).abs() < 1e-9);
    }

    #[test]
    fn test_bucket_results_preserves_order_and_truncates() {
        let results: Vec<SearchResultItem> = [
            hit("T1", "ticket", 0.9),
            hit("F1", "faq", 0.8),
            hit("T2", "ticket", 0.7),
            hit("T3", "ticket", 0.6),
            hit("R1", "runbook", 0.5),
        ]
        .iter()
        .map(hit_to_result)
        .collect();

        let buckets = bucket_results(results, 2);
        let ids = |items: &[SearchResultItem]| -> Vec<String> {
            items.iter().map(|i| i.id.clone()).collect()
        };
        assert_eq!(ids(&buckets.tickets), vec!["T1", "T2"]);
        assert_eq!(ids(&buckets.faqs), vec!["F1"]);
        assert_eq!(ids(&buckets.runbooks), vec!["R1"]);
        assert_eq!(buckets.ranked.len(), 5);
    }

    #[tokio::test]
    async fn test_search_shapes_store_query() {
        let store = CannedStore::new(vec![hit("TCK-1001", "ticket", 0.92)]);
        let mut req = SearchRequest::new("504 errors on payments");
        req.top_k = 5;
        req.filters = Some(SearchFilters {
            product: Some("billing-api".into()),
            ..Default::default()
        });

        let results = search(
            &ConstEmbedder(vec![0.1, 0.2, 0.3]),
            &store,
            &req,
            &RetrievalParams::default(),
        )
        .await
        .unwrap();

        assert_eq!(results.tickets.len(), 1);
        assert_eq!(results.tickets[0].id, "TCK-1001");

        let sent = store.last_query.lock().unwrap().clone().unwrap();
        assert_eq!(sent.top_k, 10);
        assert_eq!(sent.ef, 128);
        assert_eq!(sent.vector, vec![0.1, 0.2, 0.3]);
        assert_eq!(sent.filters, vec![FilterClause::eq("product", "billing-api")]);
    }

    #[tokio::test]
    async fn test_search_clamps_oversized_top_k() {
        let hits: Vec<QueryHit> = (0..60)
            .map(|i| hit(&format!("T{}", i), "ticket", 1.0 - i as f64 / 100.0))
            .collect();
        let store = CannedStore::new(hits);
        let params = RetrievalParams {
            max_top_k: 20,
            ..Default::default()
        };
        let mut req = SearchRequest::new("anything");
        req.top_k = 999;

        let results = search(&ConstEmbedder(vec![1.0]), &store, &req, &params)
            .await
            .unwrap();

        assert_eq!(results.top_k, 20);
        assert_eq!(results.tickets.len(), 20);
        assert_eq!(store.last_query.lock().unwrap().as_ref().unwrap().top_k, 25);
    }

    #[tokio::test]
    async fn test_search_fails_whole_request_on_store_error() {
        let mut store = CannedStore::new(vec![hit("T1", "ticket", 0.9)]);
        store.fail = true;
        let result = search(
            &ConstEmbedder(vec![1.0]),
            &store,
            &SearchRequest::new("q"),
            &RetrievalParams::default(),
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_search_fails_on_embedding_error_without_querying() {
        let store = CannedStore::new(vec![]);
        let result = search(
            &FailingEmbedder,
            &store,
            &SearchRequest::new("q"),
            &RetrievalParams::default(),
        )
        .await;
        assert!(result.is_err());
        assert!(store.last_query.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_search_against_memory_store() {
        let store = InMemoryStore::new("support_knowledge");
        store
            .ensure_index(&IndexSpec {
                name: "support_knowledge".into(),
                dimension: 2,
                space_type: "cosine".into(),
                precision: "int8d".into(),
            })
            .await
            .unwrap();
        store
            .upsert(&[
                VectorRecord {
                    id: "F1".into(),
                    vector: vec![1.0, 0.0],
                    meta: json!({ "type": "faq", "question": "Reset MFA?" }),
                    filter: json!({ "type": "faq" }),
                },
                VectorRecord {
                    id: "T1".into(),
                    vector: vec![0.9, 0.1],
                    meta: json!({ "type": "ticket", "title": "MFA loop" }),
                    filter: json!({ "type": "ticket" }),
                },
            ])
            .await
            .unwrap();

        let mut req = SearchRequest::new("mfa");
        req.filters = Some(SearchFilters {
            types: Some(vec![SupportItemType::Faq]),
            ..Default::default()
        });
        let results = search(
            &ConstEmbedder(vec![1.0, 0.0]),
            &store,
            &req,
            &RetrievalParams::default(),
        )
        .await
        .unwrap();

        assert!(results.tickets.is_empty());
        assert_eq!(results.faqs.len(), 1);
        assert_eq!(results.faqs[0].title, "Reset MFA?");
    }
}
