//! In-memory [`VectorStore`] implementation for testing and local runs.
//!
//! Uses a `HashMap` behind `std::sync::RwLock` for thread safety. Queries are
//! brute-force cosine similarity over every stored vector whose filter
//! payload satisfies all clauses.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::embedding::cosine_similarity;

use super::{IndexSpec, QueryHit, VectorQuery, VectorRecord, VectorStore};

/// In-memory store bound to a single index name.
pub struct InMemoryStore {
    index_name: String,
    spec: RwLock<Option<IndexSpec>>,
    records: RwLock<HashMap<String, VectorRecord>>,
    upsert_calls: AtomicUsize,
}

impl InMemoryStore {
    pub fn new(index_name: impl Into<String>) -> Self {
        Self {
            index_name: index_name.into(),
            spec: RwLock::new(None),
            records: RwLock::new(HashMap::new()),
            upsert_calls: AtomicUsize::new(0),
        }
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of `upsert` calls that reached the store.
    pub fn upsert_calls(&self) -> usize {
        self.upsert_calls.load(Ordering::Relaxed)
    }

    /// The spec the index was created with, if it exists.
    pub fn index_spec(&self) -> Option<IndexSpec> {
        self.spec.read().ok().and_then(|s| s.clone())
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("in-memory store lock poisoned")
}

#[async_trait]
impl VectorStore for InMemoryStore {
    fn index_name(&self) -> &str {
        &self.index_name
    }

    async fn ensure_index(&self, spec: &IndexSpec) -> Result<bool> {
        if spec.name != self.index_name {
            bail!(
                "store is bound to index '{}', not '{}'",
                self.index_name,
                spec.name
            );
        }
        let mut current = self.spec.write().map_err(poisoned)?;
        if current.is_some() {
            return Ok(false);
        }
        *current = Some(spec.clone());
        Ok(true)
    }

    async fn upsert(&self, records: &[VectorRecord]) -> Result<()> {
        let dimension = self
            .spec
            .read()
            .map_err(poisoned)?
            .as_ref()
            .map(|s| s.dimension)
            .ok_or_else(|| anyhow!("index '{}' does not exist", self.index_name))?;

        if let Some(bad) = records.iter().find(|r| r.vector.len() != dimension) {
            bail!(
                "vector for '{}' has dimension {}, index expects {}",
                bad.id,
                bad.vector.len(),
                dimension
            );
        }

        let mut stored = self.records.write().map_err(poisoned)?;
        for record in records {
            stored.insert(record.id.clone(), record.clone());
        }
        self.upsert_calls.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn query(&self, query: &VectorQuery) -> Result<Vec<QueryHit>> {
        if self.spec.read().map_err(poisoned)?.is_none() {
            bail!("index '{}' does not exist", self.index_name);
        }

        let stored = self.records.read().map_err(poisoned)?;
        let mut hits: Vec<QueryHit> = stored
            .values()
            .filter(|r| query.filters.iter().all(|c| c.matches(&r.filter)))
            .map(|r| QueryHit {
                id: r.id.clone(),
                similarity: Some(cosine_similarity(&query.vector, &r.vector) as f64),
                meta: Some(r.meta.clone()),
            })
            .collect();

        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.id.cmp(&b.id))
        });
        hits.truncate(query.top_k);
        Ok(hits)
    }

    async fn describe(&self) -> Result<Value> {
        let spec = self
            .index_spec()
            .ok_or_else(|| anyhow!("index '{}' does not exist", self.index_name))?;
        Ok(json!({
            "name": spec.name,
            "dimension": spec.dimension,
            "space_type": spec.space_type,
            "precision": spec.precision,
            "total_elements": self.len(),
        }))
    }
}
