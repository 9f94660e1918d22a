//! Retrieval quality evaluation against a running server.
//!
//! Reads labelled queries, calls `POST {base}/search` for each with answer
//! generation off, and reports per-bucket recall@k and mean reciprocal rank.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct EvalQuery {
    pub query: String,
    #[serde(default)]
    pub expected_ids: ExpectedIds,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ExpectedIds {
    pub tickets: Vec<String>,
    pub faqs: Vec<String>,
    pub runbooks: Vec<String>,
}

/// One value per result bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BucketScores {
    pub tickets: f64,
    pub faqs: f64,
    pub runbooks: f64,
}

impl BucketScores {
    fn add(&mut self, other: BucketScores) {
        self.tickets += other.tickets;
        self.faqs += other.faqs;
        self.runbooks += other.runbooks;
    }

    fn scale(self, n: usize) -> BucketScores {
        let n = n as f64;
        BucketScores {
            tickets: self.tickets / n,
            faqs: self.faqs / n,
            runbooks: self.runbooks / n,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EvalReport {
    pub k: usize,
    pub queries: usize,
    pub recall: BucketScores,
    pub mrr: BucketScores,
}

impl EvalReport {
    pub fn print(&self) {
        println!("Recall@{} (mean over {} queries):", self.k, self.queries);
        print_scores(&self.recall);
        println!("MRR (mean):");
        print_scores(&self.mrr);
    }
}

fn print_scores(scores: &BucketScores) {
    println!("  tickets:  {:.3}", scores.tickets);
    println!("  faqs:     {:.3}", scores.faqs);
    println!("  runbooks: {:.3}", scores.runbooks);
}

/// Fraction of `expected` found in the first `k` of `returned`; 1.0 when
/// nothing is expected.
pub fn recall_at_k(returned: &[String], expected: &[String], k: usize) -> f64 {
    if expected.is_empty() {
        return 1.0;
    }
    let top = &returned[..returned.len().min(k)];
    let hits = expected.iter().filter(|id| top.contains(id)).count();
    hits as f64 / expected.len() as f64
}

/// 1/rank of the first returned id that is expected; 1.0 when nothing is
/// expected, 0.0 when none is found.
pub fn reciprocal_rank(returned: &[String], expected: &[String]) -> f64 {
    if expected.is_empty() {
        return 1.0;
    }
    returned
        .iter()
        .position(|id| expected.contains(id))
        .map(|i| 1.0 / (i + 1) as f64)
        .unwrap_or(0.0)
}

pub fn load_queries(path: &Path) -> Result<Vec<EvalQuery>> {
    if !path.exists() {
        bail!("Missing evaluation queries file: {}", path.display());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let queries: Vec<EvalQuery> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    if queries.is_empty() {
        bail!("No evaluation queries in {}", path.display());
    }
    Ok(queries)
}

fn bucket_ids(response: &Value, bucket: &str) -> Vec<String> {
    response
        .get(bucket)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|i| i.get("id").and_then(Value::as_str).map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// Recall@k and reciprocal rank for one `/search` response.
pub fn score_response(expected: &ExpectedIds, response: &Value, k: usize) -> (BucketScores, BucketScores) {
    let tickets = bucket_ids(response, "tickets");
    let faqs = bucket_ids(response, "faqs");
    let runbooks = bucket_ids(response, "runbooks");

    let recall = BucketScores {
        tickets: recall_at_k(&tickets, &expected.tickets, k),
        faqs: recall_at_k(&faqs, &expected.faqs, k),
        runbooks: recall_at_k(&runbooks, &expected.runbooks, k),
    };
    let rr = BucketScores {
        tickets: reciprocal_rank(&tickets, &expected.tickets),
        faqs: reciprocal_rank(&faqs, &expected.faqs),
        runbooks: reciprocal_rank(&runbooks, &expected.runbooks),
    };
    (recall, rr)
}

pub async fn run_evaluation(base_url: &str, k: usize, queries_path: &Path) -> Result<EvalReport> {
    let queries = load_queries(queries_path)?;
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()?;
    let url = format!("{}/search", base_url.trim_end_matches('/'));

    let mut recall = BucketScores::default();
    let mut mrr = BucketScores::default();

    for entry in &queries {
        let resp = client
            .post(&url)
            .json(&json!({ "query": entry.query, "top_k": k, "generate_answer": false }))
            .send()
            .await
            .with_context(|| format!("Search request failed for '{}'", entry.query))?
            .error_for_status()
            .with_context(|| format!("Search returned an error for '{}'", entry.query))?;
        let body: Value = resp.json().await?;

        let (r, rr) = score_response(&entry.expected_ids, &body, k);
        recall.add(r);
        mrr.add(rr);
    }

    Ok(EvalReport {
        k,
        queries: queries.len(),
        recall: recall.scale(queries.len()),
        mrr: mrr.scale(queries.len()),
    })
}
