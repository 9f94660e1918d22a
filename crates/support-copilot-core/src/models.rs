//! Core data models used throughout Support Copilot.
//!
//! [`SupportItem`] is the unit of ingestion: a ticket, FAQ, or runbook entry.
//! It is never persisted locally; the vector store holds its vector together
//! with two JSON projections derived here:
//!
//! - **metadata** ([`SupportItem::meta`]): display fields returned with
//!   every search hit, including a short body snippet.
//! - **filter** ([`SupportItem::filter`]): the fields the store can match
//!   on (exact match, set membership, range).
//!
//! [`SearchRequest`] and [`SearchResultItem`] are the request/response
//! shapes of the retrieval pipeline.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

/// Valid priority values. Anything outside is dropped, never clamped.
pub const PRIORITY_RANGE: RangeInclusive<i64> = 0..=999;

/// Length of the body excerpt stored in metadata, in characters.
pub const SNIPPET_CHARS: usize = 200;

/// Default number of results per bucket when a request omits `top_k`.
pub const DEFAULT_TOP_K: usize = 10;

/// Kind of support knowledge an item represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SupportItemType {
    Ticket,
    Faq,
    Runbook,
}

impl SupportItemType {
    pub const ALL: [SupportItemType; 3] = [Self::Ticket, Self::Faq, Self::Runbook];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ticket => "ticket",
            Self::Faq => "faq",
            Self::Runbook => "runbook",
        }
    }
}

impl fmt::Display for SupportItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SupportItemType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ticket" => Ok(Self::Ticket),
            "faq" => Ok(Self::Faq),
            "runbook" => Ok(Self::Runbook),
            other => bail!(
                "Unknown support item type: '{}'. Must be ticket, faq, or runbook.",
                other
            ),
        }
    }
}

/// A support knowledge item to be embedded and stored.
///
/// Construct with [`SupportItem::new`] and the `with_*` methods; they apply
/// the same normalization rules regardless of where the item came from
/// (CSV row, JSON file, or API payload).
#[derive(Debug, Clone, PartialEq)]
pub struct SupportItem {
    pub id: String,
    pub kind: SupportItemType,
    pub title: String,
    pub body: String,
    pub product: Option<String>,
    pub severity: Option<String>,
    pub tags: Vec<String>,
    pub url: Option<String>,
    /// Tri-state: `None` means unknown.
    pub resolved: Option<bool>,
    pub priority: Option<i64>,
}

impl SupportItem {
    pub fn new(
        id: impl Into<String>,
        kind: SupportItemType,
        title: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            title: title.into(),
            body: body.into(),
            product: None,
            severity: None,
            tags: Vec::new(),
            url: None,
            resolved: None,
            priority: None,
        }
    }

    pub fn with_product(mut self, product: Option<String>) -> Self {
        self.product = non_blank(product);
        self
    }

    pub fn with_severity(mut self, severity: Option<String>) -> Self {
        self.severity = non_blank(severity);
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags
            .into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        self
    }

    pub fn with_url(mut self, url: Option<String>) -> Self {
        self.url = non_blank(url);
        self
    }

    pub fn with_resolved(mut self, resolved: Option<bool>) -> Self {
        self.resolved = resolved;
        self
    }

    /// Sets the priority, dropping values outside [`PRIORITY_RANGE`].
    pub fn with_priority(mut self, priority: Option<i64>) -> Self {
        self.priority = valid_priority(priority);
        self
    }

    /// The in-range priority, if any.
    pub fn priority(&self) -> Option<i64> {
        valid_priority(self.priority)
    }

    /// Canonical text used for embedding: trimmed title and body, one per
    /// line, with empty lines removed.
    pub fn to_text(&self) -> String {
        [self.title.trim(), self.body.trim()]
            .iter()
            .filter(|line| !line.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// First [`SNIPPET_CHARS`] characters of the trimmed body.
    pub fn snippet(&self) -> String {
        self.body.trim().chars().take(SNIPPET_CHARS).collect()
    }

    /// Metadata stored alongside the vector; used for display and prompting.
    pub fn meta(&self) -> Value {
        let mut meta = Map::new();
        meta.insert("type".into(), json!(self.kind.as_str()));
        meta.insert("title".into(), json!(self.title));
        meta.insert("snippet".into(), json!(self.snippet()));
        meta.insert("product".into(), json!(self.product));
        meta.insert("severity".into(), json!(self.severity));
        meta.insert("tags".into(), json!(self.tags));
        meta.insert("url".into(), json!(self.url));
        meta.insert("resolved".into(), json!(self.resolved));
        if let Some(p) = self.priority() {
            meta.insert("priority".into(), json!(p));
        }
        Value::Object(meta)
    }

    /// Fields the vector store can filter on. Absent values are omitted.
    pub fn filter(&self) -> Value {
        let mut filter = Map::new();
        filter.insert("type".into(), json!(self.kind.as_str()));
        if let Some(ref product) = self.product {
            filter.insert("product".into(), json!(product));
        }
        if let Some(ref severity) = self.severity {
            filter.insert("severity".into(), json!(severity));
        }
        if let Some(resolved) = self.resolved {
            filter.insert("resolved".into(), json!(resolved));
        }
        if let Some(p) = self.priority() {
            filter.insert("priority".into(), json!(p));
        }
        Value::Object(filter)
    }
}

/// Keeps `priority` only when it lies within [`PRIORITY_RANGE`].
pub fn valid_priority(priority: Option<i64>) -> Option<i64> {
    priority.filter(|p| PRIORITY_RANGE.contains(p))
}

/// Parses a priority from text. Blank, non-integer, or out-of-range input
/// yields `None`.
pub fn parse_priority(raw: &str) -> Option<i64> {
    valid_priority(raw.trim().parse::<i64>().ok())
}

/// Reads a priority from a JSON value: an integer, an integral float, or a
/// numeric string. Anything else, or an out-of-range value, yields `None`.
pub fn priority_from_value(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => valid_priority(n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && f.fract() == 0.0)
                .map(|f| f as i64)
        })),
        Value::String(s) => parse_priority(s),
        _ => None,
    }
}

/// Serde adapter for `priority` fields in source files and API payloads.
///
/// Use with `#[serde(default, deserialize_with = "lenient_priority")]`; a
/// value that is not a usable priority is dropped instead of failing the
/// whole record.
pub fn lenient_priority<'de, D>(deserializer: D) -> std::result::Result<Option<i64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(raw.as_ref().and_then(priority_from_value))
}

/// Parses a tri-state resolved flag from text.
///
/// `true`/`1`/`yes` and `false`/`0`/`no` (case-insensitive) are recognized;
/// anything else is unknown.
pub fn parse_resolved(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Normalized search hit returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResultItem {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: SupportItemType,
    pub title: String,
    pub snippet: String,
    pub product: Option<String>,
    pub severity: Option<String>,
    /// Similarity reported by the vector store.
    pub score: f64,
    pub url: Option<String>,
    pub resolved: Option<bool>,
}

/// Declarative filters accepted by the search endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchFilters {
    #[serde(default)]
    pub product: Option<String>,
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub types: Option<Vec<SupportItemType>>,
    #[serde(default)]
    pub priority_min: Option<i64>,
    #[serde(default)]
    pub priority_max: Option<i64>,
}

impl SearchFilters {
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("priority_min", self.priority_min),
            ("priority_max", self.priority_max),
        ] {
            if let Some(v) = value {
                if !PRIORITY_RANGE.contains(&v) {
                    bail!("filters.{} must be between 0 and 999, got {}", name, v);
                }
            }
        }
        if let (Some(min), Some(max)) = (self.priority_min, self.priority_max) {
            if min > max {
                bail!(
                    "filters.priority_min ({}) must not exceed filters.priority_max ({})",
                    min,
                    max
                );
            }
        }
        Ok(())
    }
}

/// A semantic search request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    /// Results per bucket. Clamped to the server maximum before use.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default)]
    pub filters: Option<SearchFilters>,
    #[serde(default = "default_generate_answer")]
    pub generate_answer: bool,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            top_k: DEFAULT_TOP_K,
            filters: None,
            generate_answer: default_generate_answer(),
        }
    }

    /// Rejects requests that cannot be served. Runs before any embedding or
    /// store work.
    pub fn validate(&self) -> Result<()> {
        if self.query.trim().is_empty() {
            bail!("query must not be empty");
        }
        if self.top_k == 0 {
            bail!("top_k must be at least 1");
        }
        if let Some(ref filters) = self.filters {
            filters.validate()?;
        }
        Ok(())
    }
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

fn default_generate_answer() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ticket() -> SupportItem {
        SupportItem::new(
            "TCK-1001",
            SupportItemType::Ticket,
            "  Intermittent 504s on payments API ",
            "\n504 Gateway Timeout on /v1/payments for EU customers.\n",
        )
        .with_product(Some("billing-api".to_string()))
        .with_severity(Some("P1".to_string()))
    }

    #[test]
    fn test_to_text_strips_empty_lines() {
        let item = ticket();
        assert_eq!(
            item.to_text(),
            "Intermittent 504s on payments API\n504 Gateway Timeout on /v1/payments for EU customers."
        );
    }

    #[test]
    fn test_to_text_without_body() {
        let item = SupportItem::new("F1", SupportItemType::Faq, "Reset password?", "   ");
        assert_eq!(item.to_text(), "Reset password?");
    }

    #[test]
    fn test_snippet_is_200_chars() {
        let body: String = "é".repeat(450);
        let item = SupportItem::new("T1", SupportItemType::Ticket, "t", body);
        assert_eq!(item.snippet().chars().count(), SNIPPET_CHARS);
        assert_eq!(item.meta()["snippet"].as_str().unwrap().chars().count(), 200);
    }

    #[test]
    fn test_out_of_range_priority_dropped() {
        let item = ticket().with_priority(Some(1000));
        assert_eq!(item.priority, None);
        assert!(item.meta().get("priority").is_none());
        assert!(item.filter().get("priority").is_none());

        let negative = ticket().with_priority(Some(-1));
        assert_eq!(negative.priority(), None);
    }

    #[test]
    fn test_priority_dropped_even_when_set_directly() {
        let mut item = ticket();
        item.priority = Some(5000);
        assert!(item.meta().get("priority").is_none());
        assert!(item.filter().get("priority").is_none());
    }

    #[test]
    fn test_in_range_priority_projected() {
        let item = ticket().with_priority(Some(999));
        assert_eq!(item.meta()["priority"], json!(999));
        assert_eq!(item.filter()["priority"], json!(999));
    }

    #[test]
    fn test_filter_projection_omits_absent_fields() {
        let item = SupportItem::new("R1", SupportItemType::Runbook, "Rotate keys", "step 1");
        let filter = item.filter();
        assert_eq!(filter, json!({ "type": "runbook" }));
    }

    #[test]
    fn test_meta_contains_display_fields() {
        let item = ticket()
            .with_tags(vec!["payments".into(), " ".into(), "eu ".into()])
            .with_resolved(Some(true));
        let meta = item.meta();
        assert_eq!(meta["type"], "ticket");
        assert_eq!(meta["product"], "billing-api");
        assert_eq!(meta["tags"], json!(["payments", "eu"]));
        assert_eq!(meta["resolved"], json!(true));
        assert_eq!(meta["url"], Value::Null);
    }

    #[test]
    fn test_blank_optional_fields_become_none() {
        let item = ticket()
            .with_product(Some("  ".into()))
            .with_url(Some(String::new()));
        assert_eq!(item.product, None);
        assert_eq!(item.url, None);
    }

    #[test]
    fn test_parse_priority() {
        assert_eq!(parse_priority("42"), Some(42));
        assert_eq!(parse_priority(" 0 "), Some(0));
        assert_eq!(parse_priority("999"), Some(999));
        assert_eq!(parse_priority("1000"), None);
        assert_eq!(parse_priority("-3"), None);
        assert_eq!(parse_priority("high"), None);
        assert_eq!(parse_priority(""), None);
    }

    #[test]
    fn test_parse_resolved_tri_state() {
        assert_eq!(parse_resolved("TRUE"), Some(true));
        assert_eq!(parse_resolved("yes"), Some(true));
        assert_eq!(parse_resolved("1"), Some(true));
        assert_eq!(parse_resolved("No"), Some(false));
        assert_eq!(parse_resolved("0"), Some(false));
        assert_eq!(parse_resolved(""), None);
        assert_eq!(parse_resolved("maybe"), None);
    }

    #[test]
    fn test_item_type_from_str() {
        assert_eq!("FAQ".parse::<SupportItemType>().unwrap(), SupportItemType::Faq);
        assert!("incident".parse::<SupportItemType>().is_err());
    }

    #[test]
    fn test_search_request_defaults() {
        let req: SearchRequest = serde_json::from_str(r#"{"query":"504 errors"}"#).unwrap();
        assert_eq!(req.top_k, DEFAULT_TOP_K);
        assert!(req.generate_answer);
        assert!(req.filters.is_none());
    }

    #[test]
    fn test_search_request_validation() {
        assert!(SearchRequest::new("  ").validate().is_err());

        let mut zero = SearchRequest::new("q");
        zero.top_k = 0;
        assert!(zero.validate().is_err());

        let mut above_max = SearchRequest::new("q");
        above_max.top_k = 500;
        assert!(above_max.validate().is_ok());

        let mut bad_range = SearchRequest::new("q");
        bad_range.filters = Some(SearchFilters {
            priority_min: Some(10),
            priority_max: Some(5),
            ..Default::default()
        });
        assert!(bad_range.validate().is_err());

        let mut out_of_range = SearchRequest::new("q");
        out_of_range.filters = Some(SearchFilters {
            priority_max: Some(1200),
            ..Default::default()
        });
        assert!(out_of_range.validate().is_err());
    }

    #[test]
    fn test_filters_reject_unknown_type() {
        let parsed: Result<SearchFilters, _> =
            serde_json::from_str(r#"{"types":["ticket","incident"]}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_result_item_serializes_type_field() {
        let item = SearchResultItem {
            id: "F1".into(),
            kind: SupportItemType::Faq,
            title: "t".into(),
            snippet: String::new(),
            product: None,
            severity: None,
            score: 0.5,
            url: None,
            resolved: None,
        };
        let v = serde_json::to_value(&item).unwrap();
        assert_eq!(v["type"], "faq");
        assert!(v.get("kind").is_none());
    }

    #[test]
    fn test_priority_from_value_forms() {
        assert_eq!(priority_from_value(&json!(5)), Some(5));
        assert_eq!(priority_from_value(&json!(5.0)), Some(5));
        assert_eq!(priority_from_value(&json!(" 7 ")), Some(7));
        assert_eq!(priority_from_value(&json!(5.5)), None);
        assert_eq!(priority_from_value(&json!("high")), None);
        assert_eq!(priority_from_value(&json!(1000)), None);
        assert_eq!(priority_from_value(&json!(-1.0)), None);
        assert_eq!(priority_from_value(&json!(true)), None);
        assert_eq!(priority_from_value(&Value::Null), None);
    }
}
