//! # Support Copilot Core
//!
//! Runtime-independent logic for Support Copilot: the support item model,
//! the vector store abstraction, the retrieval pipeline, and the embedding
//! trait.
//!
//! This crate contains no tokio, HTTP, or filesystem dependencies. Concrete
//! embedding providers and the Endee HTTP client live in the
//! `support-copilot` app crate.

pub mod embedding;
pub mod models;
pub mod search;
pub mod store;

pub use embedding::Embedder;
pub use models::{SearchFilters, SearchRequest, SearchResultItem, SupportItem, SupportItemType};
pub use store::{StoreError, VectorStore};
