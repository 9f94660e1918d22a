//! # Support Copilot
//!
//! Semantic search over historical support knowledge (tickets, FAQs, and
//! runbooks) backed by the Endee vector database, with optional
//! LLM-drafted answers.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌─────────────┐   ┌──────────┐
//! │ data/ files  │──▶│   Ingest    │──▶│  Endee   │
//! │ POST /ingest │   │ embed+write │   │  index   │
//! └──────────────┘   └─────────────┘   └────┬─────┘
//!                                           │
//!                      ┌────────────────────┤
//!                      ▼                    ▼
//!                 ┌──────────┐        ┌───────────┐
//!                 │   CLI    │        │   HTTP    │
//!                 │ search   │        │ /search   │──▶ LLM answer
//!                 └──────────┘        └───────────┘
//! ```
//!
//! Runtime-independent pieces (models, store trait, retrieval pipeline) live
//! in `support-copilot-core`. This crate adds the concrete embedders, the
//! Endee client, answer generation, ingestion loaders, and the server.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | Layered TOML + environment configuration |
//! | [`embedding`] | fastembed and OpenAI-compatible embedders |
//! | [`endee`] | Endee HTTP client and lazy store handle |
//! | [`answer`] | LLM answer generation with timeout and retries |
//! | [`ingest`] | Sample data loaders and batch ingestion |
//! | [`server`] | Axum HTTP server |
//! | [`eval`] | Recall@k / MRR evaluation against a running server |

pub mod answer;
pub mod config;
pub mod embedding;
pub mod endee;
pub mod eval;
pub mod ingest;
pub mod server;
