//! # Support Copilot CLI (`support-copilot`)
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `support-copilot serve` | Start the HTTP server |
//! | `support-copilot ingest` | Load `data/` sources into the Endee index |
//! | `support-copilot search "<query>"` | Run a search from the terminal |
//! | `support-copilot evaluate` | Score retrieval against labelled queries |
//!
//! ## Examples
//!
//! ```bash
//! support-copilot ingest --data-dir ./data
//! support-copilot search "504 errors on payments" --product billing-api --type ticket
//! support-copilot serve --config ./copilot.toml
//! support-copilot evaluate --base-url http://localhost:8000 --k 5
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use support_copilot::answer::AnswerGenerator;
use support_copilot::config::{self, Config};
use support_copilot::embedding::create_embedder;
use support_copilot::endee::StoreHandle;
use support_copilot::eval::run_evaluation;
use support_copilot::ingest::ingest_all;
use support_copilot::server::run_server;
use support_copilot_core::search::search;
use support_copilot_core::{SearchFilters, SearchRequest, SearchResultItem, SupportItemType};

/// Support Copilot: semantic search over tickets, FAQs, and runbooks.
#[derive(Parser)]
#[command(name = "support-copilot", version)]
struct Cli {
    /// Path to an optional TOML configuration file. Environment variables
    /// override values from the file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server.
    Serve,

    /// Embed and store every source found in the data directory.
    Ingest {
        /// Overrides `ingest.data_dir`.
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },

    /// Search the index and print results grouped by type.
    Search {
        query: String,

        /// Results per type.
        #[arg(long, default_value_t = 10)]
        top_k: usize,

        #[arg(long)]
        product: Option<String>,

        #[arg(long)]
        severity: Option<String>,

        /// Restrict to item types (repeatable): ticket, faq, runbook.
        #[arg(long = "type")]
        types: Vec<SupportItemType>,

        /// Also draft an answer when an LLM key is configured.
        #[arg(long)]
        answer: bool,
    },

    /// Compute recall@k and MRR against a running server.
    Evaluate {
        #[arg(long, default_value = "http://localhost:8000")]
        base_url: String,

        #[arg(long, default_value_t = 5)]
        k: usize,

        /// Defaults to `<data_dir>/evaluation_queries.json`.
        #[arg(long)]
        queries: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve => {
            run_server(&cfg).await?;
        }
        Commands::Ingest { data_dir } => {
            let data_dir = data_dir.unwrap_or_else(|| cfg.ingest.data_dir.clone());
            let embedder = create_embedder(&cfg.embedding)?;
            let store = StoreHandle::lazy(cfg.endee.clone(), embedder.clone());
            let count = ingest_all(&data_dir, embedder.as_ref(), &store).await?;
            println!(
                "Ingested {} support items into '{}'.",
                count, cfg.endee.index_name
            );
        }
        Commands::Search {
            query,
            top_k,
            product,
            severity,
            types,
            answer,
        } => {
            let filters = SearchFilters {
                product,
                severity,
                types: if types.is_empty() { None } else { Some(types) },
                ..Default::default()
            };
            let req = SearchRequest {
                query,
                top_k,
                filters: Some(filters),
                generate_answer: answer,
            };
            run_search(&cfg, req).await?;
        }
        Commands::Evaluate {
            base_url,
            k,
            queries,
        } => {
            let path =
                queries.unwrap_or_else(|| cfg.ingest.data_dir.join("evaluation_queries.json"));
            let report = run_evaluation(&base_url, k, &path).await?;
            report.print();
        }
    }

    Ok(())
}

async fn run_search(cfg: &Config, req: SearchRequest) -> anyhow::Result<()> {
    req.validate()?;

    let embedder = create_embedder(&cfg.embedding)?;
    let store = StoreHandle::lazy(cfg.endee.clone(), embedder.clone());
    let store = store.get().await?;

    let results = search(
        embedder.as_ref(),
        store.as_ref(),
        &req,
        &cfg.retrieval.params(),
    )
    .await?;

    if results.ranked.is_empty() {
        println!("No results.");
        return Ok(());
    }

    print_bucket("Tickets", &results.tickets);
    print_bucket("FAQs", &results.faqs);
    print_bucket("Runbooks", &results.runbooks);

    if req.generate_answer {
        let answers = AnswerGenerator::from_config(&cfg.llm)?;
        if !answers.is_enabled() {
            println!("(LLM answers disabled: set LLM_API_KEY)");
        } else if let Some(text) = answers.generate(&req.query, &results.ranked).await {
            println!("Proposed response:\n{}", text);
        } else {
            println!("(No answer generated)");
        }
    }

    Ok(())
}

fn print_bucket(label: &str, items: &[SearchResultItem]) {
    if items.is_empty() {
        return;
    }
    println!("{}:", label);
    for (i, item) in items.iter().enumerate() {
        println!("{}. [{:.3}] {} {}", i + 1, item.score, item.id, item.title);
        if let Some(ref product) = item.product {
            print!("    product: {}", product);
            if let Some(ref severity) = item.severity {
                print!("  severity: {}", severity);
            }
            println!();
        }
        if !item.snippet.is_empty() {
            println!("    {}", item.snippet);
        }
    }
    println!();
}
