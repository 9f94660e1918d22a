//! HTTP server.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/search` | Semantic search with optional LLM answer |
//! | `POST` | `/ingest` | Embed and store a batch of support items |
//! | `GET`  | `/health` | App identity and vector store status |
//! | `GET`  | `/` | Index page |
//! | `GET`  | `/static/*` | Files from `server.static_dir` |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `service_unavailable` (503).
//! Upstream failure details are logged, not returned.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use support_copilot_core::search::search;
use support_copilot_core::{Embedder, SearchRequest, SearchResultItem};

use crate::answer::AnswerGenerator;
use crate::config::Config;
use crate::embedding::create_embedder;
use crate::endee::StoreHandle;
use crate::ingest::{ingest_items, IngestError, IngestItemRequest};

const INDEX_HTML: &str = include_str!("../static/index.html");

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub embedder: Arc<dyn Embedder>,
    pub store: Arc<StoreHandle>,
    pub answers: Arc<AnswerGenerator>,
}

impl AppState {
    /// Build state from configuration. Nothing is loaded or connected yet.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let embedder = create_embedder(&config.embedding)?;
        let store = StoreHandle::lazy(config.endee.clone(), embedder.clone());
        let answers = AnswerGenerator::from_config(&config.llm)?;
        Ok(Self {
            config: Arc::new(config.clone()),
            embedder,
            store: Arc::new(store),
            answers: Arc::new(answers),
        })
    }
}

/// Start the HTTP server on `server.bind`.
///
/// The store client is connected eagerly; a failure is logged and the
/// server keeps running so `/health` can report it.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let state = AppState::from_config(config)?;

    tracing::info!("Initialising vector store client on startup");
    if let Err(e) = state.store.get().await {
        tracing::warn!("Vector store unavailable at startup: {:#}", e);
    }

    if !state.answers.is_enabled() {
        tracing::info!("LLM answers disabled: no API key configured");
    }

    let bind_addr = config.server.bind.clone();
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("{} listening on http://{}", config.app.name, bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let static_files = ServeDir::new(&state.config.server.static_dir);

    Router::new()
        .route("/", get(handle_index))
        .route("/search", post(handle_search))
        .route("/ingest", post(handle_ingest))
        .route("/health", get(handle_health))
        .nest_service("/static", static_files)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Error type that converts into an Axum HTTP response.
pub struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn service_unavailable(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::SERVICE_UNAVAILABLE,
        code: "service_unavailable".to_string(),
        message: message.into(),
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        bad_request(rejection.body_text())
    }
}

// ============ POST /search ============

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub tickets: Vec<SearchResultItem>,
    pub faqs: Vec<SearchResultItem>,
    pub runbooks: Vec<SearchResultItem>,
    pub llm_answer: Option<String>,
}

async fn handle_search(
    State(state): State<AppState>,
    payload: Result<Json<SearchRequest>, JsonRejection>,
) -> Result<Json<SearchResponse>, AppError> {
    let Json(req) = payload?;
    req.validate().map_err(|e| bad_request(e.to_string()))?;

    let store = state.store.get().await.map_err(|e| {
        tracing::error!("Vector store unavailable: {:#}", e);
        service_unavailable("Search backend is unavailable")
    })?;

    let results = search(
        state.embedder.as_ref(),
        store.as_ref(),
        &req,
        &state.config.retrieval.params(),
    )
    .await
    .map_err(|e| {
        tracing::error!("Search failed for query '{}': {:#}", req.query, e);
        service_unavailable("Search backend is unavailable")
    })?;

    let llm_answer = if req.generate_answer && state.answers.is_enabled() {
        state.answers.generate(&req.query, &results.ranked).await
    } else {
        None
    };

    Ok(Json(SearchResponse {
        query: req.query,
        tickets: results.tickets,
        faqs: results.faqs,
        runbooks: results.runbooks,
        llm_answer,
    }))
}

// ============ POST /ingest ============

async fn handle_ingest(
    State(state): State<AppState>,
    payload: Result<Json<Vec<IngestItemRequest>>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let Json(items) = payload?;

    let count = ingest_items(
        items,
        state.config.ingest.max_batch_size,
        state.embedder.as_ref(),
        &state.store,
    )
    .await
    .map_err(|e| match e {
        IngestError::BatchTooLarge { .. } => bad_request(e.to_string()),
        IngestError::Failed(inner) => {
            tracing::error!("Ingestion failed: {:#}", inner);
            service_unavailable("Ingestion backend is unavailable")
        }
    })?;

    Ok((StatusCode::CREATED, Json(json!({ "ingested": count }))))
}

// ============ GET /health ============

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub app: String,
    pub environment: String,
    pub endee_index: String,
    pub endee_status: String,
    pub endee_index_stats: Value,
}

/// Always 200; store problems are reported in the body.
async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    let stats = match state.store.get().await {
        Ok(store) => store.describe().await,
        Err(e) => Err(e),
    };

    let (status, stats) = match stats {
        Ok(stats) => ("ok", stats),
        Err(e) => {
            tracing::warn!("Health check could not reach vector store: {:#}", e);
            ("unavailable", json!({}))
        }
    };

    Json(HealthResponse {
        app: state.config.app.name.clone(),
        environment: state.config.app.environment.clone(),
        endee_index: state.config.endee.index_name.clone(),
        endee_status: status.to_string(),
        endee_index_stats: stats,
    })
}

// ============ GET / ============

async fn handle_index(State(state): State<AppState>) -> Html<String> {
    Html(render_index(
        &state.config.app.name,
        &state.config.app.environment,
    ))
}

fn render_index(app_name: &str, environment: &str) -> String {
    INDEX_HTML
        .replace("{{app_name}}", &escape_html(app_name))
        .replace("{{environment}}", &escape_html(environment))
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
