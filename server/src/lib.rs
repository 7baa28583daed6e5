pub mod jobs;

use anyhow::Result;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use jobs::{InMemoryJobStore, JobStore, ReportJob, ReportScheduler};
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use trove_core::config::validate_max_n;
use trove_core::query::{Corpus, FileNgrams, NgramPage, SearchResult, Stats};
use trove_core::report::{ReportKind, ReportParams};
use trove_core::{FileId, TroveError};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub cache_dir: PathBuf,
    pub reports_dir: PathBuf,
    pub max_n: usize,
}

#[derive(Clone)]
pub struct AppState {
    pub corpus: Arc<Corpus>,
    pub scheduler: Arc<ReportScheduler>,
}

type ApiError = (StatusCode, Json<Value>);
type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

fn api_error(e: TroveError) -> ApiError {
    let status = match &e {
        TroveError::MissingPrerequisite { .. } => StatusCode::NOT_FOUND,
        TroveError::InvalidConfig(_) => StatusCode::BAD_REQUEST,
        TroveError::Corrupt { .. } | TroveError::Io(_) | TroveError::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    tracing::warn!(error = %e, %status, "request failed");
    (status, Json(json!({ "error": e.to_string() })))
}

fn not_found() -> ApiError { (StatusCode::NOT_FOUND, Json(json!({ "error": "not found" }))) }

/// Runs a cache read on the blocking pool.
async fn blocking<T, F>(f: F) -> ApiResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> trove_core::Result<T> + Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(Ok(v)) => Ok(Json(v)),
        Ok(Err(e)) => Err(api_error(e)),
        Err(e) => Err((StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": e.to_string() })))),
    }
}

pub fn build_app(config: ServerConfig) -> Result<Router> {
    validate_max_n(config.max_n)?;
    let corpus = Arc::new(Corpus::open(&config.cache_dir, config.max_n)?);
    std::fs::create_dir_all(&config.reports_dir)?;
    let store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::default());
    let scheduler = Arc::new(ReportScheduler::start(store, corpus.clone(), config.reports_dir.clone()));
    tracing::info!(
        words = corpus.words.len(),
        files = corpus.files.len(),
        cache = %config.cache_dir.display(),
        "cache loaded"
    );
    let app_state = AppState { corpus, scheduler };

    // CORS: read CORS_ALLOW_ORIGIN (comma-separated) or allow Any by default
    let cors = match std::env::var("CORS_ALLOW_ORIGIN") {
        Ok(val) => {
            let origins: Vec<_> = val.split(',').filter_map(|s| s.trim().parse().ok()).collect();
            if origins.is_empty() {
                CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
            } else {
                CorsLayer::new().allow_origin(AllowOrigin::list(origins)).allow_methods(Any).allow_headers(Any)
            }
        }
        Err(_) => CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any),
    };

    let app = Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/stats", get(stats_handler))
        .route("/api/ngrams/:n", get(ngrams_handler))
        .route("/api/search", get(search_handler))
        .route("/api/files/:file_id/ngrams/:n", get(file_ngrams_handler))
        .route("/api/report", post(submit_handler))
        .route("/api/reports", get(list_handler))
        .route("/api/report/:id", get(status_handler))
        .route("/api/report/:id/view", get(view_handler))
        .with_state(app_state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());
    Ok(app)
}

pub async fn stats_handler(State(state): State<AppState>) -> Json<Stats> { Json(state.corpus.stats()) }

#[derive(Deserialize)]
pub struct PageParams {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}
fn default_limit() -> usize { 50 }

pub async fn ngrams_handler(
    State(state): State<AppState>,
    Path(n): Path<usize>,
    Query(page): Query<PageParams>,
) -> ApiResult<NgramPage> {
    if n < 2 || n > state.corpus.max_n {
        return Err((StatusCode::BAD_REQUEST, Json(json!({ "error": format!("n must be in 2..={}", state.corpus.max_n) }))));
    }
    let corpus = state.corpus.clone();
    blocking(move || corpus.list_ngrams(n, page.limit, page.offset)).await
}

#[derive(Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub q: String,
}

pub async fn search_handler(State(state): State<AppState>, Query(params): Query<SearchParams>) -> ApiResult<SearchResult> {
    let corpus = state.corpus.clone();
    blocking(move || corpus.search(&params.q)).await
}

#[derive(Deserialize)]
pub struct FileNgramParams {
    #[serde(default = "default_min_files")]
    pub min_files: usize,
}
fn default_min_files() -> usize { 2 }

pub async fn file_ngrams_handler(
    State(state): State<AppState>,
    Path((file_id, n)): Path<(FileId, usize)>,
    Query(params): Query<FileNgramParams>,
) -> ApiResult<FileNgrams> {
    let corpus = state.corpus.clone();
    match blocking(move || corpus.file_ngrams(file_id, n, params.min_files)).await? {
        Json(Some(found)) => Ok(Json(found)),
        Json(None) => Err(not_found()),
    }
}

#[derive(Deserialize)]
pub struct SubmitRequest {
    #[serde(rename = "type")]
    pub kind: ReportKind,
    #[serde(flatten)]
    pub params: ReportParams,
}

pub async fn submit_handler(State(state): State<AppState>, Json(req): Json<SubmitRequest>) -> Json<ReportJob> {
    Json(state.scheduler.submit(req.kind, req.params))
}

pub async fn list_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "jobs": state.scheduler.store().list() }))
}

pub async fn status_handler(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<ReportJob> {
    state.scheduler.store().get(&id).map(Json).ok_or_else(not_found)
}

pub async fn view_handler(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Value> {
    let job = state.scheduler.store().get(&id).ok_or_else(not_found)?;
    let Some(path) = job.file_path.clone() else { return Err(not_found()) };
    let data = tokio::fs::read(&path)
        .await
        .map_err(|e| api_error(TroveError::Io(e)))?;
    match serde_json::from_slice::<Value>(&data) {
        Ok(parsed) => Ok(Json(json!({ "job": job, "data": parsed }))),
        Err(_) => Ok(Json(json!({ "job": job, "text": String::from_utf8_lossy(&data) }))),
    }
}
