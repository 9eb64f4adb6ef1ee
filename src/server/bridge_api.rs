//! HTTP API of the bridge.
//!
//! - POST /create-cache
//! - POST /query
//! - GET /caches
//! - GET /health
//! - GET /
//!
//! Anything else answers 404.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::cache::lifecycle::{CacheManager, CreateCacheRequest};
use crate::cache::naming::cache_path_for;
use crate::config::Config;
use crate::error::{CagError, ErrorKind};
use crate::inference::invoker::Invoker;
use crate::inference::query::{QueryBridge, QueryRequest, DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE};
use crate::registry::reconciler::{list_caches, CacheEntry, ListOptions, SortKey};
use crate::registry::store::{RegistryError, RegistryStore};
use crate::server::health::{check_health, HealthReport};

/// Application state shared across handlers.
pub struct AppState {
    pub config: Arc<Config>,
    pub manager: CacheManager,
    pub bridge: QueryBridge,
    pub registry: Arc<dyn RegistryStore>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        invoker: Arc<dyn Invoker>,
        registry: Arc<dyn RegistryStore>,
    ) -> Self {
        Self {
            manager: CacheManager::new(config.clone(), invoker.clone()),
            bridge: QueryBridge::new(config.clone(), invoker),
            config,
            registry,
            start_time: Instant::now(),
        }
    }
}

/// Build the axum router with all API routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/create-cache", post(create_cache))
        .route("/query", post(query))
        .route("/caches", get(caches))
        .fallback(not_found)
        .method_not_allowed_fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ─── Request/Response Types ────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCacheBody {
    #[serde(default)]
    pub document_id: String,
    #[serde(default)]
    pub temp_file_path: PathBuf,
    /// Derived from the document (and chunk) id when absent.
    #[serde(default)]
    pub kv_cache_path: Option<PathBuf>,
    #[serde(default)]
    pub estimated_tokens: i64,
    #[serde(default)]
    pub set_as_master: bool,
    #[serde(default)]
    pub chunk_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCacheResponse {
    pub success: bool,
    pub document_id: String,
    pub kv_cache_path: PathBuf,
    pub kv_cache_size: Option<u64>,
    pub context_size: usize,
    pub error: Option<String>,
    pub output: String,
    pub promoted_to_master: bool,
    pub warnings: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryBody {
    #[serde(default)]
    pub query: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Absent means the default; an explicit `null` omits the flag.
    #[serde(default = "default_temperature")]
    pub temperature: Option<f64>,
    /// Defaults to the master cache.
    #[serde(default)]
    pub kv_cache_path: Option<PathBuf>,
}

fn default_max_tokens() -> u32 {
    DEFAULT_MAX_TOKENS
}
fn default_temperature() -> Option<f64> {
    Some(DEFAULT_TEMPERATURE)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QueryResponse {
    pub success: bool,
    pub response: String,
    pub error: Option<String>,
    pub query: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub sort: Option<SortKey>,
    pub days: Option<u32>,
    #[serde(default)]
    pub unused: bool,
}

/// Error body: `{success: false, error, kind}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    kind: Option<ErrorKind>,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            kind: Some(ErrorKind::Validation),
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            kind: None,
            message: message.into(),
        }
    }
}

impl From<CagError> for ApiError {
    fn from(e: CagError) -> Self {
        let status = if e.is_client_error() {
            StatusCode::BAD_REQUEST
        } else if e.kind() == ErrorKind::Timeout {
            StatusCode::GATEWAY_TIMEOUT
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        Self {
            status,
            kind: Some(e.kind()),
            message: e.to_string(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        Self::bad_request(e.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(e: QueryRejection) -> Self {
        Self::bad_request(e.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "success": false,
            "error": self.message,
            "kind": self.kind,
        });
        (self.status, Json(body)).into_response()
    }
}

// ─── Route Handlers ────────────────────────────────────────────────────────

async fn root() -> &'static str {
    "CAG Bridge Server Running"
}

async fn not_found() -> StatusCode {
    StatusCode::NOT_FOUND
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthReport> {
    let report = check_health(&state.config);
    if !report.issues.is_empty() {
        warn!(issues = ?report.issues, "Health check found issues");
    }
    Json(report)
}

async fn create_cache(
    State(state): State<Arc<AppState>>,
    body: Result<Json<CreateCacheBody>, JsonRejection>,
) -> Result<Json<CreateCacheResponse>, ApiError> {
    let request_id = Uuid::new_v4().to_string();
    let Json(body) = body.map_err(|e| {
        warn!(request_id, "Rejected create-cache body: {}", e.body_text());
        ApiError::from(e)
    })?;

    let output_path = body.kv_cache_path.clone().unwrap_or_else(|| {
        cache_path_for(
            &state.config.storage.cache_dir,
            &body.document_id,
            body.chunk_id.as_deref(),
        )
    });

    info!(
        request_id,
        document_id = body.document_id,
        input = %body.temp_file_path.display(),
        cache = %output_path.display(),
        estimated_tokens = body.estimated_tokens,
        set_as_master = body.set_as_master,
        "Create cache request"
    );

    let request = CreateCacheRequest {
        document_id: body.document_id.clone(),
        input_path: body.temp_file_path,
        output_path,
        estimated_tokens: body.estimated_tokens,
        set_as_master: body.set_as_master,
    };

    let result = state.manager.create_cache(&request).await.map_err(|e| {
        error!(
            request_id,
            document_id = body.document_id,
            "Error creating KV cache: {e}"
        );
        ApiError::from(e)
    })?;

    Ok(Json(CreateCacheResponse {
        success: result.success,
        document_id: body.document_id,
        kv_cache_path: result.cache_path,
        kv_cache_size: result.cache_size_bytes,
        context_size: result.context_size,
        error: result.error,
        output: result.stdout,
        promoted_to_master: result.promoted_to_master,
        warnings: result.warnings,
    }))
}

async fn query(
    State(state): State<Arc<AppState>>,
    body: Result<Json<QueryBody>, JsonRejection>,
) -> Result<Json<QueryResponse>, ApiError> {
    let request_id = Uuid::new_v4().to_string();
    let Json(body) = body.map_err(|e| {
        warn!(request_id, "Rejected query body: {}", e.body_text());
        ApiError::from(e)
    })?;

    let cache_path = body
        .kv_cache_path
        .unwrap_or_else(|| state.config.storage.master_cache_path.clone());

    info!(
        request_id,
        cache = %cache_path.display(),
        query_chars = body.query.chars().count(),
        "Query request"
    );

    let request = QueryRequest {
        query: body.query,
        cache_path: cache_path.clone(),
        max_tokens: body.max_tokens,
        temperature: body.temperature,
    };

    let result = state.bridge.query(request).await.map_err(|e| {
        error!(request_id, cache = %cache_path.display(), "Error processing query: {e}");
        ApiError::from(e)
    })?;

    if result.success {
        record_usage(state.registry.clone(), cache_path).await;
    }

    Ok(Json(QueryResponse {
        success: result.success,
        response: result.response,
        error: result.error,
        query: result.query,
    }))
}

/// Count a successful query against its cache. Registry problems never fail the query.
async fn record_usage(registry: Arc<dyn RegistryStore>, cache_path: PathBuf) {
    let path = cache_path.clone();
    let outcome =
        tokio::task::spawn_blocking(move || registry.record_usage(&path, Utc::now())).await;

    match outcome {
        Ok(Ok(true)) => debug!(cache = %cache_path.display(), "Recorded cache usage"),
        Ok(Ok(false)) => debug!(cache = %cache_path.display(), "Cache not registered"),
        Ok(Err(RegistryError::NotFound(db))) => {
            debug!(db = %db.display(), "Registry absent, usage not recorded")
        }
        Ok(Err(e)) => warn!(cache = %cache_path.display(), "Failed to record usage: {e}"),
        Err(e) => warn!("Usage recording task failed: {e}"),
    }
}

async fn caches(
    State(state): State<Arc<AppState>>,
    params: Result<Query<ListParams>, QueryRejection>,
) -> Result<Json<Vec<CacheEntry>>, ApiError> {
    let Query(params) = params?;
    let options = ListOptions {
        sort: params.sort.unwrap_or_default(),
        days: params.days,
        unused_only: params.unused,
    };

    let registry = state.registry.clone();
    let cache_dir = state.config.storage.cache_dir.clone();
    let entries = tokio::task::spawn_blocking(move || {
        list_caches(&cache_dir, registry.as_ref(), &options, Utc::now())
    })
    .await
    .map_err(|e| {
        error!("Cache listing task failed: {e}");
        ApiError::internal(format!("cache listing failed: {e}"))
    })?;

    Ok(Json(entries))
}
