use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

use moko_github::{FailureLogExtract, GithubClient, GithubError, RepoSummary, DEFAULT_TAIL_LINES};
use moko_store::{prune_failures, DocumentStore, StoreError, ACTIVE_SESSION_JSON, FAILURES_DIR};

// ── Config ──

pub struct ServeConfig {
    pub bind: String,
    pub port: u16,
    /// Re-run failure pruning on this period, in addition to the startup run.
    pub prune_interval: Option<Duration>,
}

// ── App State ──

/// Shared handles for request handlers. The store must already be
/// initialized with `DocumentStore::ensure`.
#[derive(Clone)]
pub struct AppState {
    pub store: DocumentStore,
    pub github: GithubClient,
}

// ── Error Handling ──

enum AppError {
    NotFound(String),
    BadRequest(String),
    Upstream(GithubError),
    Internal(anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Upstream(e) => {
                warn!(error = %e, "GitHub request failed");
                (StatusCode::BAD_GATEWAY, e.to_string())
            }
            AppError::Internal(e) => {
                error!(error = %e, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        };
        let body = serde_json::json!({ "error": message });
        (status, Json(body)).into_response()
    }
}

impl From<GithubError> for AppError {
    fn from(err: GithubError) -> Self {
        if matches!(err, GithubError::InvalidName(_)) {
            AppError::BadRequest(err.to_string())
        } else {
            AppError::Upstream(err)
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        if matches!(err, StoreError::InvalidKey(_)) {
            AppError::BadRequest(err.to_string())
        } else {
            AppError::Internal(err.into())
        }
    }
}

// ── Entrypoint ──

pub async fn serve(config: ServeConfig, state: AppState) -> anyhow::Result<()> {
    if let Some(period) = config.prune_interval {
        tokio::spawn(prune_periodically(state.store.clone(), period));
    }

    let app = router(state);
    let addr = format!("{}:{}", config.bind, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "moko HTTP server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

/// Build the router (for testing without binding to a port).
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/repos", get(get_repos))
        .route(
            "/api/session",
            get(get_session).put(put_session).delete(delete_session),
        )
        .route("/api/failures", get(list_failures))
        .route("/api/failures/{id}", get(get_failure).delete(delete_failure))
        .route("/api/runs/{owner}/{repo}/{run_id}/failure", get(get_run_failure))
        .layer(CorsLayer::permissive())
        .with_state(Arc::new(state))
}

async fn prune_periodically(store: DocumentStore, period: Duration) {
    // The startup prune already ran in `ensure`, so the first tick is one
    // period out.
    let start = tokio::time::Instant::now() + period;
    let mut ticker = tokio::time::interval_at(start, period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let removed = prune_failures(&store).await;
        if removed > 0 {
            info!(removed, "periodic failure pruning");
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "cannot listen for ctrl-c, running until killed");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

type AppResult<T> = Result<T, AppError>;
type SharedState = State<Arc<AppState>>;

// ── Health ──

async fn health() -> Json<Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

// ── GET /api/repos ──

async fn get_repos(State(state): SharedState) -> AppResult<Json<Vec<RepoSummary>>> {
    Ok(Json(state.github.list_repos().await?))
}

// ── /api/session ──

async fn get_session(State(state): SharedState) -> Json<Value> {
    Json(state.store.read(ACTIVE_SESSION_JSON).await.unwrap_or(Value::Null))
}

async fn put_session(
    State(state): SharedState,
    Json(session): Json<Value>,
) -> AppResult<Json<Value>> {
    state.store.write(ACTIVE_SESSION_JSON, &session).await?;
    Ok(Json(session))
}

async fn delete_session(State(state): SharedState) -> AppResult<StatusCode> {
    state.store.write(ACTIVE_SESSION_JSON, &Value::Null).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ── /api/failures ──

#[derive(Serialize)]
struct FailureEntry {
    id: String,
    record: Value,
}

/// Map a failure id from the URL to its document key. Ids are plain file
/// stems: ASCII alphanumerics plus `-`, `_` and `.`, not starting with `.`.
fn failure_key(id: &str) -> AppResult<String> {
    let valid = !id.is_empty()
        && !id.starts_with('.')
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if !valid {
        return Err(AppError::BadRequest(format!("invalid failure id {id:?}")));
    }
    Ok(format!("{FAILURES_DIR}/{id}.json"))
}

async fn list_failures(State(state): SharedState) -> AppResult<Json<Vec<FailureEntry>>> {
    let keys = state.store.list(FAILURES_DIR).await?;
    let mut entries = Vec::with_capacity(keys.len());
    for key in keys {
        // Malformed records are skipped, not reported.
        let Some(record) = state.store.read(&key).await else {
            continue;
        };
        let id = key
            .strip_prefix(FAILURES_DIR)
            .and_then(|rest| rest.strip_prefix('/'))
            .and_then(|name| name.strip_suffix(".json"))
            .unwrap_or(&key)
            .to_string();
        entries.push(FailureEntry { id, record });
    }
    Ok(Json(entries))
}

async fn get_failure(State(state): SharedState, Path(id): Path<String>) -> AppResult<Json<Value>> {
    let key = failure_key(&id)?;
    state
        .store
        .read(&key)
        .await
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("failure record {id} not found")))
}

async fn delete_failure(
    State(state): SharedState,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    let key = failure_key(&id)?;
    if !state.store.remove(&key).await? {
        return Err(AppError::NotFound(format!("failure record {id} not found")));
    }
    info!(id = %id, "failure record deleted");
    Ok(StatusCode::NO_CONTENT)
}

// ── GET /api/runs/{owner}/{repo}/{run_id}/failure ──

#[derive(Deserialize)]
struct TailQuery {
    tail: Option<usize>,
}

async fn get_run_failure(
    State(state): SharedState,
    Path((owner, repo, run_id)): Path<(String, String, u64)>,
    Query(params): Query<TailQuery>,
) -> AppResult<Json<FailureLogExtract>> {
    let tail = params.tail.unwrap_or(DEFAULT_TAIL_LINES);
    state
        .github
        .failure_logs(&owner, &repo, run_id, tail)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("no failed job in run {run_id}")))
}
