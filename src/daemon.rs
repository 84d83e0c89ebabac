//! HTTP surface: a thin job-queue API. Clients enqueue a job, poll it
//! (which also drives processing), then fetch the results payload.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::config::DaemonConfig;
use crate::jobs::{queue_depth, JobQueue};
use crate::traits::KnowledgeStore;

pub struct AppState {
    pub queue: Arc<JobQueue>,
    pub store: Arc<dyn KnowledgeStore>,
}

#[derive(Debug, Deserialize)]
pub struct JobRequest {
    pub job_type: String,
    pub project_id: String,
    pub user_id: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/jobs", post(create_job))
        .route("/jobs/:id", get(poll_job))
        .route("/jobs/:id/results", get(job_results))
        .with_state(state)
}

pub async fn serve(state: Arc<AppState>, config: &DaemonConfig) -> anyhow::Result<()> {
    let app = build_router(state);
    let addr = format!("{}:{}", config.bind, config.port);
    info!(%addr, "Daemon listening");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

type ApiError = (StatusCode, Json<Value>);

fn bad_request(message: String) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message })))
}

fn not_found() -> ApiError {
    (StatusCode::NOT_FOUND, Json(json!({ "error": "not found" })))
}

fn internal(e: anyhow::Error) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": e.to_string() })),
    )
}

async fn health(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let queued = queue_depth(state.store.as_ref()).await.map_err(internal)?;
    Ok(Json(json!({ "status": "ok", "queued_jobs": queued })))
}

async fn create_job(
    State(state): State<Arc<AppState>>,
    Json(req): Json<JobRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let session_id = req
        .session_id
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let job = state
        .queue
        .enqueue(
            &req.job_type,
            &req.project_id,
            &req.user_id,
            &session_id,
            req.message,
        )
        .await
        .map_err(|e| bad_request(e.to_string()))?;
    let body = serde_json::to_value(&job).map_err(|e| internal(e.into()))?;
    Ok((StatusCode::ACCEPTED, Json(body)))
}

async fn poll_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let job = state
        .queue
        .poll(&id)
        .await
        .map_err(internal)?
        .ok_or_else(not_found)?;
    let body = serde_json::to_value(&job).map_err(|e| internal(e.into()))?;
    Ok(Json(body))
}

async fn job_results(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let results = state
        .queue
        .results(&id)
        .await
        .map_err(internal)?
        .ok_or_else(not_found)?;
    let body = serde_json::to_value(&results).map_err(|e| internal(e.into()))?;
    Ok(Json(body))
}
