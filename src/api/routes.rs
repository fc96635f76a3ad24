//! Run API route handlers.
//!
//! All endpoints return JSON. Handlers share one `ForecastEngine` through
//! `Arc<ApiContext>`; reads go straight to its store.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;
use uuid::Uuid;

use crate::engine::ForecastEngine;
use crate::types::{ForecastDefinition, ForecastRun, RunDetail, RunStatus};

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

pub struct ApiContext {
    pub engine: ForecastEngine,
}

pub type ApiState = Arc<ApiContext>;

const DEFAULT_RUN_LIMIT: usize = 20;
const MAX_RUN_LIMIT: usize = 200;

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunAccepted {
    pub run_id: Uuid,
    pub forecast_id: String,
    pub status: RunStatus,
}

#[derive(Debug, Deserialize)]
pub struct RunsQuery {
    pub limit: Option<usize>,
}

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    Internal(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(what) => (StatusCode::NOT_FOUND, what),
            ApiError::Internal(e) => {
                error!(error = %e, "API request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::Internal(e)
    }
}

type ApiResult<T> = Result<T, ApiError>;

async fn require_definition(state: &ApiState, forecast_id: &str) -> ApiResult<ForecastDefinition> {
    state
        .engine
        .store()
        .get_definition(forecast_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("forecast {forecast_id} not found")))
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// GET /api/forecasts
pub async fn list_forecasts(State(state): State<ApiState>) -> ApiResult<Json<Vec<ForecastDefinition>>> {
    Ok(Json(state.engine.store().list_definitions().await?))
}

/// POST /api/forecasts/:id/runs
///
/// Returns as soon as the run exists; poll `GET /api/runs/:id` for the outcome.
pub async fn trigger_run(
    State(state): State<ApiState>,
    Path(forecast_id): Path<String>,
) -> ApiResult<(StatusCode, Json<RunAccepted>)> {
    require_definition(&state, &forecast_id).await?;
    let ticket = state.engine.start_run(&forecast_id).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(RunAccepted {
            run_id: ticket.run_id,
            forecast_id,
            status: RunStatus::Running,
        }),
    ))
}

/// GET /api/forecasts/:id/runs?limit=N
pub async fn list_runs(
    State(state): State<ApiState>,
    Path(forecast_id): Path<String>,
    Query(query): Query<RunsQuery>,
) -> ApiResult<Json<Vec<ForecastRun>>> {
    require_definition(&state, &forecast_id).await?;
    let limit = query.limit.unwrap_or(DEFAULT_RUN_LIMIT).min(MAX_RUN_LIMIT);
    Ok(Json(state.engine.store().list_runs(&forecast_id, limit).await?))
}

/// GET /api/runs/:id
pub async fn get_run(
    State(state): State<ApiState>,
    Path(run_id): Path<Uuid>,
) -> ApiResult<Json<RunDetail>> {
    state
        .engine
        .store()
        .get_run_detail(run_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("run {run_id} not found")))
}

/// DELETE /api/runs/:id
pub async fn delete_run(
    State(state): State<ApiState>,
    Path(run_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    if state.engine.store().delete_run(run_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("run {run_id} not found")))
    }
}

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}
