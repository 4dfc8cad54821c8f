//! Orchestrator API handlers.

use axum::{extract::State, http::StatusCode, Json};
use std::sync::Arc;

use conveyor_core::{OrchestratorStatus, ReapStats, SweepStats};

use super::handlers::ErrorResponse;
use crate::state::AppState;

type ApiError = (StatusCode, Json<ErrorResponse>);

/// Current orchestrator status with per-state task counts
pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<OrchestratorStatus> {
    Json(state.orchestrator().status())
}

/// Run one dispatch sweep now
pub async fn tick(State(state): State<Arc<AppState>>) -> Result<Json<SweepStats>, ApiError> {
    state
        .orchestrator()
        .tick()
        .await
        .map(Json)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, ErrorResponse::new(e)))
}

/// Run one reaper sweep now
pub async fn reap(State(state): State<Arc<AppState>>) -> Result<Json<ReapStats>, ApiError> {
    state
        .orchestrator()
        .reap()
        .map(Json)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, ErrorResponse::new(e)))
}
