//! Task API handlers.
//!
//! Besides read access, this module carries the collaborator contract:
//! `POST /tasks/{id}/report` is how an external stage writes its
//! terminal sub-state to the store, and `POST /tasks/{id}/fail` is the
//! external cancellation path. In-flight leases referencing a failed
//! task are reclaimed by the next reaper sweep, not synchronously.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use conveyor_core::{
    AccountStore, StageOutputs, Task, TaskError, TaskFilter, TaskState, TaskStore, VideoStatus,
    VideoStore,
};
use tracing::warn;

use super::handlers::ErrorResponse;
use crate::state::AppState;

/// Maximum allowed limit for task queries
const MAX_LIMIT: i64 = 1000;

/// Default limit for task queries
const DEFAULT_LIMIT: i64 = 100;

/// Query parameters for listing tasks
#[derive(Debug, Deserialize)]
pub struct ListTasksParams {
    /// Filter by state
    pub state: Option<String>,
    /// Filter by owning video
    pub video_id: Option<String>,
    /// Maximum number of tasks to return
    pub limit: Option<i64>,
    /// Pagination offset
    pub offset: Option<i64>,
}

/// Request body for failing a task
#[derive(Debug, Deserialize)]
pub struct FailTaskBody {
    /// Reason recorded on the task
    pub reason: Option<String>,
}

/// Collaborator stage report.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StageReport {
    /// Download/remux stage finished; output file is ready.
    RemuxComplete { local_path: String, size_bytes: i64 },
    /// Upload stage finished; a share reference exists.
    UploadComplete { share_url: String },
    /// Verify stage confirmed the share reference resolves.
    Verified,
    /// The stage knows retrying is futile.
    StageFailed { error: String },
}

/// Response for listing tasks
#[derive(Debug, Serialize)]
pub struct ListTasksResponse {
    pub tasks: Vec<Task>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn task_error_response(e: TaskError) -> ApiError {
    match e {
        TaskError::NotFound(id) => (
            StatusCode::NOT_FOUND,
            ErrorResponse::new(format!("Task not found: {}", id)),
        ),
        TaskError::InvalidTransition { .. } => (StatusCode::CONFLICT, ErrorResponse::new(e)),
        TaskError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, ErrorResponse::new(e)),
    }
}

/// List tasks with optional filters
pub async fn list_tasks(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListTasksParams>,
) -> Result<Json<ListTasksResponse>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = params.offset.unwrap_or(0).max(0);

    let mut filter = TaskFilter::new().with_limit(limit).with_offset(offset);

    if let Some(ref state_param) = params.state {
        let Some(task_state) = TaskState::parse(state_param) else {
            return Err((
                StatusCode::BAD_REQUEST,
                ErrorResponse::new(format!("Unknown task state: {}", state_param)),
            ));
        };
        filter = filter.with_state(task_state);
    }

    if let Some(ref video_id) = params.video_id {
        filter = filter.with_video_id(video_id);
    }

    let tasks = state.tasks().list(&filter).map_err(task_error_response)?;

    let count_filter = TaskFilter {
        limit: i64::MAX,
        offset: 0,
        ..filter
    };
    let total = state
        .tasks()
        .count(&count_filter)
        .map_err(task_error_response)?;

    Ok(Json(ListTasksResponse {
        tasks,
        total,
        limit,
        offset,
    }))
}

/// Get a task by ID
pub async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Task>, ApiError> {
    match state.tasks().get(&id) {
        Ok(Some(task)) => Ok(Json(task)),
        Ok(None) => Err((
            StatusCode::NOT_FOUND,
            ErrorResponse::new(format!("Task not found: {}", id)),
        )),
        Err(e) => Err(task_error_response(e)),
    }
}

/// Externally mark a task failed
pub async fn fail_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Option<Json<FailTaskBody>>,
) -> Result<Json<Task>, ApiError> {
    let reason = body
        .and_then(|b| b.reason.clone())
        .unwrap_or_else(|| "externally cancelled".to_string());

    let task = state
        .tasks()
        .mark_failed(&id, &reason)
        .map_err(task_error_response)?;

    if let Err(e) = state.videos().update_status(&task.video_id, VideoStatus::Failed) {
        warn!(video_id = %task.video_id, error = %e, "failed to mirror video status");
    }

    Ok(Json(task))
}

/// Collaborator stage report: the stage's own store write
pub async fn report_stage(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(report): Json<StageReport>,
) -> Result<Json<Task>, ApiError> {
    let current = state
        .tasks()
        .get(&id)
        .map_err(task_error_response)?
        .ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                ErrorResponse::new(format!("Task not found: {}", id)),
            )
        })?;

    let task = match report {
        StageReport::RemuxComplete {
            local_path,
            size_bytes,
        } => {
            // Two-step stages may already have advanced to remuxing; the
            // output write is the same either way.
            let task = if current.state == TaskState::Remuxing {
                state
                    .tasks()
                    .record_remux_output(&id, &local_path)
                    .map_err(task_error_response)?;
                state
                    .tasks()
                    .get(&id)
                    .map_err(task_error_response)?
                    .ok_or_else(|| {
                        (
                            StatusCode::NOT_FOUND,
                            ErrorResponse::new(format!("Task not found: {}", id)),
                        )
                    })?
            } else {
                state
                    .tasks()
                    .advance(
                        &id,
                        TaskState::Remuxing,
                        StageOutputs::local_path(local_path.clone()),
                    )
                    .map_err(task_error_response)?
            };

            if let Err(e) =
                state
                    .videos()
                    .set_download_result(&task.video_id, &local_path, size_bytes)
            {
                warn!(video_id = %task.video_id, error = %e, "failed to record download result");
            }
            task
        }

        StageReport::UploadComplete { share_url } => {
            let task = state
                .tasks()
                .advance(&id, TaskState::Verifying, StageOutputs::share_url(share_url.clone()))
                .map_err(task_error_response)?;

            if let Err(e) = state.videos().set_upload_result(&task.video_id, &share_url) {
                warn!(video_id = %task.video_id, error = %e, "failed to record upload result");
            }

            // Charge the uploaded bytes against the leased account.
            if let Some(account_id) = &task.account_id {
                let uploaded = state
                    .videos()
                    .get(&task.video_id)
                    .ok()
                    .flatten()
                    .map(|v| v.size_bytes)
                    .unwrap_or(0);
                if let Err(e) = state.accounts().apply_upload_usage(account_id, uploaded) {
                    warn!(account_id = %account_id, error = %e, "failed to apply upload usage");
                }
            }
            task
        }

        StageReport::Verified => state
            .tasks()
            .advance(&id, TaskState::Complete, StageOutputs::none())
            .map_err(task_error_response)?,

        StageReport::StageFailed { error } => {
            let task = state
                .tasks()
                .mark_failed(&id, &error)
                .map_err(task_error_response)?;
            if let Err(e) = state
                .videos()
                .update_status(&task.video_id, VideoStatus::Failed)
            {
                warn!(video_id = %task.video_id, error = %e, "failed to mirror video status");
            }
            task
        }
    };

    Ok(Json(task))
}
