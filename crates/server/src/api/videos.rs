//! Video API handlers.
//!
//! `POST /videos` is the crawler's hand-off point: it registers a
//! discovered video and creates the task that will carry it through the
//! pipeline.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use conveyor_core::{
    CreateTaskRequest, CreateVideoRequest, Task, TaskStore, Video, VideoStore,
};

use super::handlers::ErrorResponse;
use crate::state::AppState;

/// Default requeue ceiling for new tasks.
const DEFAULT_MAX_RETRIES: u32 = 3;

/// Maximum allowed limit for video queries
const MAX_LIMIT: i64 = 1000;

/// Default limit for video queries
const DEFAULT_LIMIT: i64 = 100;

/// Request body for registering a video
#[derive(Debug, Deserialize)]
pub struct CreateVideoBody {
    /// Display title
    pub title: String,
    /// Where the downloader fetches the item from
    pub source_url: Option<String>,
    /// Opaque domain payload
    pub metadata_json: Option<String>,
    /// Requeue ceiling for the created task
    pub max_retries: Option<u32>,
}

/// Query parameters for listing videos
#[derive(Debug, Deserialize)]
pub struct ListVideosParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Response for video registration: the video and its pipeline task
#[derive(Debug, Serialize)]
pub struct CreateVideoResponse {
    pub video: Video,
    pub task: Task,
}

/// Register a discovered video and create its pipeline task
pub async fn create_video(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateVideoBody>,
) -> Result<(StatusCode, Json<CreateVideoResponse>), impl IntoResponse> {
    let video = state
        .videos()
        .create(CreateVideoRequest {
            title: body.title,
            source_url: body.source_url,
            metadata_json: body.metadata_json,
        })
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, ErrorResponse::new(e)))?;

    let task = state
        .tasks()
        .create(CreateTaskRequest {
            video_id: video.id.clone(),
            queue_name: state.download_queue_name().to_string(),
            max_retries: body.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
        })
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, ErrorResponse::new(e)))?;

    Ok::<_, (StatusCode, Json<ErrorResponse>)>((StatusCode::CREATED, Json(CreateVideoResponse { video, task })))
}

/// List videos, newest first
pub async fn list_videos(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListVideosParams>,
) -> Result<Json<Vec<Video>>, impl IntoResponse> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = params.offset.unwrap_or(0).max(0);

    match state.videos().list(limit, offset) {
        Ok(videos) => Ok(Json(videos)),
        Err(e) => Err((StatusCode::INTERNAL_SERVER_ERROR, ErrorResponse::new(e))),
    }
}

/// Get a video by ID
pub async fn get_video(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Video>, impl IntoResponse> {
    match state.videos().get(&id) {
        Ok(Some(video)) => Ok(Json(video)),
        Ok(None) => Err((
            StatusCode::NOT_FOUND,
            ErrorResponse::new(format!("Video not found: {}", id)),
        )),
        Err(e) => Err((StatusCode::INTERNAL_SERVER_ERROR, ErrorResponse::new(e))),
    }
}
