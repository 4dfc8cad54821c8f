//! Video storage trait and types.

use thiserror::Error;

use super::{Video, VideoStatus};

/// Error type for video operations.
#[derive(Debug, Error)]
pub enum VideoError {
    /// Video not found.
    #[error("video not found: {0}")]
    NotFound(String),

    /// Database error.
    #[error("database error: {0}")]
    Database(String),
}

impl From<rusqlite::Error> for VideoError {
    fn from(e: rusqlite::Error) -> Self {
        VideoError::Database(e.to_string())
    }
}

/// Request to register a newly discovered video.
#[derive(Debug, Clone)]
pub struct CreateVideoRequest {
    /// Display title.
    pub title: String,
    /// Where the downloader fetches the item from.
    pub source_url: Option<String>,
    /// Opaque domain payload.
    pub metadata_json: Option<String>,
}

/// Trait for video storage backends.
///
/// The store owns every persisted field; the orchestration core reads
/// videos to resolve queue payloads and mirrors terminal failure.
/// Collaborator stages perform the remaining writes.
pub trait VideoStore: Send + Sync {
    /// Register a newly discovered video.
    fn create(&self, request: CreateVideoRequest) -> Result<Video, VideoError>;

    /// Get a video by ID.
    fn get(&self, id: &str) -> Result<Option<Video>, VideoError>;

    /// List videos, newest first.
    fn list(&self, limit: i64, offset: i64) -> Result<Vec<Video>, VideoError>;

    /// Count videos with the given status.
    fn count_by_status(&self, status: VideoStatus) -> Result<i64, VideoError>;

    /// Set the status and bump `updated_at`.
    fn update_status(&self, id: &str, status: VideoStatus) -> Result<(), VideoError>;

    /// Download-stage write: record the remuxed file and its size.
    fn set_download_result(
        &self,
        id: &str,
        local_path: &str,
        size_bytes: i64,
    ) -> Result<(), VideoError>;

    /// Upload-stage write: record the share reference.
    fn set_upload_result(&self, id: &str, share_url: &str) -> Result<(), VideoError>;

    /// Mark available videos whose share reference predates `max_age_days`
    /// as expired. Returns the number of videos expired.
    fn expire_stale(&self, max_age_days: i64) -> Result<usize, VideoError>;
}
