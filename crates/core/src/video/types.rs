//! Video entity types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Availability states for a video.
///
/// Coarser than task state: the pipeline stages own most of these
/// writes; the orchestration core only mirrors terminal failure.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VideoStatus {
    /// Registered by the crawler, not yet processed.
    Discovered,
    /// Download in progress.
    Downloading,
    /// Local file available, awaiting upload.
    Downloaded,
    /// Upload in progress.
    Uploading,
    /// Share reference verified and playable.
    Available,
    /// Share reference aged out.
    Expired,
    /// Pipeline traversal failed permanently.
    Failed,
}

impl VideoStatus {
    /// Returns the status as a string (matches the persisted column value).
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoStatus::Discovered => "discovered",
            VideoStatus::Downloading => "downloading",
            VideoStatus::Downloaded => "downloaded",
            VideoStatus::Uploading => "uploading",
            VideoStatus::Available => "available",
            VideoStatus::Expired => "expired",
            VideoStatus::Failed => "failed",
        }
    }

    /// Parse a persisted status string.
    pub fn parse(s: &str) -> Option<VideoStatus> {
        match s {
            "discovered" => Some(VideoStatus::Discovered),
            "downloading" => Some(VideoStatus::Downloading),
            "downloaded" => Some(VideoStatus::Downloaded),
            "uploading" => Some(VideoStatus::Uploading),
            "available" => Some(VideoStatus::Available),
            "expired" => Some(VideoStatus::Expired),
            "failed" => Some(VideoStatus::Failed),
            _ => None,
        }
    }
}

/// A media item tracked across the whole pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Video {
    /// Unique identifier (UUID).
    pub id: String,

    /// Display title.
    pub title: String,

    /// Where the downloader fetches the item from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,

    /// Remuxed local file, written by the download stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_path: Option<String>,

    /// Share reference, written by the upload stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub share_url: Option<String>,

    /// Size of the remuxed file in bytes; feeds the lease quota check.
    pub size_bytes: i64,

    /// Current availability.
    pub status: VideoStatus,

    /// Opaque domain payload (titles, tags, whatever the crawler found).
    /// The orchestration core never inspects this.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_json: Option<String>,

    /// When the video was registered.
    pub created_at: DateTime<Utc>,

    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}
