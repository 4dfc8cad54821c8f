//! Work queue payload types.

use serde::{Deserialize, Serialize};

/// A dispatch notification carried between pipeline stages.
///
/// Notifications are hints, never a truth source: a consumer must
/// re-check store state before acting, and must tolerate duplicates
/// (delivery is at-least-once) as well as unknown additional fields
/// (captured in `extra` for forward compatibility).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Notification {
    /// Task this notification belongs to.
    pub task_id: String,

    /// Owning video.
    pub video_id: String,

    /// Where the downloader fetches the item from (download stage).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,

    /// Remuxed local file (upload stage).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_path: Option<String>,

    /// Leased account for the upload (upload stage).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,

    /// Share reference to verify (verify stage).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub share_url: Option<String>,

    /// Requeue count at publish time.
    #[serde(default)]
    pub retries: u32,

    /// Requeue ceiling at publish time.
    #[serde(default)]
    pub max_retries: u32,

    /// Fields this version does not know about.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Notification {
    /// Create a notification for a task.
    pub fn new(task_id: impl Into<String>, video_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            video_id: video_id.into(),
            ..Self::default()
        }
    }

    /// Attach the download source.
    pub fn with_source_url(mut self, url: impl Into<String>) -> Self {
        self.source_url = Some(url.into());
        self
    }

    /// Attach the remuxed file path.
    pub fn with_local_path(mut self, path: impl Into<String>) -> Self {
        self.local_path = Some(path.into());
        self
    }

    /// Attach the leased account.
    pub fn with_account_id(mut self, id: impl Into<String>) -> Self {
        self.account_id = Some(id.into());
        self
    }

    /// Attach the share reference.
    pub fn with_share_url(mut self, url: impl Into<String>) -> Self {
        self.share_url = Some(url.into());
        self
    }

    /// Attach the retry counters.
    pub fn with_retries(mut self, retries: u32, max_retries: u32) -> Self {
        self.retries = retries;
        self.max_retries = max_retries;
        self
    }
}

/// One consumed message. The message stays hidden until `ack` or the
/// visibility timeout, whichever comes first.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// Broker-assigned message ID, used to ack.
    pub id: i64,
    /// The queue this was consumed from.
    pub queue: String,
    /// Decoded payload.
    pub notification: Notification,
    /// How many times this message has been delivered (1 = first).
    pub delivery_count: u32,
}
