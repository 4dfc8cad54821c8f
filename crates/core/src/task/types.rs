//! Core task data types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a pipeline task.
///
/// State machine flow:
/// ```text
/// Pending -> Downloading -> Remuxing -> Uploading -> Verifying -> Complete
///
/// Any non-terminal state can transition to Failed.
/// ```
///
/// Transitions are monotonic along the pipeline order; the only
/// transition that skips ahead is the universal one to `Failed`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Task created, waiting for the dispatcher to claim it.
    Pending,
    /// Dispatched to the download stage.
    Downloading,
    /// Download finished, remux in progress or awaiting upload dispatch.
    ///
    /// A task in this state with `local_path` set is "ready to upload":
    /// the remux output exists and the task is waiting for an account
    /// lease.
    Remuxing,
    /// Dispatched to the upload stage under an account lease.
    Uploading,
    /// Upload stage produced a share reference; verification pending.
    Verifying,
    /// Pipeline traversal finished (terminal).
    Complete,
    /// Unrecoverable failure or retry exhaustion (terminal).
    Failed,
}

impl TaskState {
    /// All states a task passes through while a stage is working on it.
    pub const TRANSIENT: [TaskState; 4] = [
        TaskState::Downloading,
        TaskState::Remuxing,
        TaskState::Uploading,
        TaskState::Verifying,
    ];

    /// Returns the state as a string (matches the persisted column value).
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Downloading => "downloading",
            TaskState::Remuxing => "remuxing",
            TaskState::Uploading => "uploading",
            TaskState::Verifying => "verifying",
            TaskState::Complete => "complete",
            TaskState::Failed => "failed",
        }
    }

    /// Parse a persisted state string.
    pub fn parse(s: &str) -> Option<TaskState> {
        match s {
            "pending" => Some(TaskState::Pending),
            "downloading" => Some(TaskState::Downloading),
            "remuxing" => Some(TaskState::Remuxing),
            "uploading" => Some(TaskState::Uploading),
            "verifying" => Some(TaskState::Verifying),
            "complete" => Some(TaskState::Complete),
            "failed" => Some(TaskState::Failed),
            _ => None,
        }
    }

    /// Returns true if no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Complete | TaskState::Failed)
    }

    /// The next state along the pipeline order, if any.
    pub fn successor(&self) -> Option<TaskState> {
        match self {
            TaskState::Pending => Some(TaskState::Downloading),
            TaskState::Downloading => Some(TaskState::Remuxing),
            TaskState::Remuxing => Some(TaskState::Uploading),
            TaskState::Uploading => Some(TaskState::Verifying),
            TaskState::Verifying => Some(TaskState::Complete),
            TaskState::Complete | TaskState::Failed => None,
        }
    }

    /// Whether a transition from this state to `to` is valid.
    ///
    /// Valid transitions are the defined successor, or `Failed` from any
    /// non-terminal state.
    pub fn can_transition_to(&self, to: TaskState) -> bool {
        if self.is_terminal() {
            return false;
        }
        if to == TaskState::Failed {
            return true;
        }
        self.successor() == Some(to)
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A task: one orchestrated pipeline traversal of a video.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    /// Unique identifier (UUID).
    pub id: String,

    /// The video this traversal belongs to.
    pub video_id: String,

    /// Account leased for the upload leg, once assigned.
    ///
    /// Non-null iff the task is in (or previously reached) the
    /// uploading/verifying states.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,

    /// Current state.
    pub state: TaskState,

    /// Destination queue for the current dispatch leg.
    pub queue_name: String,

    /// Remuxed output file, written by the download/remux stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_path: Option<String>,

    /// Share reference, written by the upload stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub share_url: Option<String>,

    /// Reaper-driven requeue count. Never exceeds `max_retries`.
    pub retries: u32,

    /// Requeue ceiling before the task fails permanently.
    pub max_retries: u32,

    /// Last recorded error, retained for audit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// Set when the dispatcher has published the queue notification for
    /// the current state; cleared by every state transition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dispatched_at: Option<DateTime<Utc>>,

    /// When the task was created.
    pub created_at: DateTime<Utc>,

    /// Last update timestamp; staleness is measured against this.
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Returns true when the remux output exists and the task is waiting
    /// for an account lease.
    pub fn is_ready_for_upload(&self) -> bool {
        self.state == TaskState::Remuxing && self.local_path.is_some()
    }
}

/// Outputs a collaborator stage records alongside a state transition.
#[derive(Debug, Clone, Default)]
pub struct StageOutputs {
    /// Remuxed output path (download/remux stage).
    pub local_path: Option<String>,
    /// Share reference (upload stage).
    pub share_url: Option<String>,
}

impl StageOutputs {
    /// No outputs.
    pub fn none() -> Self {
        Self::default()
    }

    /// Outputs of a finished download/remux.
    pub fn local_path(path: impl Into<String>) -> Self {
        Self {
            local_path: Some(path.into()),
            ..Self::default()
        }
    }

    /// Outputs of a finished upload.
    pub fn share_url(url: impl Into<String>) -> Self {
        Self {
            share_url: Some(url.into()),
            ..Self::default()
        }
    }
}
