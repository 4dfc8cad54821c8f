//! Task storage trait and types.

use chrono::{DateTime, Utc};
use thiserror::Error;

use super::{StageOutputs, Task, TaskState};

/// Error type for task operations.
#[derive(Debug, Error)]
pub enum TaskError {
    /// Task not found.
    #[error("task not found: {0}")]
    NotFound(String),

    /// The requested transition is not part of the state machine.
    #[error("invalid transition for task {task_id}: {from} -> {to}")]
    InvalidTransition {
        task_id: String,
        from: &'static str,
        to: &'static str,
    },

    /// Database error.
    #[error("database error: {0}")]
    Database(String),
}

impl From<rusqlite::Error> for TaskError {
    fn from(e: rusqlite::Error) -> Self {
        TaskError::Database(e.to_string())
    }
}

/// Request to create a new task.
#[derive(Debug, Clone)]
pub struct CreateTaskRequest {
    /// Video this traversal belongs to.
    pub video_id: String,
    /// Initial destination queue (the download queue).
    pub queue_name: String,
    /// Requeue ceiling.
    pub max_retries: u32,
}

/// Filter for querying tasks.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    /// Filter by state.
    pub state: Option<TaskState>,
    /// Filter by owning video.
    pub video_id: Option<String>,
    /// Maximum number of results.
    pub limit: i64,
    /// Offset for pagination.
    pub offset: i64,
}

impl TaskFilter {
    /// Create a new filter with defaults.
    pub fn new() -> Self {
        Self {
            state: None,
            video_id: None,
            limit: 100,
            offset: 0,
        }
    }

    /// Filter by state.
    pub fn with_state(mut self, state: TaskState) -> Self {
        self.state = Some(state);
        self
    }

    /// Filter by owning video.
    pub fn with_video_id(mut self, video_id: impl Into<String>) -> Self {
        self.video_id = Some(video_id.into());
        self
    }

    /// Set limit.
    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    /// Set offset.
    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }
}

/// Trait for task storage backends.
///
/// Claims are conditional updates: the write succeeds only if the row
/// still matches the expected predicate, so concurrent dispatcher
/// instances can never both win the same task. A claim that returns
/// `false` means another actor got there first; the caller moves on.
pub trait TaskStore: Send + Sync {
    /// Create a new task in `Pending`.
    fn create(&self, request: CreateTaskRequest) -> Result<Task, TaskError>;

    /// Get a task by ID.
    fn get(&self, id: &str) -> Result<Option<Task>, TaskError>;

    /// List tasks matching the filter.
    fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>, TaskError>;

    /// Count tasks matching the filter.
    fn count(&self, filter: &TaskFilter) -> Result<i64, TaskError>;

    /// Count tasks currently in the given state.
    fn count_in_state(&self, state: TaskState) -> Result<i64, TaskError>;

    /// Pending tasks, oldest first.
    fn list_pending(&self, limit: i64) -> Result<Vec<Task>, TaskError>;

    /// Ready-to-upload tasks (remuxing with a local path), oldest first.
    fn list_ready_for_upload(&self, limit: i64) -> Result<Vec<Task>, TaskError>;

    /// Verifying tasks whose notification has not been published yet.
    fn list_awaiting_verify_dispatch(&self, limit: i64) -> Result<Vec<Task>, TaskError>;

    /// Claim a pending task for download dispatch (`pending -> downloading`).
    fn claim_for_download(&self, id: &str) -> Result<bool, TaskError>;

    /// Claim a ready-to-upload task under an account lease
    /// (`remuxing -> uploading`).
    fn claim_for_upload(
        &self,
        id: &str,
        account_id: &str,
        queue_name: &str,
    ) -> Result<bool, TaskError>;

    /// Claim a verifying task for notification publish. Marks the task
    /// dispatched without changing its state.
    fn claim_verify_dispatch(&self, id: &str, queue_name: &str) -> Result<bool, TaskError>;

    /// Collaborator write: advance the task along the state machine,
    /// recording stage outputs. Rejects transitions that are not the
    /// defined successor or `Failed`.
    fn advance(
        &self,
        id: &str,
        new_state: TaskState,
        outputs: StageOutputs,
    ) -> Result<Task, TaskError>;

    /// Collaborator write: mark the task failed from any non-terminal
    /// state.
    fn mark_failed(&self, id: &str, error: &str) -> Result<Task, TaskError>;

    /// Collaborator write: record the remux output path for a task still
    /// in `Remuxing`, making it ready for upload dispatch. Returns
    /// `false` if the task has already moved on.
    fn record_remux_output(&self, id: &str, local_path: &str) -> Result<bool, TaskError>;

    /// Tasks stuck in `state` since before `cutoff`.
    fn list_stale(&self, state: TaskState, cutoff: DateTime<Utc>) -> Result<Vec<Task>, TaskError>;

    /// Reaper write: requeue a stale task. Conditional on the task still
    /// being in `from` with retry budget left; increments `retries`,
    /// clears the dispatch marker.
    fn retry_stale(
        &self,
        id: &str,
        from: TaskState,
        to: TaskState,
        error: &str,
    ) -> Result<bool, TaskError>;

    /// Reaper write: fail a stale task whose retry budget is exhausted.
    fn fail_exhausted(&self, id: &str, from: TaskState, error: &str) -> Result<bool, TaskError>;
}
