//! Types for the orchestrator runner.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dispatch::DispatchError;
use crate::reaper::ReaperError;
use crate::task::TaskError;

/// Errors that can occur during orchestration.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Dispatch error.
    #[error("dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    /// Reaper error.
    #[error("reaper error: {0}")]
    Reaper(#[from] ReaperError),

    /// Task store error.
    #[error("task store error: {0}")]
    Task(#[from] TaskError),
}

/// Current status of the orchestrator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestratorStatus {
    /// Whether the loops are running.
    pub running: bool,
    /// Tasks waiting for download dispatch.
    pub pending_count: i64,
    /// Tasks in the download stage.
    pub downloading_count: i64,
    /// Tasks remuxing or awaiting upload dispatch.
    pub remuxing_count: i64,
    /// Tasks in the upload stage.
    pub uploading_count: i64,
    /// Tasks in the verify stage.
    pub verifying_count: i64,
    /// Finished tasks.
    pub complete_count: i64,
    /// Permanently failed tasks.
    pub failed_count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_default() {
        let status = OrchestratorStatus::default();
        assert!(!status.running);
        assert_eq!(status.pending_count, 0);
    }

    #[test]
    fn test_status_serialization() {
        let status = OrchestratorStatus {
            running: true,
            pending_count: 3,
            ..OrchestratorStatus::default()
        };
        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains("\"running\":true"));
        assert!(json.contains("\"pending_count\":3"));
    }
}
