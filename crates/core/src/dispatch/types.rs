//! Types for the task dispatcher.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::account::LeaseError;
use crate::queue::QueueError;
use crate::task::{TaskError, TaskState};
use crate::video::VideoError;

/// Errors that can occur during dispatch.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Task store error.
    #[error("task store error: {0}")]
    Task(#[from] TaskError),

    /// Video store error.
    #[error("video store error: {0}")]
    Video(#[from] VideoError),

    /// Queue error.
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    /// Lease error other than the recoverable no-eligible-account case.
    #[error("lease error: {0}")]
    Lease(#[from] LeaseError),
}

/// A dispatchable pipeline stage.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Crawl output -> local file.
    Download,
    /// Local file -> external storage, under an account lease.
    Upload,
    /// Share reference -> verified availability.
    Verify,
}

impl Stage {
    /// All stages in dispatch order.
    pub const ALL: [Stage; 3] = [Stage::Download, Stage::Upload, Stage::Verify];

    /// Returns the stage as a string (used in metric labels).
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Download => "download",
            Stage::Upload => "upload",
            Stage::Verify => "verify",
        }
    }

    /// The task state that counts as "in flight" for this stage's
    /// concurrency ceiling.
    pub fn active_state(&self) -> TaskState {
        match self {
            Stage::Download => TaskState::Downloading,
            Stage::Upload => TaskState::Uploading,
            Stage::Verify => TaskState::Verifying,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counters from one dispatch sweep.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct SweepStats {
    /// Tasks dispatched to the download stage.
    pub dispatched_download: u64,
    /// Tasks dispatched to the upload stage.
    pub dispatched_upload: u64,
    /// Verify notifications published.
    pub dispatched_verify: u64,
    /// Stages skipped because of backpressure.
    pub skipped_backpressure: u64,
    /// Upload dispatches deferred for lack of an eligible account.
    pub deferred_no_account: u64,
    /// Claims lost to a concurrent dispatcher instance.
    pub lost_claims: u64,
}

impl SweepStats {
    /// Total tasks dispatched across all stages.
    pub fn total_dispatched(&self) -> u64 {
        self.dispatched_download + self.dispatched_upload + self.dispatched_verify
    }
}
