//! Dispatcher and backpressure configuration.

use serde::{Deserialize, Serialize};

use super::Stage;

/// Configuration for the task dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// How many tasks each stage sweep claims at most.
    #[serde(default = "default_batch_size")]
    pub batch_size: i64,

    /// Destination queue for the download stage.
    #[serde(default = "default_download_queue")]
    pub download_queue: String,

    /// Destination queue for the upload stage.
    #[serde(default = "default_upload_queue")]
    pub upload_queue: String,

    /// Destination queue for the verify stage.
    #[serde(default = "default_verify_queue")]
    pub verify_queue: String,
}

fn default_batch_size() -> i64 {
    5
}

fn default_download_queue() -> String {
    "download".to_string()
}

fn default_upload_queue() -> String {
    "upload".to_string()
}

fn default_verify_queue() -> String {
    "verify".to_string()
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            download_queue: default_download_queue(),
            upload_queue: default_upload_queue(),
            verify_queue: default_verify_queue(),
        }
    }
}

impl DispatchConfig {
    /// Destination queue name for a stage.
    pub fn queue_for(&self, stage: Stage) -> &str {
        match stage {
            Stage::Download => &self.download_queue,
            Stage::Upload => &self.upload_queue,
            Stage::Verify => &self.verify_queue,
        }
    }
}

/// Ceilings for one stage. Zero means unlimited.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StageLimits {
    /// Deny admission when the destination queue is at or past this depth.
    #[serde(default = "default_max_queue_depth")]
    pub max_queue_depth: u64,

    /// Deny admission when this many tasks are already in the stage's
    /// active state.
    #[serde(default)]
    pub max_in_flight: i64,
}

fn default_max_queue_depth() -> u64 {
    100
}

impl Default for StageLimits {
    fn default() -> Self {
        Self {
            max_queue_depth: default_max_queue_depth(),
            max_in_flight: 0,
        }
    }
}

/// Per-stage backpressure ceilings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackpressureConfig {
    /// Download stage limits.
    #[serde(default)]
    pub download: StageLimits,

    /// Upload stage limits. The in-flight ceiling here bounds the number
    /// of concurrently running upload sandboxes.
    #[serde(default = "default_upload_limits")]
    pub upload: StageLimits,

    /// Verify stage limits.
    #[serde(default)]
    pub verify: StageLimits,
}

fn default_upload_limits() -> StageLimits {
    StageLimits {
        max_queue_depth: default_max_queue_depth(),
        max_in_flight: 1,
    }
}

impl Default for BackpressureConfig {
    fn default() -> Self {
        Self {
            download: StageLimits::default(),
            upload: default_upload_limits(),
            verify: StageLimits::default(),
        }
    }
}

impl BackpressureConfig {
    /// Limits for a stage.
    pub fn limits_for(&self, stage: Stage) -> StageLimits {
        match stage {
            Stage::Download => self.download,
            Stage::Upload => self.upload,
            Stage::Verify => self.verify,
        }
    }
}
