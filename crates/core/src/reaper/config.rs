//! Reaper configuration: the per-state timeout table.

use serde::{Deserialize, Serialize};

/// Per-state time-in-state ceilings and retention windows.
///
/// A task that sits in a transient state longer than its timeout is
/// treated as orphaned, whatever the cause: crashed worker, lost queue
/// message, or wedged sandbox all look the same from the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReaperConfig {
    /// Ceiling for `downloading` (covers download and remux start).
    #[serde(default = "default_downloading_timeout")]
    pub downloading_timeout_secs: u64,

    /// Ceiling for `remuxing` without a recorded output. Ready-to-upload
    /// tasks waiting on an account are exempt.
    #[serde(default = "default_remuxing_timeout")]
    pub remuxing_timeout_secs: u64,

    /// Ceiling for `uploading`. Should exceed the lease duration so a
    /// healthy upload can extend its lease before being reaped.
    #[serde(default = "default_uploading_timeout")]
    pub uploading_timeout_secs: u64,

    /// Ceiling for `verifying`.
    #[serde(default = "default_verifying_timeout")]
    pub verifying_timeout_secs: u64,

    /// Available videos whose share reference is older than this are
    /// marked expired.
    #[serde(default = "default_video_retention")]
    pub video_retention_days: i64,
}

fn default_downloading_timeout() -> u64 {
    3600
}

fn default_remuxing_timeout() -> u64 {
    1800
}

fn default_uploading_timeout() -> u64 {
    7200
}

fn default_verifying_timeout() -> u64 {
    900
}

fn default_video_retention() -> i64 {
    30
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            downloading_timeout_secs: default_downloading_timeout(),
            remuxing_timeout_secs: default_remuxing_timeout(),
            uploading_timeout_secs: default_uploading_timeout(),
            verifying_timeout_secs: default_verifying_timeout(),
            video_retention_days: default_video_retention(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ReaperConfig::default();
        assert_eq!(config.downloading_timeout_secs, 3600);
        assert_eq!(config.uploading_timeout_secs, 7200);
        assert_eq!(config.video_retention_days, 30);
    }

    #[test]
    fn test_deserialize_partial() {
        let toml = r#"
            uploading_timeout_secs = 600
        "#;
        let config: ReaperConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.uploading_timeout_secs, 600);
        assert_eq!(config.verifying_timeout_secs, 900);
    }
}
