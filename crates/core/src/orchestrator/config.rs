//! Orchestrator configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the orchestrator runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Enable/disable the background loops.
    /// When disabled, sweeps must be triggered manually via the API.
    #[serde(default)]
    pub enabled: bool,

    /// How often to run a dispatch sweep (milliseconds).
    #[serde(default = "default_dispatch_interval")]
    pub dispatch_interval_ms: u64,

    /// How often to run a reaper sweep (milliseconds).
    #[serde(default = "default_reap_interval")]
    pub reap_interval_ms: u64,
}

fn default_dispatch_interval() -> u64 {
    3000 // 3 seconds
}

fn default_reap_interval() -> u64 {
    30_000 // 30 seconds
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dispatch_interval_ms: default_dispatch_interval(),
            reap_interval_ms: default_reap_interval(),
        }
    }
}
