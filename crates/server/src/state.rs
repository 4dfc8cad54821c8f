use std::sync::Arc;

use conveyor_core::{
    AccountStore, Authenticator, Config, LeaseManager, Orchestrator, SanitizedConfig, TaskStore,
    VideoStore,
};

/// Shared application state
pub struct AppState {
    config: Config,
    authenticator: Arc<dyn Authenticator>,
    tasks: Arc<dyn TaskStore>,
    videos: Arc<dyn VideoStore>,
    accounts: Arc<dyn AccountStore>,
    leases: Arc<LeaseManager>,
    orchestrator: Arc<Orchestrator>,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Config,
        authenticator: Arc<dyn Authenticator>,
        tasks: Arc<dyn TaskStore>,
        videos: Arc<dyn VideoStore>,
        accounts: Arc<dyn AccountStore>,
        leases: Arc<LeaseManager>,
        orchestrator: Arc<Orchestrator>,
    ) -> Self {
        Self {
            config,
            authenticator,
            tasks,
            videos,
            accounts,
            leases,
            orchestrator,
        }
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    pub fn authenticator(&self) -> &dyn Authenticator {
        self.authenticator.as_ref()
    }

    pub fn tasks(&self) -> &dyn TaskStore {
        self.tasks.as_ref()
    }

    pub fn videos(&self) -> &dyn VideoStore {
        self.videos.as_ref()
    }

    pub fn accounts(&self) -> &dyn AccountStore {
        self.accounts.as_ref()
    }

    pub fn leases(&self) -> &LeaseManager {
        &self.leases
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Destination queue for newly created tasks.
    pub fn download_queue_name(&self) -> &str {
        &self.config.dispatch.download_queue
    }
}
