//! Orchestrator runner.
//!
//! Ties the dispatcher and reaper into two tick-based loops. No state
//! is shared between orchestrator instances except the store itself, so
//! several instances may run against one database; the conditional
//! claims inside the components keep them from stepping on each other.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::dispatch::{SweepStats, TaskDispatcher};
use crate::reaper::{ReapStats, Reaper};
use crate::task::{TaskState, TaskStore};

use super::config::OrchestratorConfig;
use super::types::{OrchestratorError, OrchestratorStatus};

/// Drives the dispatch and reclamation loops.
pub struct Orchestrator {
    config: OrchestratorConfig,
    dispatcher: Arc<TaskDispatcher>,
    reaper: Arc<Reaper>,
    tasks: Arc<dyn TaskStore>,

    // Runtime state
    running: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Orchestrator {
    /// Create a new orchestrator.
    pub fn new(
        config: OrchestratorConfig,
        dispatcher: Arc<TaskDispatcher>,
        reaper: Arc<Reaper>,
        tasks: Arc<dyn TaskStore>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            dispatcher,
            reaper,
            tasks,
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
        }
    }

    /// Start the orchestrator (spawns background loops).
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("orchestrator already running");
            return;
        }

        info!("starting orchestrator");
        self.spawn_dispatch_loop();
        self.spawn_reap_loop();
        info!("orchestrator started");
    }

    /// Stop the orchestrator gracefully.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            warn!("orchestrator not running");
            return;
        }

        info!("stopping orchestrator");
        let _ = self.shutdown_tx.send(());
        // Give the loops a moment to finish their current sweep.
        tokio::time::sleep(Duration::from_millis(200)).await;
        info!("orchestrator stopped");
    }

    /// Run one dispatch sweep now, regardless of the loop schedule.
    pub async fn tick(&self) -> Result<SweepStats, OrchestratorError> {
        Ok(self.dispatcher.sweep().await?)
    }

    /// Run one reaper sweep now, regardless of the loop schedule.
    pub fn reap(&self) -> Result<ReapStats, OrchestratorError> {
        Ok(self.reaper.sweep()?)
    }

    /// Current orchestrator status.
    pub fn status(&self) -> OrchestratorStatus {
        let count = |state: TaskState| self.tasks.count_in_state(state).unwrap_or(0);

        OrchestratorStatus {
            running: self.running.load(Ordering::Relaxed),
            pending_count: count(TaskState::Pending),
            downloading_count: count(TaskState::Downloading),
            remuxing_count: count(TaskState::Remuxing),
            uploading_count: count(TaskState::Uploading),
            verifying_count: count(TaskState::Verifying),
            complete_count: count(TaskState::Complete),
            failed_count: count(TaskState::Failed),
        }
    }

    /// Spawn the dispatch loop task.
    fn spawn_dispatch_loop(&self) {
        let running = Arc::clone(&self.running);
        let dispatcher = Arc::clone(&self.dispatcher);
        let interval = Duration::from_millis(self.config.dispatch_interval_ms);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            info!("dispatch loop started");
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("dispatch loop received shutdown signal");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {
                        if !running.load(Ordering::Relaxed) {
                            break;
                        }
                        // An infrastructure failure skips this tick; the
                        // next one retries the whole sweep.
                        if let Err(e) = dispatcher.sweep().await {
                            warn!(error = %e, "dispatch sweep failed");
                        }
                    }
                }
            }
            info!("dispatch loop stopped");
        });
    }

    /// Spawn the reaper loop task.
    fn spawn_reap_loop(&self) {
        let running = Arc::clone(&self.running);
        let reaper = Arc::clone(&self.reaper);
        let dispatcher = Arc::clone(&self.dispatcher);
        let interval = Duration::from_millis(self.config.reap_interval_ms);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            info!("reaper loop started");
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("reaper loop received shutdown signal");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {
                        if !running.load(Ordering::Relaxed) {
                            break;
                        }
                        match reaper.sweep() {
                            Ok(stats) if !stats.is_noop() => {
                                // Re-publish notifications for whatever was
                                // requeued without waiting for the next
                                // dispatch tick.
                                if let Err(e) = dispatcher.sweep().await {
                                    warn!(error = %e, "post-reap dispatch sweep failed");
                                }
                            }
                            Ok(_) => {}
                            Err(e) => warn!(error = %e, "reaper sweep failed"),
                        }
                    }
                }
            }
            info!("reaper loop stopped");
        });
    }
}
