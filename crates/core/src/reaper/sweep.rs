//! Orphan reclamation.
//!
//! The reaper runs on its own interval, independent of the dispatch
//! path. It releases expired account leases, requeues tasks stuck past
//! their per-state timeout (within retry budget), and fails the rest.
//! The dispatch sweep that follows re-publishes queue notifications for
//! whatever the reaper reset, so a crashed worker, a lost message, and
//! a wedged sandbox are all repaired through the same path.
//!
//! A sweep over a store with nothing stale performs no writes.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::account::{AccountError, AccountStore};
use crate::metrics;
use crate::task::{TaskError, TaskState, TaskStore};
use crate::video::{VideoError, VideoStatus, VideoStore};

use super::ReaperConfig;

/// Errors that can occur during a reaper sweep.
#[derive(Debug, Error)]
pub enum ReaperError {
    /// Task store error.
    #[error("task store error: {0}")]
    Task(#[from] TaskError),

    /// Account store error.
    #[error("account store error: {0}")]
    Account(#[from] AccountError),

    /// Video store error.
    #[error("video store error: {0}")]
    Video(#[from] VideoError),
}

/// Counters from one reaper sweep.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct ReapStats {
    /// Expired account leases released.
    pub leases_released: u64,
    /// Cooldown accounts reactivated.
    pub cooldowns_reactivated: u64,
    /// Stale tasks requeued within their retry budget.
    pub requeued: u64,
    /// Tasks failed permanently after retry exhaustion.
    pub failed: u64,
    /// Videos whose share reference aged out.
    pub videos_expired: u64,
}

impl ReapStats {
    /// Whether the sweep changed anything at all.
    pub fn is_noop(&self) -> bool {
        *self == ReapStats::default()
    }
}

/// Reclaims resources left behind by crashed or stuck workers.
pub struct Reaper {
    tasks: Arc<dyn TaskStore>,
    accounts: Arc<dyn AccountStore>,
    videos: Arc<dyn VideoStore>,
    config: ReaperConfig,
}

impl Reaper {
    /// Create a new reaper.
    pub fn new(
        tasks: Arc<dyn TaskStore>,
        accounts: Arc<dyn AccountStore>,
        videos: Arc<dyn VideoStore>,
        config: ReaperConfig,
    ) -> Self {
        Self {
            tasks,
            accounts,
            videos,
            config,
        }
    }

    /// The per-state timeout table: (stuck state, ceiling, resumption
    /// state).
    ///
    /// `uploading` resumes one step back at ready-to-upload because a
    /// half-finished upload cannot be resumed; `verifying` resumes in
    /// place, which only re-publishes the verify notification.
    fn timeout_table(&self) -> [(TaskState, Duration, TaskState); 4] {
        [
            (
                TaskState::Downloading,
                Duration::seconds(self.config.downloading_timeout_secs as i64),
                TaskState::Pending,
            ),
            (
                TaskState::Remuxing,
                Duration::seconds(self.config.remuxing_timeout_secs as i64),
                TaskState::Pending,
            ),
            (
                TaskState::Uploading,
                Duration::seconds(self.config.uploading_timeout_secs as i64),
                TaskState::Remuxing,
            ),
            (
                TaskState::Verifying,
                Duration::seconds(self.config.verifying_timeout_secs as i64),
                TaskState::Verifying,
            ),
        ]
    }

    /// Run one reclamation sweep.
    pub fn sweep(&self) -> Result<ReapStats, ReaperError> {
        let mut stats = ReapStats::default();

        // Expired leases re-enter the eligible pool first, so requeued
        // uploads can be re-dispatched immediately.
        for account in self.accounts.list_expired_leases()? {
            self.accounts.release_lease(&account.id)?;
            stats.leases_released += 1;
            metrics::LEASES_RECLAIMED.inc();
            info!(account_id = %account.id, "expired lease reclaimed");
        }

        stats.cooldowns_reactivated = self.accounts.release_expired_cooldowns()? as u64;

        for (state, timeout, resume_to) in self.timeout_table() {
            let cutoff = Utc::now() - timeout;
            for task in self.tasks.list_stale(state, cutoff)? {
                // Ready-to-upload tasks are waiting on account scarcity,
                // not a wedged worker.
                if state == TaskState::Remuxing && task.local_path.is_some() {
                    continue;
                }

                // An uploading task may hold a still-live lease (e.g. the
                // worker died right after extending); reclaim it either way.
                if state == TaskState::Uploading {
                    if let Some(account_id) = &task.account_id {
                        match self.accounts.release_lease(account_id) {
                            Ok(()) => {}
                            Err(AccountError::NotFound(_)) => {
                                warn!(task_id = %task.id, account_id = %account_id, "leased account missing");
                            }
                            Err(e) => return Err(e.into()),
                        }
                    }
                }

                let reason = format!(
                    "reaped: stuck in {} for over {}s",
                    state,
                    timeout.num_seconds()
                );

                if task.retries < task.max_retries {
                    if self.tasks.retry_stale(&task.id, state, resume_to, &reason)? {
                        stats.requeued += 1;
                        metrics::REAPER_REQUEUES
                            .with_label_values(&[state.as_str()])
                            .inc();
                        info!(
                            task_id = %task.id,
                            from = %state,
                            to = %resume_to,
                            retries = task.retries + 1,
                            "stale task requeued"
                        );
                    }
                } else if self.tasks.fail_exhausted(&task.id, state, &reason)? {
                    stats.failed += 1;
                    metrics::REAPER_FAILURES.inc();
                    warn!(task_id = %task.id, state = %state, "task failed permanently");

                    if let Err(e) = self.videos.update_status(&task.video_id, VideoStatus::Failed)
                    {
                        warn!(video_id = %task.video_id, error = %e, "failed to mirror video status");
                    }
                }
            }
        }

        let expired = self.videos.expire_stale(self.config.video_retention_days)?;
        stats.videos_expired = expired as u64;
        metrics::VIDEOS_EXPIRED.inc_by(expired as u64);

        if !stats.is_noop() {
            info!(
                leases = stats.leases_released,
                requeued = stats.requeued,
                failed = stats.failed,
                "reaper sweep complete"
            );
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::{AccountStore, SqliteAccountStore};
    use crate::task::{CreateTaskRequest, SqliteTaskStore, StageOutputs};
    use crate::testing::fixtures;
    use crate::video::SqliteVideoStore;

    struct Harness {
        tasks: Arc<SqliteTaskStore>,
        accounts: Arc<SqliteAccountStore>,
        videos: Arc<SqliteVideoStore>,
        reaper: Reaper,
    }

    /// Zero timeouts: every transient task is instantly stale.
    fn zero_timeout_harness() -> Harness {
        let tasks = Arc::new(SqliteTaskStore::in_memory().unwrap());
        let accounts = Arc::new(SqliteAccountStore::in_memory().unwrap());
        let videos = Arc::new(SqliteVideoStore::in_memory().unwrap());

        let config = ReaperConfig {
            downloading_timeout_secs: 0,
            remuxing_timeout_secs: 0,
            uploading_timeout_secs: 0,
            verifying_timeout_secs: 0,
            video_retention_days: 30,
        };
        let reaper = Reaper::new(tasks.clone(), accounts.clone(), videos.clone(), config);

        Harness {
            tasks,
            accounts,
            videos,
            reaper,
        }
    }

    fn add_task(h: &Harness) -> (String, String) {
        let video = h.videos.create(fixtures::video_request("Test")).unwrap();
        let task = h.tasks.create(fixtures::task_request(&video.id)).unwrap();
        (task.id, video.id)
    }

    #[test]
    fn test_sweep_on_clean_store_is_noop() {
        let h = zero_timeout_harness();
        add_task(&h); // pending tasks are never stale

        let stats = h.reaper.sweep().unwrap();
        assert!(stats.is_noop());
    }

    #[test]
    fn test_stale_download_requeues_to_pending() {
        let h = zero_timeout_harness();
        let (task_id, _) = add_task(&h);
        h.tasks.claim_for_download(&task_id).unwrap();

        let stats = h.reaper.sweep().unwrap();
        assert_eq!(stats.requeued, 1);

        let task = h.tasks.get(&task_id).unwrap().unwrap();
        assert_eq!(task.state, TaskState::Pending);
        assert_eq!(task.retries, 1);
        assert!(task.dispatched_at.is_none());
    }

    #[test]
    fn test_ready_for_upload_is_not_reaped() {
        let h = zero_timeout_harness();
        let (task_id, _) = add_task(&h);
        h.tasks.claim_for_download(&task_id).unwrap();
        h.tasks
            .advance(&task_id, TaskState::Remuxing, StageOutputs::local_path("/f"))
            .unwrap();

        // Remuxing with local_path set means waiting for an account, not stuck.
        let stats = h.reaper.sweep().unwrap();
        assert_eq!(stats.requeued, 0);

        let task = h.tasks.get(&task_id).unwrap().unwrap();
        assert_eq!(task.state, TaskState::Remuxing);
        assert_eq!(task.retries, 0);
    }

    #[test]
    fn test_wedged_remux_requeues_to_pending() {
        let h = zero_timeout_harness();
        let (task_id, _) = add_task(&h);
        h.tasks.claim_for_download(&task_id).unwrap();
        h.tasks
            .advance(&task_id, TaskState::Remuxing, StageOutputs::none())
            .unwrap();

        let stats = h.reaper.sweep().unwrap();
        assert_eq!(stats.requeued, 1);
        let task = h.tasks.get(&task_id).unwrap().unwrap();
        assert_eq!(task.state, TaskState::Pending);
    }

    #[test]
    fn test_stale_upload_releases_lease_and_resumes_ready() {
        let h = zero_timeout_harness();

        let instance = h.accounts.create_storage_instance(fixtures::storage_request()).unwrap();
        let account = h
            .accounts
            .create(fixtures::account_request("a@example.com", &instance.id))
            .unwrap();
        // Lease already past expiry, as after a crashed worker.
        h.accounts
            .try_lease(&account.id, 0, Utc::now() - chrono::Duration::minutes(1))
            .unwrap();

        let (task_id, _) = add_task(&h);
        h.tasks.claim_for_download(&task_id).unwrap();
        h.tasks
            .advance(&task_id, TaskState::Remuxing, StageOutputs::local_path("/f"))
            .unwrap();
        h.tasks.claim_for_upload(&task_id, &account.id, "upload").unwrap();

        let stats = h.reaper.sweep().unwrap();
        assert_eq!(stats.leases_released, 1);
        assert_eq!(stats.requeued, 1);

        // The account is selectable again.
        let account = h.accounts.get(&account.id).unwrap().unwrap();
        assert!(account.lease_expires_at.is_none());
        assert!(h.accounts.select_eligible(0).unwrap().is_some());

        // The task is back at ready-to-upload with its output intact.
        let task = h.tasks.get(&task_id).unwrap().unwrap();
        assert_eq!(task.state, TaskState::Remuxing);
        assert_eq!(task.retries, 1);
        assert!(task.is_ready_for_upload());
    }

    #[test]
    fn test_stale_verify_stays_put_for_republish() {
        let h = zero_timeout_harness();
        let (task_id, _) = add_task(&h);
        h.tasks.claim_for_download(&task_id).unwrap();
        h.tasks
            .advance(&task_id, TaskState::Remuxing, StageOutputs::local_path("/f"))
            .unwrap();
        h.tasks.claim_for_upload(&task_id, "acct", "upload").unwrap();
        h.tasks
            .advance(&task_id, TaskState::Verifying, StageOutputs::share_url("https://s/x"))
            .unwrap();
        h.tasks.claim_verify_dispatch(&task_id, "verify").unwrap();

        let stats = h.reaper.sweep().unwrap();
        assert_eq!(stats.requeued, 1);

        // Still verifying, but eligible for dispatch again.
        let task = h.tasks.get(&task_id).unwrap().unwrap();
        assert_eq!(task.state, TaskState::Verifying);
        assert!(task.dispatched_at.is_none());
        assert_eq!(task.retries, 1);
    }

    #[test]
    fn test_retry_exhaustion_fails_task_and_mirrors_video() {
        let h = zero_timeout_harness();
        let video = h.videos.create(fixtures::video_request("Test")).unwrap();
        let task = h
            .tasks
            .create(CreateTaskRequest {
                video_id: video.id.clone(),
                queue_name: "download".to_string(),
                max_retries: 1,
            })
            .unwrap();

        // First strand: requeued.
        h.tasks.claim_for_download(&task.id).unwrap();
        assert_eq!(h.reaper.sweep().unwrap().requeued, 1);

        // Second strand: budget exhausted.
        h.tasks.claim_for_download(&task.id).unwrap();
        let stats = h.reaper.sweep().unwrap();
        assert_eq!(stats.failed, 1);

        let task = h.tasks.get(&task.id).unwrap().unwrap();
        assert_eq!(task.state, TaskState::Failed);
        assert_eq!(task.retries, 1);
        assert!(task.error_message.as_deref().unwrap().contains("stuck in"));

        let video = h.videos.get(&video.id).unwrap().unwrap();
        assert_eq!(video.status, VideoStatus::Failed);
    }

    #[test]
    fn test_repeated_sweep_is_idempotent() {
        let h = zero_timeout_harness();
        let (task_id, _) = add_task(&h);
        h.tasks.claim_for_download(&task_id).unwrap();

        assert_eq!(h.reaper.sweep().unwrap().requeued, 1);
        // Nothing newly stale: no writes.
        assert!(h.reaper.sweep().unwrap().is_noop());
    }

    #[test]
    fn test_cooldown_reactivation_counted() {
        let h = zero_timeout_harness();
        let instance = h.accounts.create_storage_instance(fixtures::storage_request()).unwrap();
        let account = h
            .accounts
            .create(fixtures::account_request("a@example.com", &instance.id))
            .unwrap();
        h.accounts
            .set_status(
                &account.id,
                crate::account::AccountStatus::Cooldown,
                Some(Utc::now() - chrono::Duration::minutes(1)),
            )
            .unwrap();

        let stats = h.reaper.sweep().unwrap();
        assert_eq!(stats.cooldowns_reactivated, 1);
    }
}
