//! Task dispatcher.
//!
//! Claims pending or advanceable tasks against the store and publishes
//! queue notifications to the matching downstream stage. Every claim is
//! a conditional update, so any number of dispatcher instances can run
//! concurrently; a lost claim just means another instance won.
//!
//! The queue publish always happens after the claiming store write. If
//! the process dies in between, the task sits in its new state with no
//! notification until the reaper's per-state timeout requeues it.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::account::{LeaseError, LeaseManager};
use crate::metrics;
use crate::queue::{Notification, WorkQueue};
use crate::task::{Task, TaskStore};
use crate::video::{Video, VideoStore};

use super::{BackpressureMonitor, DispatchConfig, DispatchError, Stage, SweepStats};

/// Dispatches tasks between pipeline stages.
pub struct TaskDispatcher {
    tasks: Arc<dyn TaskStore>,
    videos: Arc<dyn VideoStore>,
    leases: Arc<LeaseManager>,
    queues: HashMap<String, Arc<dyn WorkQueue>>,
    monitor: BackpressureMonitor,
    config: DispatchConfig,
}

impl TaskDispatcher {
    /// Create a new dispatcher.
    pub fn new(
        tasks: Arc<dyn TaskStore>,
        videos: Arc<dyn VideoStore>,
        leases: Arc<LeaseManager>,
        queues: HashMap<String, Arc<dyn WorkQueue>>,
        monitor: BackpressureMonitor,
        config: DispatchConfig,
    ) -> Self {
        Self {
            tasks,
            videos,
            leases,
            queues,
            monitor,
            config,
        }
    }

    /// Run one dispatch sweep over all stages.
    pub async fn sweep(&self) -> Result<SweepStats, DispatchError> {
        let mut stats = SweepStats::default();
        self.sweep_download(&mut stats).await?;
        self.sweep_upload(&mut stats).await?;
        self.sweep_verify(&mut stats).await?;

        if stats.total_dispatched() > 0 {
            info!(
                download = stats.dispatched_download,
                upload = stats.dispatched_upload,
                verify = stats.dispatched_verify,
                "dispatch sweep complete"
            );
        }
        Ok(stats)
    }

    /// `pending -> downloading`: claim and notify the download stage.
    async fn sweep_download(&self, stats: &mut SweepStats) -> Result<(), DispatchError> {
        let queue_name = self.config.queue_for(Stage::Download).to_string();
        if !self.admit(Stage::Download, &queue_name, stats).await? {
            return Ok(());
        }

        let batch = self.batch_for(Stage::Download)?;
        for task in self.tasks.list_pending(batch)? {
            if !self.tasks.claim_for_download(&task.id)? {
                stats.lost_claims += 1;
                metrics::LOST_CLAIMS.inc();
                continue;
            }

            let video = self.videos.get(&task.video_id)?;
            let mut notification = Self::base_notification(&task, video.as_ref());
            if let Some(url) = video.as_ref().and_then(|v| v.source_url.clone()) {
                notification.source_url = Some(url);
            }

            self.publish(&queue_name, &notification).await;
            stats.dispatched_download += 1;
            metrics::TASKS_DISPATCHED
                .with_label_values(&[Stage::Download.as_str()])
                .inc();
        }
        Ok(())
    }

    /// `remuxing (ready) -> uploading`: lease an account, claim, notify
    /// the upload stage.
    ///
    /// A lease claim comes first; if the task claim then loses its race
    /// the lease is released untouched, so no partial transition is ever
    /// persisted. `NoEligibleAccount` is a deferral, not an error: the
    /// task stays in place with its retry budget intact.
    async fn sweep_upload(&self, stats: &mut SweepStats) -> Result<(), DispatchError> {
        let queue_name = self.config.queue_for(Stage::Upload).to_string();
        if !self.admit(Stage::Upload, &queue_name, stats).await? {
            return Ok(());
        }
        let batch = self.batch_for(Stage::Upload)?;

        for task in self.tasks.list_ready_for_upload(batch)? {
            let Some(video) = self.videos.get(&task.video_id)? else {
                warn!(task_id = %task.id, video_id = %task.video_id, "task references missing video");
                continue;
            };

            let leased = match self.leases.acquire(video.size_bytes) {
                Ok(leased) => leased,
                Err(LeaseError::NoEligibleAccount) => {
                    debug!(task_id = %task.id, "upload deferred: no eligible account");
                    stats.deferred_no_account += 1;
                    metrics::NO_ACCOUNT_DEFERRALS.inc();
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            if !self
                .tasks
                .claim_for_upload(&task.id, &leased.account.id, &queue_name)?
            {
                // Another instance took the task; the lease goes back.
                self.leases.release(&leased.account.id)?;
                stats.lost_claims += 1;
                metrics::LOST_CLAIMS.inc();
                continue;
            }

            let notification = Self::base_notification(&task, Some(&video))
                .with_account_id(leased.account.id.clone());

            self.publish(&queue_name, &notification).await;
            stats.dispatched_upload += 1;
            metrics::TASKS_DISPATCHED
                .with_label_values(&[Stage::Upload.as_str()])
                .inc();
        }
        Ok(())
    }

    /// Publish verify notifications for tasks the upload stage advanced
    /// to `verifying`. The claim only marks the task dispatched; the
    /// state was already written by the collaborator.
    async fn sweep_verify(&self, stats: &mut SweepStats) -> Result<(), DispatchError> {
        let queue_name = self.config.queue_for(Stage::Verify).to_string();
        if !self.admit(Stage::Verify, &queue_name, stats).await? {
            return Ok(());
        }

        for task in self
            .tasks
            .list_awaiting_verify_dispatch(self.config.batch_size)?
        {
            if !self.tasks.claim_verify_dispatch(&task.id, &queue_name)? {
                stats.lost_claims += 1;
                metrics::LOST_CLAIMS.inc();
                continue;
            }

            let video = self.videos.get(&task.video_id)?;
            let notification = Self::base_notification(&task, video.as_ref());

            self.publish(&queue_name, &notification).await;
            stats.dispatched_verify += 1;
            metrics::TASKS_DISPATCHED
                .with_label_values(&[Stage::Verify.as_str()])
                .inc();
        }
        Ok(())
    }

    /// Batch size for a stage, capped to its remaining concurrency
    /// capacity so one sweep cannot overshoot the ceiling.
    fn batch_for(&self, stage: Stage) -> Result<i64, DispatchError> {
        Ok(match self.monitor.remaining_capacity(stage)? {
            Some(capacity) => self.config.batch_size.min(capacity),
            None => self.config.batch_size,
        })
    }

    async fn admit(
        &self,
        stage: Stage,
        queue_name: &str,
        stats: &mut SweepStats,
    ) -> Result<bool, DispatchError> {
        if self.monitor.should_admit(stage, queue_name).await? {
            return Ok(true);
        }
        stats.skipped_backpressure += 1;
        metrics::BACKPRESSURE_SKIPS
            .with_label_values(&[stage.as_str()])
            .inc();
        Ok(false)
    }

    /// Publish after the claiming write has committed. A failed publish
    /// is logged and swallowed: the task is in its new state without a
    /// notification, which is exactly the condition the reaper repairs.
    async fn publish(&self, queue_name: &str, notification: &Notification) {
        let Some(queue) = self.queues.get(queue_name) else {
            warn!(queue = queue_name, "no queue registered for dispatch");
            return;
        };

        match queue.publish(notification).await {
            Ok(depth) => {
                debug!(
                    task_id = %notification.task_id,
                    queue = queue_name,
                    depth,
                    "dispatched"
                );
            }
            Err(e) => {
                warn!(
                    task_id = %notification.task_id,
                    queue = queue_name,
                    error = %e,
                    "publish failed; reaper will repair"
                );
            }
        }
    }

    fn base_notification(task: &Task, video: Option<&Video>) -> Notification {
        let mut notification = Notification::new(task.id.clone(), task.video_id.clone())
            .with_retries(task.retries, task.max_retries);
        if let Some(path) = task
            .local_path
            .clone()
            .or_else(|| video.and_then(|v| v.local_path.clone()))
        {
            notification.local_path = Some(path);
        }
        if let Some(url) = task
            .share_url
            .clone()
            .or_else(|| video.and_then(|v| v.share_url.clone()))
        {
            notification.share_url = Some(url);
        }
        notification
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::{
        AccountStore, CreateAccountRequest, CreateStorageInstanceRequest, LeaseConfig,
        SqliteAccountStore,
    };
    use crate::dispatch::{BackpressureConfig, StageLimits};
    use crate::task::{CreateTaskRequest, SqliteTaskStore, StageOutputs, TaskState};
    use crate::testing::MockWorkQueue;
    use crate::video::{CreateVideoRequest, SqliteVideoStore};

    struct Harness {
        tasks: Arc<SqliteTaskStore>,
        videos: Arc<SqliteVideoStore>,
        accounts: Arc<SqliteAccountStore>,
        download_queue: Arc<MockWorkQueue>,
        upload_queue: Arc<MockWorkQueue>,
        verify_queue: Arc<MockWorkQueue>,
        dispatcher: TaskDispatcher,
    }

    fn harness(backpressure: BackpressureConfig) -> Harness {
        let tasks = Arc::new(SqliteTaskStore::in_memory().unwrap());
        let videos = Arc::new(SqliteVideoStore::in_memory().unwrap());
        let accounts = Arc::new(SqliteAccountStore::in_memory().unwrap());

        let download_queue = Arc::new(MockWorkQueue::new("download"));
        let upload_queue = Arc::new(MockWorkQueue::new("upload"));
        let verify_queue = Arc::new(MockWorkQueue::new("verify"));

        let mut queues: HashMap<String, Arc<dyn WorkQueue>> = HashMap::new();
        queues.insert("download".to_string(), download_queue.clone());
        queues.insert("upload".to_string(), upload_queue.clone());
        queues.insert("verify".to_string(), verify_queue.clone());

        let monitor = BackpressureMonitor::new(
            queues.clone(),
            tasks.clone() as Arc<dyn TaskStore>,
            backpressure,
        );
        let leases = Arc::new(LeaseManager::new(
            accounts.clone() as Arc<dyn AccountStore>,
            LeaseConfig::default(),
        ));

        let dispatcher = TaskDispatcher::new(
            tasks.clone(),
            videos.clone(),
            leases,
            queues,
            monitor,
            DispatchConfig::default(),
        );

        Harness {
            tasks,
            videos,
            accounts,
            download_queue,
            upload_queue,
            verify_queue,
            dispatcher,
        }
    }

    fn add_account(h: &Harness, quota: i64) -> String {
        let instance = h
            .accounts
            .create_storage_instance(CreateStorageInstanceRequest {
                capacity_bytes: quota * 10,
            })
            .unwrap();
        h.accounts
            .create(CreateAccountRequest {
                email: "a@example.com".to_string(),
                storage_instance_id: Some(instance.id),
                daily_quota_bytes: quota,
            })
            .unwrap()
            .id
    }

    fn add_task(h: &Harness, title: &str) -> (String, String) {
        let video = h
            .videos
            .create(CreateVideoRequest {
                title: title.to_string(),
                source_url: Some(format!("magnet:?xt=urn:btih:{}", title)),
                metadata_json: None,
            })
            .unwrap();
        let task = h
            .tasks
            .create(CreateTaskRequest {
                video_id: video.id.clone(),
                queue_name: "download".to_string(),
                max_retries: 3,
            })
            .unwrap();
        (task.id, video.id)
    }

    /// Advance a task through the download/remux stage writes.
    fn make_ready_for_upload(h: &Harness, task_id: &str, video_id: &str, size: i64) {
        h.tasks
            .advance(task_id, TaskState::Remuxing, StageOutputs::local_path("/out.mp4"))
            .unwrap();
        h.videos
            .set_download_result(video_id, "/out.mp4", size)
            .unwrap();
    }

    #[tokio::test]
    async fn test_pending_task_dispatches_to_download() {
        let h = harness(BackpressureConfig::default());
        let (task_id, _) = add_task(&h, "abc");

        let stats = h.dispatcher.sweep().await.unwrap();
        assert_eq!(stats.dispatched_download, 1);

        let task = h.tasks.get(&task_id).unwrap().unwrap();
        assert_eq!(task.state, TaskState::Downloading);

        let published = h.download_queue.published().await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].task_id, task_id);
        assert!(published[0].source_url.as_deref().unwrap().contains("abc"));
    }

    #[tokio::test]
    async fn test_ready_task_dispatches_to_upload_with_lease() {
        let h = harness(BackpressureConfig::default());
        let account_id = add_account(&h, 20 * 1024);
        let (task_id, video_id) = add_task(&h, "abc");

        h.dispatcher.sweep().await.unwrap();
        make_ready_for_upload(&h, &task_id, &video_id, 1024);

        let stats = h.dispatcher.sweep().await.unwrap();
        assert_eq!(stats.dispatched_upload, 1);

        let task = h.tasks.get(&task_id).unwrap().unwrap();
        assert_eq!(task.state, TaskState::Uploading);
        assert_eq!(task.account_id.as_deref(), Some(account_id.as_str()));

        let account = h.accounts.get(&account_id).unwrap().unwrap();
        assert!(account.lease_expires_at.is_some());

        let published = h.upload_queue.published().await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].account_id.as_deref(), Some(account_id.as_str()));
        assert_eq!(published[0].local_path.as_deref(), Some("/out.mp4"));
    }

    #[tokio::test]
    async fn test_no_account_defers_without_consuming_retries() {
        let h = harness(BackpressureConfig::default());
        let (task_id, video_id) = add_task(&h, "abc");

        h.dispatcher.sweep().await.unwrap();
        make_ready_for_upload(&h, &task_id, &video_id, 1024);

        // No accounts provisioned at all.
        let stats = h.dispatcher.sweep().await.unwrap();
        assert_eq!(stats.dispatched_upload, 0);
        assert_eq!(stats.deferred_no_account, 1);

        let task = h.tasks.get(&task_id).unwrap().unwrap();
        assert_eq!(task.state, TaskState::Remuxing);
        assert_eq!(task.retries, 0);
        assert!(h.upload_queue.published().await.is_empty());
    }

    #[tokio::test]
    async fn test_quota_headroom_denial_defers_task() {
        let h = harness(BackpressureConfig::default());
        let account_id = add_account(&h, 20);
        // 19 of 20 bytes used; a 2-byte file does not fit.
        h.accounts.apply_upload_usage(&account_id, 19).unwrap();

        let (task_id, video_id) = add_task(&h, "abc");
        h.dispatcher.sweep().await.unwrap();
        make_ready_for_upload(&h, &task_id, &video_id, 2);

        let stats = h.dispatcher.sweep().await.unwrap();
        assert_eq!(stats.deferred_no_account, 1);

        let task = h.tasks.get(&task_id).unwrap().unwrap();
        assert_eq!(task.state, TaskState::Remuxing);
        assert_eq!(task.retries, 0);
    }

    #[tokio::test]
    async fn test_verify_notification_published_once() {
        let h = harness(BackpressureConfig::default());
        add_account(&h, 20 * 1024);
        let (task_id, video_id) = add_task(&h, "abc");

        h.dispatcher.sweep().await.unwrap();
        make_ready_for_upload(&h, &task_id, &video_id, 1024);
        h.dispatcher.sweep().await.unwrap();

        // Upload stage reports success.
        h.tasks
            .advance(
                &task_id,
                TaskState::Verifying,
                StageOutputs::share_url("https://share/x"),
            )
            .unwrap();

        let stats = h.dispatcher.sweep().await.unwrap();
        assert_eq!(stats.dispatched_verify, 1);

        let published = h.verify_queue.published().await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].share_url.as_deref(), Some("https://share/x"));

        // Task stays in verifying; no duplicate publish on the next sweep.
        let task = h.tasks.get(&task_id).unwrap().unwrap();
        assert_eq!(task.state, TaskState::Verifying);
        let stats = h.dispatcher.sweep().await.unwrap();
        assert_eq!(stats.dispatched_verify, 0);
        assert_eq!(h.verify_queue.published().await.len(), 1);
    }

    #[tokio::test]
    async fn test_backpressure_blocks_stage_claims() {
        let config = BackpressureConfig {
            download: StageLimits {
                max_queue_depth: 1,
                max_in_flight: 0,
            },
            ..BackpressureConfig::default()
        };
        let h = harness(config);
        // Pre-fill the download queue to its ceiling.
        h.download_queue
            .publish(&Notification::new("other", "other"))
            .await
            .unwrap();

        let (task_id, _) = add_task(&h, "abc");
        let stats = h.dispatcher.sweep().await.unwrap();

        assert_eq!(stats.dispatched_download, 0);
        assert!(stats.skipped_backpressure >= 1);
        let task = h.tasks.get(&task_id).unwrap().unwrap();
        assert_eq!(task.state, TaskState::Pending);
    }

    #[tokio::test]
    async fn test_upload_concurrency_ceiling_claims_zero() {
        let config = BackpressureConfig {
            upload: StageLimits {
                max_queue_depth: 100,
                max_in_flight: 1,
            },
            ..BackpressureConfig::default()
        };
        let h = harness(config);
        add_account(&h, 20 * 1024);
        add_account(&h, 20 * 1024);

        let (first, first_video) = add_task(&h, "one");
        let (second, second_video) = add_task(&h, "two");
        h.dispatcher.sweep().await.unwrap();
        make_ready_for_upload(&h, &first, &first_video, 10);
        make_ready_for_upload(&h, &second, &second_video, 10);

        // First sweep fills the single upload slot.
        let stats = h.dispatcher.sweep().await.unwrap();
        assert_eq!(stats.dispatched_upload, 1);

        // In-flight count is at the ceiling: zero new upload claims.
        let stats = h.dispatcher.sweep().await.unwrap();
        assert_eq!(stats.dispatched_upload, 0);
        assert!(stats.skipped_backpressure >= 1);
    }

    #[tokio::test]
    async fn test_concurrent_dispatchers_claim_each_task_once() {
        // Two dispatcher instances over the same store: every pending
        // task is dispatched exactly once between them.
        let h = harness(BackpressureConfig::default());
        let h2_monitor = BackpressureMonitor::new(
            {
                let mut queues: HashMap<String, Arc<dyn WorkQueue>> = HashMap::new();
                queues.insert("download".to_string(), h.download_queue.clone());
                queues.insert("upload".to_string(), h.upload_queue.clone());
                queues.insert("verify".to_string(), h.verify_queue.clone());
                queues
            },
            h.tasks.clone() as Arc<dyn TaskStore>,
            BackpressureConfig::default(),
        );
        let second = TaskDispatcher::new(
            h.tasks.clone(),
            h.videos.clone(),
            Arc::new(LeaseManager::new(
                h.accounts.clone() as Arc<dyn AccountStore>,
                LeaseConfig::default(),
            )),
            {
                let mut queues: HashMap<String, Arc<dyn WorkQueue>> = HashMap::new();
                queues.insert("download".to_string(), h.download_queue.clone());
                queues.insert("upload".to_string(), h.upload_queue.clone());
                queues.insert("verify".to_string(), h.verify_queue.clone());
                queues
            },
            h2_monitor,
            DispatchConfig::default(),
        );

        for i in 0..4 {
            add_task(&h, &format!("video-{}", i));
        }

        let (a, b) = tokio::join!(h.dispatcher.sweep(), second.sweep());
        let a = a.unwrap();
        let b = b.unwrap();

        assert_eq!(a.dispatched_download + b.dispatched_download, 4);
        assert_eq!(h.tasks.count_in_state(TaskState::Downloading).unwrap(), 4);
        assert_eq!(h.tasks.count_in_state(TaskState::Pending).unwrap(), 0);
    }
}
