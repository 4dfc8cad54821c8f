//! Conveyor core: media pipeline orchestration.
//!
//! A relational store holds the single source of truth for account,
//! task, and video state; durable work queues carry dispatch hints
//! between stages. The orchestration core leases scarce upload accounts
//! fairly, advances tasks through the pipeline state machine with
//! conditional-update claims, sheds load under backpressure, and reaps
//! whatever crashed or wedged workers leave behind.

pub mod account;
pub mod auth;
pub mod config;
pub mod dispatch;
pub mod metrics;
pub mod orchestrator;
pub mod queue;
pub mod reaper;
pub mod task;
pub mod testing;
pub mod video;

pub use account::{
    Account, AccountError, AccountStatus, AccountStore, CreateAccountRequest,
    CreateStorageInstanceRequest, LeaseConfig, LeaseError, LeaseManager, LeasedAccount,
    SqliteAccountStore, StorageHealth, StorageInstance,
};
pub use auth::{
    create_authenticator, ApiKeyAuthenticator, AuthError, AuthRequest, Authenticator, Identity,
    NoneAuthenticator,
};
pub use config::{
    load_config, load_config_from_str, validate_config, AuthConfig, AuthMethod, Config,
    ConfigError, DatabaseConfig, QueueConfig, SanitizedConfig, ServerConfig,
};
pub use dispatch::{
    BackpressureConfig, BackpressureMonitor, DispatchConfig, DispatchError, Stage, StageLimits,
    SweepStats, TaskDispatcher,
};
pub use orchestrator::{Orchestrator, OrchestratorConfig, OrchestratorError, OrchestratorStatus};
pub use queue::{Delivery, Notification, QueueError, SqliteWorkQueue, WorkQueue};
pub use reaper::{ReapStats, Reaper, ReaperConfig, ReaperError};
pub use task::{
    CreateTaskRequest, SqliteTaskStore, StageOutputs, Task, TaskError, TaskFilter, TaskState,
    TaskStore,
};
pub use video::{CreateVideoRequest, SqliteVideoStore, Video, VideoError, VideoStatus, VideoStore};
