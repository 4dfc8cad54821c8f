//! Task dispatch: state-machine claims, backpressure, queue publishing.

mod backpressure;
mod config;
mod dispatcher;
mod types;

pub use backpressure::BackpressureMonitor;
pub use config::{BackpressureConfig, DispatchConfig, StageLimits};
pub use dispatcher::TaskDispatcher;
pub use types::{DispatchError, Stage, SweepStats};
