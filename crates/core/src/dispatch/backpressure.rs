//! Queue depth and concurrency monitoring for backpressure control.
//!
//! Admission control happens at the scheduling boundary: without it the
//! system would keep creating upload sandboxes under load. Denial is
//! load-shedding, not an error; the dispatcher simply skips the stage
//! until the next sweep.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use crate::metrics;
use crate::queue::WorkQueue;
use crate::task::TaskStore;

use super::{BackpressureConfig, DispatchError, Stage};

/// Warn (but admit) when a queue reaches this fraction of its ceiling.
const WARN_FRACTION: f64 = 0.5;

/// Monitors queue depth and in-flight concurrency against configured
/// ceilings.
pub struct BackpressureMonitor {
    queues: HashMap<String, Arc<dyn WorkQueue>>,
    tasks: Arc<dyn TaskStore>,
    config: BackpressureConfig,
}

impl BackpressureMonitor {
    /// Create a monitor over the given queues and task store.
    pub fn new(
        queues: HashMap<String, Arc<dyn WorkQueue>>,
        tasks: Arc<dyn TaskStore>,
        config: BackpressureConfig,
    ) -> Self {
        Self {
            queues,
            tasks,
            config,
        }
    }

    /// Whether new dispatches to `stage` (destination `queue_name`)
    /// should be admitted this sweep.
    ///
    /// Denied when the destination queue is at its depth ceiling or the
    /// stage's in-flight count is at its concurrency ceiling. A ceiling
    /// of zero disables that check.
    pub async fn should_admit(
        &self,
        stage: Stage,
        queue_name: &str,
    ) -> Result<bool, DispatchError> {
        let limits = self.config.limits_for(stage);

        match self.queues.get(queue_name) {
            Some(queue) => {
                let depth = queue.depth().await?;
                metrics::QUEUE_DEPTH
                    .with_label_values(&[queue_name])
                    .set(depth as i64);

                if limits.max_queue_depth > 0 && depth >= limits.max_queue_depth {
                    info!(
                        stage = %stage,
                        queue = queue_name,
                        depth,
                        ceiling = limits.max_queue_depth,
                        "stage backpressured: queue depth at ceiling"
                    );
                    return Ok(false);
                }

                if limits.max_queue_depth > 0
                    && depth as f64 >= limits.max_queue_depth as f64 * WARN_FRACTION
                {
                    info!(stage = %stage, queue = queue_name, depth, "queue depth elevated");
                }
            }
            None => {
                warn!(queue = queue_name, "unknown queue, assuming depth OK");
            }
        }

        if limits.max_in_flight > 0 {
            let in_flight = self.tasks.count_in_state(stage.active_state())?;
            if in_flight >= limits.max_in_flight {
                info!(
                    stage = %stage,
                    in_flight,
                    ceiling = limits.max_in_flight,
                    "stage backpressured: concurrency at ceiling"
                );
                return Ok(false);
            }
        }

        Ok(true)
    }

    /// How many more tasks the stage can take before hitting its
    /// concurrency ceiling. `None` means unlimited.
    pub fn remaining_capacity(&self, stage: Stage) -> Result<Option<i64>, DispatchError> {
        let limits = self.config.limits_for(stage);
        if limits.max_in_flight <= 0 {
            return Ok(None);
        }
        let in_flight = self.tasks.count_in_state(stage.active_state())?;
        Ok(Some((limits.max_in_flight - in_flight).max(0)))
    }
}
