//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Dispatcher (per-stage dispatch counts, deferrals, lost claims)
//! - Lease manager (acquisitions, denials, reclaims)
//! - Reaper (requeues, permanent failures, expired videos)
//! - Work queues (depth gauge, sampled at backpressure checks)

use once_cell::sync::Lazy;
use prometheus::{IntCounter, IntCounterVec, IntGaugeVec, Opts};

// =============================================================================
// Dispatcher Metrics
// =============================================================================

/// Tasks dispatched by stage.
pub static TASKS_DISPATCHED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("conveyor_tasks_dispatched_total", "Total tasks dispatched"),
        &["stage"], // "download", "upload", "verify"
    )
    .unwrap()
});

/// Sweeps skipped for a stage due to backpressure.
pub static BACKPRESSURE_SKIPS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "conveyor_backpressure_skips_total",
            "Dispatch sweeps skipped due to backpressure",
        ),
        &["stage"],
    )
    .unwrap()
});

/// Upload dispatches deferred because no account was eligible.
pub static NO_ACCOUNT_DEFERRALS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "conveyor_no_account_deferrals_total",
        "Upload dispatches deferred for lack of an eligible account",
    )
    .unwrap()
});

/// Claims lost to a concurrent dispatcher instance.
pub static LOST_CLAIMS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "conveyor_lost_claims_total",
        "Task claims lost to a concurrent dispatcher",
    )
    .unwrap()
});

// =============================================================================
// Lease Metrics
// =============================================================================

/// Account leases granted.
pub static LEASES_ACQUIRED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "conveyor_leases_acquired_total",
        "Total account leases granted",
    )
    .unwrap()
});

/// Lease acquisitions denied (no eligible account).
pub static LEASE_DENIALS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "conveyor_lease_denials_total",
        "Lease acquisitions denied for lack of an eligible account",
    )
    .unwrap()
});

/// Expired leases reclaimed by the reaper.
pub static LEASES_RECLAIMED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "conveyor_leases_reclaimed_total",
        "Expired account leases reclaimed",
    )
    .unwrap()
});

// =============================================================================
// Reaper Metrics
// =============================================================================

/// Stale tasks requeued, by the state they were stuck in.
pub static REAPER_REQUEUES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("conveyor_reaper_requeues_total", "Stale tasks requeued"),
        &["state"],
    )
    .unwrap()
});

/// Tasks failed permanently after retry exhaustion.
pub static REAPER_FAILURES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "conveyor_reaper_failures_total",
        "Tasks failed permanently by the reaper",
    )
    .unwrap()
});

/// Videos whose share reference aged out.
pub static VIDEOS_EXPIRED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "conveyor_videos_expired_total",
        "Videos marked expired by the reaper",
    )
    .unwrap()
});

// =============================================================================
// Queue Metrics
// =============================================================================

/// Queue depth, sampled at backpressure checks.
pub static QUEUE_DEPTH: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("conveyor_queue_depth", "Work queue depth"),
        &["queue"],
    )
    .unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Dispatcher
        Box::new(TASKS_DISPATCHED.clone()),
        Box::new(BACKPRESSURE_SKIPS.clone()),
        Box::new(NO_ACCOUNT_DEFERRALS.clone()),
        Box::new(LOST_CLAIMS.clone()),
        // Leases
        Box::new(LEASES_ACQUIRED.clone()),
        Box::new(LEASE_DENIALS.clone()),
        Box::new(LEASES_RECLAIMED.clone()),
        // Reaper
        Box::new(REAPER_REQUEUES.clone()),
        Box::new(REAPER_FAILURES.clone()),
        Box::new(VIDEOS_EXPIRED.clone()),
        // Queues
        Box::new(QUEUE_DEPTH.clone()),
    ]
}
