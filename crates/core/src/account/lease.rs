//! Account lease manager.
//!
//! Leases are time-bounded exclusive claims on an account, mediated
//! entirely by the store's conditional updates. Losing a claim race is
//! not an error: the manager reselects against the updated pool.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::metrics;

use super::{Account, AccountError, AccountStore};

/// Bound on reselection after lost claim races within one acquire call.
const MAX_CLAIM_ATTEMPTS: usize = 4;

/// Errors surfaced by lease operations.
#[derive(Debug, Error)]
pub enum LeaseError {
    /// No account currently satisfies the eligibility predicate.
    /// Recoverable by deferral: retry on a later dispatch sweep.
    #[error("no eligible account available")]
    NoEligibleAccount,

    /// The caller no longer holds the lease it is trying to extend.
    /// The caller must abandon its in-flight work.
    #[error("lease lost on account {0}")]
    LeaseLost(String),

    /// Account store error.
    #[error("account store error: {0}")]
    Store(#[from] AccountError),
}

/// Lease manager configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseConfig {
    /// How long a lease lives before the reaper may reclaim it (seconds).
    #[serde(default = "default_lease_duration")]
    pub duration_secs: u64,
}

fn default_lease_duration() -> u64 {
    7200 // 2 hours, sized for the slowest expected upload
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            duration_secs: default_lease_duration(),
        }
    }
}

/// An account claimed for exclusive use until `expires_at`.
#[derive(Debug, Clone)]
pub struct LeasedAccount {
    /// The leased account, as read after the claim.
    pub account: Account,
    /// When the lease expires unless extended.
    pub expires_at: DateTime<Utc>,
}

/// Selects and exclusively leases eligible accounts.
pub struct LeaseManager {
    store: Arc<dyn AccountStore>,
    config: LeaseConfig,
}

impl LeaseManager {
    /// Create a new lease manager over the given account store.
    pub fn new(store: Arc<dyn AccountStore>, config: LeaseConfig) -> Self {
        Self { store, config }
    }

    /// Acquire the least-recently-used eligible account with
    /// `required_bytes` of quota headroom.
    ///
    /// Performs the lazy quota rollover, then selects and claims with a
    /// conditional update. A lost race reselects; an empty pool returns
    /// `LeaseError::NoEligibleAccount` without blocking.
    pub fn acquire(&self, required_bytes: i64) -> Result<LeasedAccount, LeaseError> {
        self.store.reset_due_quotas()?;

        for _ in 0..MAX_CLAIM_ATTEMPTS {
            let Some(candidate) = self.store.select_eligible(required_bytes)? else {
                metrics::LEASE_DENIALS.inc();
                return Err(LeaseError::NoEligibleAccount);
            };

            let expires_at = Utc::now() + Duration::seconds(self.config.duration_secs as i64);
            if self.store.try_lease(&candidate.id, required_bytes, expires_at)? {
                metrics::LEASES_ACQUIRED.inc();
                info!(account_id = %candidate.id, %expires_at, "account leased");

                let account = self
                    .store
                    .get(&candidate.id)?
                    .ok_or_else(|| AccountError::NotFound(candidate.id.clone()))?;
                return Ok(LeasedAccount { account, expires_at });
            }

            // Lost the race; the pool changed underneath us.
            debug!(account_id = %candidate.id, "lease claim lost, reselecting");
        }

        metrics::LEASE_DENIALS.inc();
        Err(LeaseError::NoEligibleAccount)
    }

    /// Release a lease so the account re-enters the eligible pool.
    /// Quota and status are untouched; those belong to the upload stage.
    pub fn release(&self, account_id: &str) -> Result<(), LeaseError> {
        self.store.release_lease(account_id)?;
        debug!(account_id = %account_id, "lease released");
        Ok(())
    }

    /// Extend a held lease by the configured duration from now.
    ///
    /// Fails with `LeaseError::LeaseLost` if the lease has already
    /// expired or been reassigned; the caller must stop writing progress
    /// under a resource it no longer owns.
    pub fn extend(&self, account_id: &str) -> Result<DateTime<Utc>, LeaseError> {
        let new_expiry = Utc::now() + Duration::seconds(self.config.duration_secs as i64);
        if self.store.extend_lease(account_id, new_expiry)? {
            debug!(account_id = %account_id, %new_expiry, "lease extended");
            Ok(new_expiry)
        } else {
            Err(LeaseError::LeaseLost(account_id.to_string()))
        }
    }

    /// The configured lease duration.
    pub fn lease_duration(&self) -> Duration {
        Duration::seconds(self.config.duration_secs as i64)
    }
}
