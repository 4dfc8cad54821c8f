//! Account storage trait and types.

use chrono::{DateTime, Utc};
use thiserror::Error;

use super::{Account, AccountStatus, StorageHealth, StorageInstance};

/// Error type for account operations.
#[derive(Debug, Error)]
pub enum AccountError {
    /// Account not found.
    #[error("account not found: {0}")]
    NotFound(String),

    /// Storage instance not found.
    #[error("storage instance not found: {0}")]
    StorageInstanceNotFound(String),

    /// Database error.
    #[error("database error: {0}")]
    Database(String),
}

impl From<rusqlite::Error> for AccountError {
    fn from(e: rusqlite::Error) -> Self {
        AccountError::Database(e.to_string())
    }
}

/// Request to provision a new account.
#[derive(Debug, Clone)]
pub struct CreateAccountRequest {
    /// Provider login.
    pub email: String,
    /// Backing storage instance, if already provisioned.
    pub storage_instance_id: Option<String>,
    /// Quota window ceiling in bytes.
    pub daily_quota_bytes: i64,
}

/// Request to provision a new storage instance.
#[derive(Debug, Clone)]
pub struct CreateStorageInstanceRequest {
    /// Total capacity in bytes.
    pub capacity_bytes: i64,
}

/// Trait for account storage backends.
///
/// Lease mutations follow the conditional-update discipline: the claim
/// write re-checks the full eligibility predicate, so two concurrent
/// callers can never lease the same account. A `false` return from a
/// conditional write means the row changed underneath the caller.
pub trait AccountStore: Send + Sync {
    /// Provision a new account.
    fn create(&self, request: CreateAccountRequest) -> Result<Account, AccountError>;

    /// Get an account by ID.
    fn get(&self, id: &str) -> Result<Option<Account>, AccountError>;

    /// List all accounts.
    fn list(&self) -> Result<Vec<Account>, AccountError>;

    /// Count accounts with the given status.
    fn count_by_status(&self, status: AccountStatus) -> Result<i64, AccountError>;

    /// Provision a new storage instance.
    fn create_storage_instance(
        &self,
        request: CreateStorageInstanceRequest,
    ) -> Result<StorageInstance, AccountError>;

    /// Get a storage instance by ID.
    fn get_storage_instance(&self, id: &str) -> Result<Option<StorageInstance>, AccountError>;

    /// Set the health of a storage instance (upload-stage write).
    fn set_storage_health(&self, id: &str, health: StorageHealth) -> Result<(), AccountError>;

    /// Upload-stage/operator write: set account status, optionally with
    /// a cooldown deadline.
    fn set_status(
        &self,
        id: &str,
        status: AccountStatus,
        cooldown_until: Option<DateTime<Utc>>,
    ) -> Result<(), AccountError>;

    /// Lazy quota rollover: zero the counters of every account whose
    /// `quota_reset_at` has passed and advance it to the next day
    /// boundary. Returns the number of accounts reset.
    fn reset_due_quotas(&self) -> Result<usize, AccountError>;

    /// The least-recently-used account satisfying the eligibility
    /// predicate with `required_bytes` of quota headroom, if any.
    /// Ties on `last_used_at` break by id for determinism.
    fn select_eligible(&self, required_bytes: i64) -> Result<Option<Account>, AccountError>;

    /// Conditional lease claim: succeeds only if the row still satisfies
    /// the eligibility predicate at write time. Sets the lease expiry
    /// and `last_used_at`.
    fn try_lease(
        &self,
        id: &str,
        required_bytes: i64,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, AccountError>;

    /// Clear the lease. Does not touch quota or status.
    fn release_lease(&self, id: &str) -> Result<(), AccountError>;

    /// Conditional lease extension: succeeds only while the caller still
    /// holds a live lease.
    fn extend_lease(&self, id: &str, new_expiry: DateTime<Utc>) -> Result<bool, AccountError>;

    /// Accounts whose lease expiry has passed without being released.
    fn list_expired_leases(&self) -> Result<Vec<Account>, AccountError>;

    /// Reactivate cooldown accounts whose `cooldown_until` has passed.
    /// Returns the number of accounts reactivated.
    fn release_expired_cooldowns(&self) -> Result<usize, AccountError>;

    /// Upload-stage write: add uploaded bytes, roll the quota window if
    /// due, and enter cooldown when the quota is exhausted. Clears the
    /// lease.
    fn apply_upload_usage(&self, id: &str, uploaded_bytes: i64) -> Result<(), AccountError>;
}
