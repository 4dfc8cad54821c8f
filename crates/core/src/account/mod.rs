//! Upload accounts, storage instances, and lease management.
//!
//! The account pool is the system's principal contended resource.
//! Ownership is arbitrated exclusively by the store: every claim,
//! extension, and release is a conditional update, so any number of
//! orchestration-core instances can share one pool safely.

mod lease;
mod sqlite_store;
mod store;
mod types;

pub use lease::{LeaseConfig, LeaseError, LeaseManager, LeasedAccount};
pub use sqlite_store::SqliteAccountStore;
pub use store::{
    AccountError, AccountStore, CreateAccountRequest, CreateStorageInstanceRequest,
};
pub use types::{Account, AccountStatus, StorageHealth, StorageInstance};
