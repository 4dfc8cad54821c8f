//! Upload account and storage instance types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Health states for an upload account.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    /// Usable for leasing, subject to quota and cooldown.
    Active,
    /// Temporarily out of rotation (quota exhausted or provider pushback).
    Cooldown,
    /// Permanently rejected by the provider.
    Banned,
    /// Provisioned but not yet usable.
    Unverified,
}

impl AccountStatus {
    /// Returns the status as a string (matches the persisted column value).
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Active => "active",
            AccountStatus::Cooldown => "cooldown",
            AccountStatus::Banned => "banned",
            AccountStatus::Unverified => "unverified",
        }
    }

    /// Parse a persisted status string.
    pub fn parse(s: &str) -> Option<AccountStatus> {
        match s {
            "active" => Some(AccountStatus::Active),
            "cooldown" => Some(AccountStatus::Cooldown),
            "banned" => Some(AccountStatus::Banned),
            "unverified" => Some(AccountStatus::Unverified),
            _ => None,
        }
    }
}

/// Health states for a storage instance.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StorageHealth {
    Healthy,
    Degraded,
    Full,
    Offline,
}

impl StorageHealth {
    /// Returns the health as a string (matches the persisted column value).
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageHealth::Healthy => "healthy",
            StorageHealth::Degraded => "degraded",
            StorageHealth::Full => "full",
            StorageHealth::Offline => "offline",
        }
    }

    /// Parse a persisted health string.
    pub fn parse(s: &str) -> Option<StorageHealth> {
        match s {
            "healthy" => Some(StorageHealth::Healthy),
            "degraded" => Some(StorageHealth::Degraded),
            "full" => Some(StorageHealth::Full),
            "offline" => Some(StorageHealth::Offline),
            _ => None,
        }
    }

    /// Whether an account backed by this instance may be leased.
    pub fn allows_leasing(&self) -> bool {
        matches!(self, StorageHealth::Healthy | StorageHealth::Degraded)
    }
}

/// An external upload identity.
///
/// Accounts are the principal contended resource: at most one task may
/// hold an active lease on an account at any instant. All lease
/// mutations are conditional updates against the store, never
/// read-modify-write in application memory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Account {
    /// Unique identifier (UUID).
    pub id: String,

    /// Provider login this account represents.
    pub email: String,

    /// Current status.
    pub status: AccountStatus,

    /// Storage instance backing this account.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_instance_id: Option<String>,

    /// Bytes uploaded in the current quota window.
    pub daily_uploaded_bytes: i64,

    /// Quota window ceiling in bytes.
    pub daily_quota_bytes: i64,

    /// When the quota counters roll over. Reset lazily at lease time.
    pub quota_reset_at: DateTime<Utc>,

    /// Last time this account was leased; drives LRU selection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,

    /// When the cooldown ends, if in cooldown.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_until: Option<DateTime<Utc>>,

    /// When the current lease expires; null when unleased.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_expires_at: Option<DateTime<Utc>>,

    /// When the account was provisioned.
    pub created_at: DateTime<Utc>,
}

impl Account {
    /// Whether the account holds a live lease at `now`.
    pub fn is_leased_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.lease_expires_at, Some(expiry) if expiry > now)
    }

    /// Remaining quota in the current window.
    pub fn remaining_quota_bytes(&self) -> i64 {
        (self.daily_quota_bytes - self.daily_uploaded_bytes).max(0)
    }
}

/// Physical capacity backing one account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageInstance {
    /// Unique identifier (UUID).
    pub id: String,

    /// Total capacity in bytes.
    pub capacity_bytes: i64,

    /// Bytes used. The upload stage is authoritative for this value;
    /// the core only reads health as an eligibility veto.
    pub used_bytes: i64,

    /// Current health.
    pub health: StorageHealth,

    /// When the instance was provisioned.
    pub created_at: DateTime<Utc>,
}
