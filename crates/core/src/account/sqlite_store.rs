//! SQLite-backed account store implementation.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use tracing::debug;

use super::{
    Account, AccountError, AccountStatus, AccountStore, CreateAccountRequest,
    CreateStorageInstanceRequest, StorageHealth, StorageInstance,
};

const ACCOUNT_COLUMNS: &str = "id, email, status, storage_instance_id, daily_uploaded_bytes, \
                               daily_quota_bytes, quota_reset_at, last_used_at, cooldown_until, \
                               lease_expires_at, created_at";

/// Eligibility predicate, re-checked at claim time. `?1` is the current
/// time, `?2` the required quota headroom in bytes.
const ELIGIBILITY_SQL: &str = "status = 'active' \
     AND (cooldown_until IS NULL OR cooldown_until <= ?1) \
     AND (lease_expires_at IS NULL OR lease_expires_at <= ?1) \
     AND daily_uploaded_bytes < daily_quota_bytes \
     AND daily_uploaded_bytes + ?2 <= daily_quota_bytes \
     AND storage_instance_id IN \
         (SELECT id FROM storage_instances WHERE health IN ('healthy', 'degraded'))";

/// SQLite-backed account store.
pub struct SqliteAccountStore {
    conn: Mutex<Connection>,
}

impl SqliteAccountStore {
    /// Create a new SQLite account store, creating the database file and
    /// tables if needed.
    pub fn new(path: &Path) -> Result<Self, AccountError> {
        let conn = Connection::open(path)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory SQLite account store (useful for testing).
    pub fn in_memory() -> Result<Self, AccountError> {
        let conn = Connection::open_in_memory()?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), AccountError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS accounts (
                id TEXT PRIMARY KEY,
                email TEXT NOT NULL,
                status TEXT NOT NULL,
                storage_instance_id TEXT,
                daily_uploaded_bytes INTEGER NOT NULL DEFAULT 0,
                daily_quota_bytes INTEGER NOT NULL,
                quota_reset_at TEXT NOT NULL,
                last_used_at TEXT,
                cooldown_until TEXT,
                lease_expires_at TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS storage_instances (
                id TEXT PRIMARY KEY,
                capacity_bytes INTEGER NOT NULL,
                used_bytes INTEGER NOT NULL DEFAULT 0,
                health TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_accounts_status ON accounts(status);
            CREATE INDEX IF NOT EXISTS idx_accounts_last_used_at ON accounts(last_used_at);
            "#,
        )?;
        Ok(())
    }

    fn row_to_account(row: &rusqlite::Row) -> rusqlite::Result<Account> {
        let parse_opt = |s: Option<String>| {
            s.and_then(|v| DateTime::parse_from_rfc3339(&v).ok())
                .map(|dt| dt.with_timezone(&Utc))
        };

        let status_str: String = row.get(2)?;
        let quota_reset_str: String = row.get(6)?;
        let created_at_str: String = row.get(10)?;

        Ok(Account {
            id: row.get(0)?,
            email: row.get(1)?,
            status: AccountStatus::parse(&status_str).unwrap_or(AccountStatus::Unverified),
            storage_instance_id: row.get(3)?,
            daily_uploaded_bytes: row.get(4)?,
            daily_quota_bytes: row.get(5)?,
            quota_reset_at: DateTime::parse_from_rfc3339(&quota_reset_str)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
            last_used_at: parse_opt(row.get(7)?),
            cooldown_until: parse_opt(row.get(8)?),
            lease_expires_at: parse_opt(row.get(9)?),
            created_at: DateTime::parse_from_rfc3339(&created_at_str)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        })
    }

    fn row_to_storage_instance(row: &rusqlite::Row) -> rusqlite::Result<StorageInstance> {
        let health_str: String = row.get(3)?;
        let created_at_str: String = row.get(4)?;

        Ok(StorageInstance {
            id: row.get(0)?,
            capacity_bytes: row.get(1)?,
            used_bytes: row.get(2)?,
            health: StorageHealth::parse(&health_str).unwrap_or(StorageHealth::Offline),
            created_at: DateTime::parse_from_rfc3339(&created_at_str)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        })
    }

    /// The next day boundary after `now`, when quota counters roll over.
    fn next_quota_reset(now: DateTime<Utc>) -> DateTime<Utc> {
        (now + chrono::Duration::days(1))
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .unwrap()
            .and_utc()
    }

    fn get_locked(conn: &Connection, id: &str) -> Result<Option<Account>, AccountError> {
        let result = conn.query_row(
            &format!("SELECT {} FROM accounts WHERE id = ?", ACCOUNT_COLUMNS),
            params![id],
            Self::row_to_account,
        );

        match result {
            Ok(account) => Ok(Some(account)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl AccountStore for SqliteAccountStore {
    fn create(&self, request: CreateAccountRequest) -> Result<Account, AccountError> {
        let conn = self.conn.lock().unwrap();

        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        let quota_reset_at = Self::next_quota_reset(now);

        conn.execute(
            "INSERT INTO accounts (id, email, status, storage_instance_id, daily_uploaded_bytes, \
                                   daily_quota_bytes, quota_reset_at, created_at) \
             VALUES (?, ?, 'active', ?, 0, ?, ?, ?)",
            params![
                id,
                request.email,
                request.storage_instance_id,
                request.daily_quota_bytes,
                quota_reset_at.to_rfc3339(),
                now.to_rfc3339(),
            ],
        )?;

        debug!(account_id = %id, email = %request.email, "account provisioned");

        Ok(Account {
            id,
            email: request.email,
            status: AccountStatus::Active,
            storage_instance_id: request.storage_instance_id,
            daily_uploaded_bytes: 0,
            daily_quota_bytes: request.daily_quota_bytes,
            quota_reset_at,
            last_used_at: None,
            cooldown_until: None,
            lease_expires_at: None,
            created_at: now,
        })
    }

    fn get(&self, id: &str) -> Result<Option<Account>, AccountError> {
        let conn = self.conn.lock().unwrap();
        Self::get_locked(&conn, id)
    }

    fn list(&self) -> Result<Vec<Account>, AccountError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM accounts ORDER BY created_at ASC",
            ACCOUNT_COLUMNS
        ))?;
        let rows = stmt.query_map([], Self::row_to_account)?;

        let mut accounts = Vec::new();
        for row in rows {
            accounts.push(row?);
        }
        Ok(accounts)
    }

    fn count_by_status(&self, status: AccountStatus) -> Result<i64, AccountError> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM accounts WHERE status = ?",
            params![status.as_str()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn create_storage_instance(
        &self,
        request: CreateStorageInstanceRequest,
    ) -> Result<StorageInstance, AccountError> {
        let conn = self.conn.lock().unwrap();

        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();

        conn.execute(
            "INSERT INTO storage_instances (id, capacity_bytes, used_bytes, health, created_at) \
             VALUES (?, ?, 0, 'healthy', ?)",
            params![id, request.capacity_bytes, now.to_rfc3339()],
        )?;

        Ok(StorageInstance {
            id,
            capacity_bytes: request.capacity_bytes,
            used_bytes: 0,
            health: StorageHealth::Healthy,
            created_at: now,
        })
    }

    fn get_storage_instance(&self, id: &str) -> Result<Option<StorageInstance>, AccountError> {
        let conn = self.conn.lock().unwrap();
        let result = conn.query_row(
            "SELECT id, capacity_bytes, used_bytes, health, created_at \
             FROM storage_instances WHERE id = ?",
            params![id],
            Self::row_to_storage_instance,
        );

        match result {
            Ok(instance) => Ok(Some(instance)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set_storage_health(&self, id: &str, health: StorageHealth) -> Result<(), AccountError> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE storage_instances SET health = ? WHERE id = ?",
            params![health.as_str(), id],
        )?;
        if changed == 0 {
            return Err(AccountError::StorageInstanceNotFound(id.to_string()));
        }
        Ok(())
    }

    fn set_status(
        &self,
        id: &str,
        status: AccountStatus,
        cooldown_until: Option<DateTime<Utc>>,
    ) -> Result<(), AccountError> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE accounts SET status = ?, cooldown_until = ? WHERE id = ?",
            params![status.as_str(), cooldown_until.map(|t| t.to_rfc3339()), id],
        )?;
        if changed == 0 {
            return Err(AccountError::NotFound(id.to_string()));
        }
        Ok(())
    }

    fn reset_due_quotas(&self) -> Result<usize, AccountError> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now();

        let reset = conn.execute(
            "UPDATE accounts SET daily_uploaded_bytes = 0, quota_reset_at = ? \
             WHERE quota_reset_at <= ?",
            params![
                Self::next_quota_reset(now).to_rfc3339(),
                now.to_rfc3339()
            ],
        )?;
        if reset > 0 {
            debug!(count = reset, "quota windows rolled over");
        }
        Ok(reset)
    }

    fn select_eligible(&self, required_bytes: i64) -> Result<Option<Account>, AccountError> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();

        let result = conn.query_row(
            &format!(
                "SELECT {} FROM accounts WHERE {} \
                 ORDER BY last_used_at ASC, id ASC LIMIT 1",
                ACCOUNT_COLUMNS, ELIGIBILITY_SQL
            ),
            params![now, required_bytes],
            Self::row_to_account,
        );

        match result {
            Ok(account) => Ok(Some(account)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn try_lease(
        &self,
        id: &str,
        required_bytes: i64,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, AccountError> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();

        let changed = conn.execute(
            &format!(
                "UPDATE accounts SET lease_expires_at = ?3, last_used_at = ?1 \
                 WHERE id = ?4 AND {}",
                ELIGIBILITY_SQL
            ),
            params![now, required_bytes, expires_at.to_rfc3339(), id],
        )?;
        Ok(changed > 0)
    }

    fn release_lease(&self, id: &str) -> Result<(), AccountError> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE accounts SET lease_expires_at = NULL WHERE id = ?",
            params![id],
        )?;
        if changed == 0 {
            return Err(AccountError::NotFound(id.to_string()));
        }
        Ok(())
    }

    fn extend_lease(&self, id: &str, new_expiry: DateTime<Utc>) -> Result<bool, AccountError> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();

        let changed = conn.execute(
            "UPDATE accounts SET lease_expires_at = ? \
             WHERE id = ? AND lease_expires_at IS NOT NULL AND lease_expires_at > ?",
            params![new_expiry.to_rfc3339(), id, now],
        )?;
        Ok(changed > 0)
    }

    fn list_expired_leases(&self) -> Result<Vec<Account>, AccountError> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM accounts \
             WHERE lease_expires_at IS NOT NULL AND lease_expires_at <= ? \
             ORDER BY lease_expires_at ASC",
            ACCOUNT_COLUMNS
        ))?;
        let rows = stmt.query_map(params![now], Self::row_to_account)?;

        let mut accounts = Vec::new();
        for row in rows {
            accounts.push(row?);
        }
        Ok(accounts)
    }

    fn release_expired_cooldowns(&self) -> Result<usize, AccountError> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now();

        let released = conn.execute(
            "UPDATE accounts \
             SET status = 'active', cooldown_until = NULL, lease_expires_at = NULL, \
                 daily_uploaded_bytes = 0, quota_reset_at = ? \
             WHERE status = 'cooldown' AND cooldown_until IS NOT NULL AND cooldown_until <= ?",
            params![
                Self::next_quota_reset(now).to_rfc3339(),
                now.to_rfc3339()
            ],
        )?;
        if released > 0 {
            debug!(count = released, "cooldown accounts reactivated");
        }
        Ok(released)
    }

    fn apply_upload_usage(&self, id: &str, uploaded_bytes: i64) -> Result<(), AccountError> {
        let conn = self.conn.lock().unwrap();

        let account =
            Self::get_locked(&conn, id)?.ok_or_else(|| AccountError::NotFound(id.to_string()))?;

        let now = Utc::now();
        let safe_bytes = uploaded_bytes.max(0);

        // Roll the window first if it lapsed while the upload ran.
        let (uploaded, quota_reset_at) = if account.quota_reset_at <= now {
            (safe_bytes, Self::next_quota_reset(now))
        } else {
            (account.daily_uploaded_bytes + safe_bytes, account.quota_reset_at)
        };

        let exhausted = uploaded >= account.daily_quota_bytes;
        let (status, cooldown_until) = if exhausted {
            (AccountStatus::Cooldown, Some(quota_reset_at))
        } else {
            (account.status, account.cooldown_until)
        };

        conn.execute(
            "UPDATE accounts \
             SET daily_uploaded_bytes = ?, quota_reset_at = ?, last_used_at = ?, \
                 status = ?, cooldown_until = ?, lease_expires_at = NULL \
             WHERE id = ?",
            params![
                uploaded,
                quota_reset_at.to_rfc3339(),
                now.to_rfc3339(),
                status.as_str(),
                cooldown_until.map(|t| t.to_rfc3339()),
                id,
            ],
        )?;

        if exhausted {
            debug!(account_id = %id, "quota exhausted, account entering cooldown");
        }
        Ok(())
    }
}
