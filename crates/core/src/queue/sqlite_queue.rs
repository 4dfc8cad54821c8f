//! SQLite-backed durable work queue.

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection};
use tracing::debug;

use super::{Delivery, Notification, QueueError, WorkQueue};

/// Durable FIFO queue over a `queue_messages` table.
///
/// One instance serves one named queue; instances for different queues
/// may share the same database file. Consuming a message hides it for
/// `visibility_timeout_secs`; an un-acked message reappears afterwards
/// with an incremented delivery count.
pub struct SqliteWorkQueue {
    conn: Mutex<Connection>,
    name: String,
    visibility_timeout_secs: u64,
}

impl SqliteWorkQueue {
    /// Open a queue on the given database file.
    pub fn new(
        path: &Path,
        name: impl Into<String>,
        visibility_timeout_secs: u64,
    ) -> Result<Self, QueueError> {
        let conn = Connection::open(path)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            name: name.into(),
            visibility_timeout_secs,
        })
    }

    /// Open an in-memory queue (useful for testing).
    pub fn in_memory(
        name: impl Into<String>,
        visibility_timeout_secs: u64,
    ) -> Result<Self, QueueError> {
        let conn = Connection::open_in_memory()?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            name: name.into(),
            visibility_timeout_secs,
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), QueueError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS queue_messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                queue TEXT NOT NULL,
                payload TEXT NOT NULL,
                enqueued_at TEXT NOT NULL,
                available_at TEXT NOT NULL,
                delivery_count INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_queue_messages_ready
                ON queue_messages(queue, available_at);
            "#,
        )?;
        Ok(())
    }
}

#[async_trait]
impl WorkQueue for SqliteWorkQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn publish(&self, notification: &Notification) -> Result<u64, QueueError> {
        let payload = serde_json::to_string(notification)?;
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();

        conn.execute(
            "INSERT INTO queue_messages (queue, payload, enqueued_at, available_at) \
             VALUES (?, ?, ?, ?)",
            params![self.name, payload, now, now],
        )?;

        let depth: i64 = conn.query_row(
            "SELECT COUNT(*) FROM queue_messages WHERE queue = ?",
            params![self.name],
            |row| row.get(0),
        )?;

        debug!(queue = %self.name, depth, "notification published");
        Ok(depth as u64)
    }

    async fn consume(&self) -> Result<Option<Delivery>, QueueError> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now();

        let row = conn.query_row(
            "SELECT id, payload, delivery_count FROM queue_messages \
             WHERE queue = ? AND available_at <= ? \
             ORDER BY id ASC LIMIT 1",
            params![self.name, now.to_rfc3339()],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, u32>(2)?,
                ))
            },
        );

        let (id, payload, delivery_count) = match row {
            Ok(row) => row,
            Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        // Conditional hide: only wins if nobody else consumed it first.
        let hidden_until = now + chrono::Duration::seconds(self.visibility_timeout_secs as i64);
        let changed = conn.execute(
            "UPDATE queue_messages SET available_at = ?, delivery_count = delivery_count + 1 \
             WHERE id = ? AND available_at <= ?",
            params![hidden_until.to_rfc3339(), id, now.to_rfc3339()],
        )?;
        if changed == 0 {
            return Ok(None);
        }

        let notification: Notification = serde_json::from_str(&payload)?;
        Ok(Some(Delivery {
            id,
            queue: self.name.clone(),
            notification,
            delivery_count: delivery_count + 1,
        }))
    }

    async fn ack(&self, delivery_id: i64) -> Result<(), QueueError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM queue_messages WHERE id = ?",
            params![delivery_id],
        )?;
        Ok(())
    }

    async fn depth(&self) -> Result<u64, QueueError> {
        let conn = self.conn.lock().unwrap();
        let depth: i64 = conn.query_row(
            "SELECT COUNT(*) FROM queue_messages WHERE queue = ?",
            params![self.name],
            |row| row.get(0),
        )?;
        Ok(depth as u64)
    }
}
