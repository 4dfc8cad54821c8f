//! SQLite-backed video store implementation.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use tracing::info;

use super::{CreateVideoRequest, Video, VideoError, VideoStatus, VideoStore};

const VIDEO_COLUMNS: &str =
    "id, title, source_url, local_path, share_url, size_bytes, status, metadata_json, \
     created_at, updated_at";

/// SQLite-backed video store.
pub struct SqliteVideoStore {
    conn: Mutex<Connection>,
}

impl SqliteVideoStore {
    /// Create a new SQLite video store, creating the database file and
    /// tables if needed.
    pub fn new(path: &Path) -> Result<Self, VideoError> {
        let conn = Connection::open(path)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory SQLite video store (useful for testing).
    pub fn in_memory() -> Result<Self, VideoError> {
        let conn = Connection::open_in_memory()?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), VideoError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS videos (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                source_url TEXT,
                local_path TEXT,
                share_url TEXT,
                size_bytes INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL,
                metadata_json TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_videos_status ON videos(status);
            "#,
        )?;
        Ok(())
    }

    fn row_to_video(row: &rusqlite::Row) -> rusqlite::Result<Video> {
        let status_str: String = row.get(6)?;
        let created_at_str: String = row.get(8)?;
        let updated_at_str: String = row.get(9)?;

        Ok(Video {
            id: row.get(0)?,
            title: row.get(1)?,
            source_url: row.get(2)?,
            local_path: row.get(3)?,
            share_url: row.get(4)?,
            size_bytes: row.get(5)?,
            status: VideoStatus::parse(&status_str).unwrap_or(VideoStatus::Failed),
            metadata_json: row.get(7)?,
            created_at: DateTime::parse_from_rfc3339(&created_at_str)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
            updated_at: DateTime::parse_from_rfc3339(&updated_at_str)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        })
    }
}

impl VideoStore for SqliteVideoStore {
    fn create(&self, request: CreateVideoRequest) -> Result<Video, VideoError> {
        let conn = self.conn.lock().unwrap();

        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();

        conn.execute(
            "INSERT INTO videos (id, title, source_url, size_bytes, status, metadata_json, created_at, updated_at) \
             VALUES (?, ?, ?, 0, 'discovered', ?, ?, ?)",
            params![
                id,
                request.title,
                request.source_url,
                request.metadata_json,
                now.to_rfc3339(),
                now.to_rfc3339(),
            ],
        )?;

        Ok(Video {
            id,
            title: request.title,
            source_url: request.source_url,
            local_path: None,
            share_url: None,
            size_bytes: 0,
            status: VideoStatus::Discovered,
            metadata_json: request.metadata_json,
            created_at: now,
            updated_at: now,
        })
    }

    fn get(&self, id: &str) -> Result<Option<Video>, VideoError> {
        let conn = self.conn.lock().unwrap();
        let result = conn.query_row(
            &format!("SELECT {} FROM videos WHERE id = ?", VIDEO_COLUMNS),
            params![id],
            Self::row_to_video,
        );

        match result {
            Ok(video) => Ok(Some(video)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self, limit: i64, offset: i64) -> Result<Vec<Video>, VideoError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM videos ORDER BY created_at DESC LIMIT ? OFFSET ?",
            VIDEO_COLUMNS
        ))?;
        let rows = stmt.query_map(params![limit, offset], Self::row_to_video)?;

        let mut videos = Vec::new();
        for row in rows {
            videos.push(row?);
        }
        Ok(videos)
    }

    fn count_by_status(&self, status: VideoStatus) -> Result<i64, VideoError> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM videos WHERE status = ?",
            params![status.as_str()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn update_status(&self, id: &str, status: VideoStatus) -> Result<(), VideoError> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE videos SET status = ?, updated_at = ? WHERE id = ?",
            params![status.as_str(), Utc::now().to_rfc3339(), id],
        )?;
        if changed == 0 {
            return Err(VideoError::NotFound(id.to_string()));
        }
        Ok(())
    }

    fn set_download_result(
        &self,
        id: &str,
        local_path: &str,
        size_bytes: i64,
    ) -> Result<(), VideoError> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE videos SET local_path = ?, size_bytes = ?, status = 'downloaded', updated_at = ? \
             WHERE id = ?",
            params![local_path, size_bytes, Utc::now().to_rfc3339(), id],
        )?;
        if changed == 0 {
            return Err(VideoError::NotFound(id.to_string()));
        }
        Ok(())
    }

    fn set_upload_result(&self, id: &str, share_url: &str) -> Result<(), VideoError> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE videos SET share_url = ?, status = 'available', updated_at = ? WHERE id = ?",
            params![share_url, Utc::now().to_rfc3339(), id],
        )?;
        if changed == 0 {
            return Err(VideoError::NotFound(id.to_string()));
        }
        Ok(())
    }

    fn expire_stale(&self, max_age_days: i64) -> Result<usize, VideoError> {
        let conn = self.conn.lock().unwrap();
        let cutoff = Utc::now() - chrono::Duration::days(max_age_days);

        let expired = conn.execute(
            "UPDATE videos SET status = 'expired', updated_at = ? \
             WHERE status = 'available' AND share_url IS NOT NULL AND updated_at < ?",
            params![Utc::now().to_rfc3339(), cutoff.to_rfc3339()],
        )?;
        if expired > 0 {
            info!(count = expired, "videos marked expired");
        }
        Ok(expired)
    }
}
