//! SQLite-backed task store implementation.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use tracing::debug;

use super::{
    CreateTaskRequest, StageOutputs, Task, TaskError, TaskFilter, TaskState, TaskStore,
};

const TASK_COLUMNS: &str = "id, video_id, account_id, state, queue_name, local_path, share_url, \
                            retries, max_retries, error_message, dispatched_at, created_at, updated_at";

/// SQLite-backed task store.
pub struct SqliteTaskStore {
    conn: Mutex<Connection>,
}

impl SqliteTaskStore {
    /// Create a new SQLite task store, creating the database file and
    /// tables if needed.
    pub fn new(path: &Path) -> Result<Self, TaskError> {
        let conn = Connection::open(path)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory SQLite task store (useful for testing).
    pub fn in_memory() -> Result<Self, TaskError> {
        let conn = Connection::open_in_memory()?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), TaskError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                video_id TEXT NOT NULL,
                account_id TEXT,
                state TEXT NOT NULL,
                queue_name TEXT NOT NULL,
                local_path TEXT,
                share_url TEXT,
                retries INTEGER NOT NULL DEFAULT 0,
                max_retries INTEGER NOT NULL DEFAULT 3,
                error_message TEXT,
                dispatched_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_tasks_state ON tasks(state);
            CREATE INDEX IF NOT EXISTS idx_tasks_video_id ON tasks(video_id);
            CREATE INDEX IF NOT EXISTS idx_tasks_updated_at ON tasks(updated_at);
            "#,
        )?;
        Ok(())
    }

    fn build_where_clause(filter: &TaskFilter) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(state) = filter.state {
            conditions.push("state = ?");
            params.push(Box::new(state.as_str().to_string()));
        }

        if let Some(ref video_id) = filter.video_id {
            conditions.push("video_id = ?");
            params.push(Box::new(video_id.clone()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }

    fn row_to_task(row: &rusqlite::Row) -> rusqlite::Result<Task> {
        let id: String = row.get(0)?;
        let video_id: String = row.get(1)?;
        let account_id: Option<String> = row.get(2)?;
        let state_str: String = row.get(3)?;
        let queue_name: String = row.get(4)?;
        let local_path: Option<String> = row.get(5)?;
        let share_url: Option<String> = row.get(6)?;
        let retries: u32 = row.get(7)?;
        let max_retries: u32 = row.get(8)?;
        let error_message: Option<String> = row.get(9)?;
        let dispatched_at_str: Option<String> = row.get(10)?;
        let created_at_str: String = row.get(11)?;
        let updated_at_str: String = row.get(12)?;

        let state = TaskState::parse(&state_str).unwrap_or(TaskState::Failed);

        let dispatched_at = dispatched_at_str
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        let created_at = DateTime::parse_from_rfc3339(&created_at_str)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());

        let updated_at = DateTime::parse_from_rfc3339(&updated_at_str)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());

        Ok(Task {
            id,
            video_id,
            account_id,
            state,
            queue_name,
            local_path,
            share_url,
            retries,
            max_retries,
            error_message,
            dispatched_at,
            created_at,
            updated_at,
        })
    }

    fn get_locked(conn: &Connection, id: &str) -> Result<Option<Task>, TaskError> {
        let result = conn.query_row(
            &format!("SELECT {} FROM tasks WHERE id = ?", TASK_COLUMNS),
            params![id],
            Self::row_to_task,
        );

        match result {
            Ok(task) => Ok(Some(task)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn list_with_sql(
        &self,
        sql: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<Task>, TaskError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params, Self::row_to_task)?;

        let mut tasks = Vec::new();
        for row in rows {
            tasks.push(row?);
        }
        Ok(tasks)
    }
}

impl TaskStore for SqliteTaskStore {
    fn create(&self, request: CreateTaskRequest) -> Result<Task, TaskError> {
        let conn = self.conn.lock().unwrap();

        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        let state = TaskState::Pending;

        conn.execute(
            "INSERT INTO tasks (id, video_id, state, queue_name, retries, max_retries, created_at, updated_at) \
             VALUES (?, ?, ?, ?, 0, ?, ?, ?)",
            params![
                id,
                request.video_id,
                state.as_str(),
                request.queue_name,
                request.max_retries,
                now.to_rfc3339(),
                now.to_rfc3339(),
            ],
        )?;

        debug!(task_id = %id, video_id = %request.video_id, "task created");

        Ok(Task {
            id,
            video_id: request.video_id,
            account_id: None,
            state,
            queue_name: request.queue_name,
            local_path: None,
            share_url: None,
            retries: 0,
            max_retries: request.max_retries,
            error_message: None,
            dispatched_at: None,
            created_at: now,
            updated_at: now,
        })
    }

    fn get(&self, id: &str) -> Result<Option<Task>, TaskError> {
        let conn = self.conn.lock().unwrap();
        Self::get_locked(&conn, id)
    }

    fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>, TaskError> {
        let conn = self.conn.lock().unwrap();

        let (where_clause, params) = Self::build_where_clause(filter);
        let sql = format!(
            "SELECT {} FROM tasks {} ORDER BY created_at ASC LIMIT ? OFFSET ?",
            TASK_COLUMNS, where_clause
        );

        let mut stmt = conn.prepare(&sql)?;

        let mut all_params: Vec<Box<dyn rusqlite::ToSql>> = params;
        all_params.push(Box::new(filter.limit));
        all_params.push(Box::new(filter.offset));

        let param_refs: Vec<&dyn rusqlite::ToSql> = all_params.iter().map(|p| p.as_ref()).collect();
        let rows = stmt.query_map(param_refs.as_slice(), Self::row_to_task)?;

        let mut tasks = Vec::new();
        for row in rows {
            tasks.push(row?);
        }
        Ok(tasks)
    }

    fn count(&self, filter: &TaskFilter) -> Result<i64, TaskError> {
        let conn = self.conn.lock().unwrap();

        let (where_clause, params) = Self::build_where_clause(filter);
        let sql = format!("SELECT COUNT(*) FROM tasks {}", where_clause);

        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let count: i64 = conn.query_row(&sql, param_refs.as_slice(), |row| row.get(0))?;
        Ok(count)
    }

    fn count_in_state(&self, state: TaskState) -> Result<i64, TaskError> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM tasks WHERE state = ?",
            params![state.as_str()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn list_pending(&self, limit: i64) -> Result<Vec<Task>, TaskError> {
        self.list_with_sql(
            &format!(
                "SELECT {} FROM tasks WHERE state = 'pending' ORDER BY created_at ASC LIMIT ?",
                TASK_COLUMNS
            ),
            &[&limit as &dyn rusqlite::ToSql],
        )
    }

    fn list_ready_for_upload(&self, limit: i64) -> Result<Vec<Task>, TaskError> {
        self.list_with_sql(
            &format!(
                "SELECT {} FROM tasks \
                 WHERE state = 'remuxing' AND local_path IS NOT NULL \
                 ORDER BY created_at ASC LIMIT ?",
                TASK_COLUMNS
            ),
            &[&limit as &dyn rusqlite::ToSql],
        )
    }

    fn list_awaiting_verify_dispatch(&self, limit: i64) -> Result<Vec<Task>, TaskError> {
        self.list_with_sql(
            &format!(
                "SELECT {} FROM tasks \
                 WHERE state = 'verifying' AND dispatched_at IS NULL \
                 ORDER BY updated_at ASC LIMIT ?",
                TASK_COLUMNS
            ),
            &[&limit as &dyn rusqlite::ToSql],
        )
    }

    fn claim_for_download(&self, id: &str) -> Result<bool, TaskError> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();

        let changed = conn.execute(
            "UPDATE tasks SET state = 'downloading', dispatched_at = ?, updated_at = ? \
             WHERE id = ? AND state = 'pending'",
            params![now, now, id],
        )?;
        Ok(changed > 0)
    }

    fn claim_for_upload(
        &self,
        id: &str,
        account_id: &str,
        queue_name: &str,
    ) -> Result<bool, TaskError> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();

        let changed = conn.execute(
            "UPDATE tasks \
             SET state = 'uploading', account_id = ?, queue_name = ?, dispatched_at = ?, updated_at = ? \
             WHERE id = ? AND state = 'remuxing' AND local_path IS NOT NULL",
            params![account_id, queue_name, now, now, id],
        )?;
        Ok(changed > 0)
    }

    fn claim_verify_dispatch(&self, id: &str, queue_name: &str) -> Result<bool, TaskError> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();

        let changed = conn.execute(
            "UPDATE tasks SET queue_name = ?, dispatched_at = ?, updated_at = ? \
             WHERE id = ? AND state = 'verifying' AND dispatched_at IS NULL",
            params![queue_name, now, now, id],
        )?;
        Ok(changed > 0)
    }

    fn advance(
        &self,
        id: &str,
        new_state: TaskState,
        outputs: StageOutputs,
    ) -> Result<Task, TaskError> {
        let conn = self.conn.lock().unwrap();

        let current =
            Self::get_locked(&conn, id)?.ok_or_else(|| TaskError::NotFound(id.to_string()))?;

        if !current.state.can_transition_to(new_state) {
            return Err(TaskError::InvalidTransition {
                task_id: id.to_string(),
                from: current.state.as_str(),
                to: new_state.as_str(),
            });
        }

        let now = Utc::now();
        conn.execute(
            "UPDATE tasks \
             SET state = ?, \
                 local_path = COALESCE(?, local_path), \
                 share_url = COALESCE(?, share_url), \
                 dispatched_at = NULL, \
                 updated_at = ? \
             WHERE id = ?",
            params![
                new_state.as_str(),
                outputs.local_path,
                outputs.share_url,
                now.to_rfc3339(),
                id,
            ],
        )?;

        debug!(task_id = %id, from = %current.state, to = %new_state, "task advanced");

        Ok(Task {
            state: new_state,
            local_path: outputs.local_path.or(current.local_path),
            share_url: outputs.share_url.or(current.share_url),
            dispatched_at: None,
            updated_at: now,
            ..current
        })
    }

    fn mark_failed(&self, id: &str, error: &str) -> Result<Task, TaskError> {
        let conn = self.conn.lock().unwrap();

        let current =
            Self::get_locked(&conn, id)?.ok_or_else(|| TaskError::NotFound(id.to_string()))?;

        if current.state.is_terminal() {
            return Err(TaskError::InvalidTransition {
                task_id: id.to_string(),
                from: current.state.as_str(),
                to: TaskState::Failed.as_str(),
            });
        }

        let now = Utc::now();
        conn.execute(
            "UPDATE tasks SET state = 'failed', error_message = ?, dispatched_at = NULL, updated_at = ? \
             WHERE id = ?",
            params![error, now.to_rfc3339(), id],
        )?;

        Ok(Task {
            state: TaskState::Failed,
            error_message: Some(error.to_string()),
            dispatched_at: None,
            updated_at: now,
            ..current
        })
    }

    fn record_remux_output(&self, id: &str, local_path: &str) -> Result<bool, TaskError> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();

        let changed = conn.execute(
            "UPDATE tasks SET local_path = ?, updated_at = ? \
             WHERE id = ? AND state = 'remuxing'",
            params![local_path, now, id],
        )?;
        Ok(changed > 0)
    }

    fn list_stale(&self, state: TaskState, cutoff: DateTime<Utc>) -> Result<Vec<Task>, TaskError> {
        self.list_with_sql(
            &format!(
                "SELECT {} FROM tasks WHERE state = ? AND updated_at < ? ORDER BY updated_at ASC",
                TASK_COLUMNS
            ),
            &[
                &state.as_str() as &dyn rusqlite::ToSql,
                &cutoff.to_rfc3339(),
            ],
        )
    }

    fn retry_stale(
        &self,
        id: &str,
        from: TaskState,
        to: TaskState,
        error: &str,
    ) -> Result<bool, TaskError> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();

        let changed = conn.execute(
            "UPDATE tasks \
             SET state = ?, retries = retries + 1, error_message = ?, dispatched_at = NULL, updated_at = ? \
             WHERE id = ? AND state = ? AND retries < max_retries",
            params![to.as_str(), error, now, id, from.as_str()],
        )?;
        Ok(changed > 0)
    }

    fn fail_exhausted(&self, id: &str, from: TaskState, error: &str) -> Result<bool, TaskError> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();

        let changed = conn.execute(
            "UPDATE tasks \
             SET state = 'failed', error_message = ?, dispatched_at = NULL, updated_at = ? \
             WHERE id = ? AND state = ? AND retries >= max_retries",
            params![error, now, id, from.as_str()],
        )?;
        Ok(changed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_store() -> SqliteTaskStore {
        SqliteTaskStore::in_memory().unwrap()
    }

    fn create_test_request() -> CreateTaskRequest {
        CreateTaskRequest {
            video_id: "video-1".to_string(),
            queue_name: "download".to_string(),
            max_retries: 3,
        }
    }

    #[test]
    fn test_create_task() {
        let store = create_test_store();
        let task = store.create(create_test_request()).unwrap();

        assert!(!task.id.is_empty());
        assert_eq!(task.video_id, "video-1");
        assert_eq!(task.state, TaskState::Pending);
        assert_eq!(task.retries, 0);
        assert_eq!(task.max_retries, 3);
        assert!(task.dispatched_at.is_none());
    }

    #[test]
    fn test_get_task() {
        let store = create_test_store();
        let created = store.create(create_test_request()).unwrap();

        let fetched = store.get(&created.id).unwrap().unwrap();
        assert_eq!(fetched.id, created.id);
        assert_eq!(fetched.state, TaskState::Pending);
    }

    #[test]
    fn test_get_nonexistent_task() {
        let store = create_test_store();
        assert!(store.get("nonexistent").unwrap().is_none());
    }

    #[test]
    fn test_claim_for_download_once_only() {
        let store = create_test_store();
        let task = store.create(create_test_request()).unwrap();

        assert!(store.claim_for_download(&task.id).unwrap());
        // Second claim loses: the task is no longer pending.
        assert!(!store.claim_for_download(&task.id).unwrap());

        let fetched = store.get(&task.id).unwrap().unwrap();
        assert_eq!(fetched.state, TaskState::Downloading);
        assert!(fetched.dispatched_at.is_some());
    }

    #[test]
    fn test_claim_for_upload_requires_local_path() {
        let store = create_test_store();
        let task = store.create(create_test_request()).unwrap();
        store.claim_for_download(&task.id).unwrap();
        store
            .advance(&task.id, TaskState::Remuxing, StageOutputs::none())
            .unwrap();

        // No local_path yet: not ready to upload.
        assert!(!store.claim_for_upload(&task.id, "acct-1", "upload").unwrap());

        // Record the remux output, then the claim succeeds.
        assert!(store.record_remux_output(&task.id, "/data/out.mp4").unwrap());
        assert!(store.claim_for_upload(&task.id, "acct-1", "upload").unwrap());

        let fetched = store.get(&task.id).unwrap().unwrap();
        assert_eq!(fetched.state, TaskState::Uploading);
        assert_eq!(fetched.account_id.as_deref(), Some("acct-1"));
        assert_eq!(fetched.queue_name, "upload");
    }

    #[test]
    fn test_advance_records_outputs() {
        let store = create_test_store();
        let task = store.create(create_test_request()).unwrap();
        store.claim_for_download(&task.id).unwrap();

        let advanced = store
            .advance(
                &task.id,
                TaskState::Remuxing,
                StageOutputs::local_path("/data/out.mp4"),
            )
            .unwrap();

        assert_eq!(advanced.state, TaskState::Remuxing);
        assert_eq!(advanced.local_path.as_deref(), Some("/data/out.mp4"));
        assert!(advanced.dispatched_at.is_none());
        assert!(advanced.is_ready_for_upload());
    }

    #[test]
    fn test_advance_rejects_invalid_transition() {
        let store = create_test_store();
        let task = store.create(create_test_request()).unwrap();

        let result = store.advance(&task.id, TaskState::Uploading, StageOutputs::none());
        assert!(matches!(result, Err(TaskError::InvalidTransition { .. })));
    }

    #[test]
    fn test_advance_nonexistent_task() {
        let store = create_test_store();
        let result = store.advance("missing", TaskState::Downloading, StageOutputs::none());
        assert!(matches!(result, Err(TaskError::NotFound(_))));
    }

    #[test]
    fn test_mark_failed_from_any_non_terminal() {
        let store = create_test_store();
        let task = store.create(create_test_request()).unwrap();
        store.claim_for_download(&task.id).unwrap();

        let failed = store.mark_failed(&task.id, "downloader crashed").unwrap();
        assert_eq!(failed.state, TaskState::Failed);
        assert_eq!(failed.error_message.as_deref(), Some("downloader crashed"));

        // Terminal: no further failure writes.
        let result = store.mark_failed(&task.id, "again");
        assert!(matches!(result, Err(TaskError::InvalidTransition { .. })));
    }

    #[test]
    fn test_claim_verify_dispatch_once_only() {
        let store = create_test_store();
        let task = store.create(create_test_request()).unwrap();
        store.claim_for_download(&task.id).unwrap();
        store
            .advance(
                &task.id,
                TaskState::Remuxing,
                StageOutputs::local_path("/data/out.mp4"),
            )
            .unwrap();
        store.claim_for_upload(&task.id, "acct-1", "upload").unwrap();
        store
            .advance(
                &task.id,
                TaskState::Verifying,
                StageOutputs::share_url("https://share/x"),
            )
            .unwrap();

        assert_eq!(store.list_awaiting_verify_dispatch(10).unwrap().len(), 1);
        assert!(store.claim_verify_dispatch(&task.id, "verify").unwrap());
        assert!(!store.claim_verify_dispatch(&task.id, "verify").unwrap());
        assert!(store.list_awaiting_verify_dispatch(10).unwrap().is_empty());
    }

    #[test]
    fn test_retry_stale_bounded_by_max_retries() {
        let store = create_test_store();
        let mut request = create_test_request();
        request.max_retries = 1;
        let task = store.create(request).unwrap();
        store.claim_for_download(&task.id).unwrap();

        assert!(store
            .retry_stale(&task.id, TaskState::Downloading, TaskState::Pending, "stale")
            .unwrap());
        let fetched = store.get(&task.id).unwrap().unwrap();
        assert_eq!(fetched.state, TaskState::Pending);
        assert_eq!(fetched.retries, 1);
        assert!(fetched.dispatched_at.is_none());

        // Budget exhausted: the retry write no longer matches.
        store.claim_for_download(&task.id).unwrap();
        assert!(!store
            .retry_stale(&task.id, TaskState::Downloading, TaskState::Pending, "stale")
            .unwrap());
        assert!(store
            .fail_exhausted(&task.id, TaskState::Downloading, "retries exhausted")
            .unwrap());

        let fetched = store.get(&task.id).unwrap().unwrap();
        assert_eq!(fetched.state, TaskState::Failed);
        assert_eq!(fetched.retries, 1);
    }

    #[test]
    fn test_list_stale_uses_cutoff() {
        let store = create_test_store();
        let task = store.create(create_test_request()).unwrap();
        store.claim_for_download(&task.id).unwrap();

        // Everything is stale against a future cutoff, nothing against a past one.
        let future = Utc::now() + chrono::Duration::hours(1);
        let past = Utc::now() - chrono::Duration::hours(1);
        assert_eq!(store.list_stale(TaskState::Downloading, future).unwrap().len(), 1);
        assert!(store.list_stale(TaskState::Downloading, past).unwrap().is_empty());
    }

    #[test]
    fn test_list_and_count_with_filter() {
        let store = create_test_store();
        for _ in 0..3 {
            store.create(create_test_request()).unwrap();
        }
        let claimed = store.create(create_test_request()).unwrap();
        store.claim_for_download(&claimed.id).unwrap();

        let filter = TaskFilter::new().with_state(TaskState::Pending);
        assert_eq!(store.list(&filter).unwrap().len(), 3);
        assert_eq!(store.count(&filter).unwrap(), 3);
        assert_eq!(store.count_in_state(TaskState::Downloading).unwrap(), 1);
    }

    #[test]
    fn test_file_based_store() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("conveyor.db");

        let store = SqliteTaskStore::new(&db_path).unwrap();
        let task = store.create(create_test_request()).unwrap();

        assert!(db_path.exists());
        assert!(store.get(&task.id).unwrap().is_some());
    }

    #[test]
    fn test_record_remux_output_only_while_remuxing() {
        let store = create_test_store();
        let task = store.create(create_test_request()).unwrap();

        // Not remuxing yet.
        assert!(!store.record_remux_output(&task.id, "/data/out.mp4").unwrap());

        store.claim_for_download(&task.id).unwrap();
        store
            .advance(&task.id, TaskState::Remuxing, StageOutputs::none())
            .unwrap();
        assert!(store.record_remux_output(&task.id, "/data/out.mp4").unwrap());

        let fetched = store.get(&task.id).unwrap().unwrap();
        assert!(fetched.is_ready_for_upload());
    }
}
