//! SQLite-backed store with durable thread, ledger, and task-board tables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use taskloop_core::{current_unix_timestamp_ms, generate_record_id};
use taskloop_return_loop::AgentHandle;

use crate::{
    ActivityRecord, ExternalComment, IngestLedger, IngestLedgerEntry, StoreError, StoreResult,
    TaskBoard, TaskSummary, TaskThread, ThreadStore, EXTERNAL_SOURCE_OPENCLAW, TASK_STATUS_DONE,
};

/// Persistent SQLite store backend used by the return loop.
#[derive(Debug)]
pub struct SqliteStore {
    db_path: PathBuf,
}

impl SqliteStore {
    /// Creates a SQLite-backed store at `path`, creating schema if needed.
    pub fn new(path: impl AsRef<Path>) -> StoreResult<Self> {
        let db_path = path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let store = Self { db_path };
        let connection = store.open_connection()?;
        store.initialize_schema(&connection)?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        self.db_path.as_path()
    }

    fn open_connection(&self) -> StoreResult<Connection> {
        let connection = Connection::open(&self.db_path)?;
        connection.busy_timeout(Duration::from_secs(5))?;
        connection.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            "#,
        )?;
        Ok(connection)
    }

    fn initialize_schema(&self, connection: &Connection) -> StoreResult<()> {
        connection.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS projects (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL,
                title TEXT NOT NULL,
                number INTEGER NULL,
                status TEXT NOT NULL DEFAULT 'to-do'
            );

            CREATE TABLE IF NOT EXISTS activities (
                id TEXT PRIMARY KEY,
                task_id TEXT NOT NULL,
                type TEXT NOT NULL,
                user_id TEXT NULL,
                content TEXT NOT NULL,
                external_user_name TEXT NULL,
                external_source TEXT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_activities_task ON activities (task_id, created_at);

            CREATE TABLE IF NOT EXISTS openclaw_task_threads (
                id TEXT PRIMARY KEY,
                task_id TEXT NOT NULL,
                handle TEXT NOT NULL,
                session_key TEXT NOT NULL,
                watermark_ts INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                UNIQUE (task_id, handle)
            );

            CREATE INDEX IF NOT EXISTS idx_task_threads_updated ON openclaw_task_threads (updated_at);

            CREATE TABLE IF NOT EXISTS openclaw_ingest_ledger (
                id TEXT PRIMARY KEY,
                task_id TEXT NOT NULL,
                handle TEXT NOT NULL,
                session_key TEXT NOT NULL,
                message_ts INTEGER NOT NULL,
                marker_type TEXT NOT NULL,
                marker_index INTEGER NOT NULL,
                marker_hash TEXT NULL,
                created_at INTEGER NOT NULL,
                UNIQUE (task_id, handle, session_key, message_ts, marker_type, marker_index)
            );
            "#,
        )?;
        Ok(())
    }

    pub fn upsert_project(&self, project_id: &str, name: &str) -> StoreResult<()> {
        let connection = self.open_connection()?;
        connection.execute(
            r#"
            INSERT INTO projects (id, name) VALUES (?1, ?2)
            ON CONFLICT (id) DO UPDATE SET name = excluded.name
            "#,
            params![project_id, name],
        )?;
        Ok(())
    }

    pub fn upsert_task(&self, task: &TaskSummary) -> StoreResult<()> {
        let connection = self.open_connection()?;
        connection.execute(
            r#"
            INSERT INTO tasks (id, project_id, title, number, status) VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT (id) DO UPDATE SET
                project_id = excluded.project_id,
                title = excluded.title,
                number = excluded.number,
                status = excluded.status
            "#,
            params![
                task.task_id,
                task.project_id,
                task.title,
                task.number,
                task.status
            ],
        )?;
        Ok(())
    }

    pub fn list_activities(&self, task_id: &str) -> StoreResult<Vec<ActivityRecord>> {
        let connection = self.open_connection()?;
        let mut statement = connection.prepare(
            r#"
            SELECT id, task_id, type, user_id, content, external_user_name, external_source, created_at
            FROM activities
            WHERE task_id = ?1
            ORDER BY created_at, rowid
            "#,
        )?;
        let rows = statement.query_map(params![task_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, Option<String>>(6)?,
                row.get::<_, String>(7)?,
            ))
        })?;

        let mut activities = Vec::new();
        for row in rows {
            let (id, task_id, kind, user_id, content, external_user_name, external_source, created_at) =
                row?;
            activities.push(ActivityRecord {
                id,
                task_id,
                kind,
                user_id,
                content,
                external_user_name,
                external_source,
                created_unix_ms: timestamp_ms_from_db(&created_at)?,
            });
        }
        Ok(activities)
    }

    pub fn count_ledger_entries(&self) -> StoreResult<u64> {
        let connection = self.open_connection()?;
        let count: i64 =
            connection.query_row("SELECT COUNT(*) FROM openclaw_ingest_ledger", [], |row| {
                row.get(0)
            })?;
        i64_to_u64("ledger_count", count)
    }
}

#[async_trait]
impl ThreadStore for SqliteStore {
    async fn upsert_task_thread(
        &self,
        task_id: &str,
        handle: AgentHandle,
        session_key: &str,
    ) -> StoreResult<()> {
        let connection = self.open_connection()?;
        let now = u64_to_i64(current_unix_timestamp_ms());
        connection.execute(
            r#"
            INSERT INTO openclaw_task_threads (
                id, task_id, handle, session_key, watermark_ts, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, 0, ?5, ?5)
            ON CONFLICT (task_id, handle) DO UPDATE SET
                session_key = excluded.session_key,
                updated_at = excluded.updated_at
            "#,
            params![
                generate_record_id("thread"),
                task_id,
                handle.as_str(),
                session_key,
                now
            ],
        )?;
        Ok(())
    }

    async fn list_threads_to_poll(&self, limit: usize) -> StoreResult<Vec<TaskThread>> {
        let connection = self.open_connection()?;
        let mut statement = connection.prepare(
            r#"
            SELECT id, task_id, handle, session_key, watermark_ts, updated_at
            FROM openclaw_task_threads
            ORDER BY updated_at DESC, rowid DESC
            LIMIT ?1
            "#,
        )?;
        let rows = statement.query_map(params![u64_to_i64(limit as u64)], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, i64>(5)?,
            ))
        })?;

        let mut threads = Vec::new();
        for row in rows {
            let (id, task_id, handle, session_key, watermark_ts, updated_at) = row?;
            threads.push(TaskThread {
                id,
                task_id,
                handle: agent_handle_from_db(&handle)?,
                session_key,
                watermark_ts,
                updated_unix_ms: i64_to_u64("updated_at", updated_at)?,
            });
        }
        Ok(threads)
    }

    async fn update_thread_watermark(&self, thread_id: &str, watermark_ts: i64) -> StoreResult<()> {
        let connection = self.open_connection()?;
        connection.execute(
            r#"
            UPDATE openclaw_task_threads
            SET watermark_ts = MAX(watermark_ts, ?2), updated_at = ?3
            WHERE id = ?1
            "#,
            params![
                thread_id,
                watermark_ts,
                u64_to_i64(current_unix_timestamp_ms())
            ],
        )?;
        Ok(())
    }
}

#[async_trait]
impl IngestLedger for SqliteStore {
    async fn record_ingest_once(&self, entry: &IngestLedgerEntry) -> StoreResult<bool> {
        let connection = self.open_connection()?;
        let inserted = connection.execute(
            r#"
            INSERT INTO openclaw_ingest_ledger (
                id, task_id, handle, session_key, message_ts, marker_type, marker_index,
                marker_hash, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT (task_id, handle, session_key, message_ts, marker_type, marker_index)
            DO NOTHING
            "#,
            params![
                generate_record_id("ingest"),
                entry.task_id,
                entry.handle.as_str(),
                entry.session_key,
                entry.message_ts,
                entry.marker_type,
                i64::from(entry.marker_index),
                entry.marker_hash,
                u64_to_i64(current_unix_timestamp_ms()),
            ],
        )?;
        Ok(inserted == 1)
    }
}

#[async_trait]
impl TaskBoard for SqliteStore {
    async fn find_task(&self, task_id: &str) -> StoreResult<Option<TaskSummary>> {
        let connection = self.open_connection()?;
        let task = connection
            .query_row(
                r#"
                SELECT tasks.id, tasks.project_id, tasks.title, tasks.number, projects.name, tasks.status
                FROM tasks
                INNER JOIN projects ON projects.id = tasks.project_id
                WHERE tasks.id = ?1
                LIMIT 1
                "#,
                params![task_id],
                |row| {
                    Ok(TaskSummary {
                        task_id: row.get(0)?,
                        project_id: row.get(1)?,
                        title: row.get(2)?,
                        number: row.get(3)?,
                        project_name: row.get(4)?,
                        status: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(task)
    }

    async fn insert_external_comment(&self, comment: ExternalComment) -> StoreResult<()> {
        let connection = self.open_connection()?;
        connection.execute(
            r#"
            INSERT INTO activities (
                id, task_id, type, user_id, content, external_user_name, external_source, created_at
            ) VALUES (?1, ?2, 'comment', NULL, ?3, ?4, ?5, ?6)
            "#,
            params![
                generate_record_id("activity"),
                comment.task_id,
                comment.content,
                comment.handle.as_str(),
                EXTERNAL_SOURCE_OPENCLAW,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    async fn mark_task_done(&self, task_id: &str) -> StoreResult<()> {
        let connection = self.open_connection()?;
        let updated = connection.execute(
            "UPDATE tasks SET status = ?2 WHERE id = ?1",
            params![task_id, TASK_STATUS_DONE],
        )?;
        if updated == 0 {
            return Err(StoreError::TaskNotFound(task_id.to_string()));
        }
        Ok(())
    }
}

fn agent_handle_from_db(value: &str) -> StoreResult<AgentHandle> {
    AgentHandle::parse(value).ok_or_else(|| StoreError::InvalidPersistedValue {
        field: "handle",
        value: value.to_string(),
    })
}

fn timestamp_ms_from_db(value: &str) -> StoreResult<u64> {
    let parsed = DateTime::parse_from_rfc3339(value).map_err(|_| {
        StoreError::InvalidPersistedValue {
            field: "created_at",
            value: value.to_string(),
        }
    })?;
    i64_to_u64("created_at", parsed.with_timezone(&Utc).timestamp_millis())
}

fn i64_to_u64(field: &'static str, value: i64) -> StoreResult<u64> {
    u64::try_from(value).map_err(|_| StoreError::InvalidPersistedValue {
        field,
        value: value.to_string(),
    })
}

fn u64_to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use taskloop_return_loop::AgentHandle;
    use tempfile::tempdir;

    use super::SqliteStore;
    use crate::{
        ExternalComment, IngestLedger, IngestLedgerEntry, StoreError, TaskBoard, TaskSummary,
        ThreadStore,
    };

    fn ledger_entry(message_ts: i64, marker_index: u32) -> IngestLedgerEntry {
        IngestLedgerEntry {
            task_id: "T42".to_string(),
            handle: AgentHandle::Smoke,
            session_key: "agent:main:void:task:T42".to_string(),
            message_ts,
            marker_type: "complete".to_string(),
            marker_index,
            marker_hash: Some("abc".to_string()),
        }
    }

    fn seeded_store(path: &std::path::Path) -> SqliteStore {
        let store = SqliteStore::new(path).expect("create sqlite store");
        store.upsert_project("P1", "Void").expect("project");
        store
            .upsert_task(&TaskSummary {
                task_id: "T42".to_string(),
                project_id: "P1".to_string(),
                title: "Fix login".to_string(),
                number: Some(7),
                project_name: None,
                status: "to-do".to_string(),
            })
            .expect("task");
        store
    }

    #[tokio::test]
    async fn unit_record_ingest_once_is_conditional_on_full_key() {
        let temp = tempdir().expect("tempdir");
        let store = SqliteStore::new(temp.path().join("loop.sqlite")).expect("store");
        assert!(store.record_ingest_once(&ledger_entry(5, 0)).await.expect("first"));
        assert!(!store.record_ingest_once(&ledger_entry(5, 0)).await.expect("dup"));
        assert!(store.record_ingest_once(&ledger_entry(5, 1)).await.expect("index"));
        assert!(store.record_ingest_once(&ledger_entry(6, 0)).await.expect("ts"));
        assert_eq!(store.count_ledger_entries().expect("count"), 3);
    }

    #[tokio::test]
    async fn functional_ledger_and_watermark_survive_reopen() {
        let temp = tempdir().expect("tempdir");
        let db_path = temp.path().join("state/loop.sqlite");
        {
            let store = SqliteStore::new(&db_path).expect("store");
            store
                .upsert_task_thread("T42", AgentHandle::Smoke, "key")
                .await
                .expect("upsert");
            let thread = store.list_threads_to_poll(10).await.expect("list").remove(0);
            store
                .update_thread_watermark(&thread.id, 99)
                .await
                .expect("watermark");
            assert!(store.record_ingest_once(&ledger_entry(99, 0)).await.expect("insert"));
        }

        let reopened = SqliteStore::new(&db_path).expect("reopen");
        let threads = reopened.list_threads_to_poll(10).await.expect("list");
        assert_eq!(threads.len(), 1);
        assert_eq!(threads[0].watermark_ts, 99);
        assert_eq!(threads[0].handle, AgentHandle::Smoke);
        assert!(!reopened
            .record_ingest_once(&ledger_entry(99, 0))
            .await
            .expect("dup after reopen"));
    }

    #[tokio::test]
    async fn functional_upsert_task_thread_keeps_watermark_and_refreshes_session_key() {
        let temp = tempdir().expect("tempdir");
        let store = SqliteStore::new(temp.path().join("loop.sqlite")).expect("store");
        store
            .upsert_task_thread("T42", AgentHandle::Nav, "key-a")
            .await
            .expect("create");
        let thread_id = store.list_threads_to_poll(1).await.expect("list")[0].id.clone();
        store
            .update_thread_watermark(&thread_id, 12)
            .await
            .expect("watermark");
        store
            .upsert_task_thread("T42", AgentHandle::Nav, "key-b")
            .await
            .expect("refresh");
        let threads = store.list_threads_to_poll(10).await.expect("list");
        assert_eq!(threads.len(), 1);
        assert_eq!(threads[0].id, thread_id);
        assert_eq!(threads[0].session_key, "key-b");
        assert_eq!(threads[0].watermark_ts, 12);
    }

    #[tokio::test]
    async fn regression_update_thread_watermark_ignores_lower_values() {
        let temp = tempdir().expect("tempdir");
        let store = SqliteStore::new(temp.path().join("loop.sqlite")).expect("store");
        store
            .upsert_task_thread("T42", AgentHandle::Nav, "key")
            .await
            .expect("create");
        let thread_id = store.list_threads_to_poll(1).await.expect("list")[0].id.clone();
        store.update_thread_watermark(&thread_id, 50).await.expect("raise");
        store.update_thread_watermark(&thread_id, 10).await.expect("lower");
        let threads = store.list_threads_to_poll(1).await.expect("list");
        assert_eq!(threads[0].watermark_ts, 50);
    }

    #[tokio::test]
    async fn functional_task_board_reads_task_and_records_external_comments() {
        let temp = tempdir().expect("tempdir");
        let store = seeded_store(&temp.path().join("loop.sqlite"));

        let task = store.find_task("T42").await.expect("find").expect("task");
        assert_eq!(task.title, "Fix login");
        assert_eq!(task.number, Some(7));
        assert_eq!(task.project_name.as_deref(), Some("Void"));
        assert!(store.find_task("missing").await.expect("find").is_none());
        assert!(matches!(
            store.mark_task_done("missing").await,
            Err(StoreError::TaskNotFound(_))
        ));

        store.mark_task_done("T42").await.expect("done");
        store
            .insert_external_comment(ExternalComment {
                task_id: "T42".to_string(),
                handle: AgentHandle::Smoke,
                content: "Completed: all done".to_string(),
            })
            .await
            .expect("comment");

        let task = store.find_task("T42").await.expect("find").expect("task");
        assert_eq!(task.status, "done");
        let activities = store.list_activities("T42").expect("activities");
        assert_eq!(activities.len(), 1);
        assert_eq!(activities[0].content, "Completed: all done");
        assert_eq!(activities[0].user_id, None);
        assert_eq!(activities[0].external_user_name.as_deref(), Some("smoke"));
        assert_eq!(activities[0].external_source.as_deref(), Some("openclaw"));
    }
}
