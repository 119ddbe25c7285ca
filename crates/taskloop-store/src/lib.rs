//! Durable state contracts for the task/agent return loop.
//!
//! `ThreadStore` tracks one conversation per (task, agent) with its polling
//! watermark, `IngestLedger` admits each parsed marker exactly once, and
//! `TaskBoard` is the narrow slice of the task tracker the loop writes to.
//! Both an in-memory backend and a SQLite backend implement all three.

use async_trait::async_trait;
use serde::Serialize;
use taskloop_return_loop::AgentHandle;
use thiserror::Error;

mod memory;
mod sqlite;

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

pub const EXTERNAL_SOURCE_OPENCLAW: &str = "openclaw";
pub const TASK_STATUS_DONE: &str = "done";

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors returned by store implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("task '{0}' not found")]
    TaskNotFound(String),
    #[error("invalid persisted value for '{field}': {value}")]
    InvalidPersistedValue { field: &'static str, value: String },
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
/// One ongoing conversation between a task and one agent.
pub struct TaskThread {
    pub id: String,
    pub task_id: String,
    pub handle: AgentHandle,
    pub session_key: String,
    /// Highest message timestamp already considered; never decreases.
    pub watermark_ts: i64,
    pub updated_unix_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
/// Uniqueness key (plus audit hash) proving one marker was applied.
pub struct IngestLedgerEntry {
    pub task_id: String,
    pub handle: AgentHandle,
    pub session_key: String,
    pub message_ts: i64,
    pub marker_type: String,
    pub marker_index: u32,
    pub marker_hash: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskSummary {
    pub task_id: String,
    pub project_id: String,
    pub title: String,
    pub number: Option<i64>,
    pub project_name: Option<String>,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Comment written to a task's activity feed on behalf of an agent.
pub struct ExternalComment {
    pub task_id: String,
    pub handle: AgentHandle,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivityRecord {
    pub id: String,
    pub task_id: String,
    pub kind: String,
    pub user_id: Option<String>,
    pub content: String,
    pub external_user_name: Option<String>,
    pub external_source: Option<String>,
    pub created_unix_ms: u64,
}

/// Thread bookkeeping contract consumed by the dispatch service.
#[async_trait]
pub trait ThreadStore: Send + Sync {
    /// Creates the (task, handle) thread or refreshes its session key and
    /// `updated_at`. The watermark is never touched here.
    async fn upsert_task_thread(
        &self,
        task_id: &str,
        handle: AgentHandle,
        session_key: &str,
    ) -> StoreResult<()>;

    /// Most recently updated threads first.
    async fn list_threads_to_poll(&self, limit: usize) -> StoreResult<Vec<TaskThread>>;

    /// Raises the watermark to `watermark_ts` if higher and bumps `updated_at`.
    async fn update_thread_watermark(&self, thread_id: &str, watermark_ts: i64) -> StoreResult<()>;
}

/// Append-only exactly-once admission of parsed markers.
#[async_trait]
pub trait IngestLedger: Send + Sync {
    /// Returns `true` when the entry was inserted, `false` when its key was
    /// already present. Must be a single atomic conditional write.
    async fn record_ingest_once(&self, entry: &IngestLedgerEntry) -> StoreResult<bool>;
}

/// Task tracker operations the return loop depends on.
#[async_trait]
pub trait TaskBoard: Send + Sync {
    async fn find_task(&self, task_id: &str) -> StoreResult<Option<TaskSummary>>;
    async fn insert_external_comment(&self, comment: ExternalComment) -> StoreResult<()>;
    async fn mark_task_done(&self, task_id: &str) -> StoreResult<()>;
}
