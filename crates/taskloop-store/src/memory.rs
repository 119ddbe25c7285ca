//! In-memory backend for tests and local experimentation.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use taskloop_core::{current_unix_timestamp_ms, generate_record_id};
use taskloop_return_loop::AgentHandle;
use tokio::sync::RwLock;

use crate::{
    ActivityRecord, ExternalComment, IngestLedger, IngestLedgerEntry, StoreError, StoreResult,
    TaskBoard, TaskSummary, TaskThread, ThreadStore, EXTERNAL_SOURCE_OPENCLAW, TASK_STATUS_DONE,
};

type LedgerKey = (String, AgentHandle, String, i64, String, u32);

#[derive(Debug, Default)]
pub struct InMemoryStore {
    inner: RwLock<StoreInner>,
}

#[derive(Debug, Default)]
struct StoreInner {
    tasks: HashMap<String, TaskSummary>,
    threads: Vec<TaskThread>,
    // Ties on wall-clock time are broken by write sequence.
    thread_sequence: HashMap<String, u64>,
    next_sequence: u64,
    ledger: HashSet<LedgerKey>,
    ledger_entries: Vec<IngestLedgerEntry>,
    activities: Vec<ActivityRecord>,
}

impl StoreInner {
    fn touch(&mut self, thread_id: &str) {
        self.next_sequence = self.next_sequence.saturating_add(1);
        self.thread_sequence
            .insert(thread_id.to_string(), self.next_sequence);
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_task(&self, task: TaskSummary) {
        let mut inner = self.inner.write().await;
        inner.tasks.insert(task.task_id.clone(), task);
    }

    pub async fn task(&self, task_id: &str) -> Option<TaskSummary> {
        self.inner.read().await.tasks.get(task_id).cloned()
    }

    pub async fn activities(&self, task_id: &str) -> Vec<ActivityRecord> {
        self.inner
            .read()
            .await
            .activities
            .iter()
            .filter(|activity| activity.task_id == task_id)
            .cloned()
            .collect()
    }

    pub async fn threads(&self) -> Vec<TaskThread> {
        self.inner.read().await.threads.clone()
    }

    pub async fn ledger_entries(&self) -> Vec<IngestLedgerEntry> {
        self.inner.read().await.ledger_entries.clone()
    }
}

#[async_trait]
impl ThreadStore for InMemoryStore {
    async fn upsert_task_thread(
        &self,
        task_id: &str,
        handle: AgentHandle,
        session_key: &str,
    ) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let now = current_unix_timestamp_ms();
        let existing = inner
            .threads
            .iter_mut()
            .find(|thread| thread.task_id == task_id && thread.handle == handle);
        let thread_id = match existing {
            Some(thread) => {
                thread.session_key = session_key.to_string();
                thread.updated_unix_ms = now;
                thread.id.clone()
            }
            None => {
                let thread = TaskThread {
                    id: generate_record_id("thread"),
                    task_id: task_id.to_string(),
                    handle,
                    session_key: session_key.to_string(),
                    watermark_ts: 0,
                    updated_unix_ms: now,
                };
                let thread_id = thread.id.clone();
                inner.threads.push(thread);
                thread_id
            }
        };
        inner.touch(&thread_id);
        Ok(())
    }

    async fn list_threads_to_poll(&self, limit: usize) -> StoreResult<Vec<TaskThread>> {
        let inner = self.inner.read().await;
        let mut threads = inner.threads.clone();
        threads.sort_by_key(|thread| {
            std::cmp::Reverse((
                thread.updated_unix_ms,
                inner.thread_sequence.get(&thread.id).copied().unwrap_or(0),
            ))
        });
        threads.truncate(limit);
        Ok(threads)
    }

    async fn update_thread_watermark(&self, thread_id: &str, watermark_ts: i64) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let Some(thread) = inner.threads.iter_mut().find(|thread| thread.id == thread_id) else {
            return Ok(());
        };
        thread.watermark_ts = thread.watermark_ts.max(watermark_ts);
        thread.updated_unix_ms = current_unix_timestamp_ms();
        inner.touch(thread_id);
        Ok(())
    }
}

#[async_trait]
impl IngestLedger for InMemoryStore {
    async fn record_ingest_once(&self, entry: &IngestLedgerEntry) -> StoreResult<bool> {
        let key = (
            entry.task_id.clone(),
            entry.handle,
            entry.session_key.clone(),
            entry.message_ts,
            entry.marker_type.clone(),
            entry.marker_index,
        );
        let mut inner = self.inner.write().await;
        if !inner.ledger.insert(key) {
            return Ok(false);
        }
        inner.ledger_entries.push(entry.clone());
        Ok(true)
    }
}

#[async_trait]
impl TaskBoard for InMemoryStore {
    async fn find_task(&self, task_id: &str) -> StoreResult<Option<TaskSummary>> {
        Ok(self.task(task_id).await)
    }

    async fn insert_external_comment(&self, comment: ExternalComment) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        inner.activities.push(ActivityRecord {
            id: generate_record_id("activity"),
            task_id: comment.task_id,
            kind: "comment".to_string(),
            user_id: None,
            content: comment.content,
            external_user_name: Some(comment.handle.to_string()),
            external_source: Some(EXTERNAL_SOURCE_OPENCLAW.to_string()),
            created_unix_ms: current_unix_timestamp_ms(),
        });
        Ok(())
    }

    async fn mark_task_done(&self, task_id: &str) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let task = inner
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| StoreError::TaskNotFound(task_id.to_string()))?;
        task.status = TASK_STATUS_DONE.to_string();
        Ok(())
    }
}
