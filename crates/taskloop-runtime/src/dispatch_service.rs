//! Return-loop orchestration.
//!
//! The outbound path forwards a task comment to every mentioned agent and
//! registers a thread per (task, agent). The poll path reads each thread's
//! history above its watermark, admits markers through the ingest ledger, and
//! applies them to the task. The dispatcher keeps no state of its own; all
//! progress lives in the thread store and the ledger.

use std::sync::Arc;

use anyhow::{Context, Result};
use futures_util::future::join_all;
use serde::Serialize;
use taskloop_return_loop::{
    comment_snippet, extract_mention_handles, filter_agent_handles, parse_markers,
    render_mention_message, task_session_key, AgentHandle, Marker, MentionMessageContext,
};
use taskloop_store::{
    ExternalComment, IngestLedger, IngestLedgerEntry, TaskBoard, TaskThread, ThreadStore,
};
use tracing::{debug, info, warn};

use crate::gateway_client::{GatewayClient, DEFAULT_HISTORY_LIMIT};
use crate::gateway_config::DispatchConfig;

pub const THREADS_PER_POLL: usize = 200;
const SEND_TIMEOUT_SECONDS: u64 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HandleDispatchStatus {
    Sent,
    SkippedNotConfigured,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HandleDispatch {
    pub handle: AgentHandle,
    pub status: HandleDispatchStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
/// Per-handle outcome of forwarding one comment. Failures are already logged.
pub struct MentionRouteReport {
    pub task_found: bool,
    pub dispatches: Vec<HandleDispatch>,
}

impl MentionRouteReport {
    pub fn sent_count(&self) -> usize {
        self.dispatches
            .iter()
            .filter(|dispatch| dispatch.status == HandleDispatchStatus::Sent)
            .count()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
/// Counters for one poll pass.
pub struct PollPassReport {
    pub threads_scanned: usize,
    pub threads_skipped: usize,
    pub threads_failed: usize,
    pub messages_considered: usize,
    pub markers_applied: usize,
    pub markers_duplicate: usize,
    pub watermarks_advanced: usize,
}

pub struct ReturnLoopDispatcher {
    threads: Arc<dyn ThreadStore>,
    ledger: Arc<dyn IngestLedger>,
    board: Arc<dyn TaskBoard>,
    gateway: GatewayClient,
    config: DispatchConfig,
}

impl ReturnLoopDispatcher {
    pub fn new(
        threads: Arc<dyn ThreadStore>,
        ledger: Arc<dyn IngestLedger>,
        board: Arc<dyn TaskBoard>,
        gateway: GatewayClient,
        config: DispatchConfig,
    ) -> Self {
        Self {
            threads,
            ledger,
            board,
            gateway,
            config,
        }
    }

    /// Wires one backend that implements every store contract.
    pub fn with_store<S>(store: Arc<S>, gateway: GatewayClient, config: DispatchConfig) -> Self
    where
        S: ThreadStore + IngestLedger + TaskBoard + 'static,
    {
        Self::new(store.clone(), store.clone(), store, gateway, config)
    }

    pub fn gateway(&self) -> &GatewayClient {
        &self.gateway
    }

    /// Forwards a comment to every known agent it mentions.
    ///
    /// Never fails: a missing task is a silent no-op and per-handle errors are
    /// logged and reported, not propagated.
    pub async fn route_mentions_from_comment(
        &self,
        task_id: &str,
        project_id: &str,
        raw_comment: &str,
        author_name: &str,
    ) -> MentionRouteReport {
        let mentioned = extract_mention_handles(raw_comment);
        let handles = filter_agent_handles(mentioned.iter().map(String::as_str));
        if handles.is_empty() {
            return MentionRouteReport::default();
        }

        let task = match self.board.find_task(task_id).await {
            Ok(Some(task)) => task,
            Ok(None) => {
                debug!(task_id, project_id, "mentioned task no longer exists; skipping dispatch");
                return MentionRouteReport::default();
            }
            Err(error) => {
                warn!(task_id, project_id, error = %error, "failed to load task for mention dispatch");
                return MentionRouteReport::default();
            }
        };

        let snippet = comment_snippet(raw_comment);
        let task_url = self.config.task_link(task_id);
        let message = render_mention_message(&MentionMessageContext {
            task_id,
            task_title: &task.title,
            task_number: task.number,
            project_name: task.project_name.as_deref(),
            author_name,
            task_url: &task_url,
            snippet: &snippet,
        });

        let outcomes = join_all(
            handles
                .iter()
                .map(|handle| self.dispatch_to_handle(task_id, *handle, &message)),
        )
        .await;

        let dispatches = handles
            .into_iter()
            .zip(outcomes)
            .map(|(handle, outcome)| {
                let status = match outcome {
                    Ok(status) => status,
                    Err(error) => {
                        warn!(
                            task_id,
                            handle = %handle,
                            error = %format!("{error:#}"),
                            "mention dispatch failed"
                        );
                        HandleDispatchStatus::Failed
                    }
                };
                HandleDispatch { handle, status }
            })
            .collect();

        MentionRouteReport {
            task_found: true,
            dispatches,
        }
    }

    async fn dispatch_to_handle(
        &self,
        task_id: &str,
        handle: AgentHandle,
        message: &str,
    ) -> Result<HandleDispatchStatus> {
        if !self.gateway.is_gateway_configured(handle) {
            debug!(task_id, handle = %handle, "gateway not configured; skipping mention");
            return Ok(HandleDispatchStatus::SkippedNotConfigured);
        }

        let session_key = task_session_key(task_id);
        self.threads
            .upsert_task_thread(task_id, handle, &session_key)
            .await
            .with_context(|| format!("failed to register thread for task {task_id}"))?;
        self.gateway
            .sessions_send(handle, &session_key, message, SEND_TIMEOUT_SECONDS)
            .await?;
        debug!(task_id, handle = %handle, session_key = %session_key, "mention dispatched");
        Ok(HandleDispatchStatus::Sent)
    }

    /// Runs one poll pass over the most recently updated threads.
    ///
    /// Threads are processed one at a time; a failing thread is logged and
    /// counted without stopping the pass.
    pub async fn poll_return_loop_once(&self) -> Result<PollPassReport> {
        let threads = self
            .threads
            .list_threads_to_poll(THREADS_PER_POLL)
            .await
            .context("failed to list return-loop threads")?;

        let mut report = PollPassReport::default();
        for thread in &threads {
            report.threads_scanned += 1;
            if !self.gateway.is_gateway_configured(thread.handle) {
                debug!(
                    task_id = %thread.task_id,
                    handle = %thread.handle,
                    "gateway not configured; skipping thread"
                );
                report.threads_skipped += 1;
                continue;
            }

            if let Err(error) = self.poll_thread(thread, &mut report).await {
                report.threads_failed += 1;
                warn!(
                    task_id = %thread.task_id,
                    handle = %thread.handle,
                    session_key = %thread.session_key,
                    error = %format!("{error:#}"),
                    "return-loop thread poll failed"
                );
            }
        }

        debug!(
            threads_scanned = report.threads_scanned,
            threads_skipped = report.threads_skipped,
            threads_failed = report.threads_failed,
            messages_considered = report.messages_considered,
            markers_applied = report.markers_applied,
            markers_duplicate = report.markers_duplicate,
            "return-loop poll pass finished"
        );
        Ok(report)
    }

    async fn poll_thread(&self, thread: &TaskThread, report: &mut PollPassReport) -> Result<()> {
        let history = self
            .gateway
            .sessions_history(thread.handle, &thread.session_key, DEFAULT_HISTORY_LIMIT)
            .await?;

        let mut max_ts = thread.watermark_ts;
        for message in &history.messages {
            let Some(message_ts) = message.positive_timestamp() else {
                continue;
            };
            if message_ts <= thread.watermark_ts {
                continue;
            }
            report.messages_considered += 1;
            max_ts = max_ts.max(message_ts);

            if !message.is_assistant() {
                continue;
            }
            let text = message.text();
            if text.is_empty() {
                continue;
            }

            for marker in parse_markers(&text, &thread.task_id) {
                self.apply_marker_once(thread, message_ts, &marker, report)
                    .await?;
            }
        }

        if max_ts > thread.watermark_ts {
            self.threads
                .update_thread_watermark(&thread.id, max_ts)
                .await
                .with_context(|| format!("failed to advance watermark for thread {}", thread.id))?;
            report.watermarks_advanced += 1;
            debug!(
                task_id = %thread.task_id,
                handle = %thread.handle,
                from = thread.watermark_ts,
                to = max_ts,
                "return-loop watermark advanced"
            );
        }
        Ok(())
    }

    async fn apply_marker_once(
        &self,
        thread: &TaskThread,
        message_ts: i64,
        marker: &Marker,
        report: &mut PollPassReport,
    ) -> Result<()> {
        let entry = IngestLedgerEntry {
            task_id: thread.task_id.clone(),
            handle: thread.handle,
            session_key: thread.session_key.clone(),
            message_ts,
            marker_type: marker.marker_type().to_string(),
            marker_index: marker.index,
            marker_hash: Some(marker.payload_hash()),
        };
        let admitted = self
            .ledger
            .record_ingest_once(&entry)
            .await
            .context("failed to record marker in ingest ledger")?;
        if !admitted {
            report.markers_duplicate += 1;
            return Ok(());
        }

        if marker.is_complete() {
            self.board
                .mark_task_done(&thread.task_id)
                .await
                .with_context(|| format!("failed to complete task {}", thread.task_id))?;
        }
        self.board
            .insert_external_comment(ExternalComment {
                task_id: thread.task_id.clone(),
                handle: thread.handle,
                content: marker.activity_content(),
            })
            .await
            .with_context(|| format!("failed to post agent comment on task {}", thread.task_id))?;

        report.markers_applied += 1;
        info!(
            task_id = %thread.task_id,
            handle = %thread.handle,
            marker_type = marker.marker_type(),
            marker_index = marker.index,
            message_ts,
            "return-loop marker applied"
        );
        Ok(())
    }
}
