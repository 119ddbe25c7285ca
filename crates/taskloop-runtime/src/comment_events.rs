use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::dispatch_service::{MentionRouteReport, ReturnLoopDispatcher};

pub const TASK_COMMENT_CREATED_EVENT: &str = "task.comment_created";
pub const DEFAULT_EVENT_BUS_CAPACITY: usize = 256;
const UNKNOWN_AUTHOR: &str = "Unknown";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskCommentCreated {
    pub task_id: String,
    pub user_id: String,
    pub project_id: String,
    #[serde(default)]
    pub raw_comment: Option<String>,
    #[serde(default)]
    pub author_name: Option<String>,
}

#[derive(Debug, Clone)]
/// In-process publisher for `task.comment_created` events.
pub struct CommentEventBus {
    sender: broadcast::Sender<TaskCommentCreated>,
}

impl Default for CommentEventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUS_CAPACITY)
    }
}

impl CommentEventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Returns the number of subscribers that will see the event.
    pub fn publish(&self, event: TaskCommentCreated) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskCommentCreated> {
        self.sender.subscribe()
    }
}

/// Routes one comment-created event; empty comments are ignored.
pub async fn handle_task_comment_created(
    dispatcher: &ReturnLoopDispatcher,
    event: &TaskCommentCreated,
) -> Option<MentionRouteReport> {
    let raw_comment = event.raw_comment.as_deref().unwrap_or_default();
    if raw_comment.is_empty() {
        return None;
    }
    let author_name = event
        .author_name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .unwrap_or(UNKNOWN_AUTHOR);

    Some(
        dispatcher
            .route_mentions_from_comment(&event.task_id, &event.project_id, raw_comment, author_name)
            .await,
    )
}

/// Subscribes before returning so no event published afterwards is missed.
pub fn spawn_comment_created_subscriber(
    bus: &CommentEventBus,
    dispatcher: Arc<ReturnLoopDispatcher>,
) -> JoinHandle<()> {
    let mut receiver = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    if let Some(report) = handle_task_comment_created(&dispatcher, &event).await {
                        debug!(
                            event = TASK_COMMENT_CREATED_EVENT,
                            task_id = %event.task_id,
                            sent = report.sent_count(),
                            "comment event routed"
                        );
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(
                        event = TASK_COMMENT_CREATED_EVENT,
                        skipped, "comment event subscriber lagged; events dropped"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use httpmock::prelude::*;
    use serde_json::json;
    use taskloop_return_loop::AgentHandle;
    use taskloop_store::{InMemoryStore, TaskSummary};

    use super::{
        handle_task_comment_created, spawn_comment_created_subscriber, CommentEventBus,
        TaskCommentCreated,
    };
    use crate::dispatch_service::ReturnLoopDispatcher;
    use crate::gateway_client::GatewayClient;
    use crate::gateway_config::{DispatchConfig, GatewaySettings};

    fn event(raw_comment: Option<&str>, author_name: Option<&str>) -> TaskCommentCreated {
        TaskCommentCreated {
            task_id: "T42".to_string(),
            user_id: "U1".to_string(),
            project_id: "P1".to_string(),
            raw_comment: raw_comment.map(str::to_string),
            author_name: author_name.map(str::to_string),
        }
    }

    async fn dispatcher_for(server: &MockServer) -> Arc<ReturnLoopDispatcher> {
        let store = Arc::new(InMemoryStore::new());
        store
            .insert_task(TaskSummary {
                task_id: "T42".to_string(),
                project_id: "P1".to_string(),
                title: "Fix login".to_string(),
                number: None,
                project_name: None,
                status: "to-do".to_string(),
            })
            .await;
        let settings =
            GatewaySettings::default().with_endpoint(AgentHandle::Smoke, &server.base_url(), "tok");
        let gateway = GatewayClient::new(settings, 2_000).expect("gateway");
        Arc::new(ReturnLoopDispatcher::with_store(
            store,
            gateway,
            DispatchConfig::default(),
        ))
    }

    #[test]
    fn unit_task_comment_created_decodes_camel_case_payload() {
        let decoded: TaskCommentCreated = serde_json::from_value(json!({
            "taskId": "T1",
            "userId": "U1",
            "projectId": "P1",
            "rawComment": "hi @nav",
            "authorName": null
        }))
        .expect("decode event");
        assert_eq!(decoded.raw_comment.as_deref(), Some("hi @nav"));
        assert_eq!(decoded.author_name, None);
    }

    #[tokio::test]
    async fn functional_handle_event_defaults_author_and_skips_empty_comments() {
        let server = MockServer::start();
        let send = server.mock(|when, then| {
            when.method(POST)
                .path("/tools/invoke")
                .body_includes("From: Unknown");
            then.status(200).json_body(json!({"ok": true}));
        });
        let dispatcher = dispatcher_for(&server).await;

        assert!(handle_task_comment_created(&dispatcher, &event(None, Some("Alice")))
            .await
            .is_none());
        assert!(handle_task_comment_created(&dispatcher, &event(Some(""), None))
            .await
            .is_none());
        let report = handle_task_comment_created(&dispatcher, &event(Some("@smoke hi"), Some("  ")))
            .await
            .expect("routed");

        assert_eq!(report.sent_count(), 1);
        send.assert_calls(1);
    }

    #[tokio::test]
    async fn integration_subscriber_routes_published_events() {
        let server = MockServer::start();
        let send = server.mock(|when, then| {
            when.method(POST)
                .path("/tools/invoke")
                .body_includes("From: Alice");
            then.status(200).json_body(json!({"ok": true}));
        });
        let dispatcher = dispatcher_for(&server).await;
        let bus = CommentEventBus::default();
        let subscriber = spawn_comment_created_subscriber(&bus, dispatcher);

        assert_eq!(bus.publish(event(Some("ping @smoke"), Some(" Alice "))), 1);
        drop(bus);
        subscriber.await.expect("subscriber exits once bus closes");

        send.assert_calls(1);
    }
}
