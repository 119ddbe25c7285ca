use std::path::Path;
use std::sync::Arc;

use httpmock::prelude::*;
use serde_json::json;
use taskloop_return_loop::AgentHandle;
use taskloop_runtime::{
    spawn_comment_created_subscriber, CommentEventBus, DispatchConfig, GatewayClient,
    GatewaySettings, ReturnLoopDispatcher, TaskCommentCreated,
};
use taskloop_store::{SqliteStore, TaskSummary, ThreadStore};
use tempfile::tempdir;

const SESSION_KEY: &str = "agent:main:void:task:T42";

fn open_store(path: &Path) -> Arc<SqliteStore> {
    let store = SqliteStore::new(path).expect("open sqlite store");
    store.upsert_project("P1", "Void").expect("seed project");
    store
        .upsert_task(&TaskSummary {
            task_id: "T42".to_string(),
            project_id: "P1".to_string(),
            title: "Fix login".to_string(),
            number: Some(7),
            project_name: None,
            status: "to-do".to_string(),
        })
        .expect("seed task");
    Arc::new(store)
}

fn dispatcher_for(store: Arc<SqliteStore>, server: &MockServer) -> Arc<ReturnLoopDispatcher> {
    let settings = GatewaySettings::from_env_lookup(|key| match key {
        "OPENCLAW_GATEWAY_URL_SMOKE" => Some(server.base_url()),
        "OPENCLAW_GATEWAY_TOKEN_SMOKE" => Some("smoke-token".to_string()),
        _ => None,
    });
    let gateway = GatewayClient::new(settings, 5_000).expect("gateway client");
    Arc::new(ReturnLoopDispatcher::with_store(
        store,
        gateway,
        DispatchConfig::new(Some("https://tasks.example")),
    ))
}

fn history_body(messages: serde_json::Value) -> String {
    let payload = json!({"sessionKey": SESSION_KEY, "messages": messages});
    json!({
        "ok": true,
        "result": {"content": [{"type": "text", "text": payload.to_string()}]}
    })
    .to_string()
}

#[tokio::test]
async fn integration_mention_then_completion_marker_updates_task_exactly_once() {
    let temp = tempdir().expect("tempdir");
    let db_path = temp.path().join("taskloop.sqlite3");
    let server = MockServer::start();
    let send = server.mock(|when, then| {
        when.method(POST)
            .path("/tools/invoke")
            .header("authorization", "Bearer smoke-token")
            .body_includes(r#""tool":"sessions_send""#)
            .body_includes("Task ID: T42")
            .body_includes("Link: https://tasks.example/dashboard");
        then.status(200).json_body(json!({"ok": true}));
    });
    let history = server.mock(|when, then| {
        when.method(POST)
            .path("/tools/invoke")
            .body_includes(r#""tool":"sessions_history""#);
        then.status(200).body(history_body(json!([
            {"role": "user", "timestamp": 1_000, "content": [{"type": "text", "text": "please help"}]},
            {"role": "assistant", "timestamp": 1_001, "content": [{"type": "text", "text": "TASK_COMPLETE:T42 all done"}]}
        ])));
    });

    let store = open_store(&db_path);
    let dispatcher = dispatcher_for(store.clone(), &server);

    let routed = dispatcher
        .route_mentions_from_comment("T42", "P1", "please help @smoke", "Alice")
        .await;
    assert_eq!(routed.sent_count(), 1);
    send.assert_calls(1);

    let threads = store.list_threads_to_poll(10).await.expect("threads");
    assert_eq!(threads.len(), 1);
    assert_eq!(threads[0].handle, AgentHandle::Smoke);
    assert_eq!(threads[0].session_key, SESSION_KEY);

    let first = dispatcher.poll_return_loop_once().await.expect("first poll");
    assert_eq!(first.markers_applied, 1);

    let activities = store.list_activities("T42").expect("activities");
    assert_eq!(activities.len(), 1);
    assert_eq!(activities[0].content, "Completed: all done");
    assert_eq!(activities[0].external_user_name.as_deref(), Some("smoke"));
    assert_eq!(activities[0].external_source.as_deref(), Some("openclaw"));

    let second = dispatcher.poll_return_loop_once().await.expect("second poll");
    assert_eq!(second.markers_applied, 0);
    assert_eq!(store.list_activities("T42").expect("activities").len(), 1);
    assert_eq!(store.count_ledger_entries().expect("ledger"), 1);
    history.assert_calls(2);

    drop(dispatcher);
    let reopened = open_store(&db_path);
    let restarted = dispatcher_for(reopened.clone(), &server);
    let after_restart = restarted.poll_return_loop_once().await.expect("poll after restart");
    assert_eq!(after_restart.markers_applied, 0);
    assert_eq!(reopened.list_activities("T42").expect("activities").len(), 1);
    let threads = reopened.list_threads_to_poll(10).await.expect("threads");
    assert_eq!(threads[0].watermark_ts, 1_001);
}

#[tokio::test]
async fn integration_task_status_is_done_after_completion_marker() {
    let temp = tempdir().expect("tempdir");
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST)
            .path("/tools/invoke")
            .body_includes(r#""tool":"sessions_history""#);
        then.status(200).body(history_body(json!([
            {"role": "assistant", "timestamp": 50, "content": [
                {"type": "text", "text": "Looked into it.\nTASK_COMMENT:\nRoot cause was a stale cookie.\n\nFixed in the auth middleware.\n"},
                {"type": "text", "text": "TASK_COMPLETE:T42"}
            ]}
        ])));
    });
    let store = open_store(&temp.path().join("taskloop.sqlite3"));
    store
        .upsert_task_thread("T42", AgentHandle::Smoke, SESSION_KEY)
        .await
        .expect("thread");
    let dispatcher = dispatcher_for(store.clone(), &server);

    let report = dispatcher.poll_return_loop_once().await.expect("poll");

    assert_eq!(report.markers_applied, 2);
    let contents: Vec<String> = store
        .list_activities("T42")
        .expect("activities")
        .into_iter()
        .map(|activity| activity.content)
        .collect();
    assert_eq!(
        contents,
        vec![
            "Root cause was a stale cookie.\n\nFixed in the auth middleware.".to_string(),
            "Completed.".to_string()
        ]
    );
    let task = taskloop_store::TaskBoard::find_task(store.as_ref(), "T42")
        .await
        .expect("find task")
        .expect("task exists");
    assert_eq!(task.status, "done");
}

#[tokio::test]
async fn integration_comment_event_bus_routes_mentions_through_subscriber() {
    let temp = tempdir().expect("tempdir");
    let server = MockServer::start();
    let send = server.mock(|when, then| {
        when.method(POST)
            .path("/tools/invoke")
            .body_includes(r#""tool":"sessions_send""#)
            .body_includes("From: Bob");
        then.status(200).json_body(json!({"ok": true}));
    });
    let store = open_store(&temp.path().join("taskloop.sqlite3"));
    let dispatcher = dispatcher_for(store.clone(), &server);
    let bus = CommentEventBus::default();
    let subscriber = spawn_comment_created_subscriber(&bus, dispatcher);

    bus.publish(TaskCommentCreated {
        task_id: "T42".to_string(),
        user_id: "U9".to_string(),
        project_id: "P1".to_string(),
        raw_comment: Some("[@smoke](mention:smoke) can you look?".to_string()),
        author_name: Some("Bob".to_string()),
    });
    drop(bus);
    subscriber.await.expect("subscriber finished");

    send.assert_calls(1);
    assert_eq!(store.list_threads_to_poll(10).await.expect("threads").len(), 1);
}
