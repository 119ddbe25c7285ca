//! Return-loop runtime: the agent gateway client, the dispatch service that
//! forwards mentions and applies agent markers, the recurring poller, and the
//! in-process comment event subscription that feeds the outbound path.

pub mod comment_events;
pub mod dispatch_service;
pub mod gateway_client;
pub mod gateway_config;
pub mod poller;

pub use comment_events::{
    handle_task_comment_created, spawn_comment_created_subscriber, CommentEventBus,
    TaskCommentCreated, TASK_COMMENT_CREATED_EVENT,
};
pub use dispatch_service::{
    HandleDispatch, HandleDispatchStatus, MentionRouteReport, PollPassReport, ReturnLoopDispatcher,
};
pub use gateway_client::{decode_tool_response, GatewayClient, GatewayError, ToolResponse};
pub use gateway_config::{
    ConfigError, DispatchConfig, GatewayEndpoint, GatewaySettings, PollerConfig,
    DEFAULT_GATEWAY_TIMEOUT_MS, DEFAULT_POLL_INTERVAL_MS, DEFAULT_PUBLIC_URL,
};
pub use poller::{PollTick, PollerStart, ReturnLoopPoller};
