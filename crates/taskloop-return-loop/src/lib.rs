//! Shared helpers for the task/agent return loop.
//! This crate provides mention extraction, session-key derivation, marker
//! parsing, gateway history payload types, and outbound message rendering
//! consumed by the runtime crate. Everything here is side-effect free.

pub mod agent_handle;
pub mod history;
pub mod marker_parser;
pub mod mention_extract;
pub mod mention_message;
pub mod session_key;

pub use agent_handle::{filter_agent_handles, AgentHandle};
pub use history::{join_text_blocks, ContentBlock, HistoryMessage, SessionHistory};
pub use marker_parser::{parse_markers, Marker, MarkerKind};
pub use mention_extract::extract_mention_handles;
pub use mention_message::{comment_snippet, render_mention_message, MentionMessageContext};
pub use session_key::task_session_key;
