//! Foundational low-level utilities shared across taskloop crates.
//!
//! Provides time helpers, process-local id generation, and bounded text
//! truncation used by the store, runtime, and CLI crates.

pub mod id_utils;
pub mod text_utils;
pub mod time_utils;

pub use id_utils::generate_record_id;
pub use text_utils::{truncate_chars, truncate_with_ellipsis};
pub use time_utils::{current_unix_timestamp, current_unix_timestamp_ms};
