use std::sync::atomic::{AtomicU64, Ordering};

use crate::time_utils::current_unix_timestamp_ms;

static RECORD_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Returns a process-unique record id of the form `<prefix>-<unix_ms>-<counter>`.
pub fn generate_record_id(prefix: &str) -> String {
    let counter = RECORD_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}-{}-{counter}", current_unix_timestamp_ms())
}
