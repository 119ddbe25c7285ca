const TASK_SESSION_KEY_PREFIX: &str = "agent:main:void:task:";

/// Canonical gateway session key for a task. The gateway auto-creates the
/// session on first send, so this is never resolved remotely.
pub fn task_session_key(task_id: &str) -> String {
    format!("{TASK_SESSION_KEY_PREFIX}{task_id}")
}
