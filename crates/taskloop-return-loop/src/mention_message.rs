use taskloop_core::truncate_with_ellipsis;

pub const COMMENT_SNIPPET_MAX_CHARS: usize = 1_400;

/// Task facts rendered into the message sent to a mentioned agent.
pub struct MentionMessageContext<'a> {
    pub task_id: &'a str,
    pub task_title: &'a str,
    pub task_number: Option<i64>,
    pub project_name: Option<&'a str>,
    pub author_name: &'a str,
    pub task_url: &'a str,
    pub snippet: &'a str,
}

/// Raw comment bounded to the snippet size forwarded to agents.
pub fn comment_snippet(raw_comment: &str) -> String {
    truncate_with_ellipsis(raw_comment, COMMENT_SNIPPET_MAX_CHARS)
}

pub fn render_mention_message(context: &MentionMessageContext<'_>) -> String {
    let task_ref = context
        .task_number
        .map(|number| format!("#{number}"))
        .unwrap_or_else(|| context.task_id.to_string());

    let mut lines = Vec::with_capacity(14);
    lines.push(format!("🧵 Comment on task: \"{}\"", context.task_title));
    lines.push(format!("Task: {task_ref}"));
    lines.push(format!("Task ID: {}", context.task_id));
    if let Some(project_name) = context.project_name.filter(|name| !name.is_empty()) {
        lines.push(format!("Project: {project_name}"));
    }
    lines.push(format!("From: {}", context.author_name));
    lines.push(format!("Link: {}", context.task_url));
    lines.push(String::new());
    lines.push(context.snippet.to_string());
    lines.push(String::new());
    lines.push("---".to_string());
    lines.push("Reply with a marker so the return-loop can post it back:".to_string());
    lines.push("TASK_COMMENT: <your reply>".to_string());
    lines.push(format!("TASK_COMPLETE:{}", context.task_id));
    lines.join("\n")
}
