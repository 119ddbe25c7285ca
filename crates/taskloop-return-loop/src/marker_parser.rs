//! Marker grammar for agent replies.
//!
//! Agents talk back to a task by embedding directive lines in their reply:
//!
//! ```text
//! TASK_COMMENT: short reply on one line
//! TASK_COMMENT:
//! multi-line reply captured until the next marker line
//! TASK_BLOCKED:<taskId> optional reason
//! TASK_COMPLETE:<taskId> optional summary
//! ```
//!
//! Prefixes are case-insensitive. Completion and blocked markers must name the
//! task the reply is about; markers for other tasks are inert text.

use regex::{Regex, RegexBuilder};
use sha2::{Digest, Sha256};

const COMMENT_PREFIX: &str = "TASK_COMMENT:";
const COMPLETE_PREFIX: &str = "TASK_COMPLETE:";
const BLOCKED_PREFIX: &str = "TASK_BLOCKED:";
const MARKER_PREFIXES: [&str; 3] = [COMMENT_PREFIX, COMPLETE_PREFIX, BLOCKED_PREFIX];

#[derive(Debug, Clone, PartialEq, Eq)]
/// Enumerates supported `MarkerKind` values.
pub enum MarkerKind {
    Comment { text: String },
    Complete { summary: Option<String> },
    Blocked { reason: Option<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// One directive parsed from an agent reply, with its ordinal within the message.
pub struct Marker {
    pub index: u32,
    pub kind: MarkerKind,
}

impl Marker {
    pub fn comment(text: impl Into<String>, index: u32) -> Self {
        Self {
            index,
            kind: MarkerKind::Comment { text: text.into() },
        }
    }

    pub fn complete(summary: Option<&str>, index: u32) -> Self {
        Self {
            index,
            kind: MarkerKind::Complete {
                summary: summary.map(str::to_string),
            },
        }
    }

    pub fn blocked(reason: Option<&str>, index: u32) -> Self {
        Self {
            index,
            kind: MarkerKind::Blocked {
                reason: reason.map(str::to_string),
            },
        }
    }

    /// Stable type label used in the ingest ledger key.
    pub fn marker_type(&self) -> &'static str {
        match self.kind {
            MarkerKind::Comment { .. } => "comment",
            MarkerKind::Complete { .. } => "complete",
            MarkerKind::Blocked { .. } => "blocked",
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.kind, MarkerKind::Complete { .. })
    }

    /// Content of the external activity comment this marker produces.
    pub fn activity_content(&self) -> String {
        match &self.kind {
            MarkerKind::Comment { text } => text.clone(),
            MarkerKind::Blocked { reason: Some(reason) } => format!("Blocked: {reason}"),
            MarkerKind::Blocked { reason: None } => "Blocked.".to_string(),
            MarkerKind::Complete {
                summary: Some(summary),
            } => format!("Completed: {summary}"),
            MarkerKind::Complete { summary: None } => "Completed.".to_string(),
        }
    }

    /// SHA-256 hex digest of the marker type and payload, kept for audit.
    pub fn payload_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.marker_type().as_bytes());
        hasher.update([0]);
        hasher.update(self.activity_content().as_bytes());
        let digest = hasher.finalize();
        digest.iter().map(|byte| format!("{byte:02x}")).collect()
    }
}

fn strip_prefix_ignore_case<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    let head = line.get(..prefix.len())?;
    if head.eq_ignore_ascii_case(prefix) {
        line.get(prefix.len()..)
    } else {
        None
    }
}

fn is_marker_line(line: &str) -> bool {
    let trimmed = line.trim();
    MARKER_PREFIXES
        .iter()
        .any(|prefix| strip_prefix_ignore_case(trimmed, prefix).is_some())
}

fn task_marker_regex(prefix: &str, task_id: &str) -> Option<Regex> {
    RegexBuilder::new(&format!(r"^{}{}\b", regex::escape(prefix), regex::escape(task_id)))
        .case_insensitive(true)
        .build()
        .ok()
}

fn optional_trailing(line: &str, regex: &Regex) -> Option<Option<String>> {
    let matched = regex.find(line)?;
    let trailing = line[matched.end()..].trim();
    Some((!trailing.is_empty()).then(|| trailing.to_string()))
}

/// Parses markers from one assistant reply about `task_id`, in appearance order.
pub fn parse_markers(text: &str, task_id: &str) -> Vec<Marker> {
    let lines: Vec<&str> = text.lines().collect();
    let complete_regex = task_marker_regex(COMPLETE_PREFIX, task_id);
    let blocked_regex = task_marker_regex(BLOCKED_PREFIX, task_id);
    let mut markers = Vec::new();
    let mut next_index = 0_u32;

    for (position, raw) in lines.iter().enumerate() {
        let line = raw.trim();

        if let Some(after) = strip_prefix_ignore_case(line, COMMENT_PREFIX) {
            let mut payload = after.trim().to_string();
            if payload.is_empty() {
                payload = lines[position + 1..]
                    .iter()
                    .take_while(|next| !is_marker_line(next))
                    .copied()
                    .collect::<Vec<_>>()
                    .join("\n")
                    .trim()
                    .to_string();
            }
            if !payload.is_empty() {
                markers.push(Marker::comment(payload, next_index));
                next_index += 1;
            }
            continue;
        }

        if let Some(summary) = complete_regex
            .as_ref()
            .and_then(|regex| optional_trailing(line, regex))
        {
            markers.push(Marker::complete(summary.as_deref(), next_index));
            next_index += 1;
            continue;
        }

        if let Some(reason) = blocked_regex
            .as_ref()
            .and_then(|regex| optional_trailing(line, regex))
        {
            markers.push(Marker::blocked(reason.as_deref(), next_index));
            next_index += 1;
        }
    }

    markers
}

#[cfg(test)]
mod tests {
    use super::{parse_markers, Marker};

    #[test]
    fn unit_parse_markers_reads_inline_comment_and_complete_in_order() {
        let markers = parse_markers("TASK_COMMENT: hello\nTASK_COMPLETE:T1 done", "T1");
        assert_eq!(
            markers,
            vec![
                Marker::comment("hello", 0),
                Marker::complete(Some("done"), 1)
            ]
        );
    }

    #[test]
    fn functional_parse_markers_captures_multi_line_comment_until_next_marker() {
        let markers = parse_markers(
            "TASK_COMMENT:\nline one\nline two\nTASK_COMPLETE:T1",
            "T1",
        );
        assert_eq!(
            markers,
            vec![
                Marker::comment("line one\nline two", 0),
                Marker::complete(None, 1)
            ]
        );
    }

    #[test]
    fn functional_parse_markers_keeps_inner_blank_lines_of_multi_line_comment() {
        let markers = parse_markers("intro\ntask_comment:\n\nfirst\n\nsecond\n", "T1");
        assert_eq!(markers, vec![Marker::comment("first\n\nsecond", 0)]);
    }

    #[test]
    fn unit_parse_markers_skips_empty_comment_without_consuming_index() {
        let markers = parse_markers("TASK_COMMENT:\nTASK_BLOCKED:T1 waiting on creds", "T1");
        assert_eq!(markers, vec![Marker::blocked(Some("waiting on creds"), 0)]);
    }

    #[test]
    fn unit_parse_markers_ignores_markers_for_other_tasks() {
        let markers = parse_markers("TASK_COMPLETE:T2 done\nTASK_BLOCKED:T10", "T1");
        assert!(markers.is_empty());
    }

    #[test]
    fn unit_parse_markers_requires_word_boundary_after_task_id() {
        assert!(parse_markers("TASK_COMPLETE:T12", "T1").is_empty());
        assert_eq!(
            parse_markers("TASK_COMPLETE:T1.", "T1"),
            vec![Marker::complete(Some("."), 0)]
        );
    }

    #[test]
    fn unit_parse_markers_is_case_insensitive_for_prefix_and_task_id() {
        let markers = parse_markers("  task_complete:abc-1   shipped  ", "ABC-1");
        assert_eq!(markers, vec![Marker::complete(Some("shipped"), 0)]);
    }

    #[test]
    fn regression_parse_markers_escapes_task_id_metacharacters() {
        assert!(parse_markers("TASK_COMPLETE:aXb", "a.b").is_empty());
        assert_eq!(
            parse_markers("TASK_COMPLETE:a.b ok", "a.b"),
            vec![Marker::complete(Some("ok"), 0)]
        );
    }

    #[test]
    fn unit_parse_markers_handles_crlf_line_endings() {
        let markers = parse_markers("TASK_COMMENT: hi\r\nTASK_BLOCKED:T1\r\n", "T1");
        assert_eq!(
            markers,
            vec![Marker::comment("hi", 0), Marker::blocked(None, 1)]
        );
    }

    #[test]
    fn unit_parse_markers_is_repeatable() {
        let text = "TASK_COMMENT: hello\nTASK_COMPLETE:T1 done";
        assert_eq!(parse_markers(text, "T1"), parse_markers(text, "T1"));
    }

    #[test]
    fn unit_marker_activity_content_renders_optional_payloads() {
        assert_eq!(Marker::blocked(None, 0).activity_content(), "Blocked.");
        assert_eq!(
            Marker::blocked(Some("no access"), 0).activity_content(),
            "Blocked: no access"
        );
        assert_eq!(Marker::complete(None, 0).activity_content(), "Completed.");
        assert_eq!(
            Marker::complete(Some("all done"), 0).activity_content(),
            "Completed: all done"
        );
    }

    #[test]
    fn unit_marker_payload_hash_distinguishes_types() {
        let comment = Marker::comment("Completed.", 0);
        let complete = Marker::complete(None, 0);
        assert_ne!(comment.payload_hash(), complete.payload_hash());
        assert_eq!(comment.payload_hash().len(), 64);
    }
}
