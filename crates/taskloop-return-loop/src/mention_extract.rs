use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;

// Rich-editor mentions are stored as markdown links such as `[@smoke](mention:smoke)`.
const MENTION_HREF_PATTERN: &str = r"(?i)\bmention:([a-z0-9][a-z0-9_-]{0,31})\b";
const AT_MENTION_PATTERN: &str = r"(?i)(?:^|[^a-z0-9_])@([a-z0-9][a-z0-9_-]{0,31})\b";

fn mention_href_regex() -> Option<&'static Regex> {
    static REGEX: OnceLock<Option<Regex>> = OnceLock::new();
    REGEX
        .get_or_init(|| Regex::new(MENTION_HREF_PATTERN).ok())
        .as_ref()
}

fn at_mention_regex() -> Option<&'static Regex> {
    static REGEX: OnceLock<Option<Regex>> = OnceLock::new();
    REGEX
        .get_or_init(|| Regex::new(AT_MENTION_PATTERN).ok())
        .as_ref()
}

/// Collects lower-cased handles referenced from comment markdown, either as
/// `mention:<handle>` hrefs or as plain `@handle` typing.
pub fn extract_mention_handles(markdown: &str) -> BTreeSet<String> {
    let mut handles = BTreeSet::new();
    for regex in [mention_href_regex(), at_mention_regex()]
        .into_iter()
        .flatten()
    {
        for captures in regex.captures_iter(markdown) {
            if let Some(handle) = captures.get(1) {
                handles.insert(handle.as_str().to_ascii_lowercase());
            }
        }
    }
    handles
}
