/// Returns at most `max_chars` characters of `text`, with no suffix.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => text[..byte_index].to_string(),
        None => text.to_string(),
    }
}

/// Truncates to `max_chars` characters and appends `…` when anything was cut.
pub fn truncate_with_ellipsis(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut truncated = truncate_chars(text, max_chars);
    truncated.push('…');
    truncated
}

#[cfg(test)]
mod tests {
    use super::{truncate_chars, truncate_with_ellipsis};

    #[test]
    fn unit_truncate_chars_counts_characters_not_bytes() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("abc", 0), "");
    }

    #[test]
    fn unit_truncate_with_ellipsis_only_marks_cut_text() {
        assert_eq!(truncate_with_ellipsis("abc", 3), "abc");
        assert_eq!(truncate_with_ellipsis("abcd", 3), "abc…");
    }
}
