//! Shared utilities

/// Truncate a string to `max` characters, appending "..." if truncated.
/// Operates on Unicode char boundaries, not bytes.
pub fn truncate_chars(s: &str, max: usize) -> String {
    let mut chars = s.chars();
    let truncated: String = chars.by_ref().take(max).collect();
    if chars.next().is_some() {
        format!("{}...", truncated)
    } else {
        truncated
    }
}

/// Characters of `text` past the first `already` characters
pub fn unprinted_suffix(text: &str, already: usize) -> &str {
    match text.char_indices().nth(already) {
        Some((i, _)) => &text[i..],
        None => "",
    }
}
