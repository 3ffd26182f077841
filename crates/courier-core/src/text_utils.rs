/// Truncates `text` to at most `max_chars` characters, appending `...` when cut.
pub fn truncate_for_error(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    let mut output = trimmed.chars().take(max_chars).collect::<String>();
    output.push_str("...");
    output
}

/// Returns true when `value` looks like a platform snowflake identifier.
pub fn is_snowflake(value: &str) -> bool {
    let trimmed = value.trim();
    !trimmed.is_empty() && trimmed.len() <= 20 && trimmed.chars().all(|ch| ch.is_ascii_digit())
}
