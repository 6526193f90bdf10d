/// Truncate a line at its first `;` comment marker, if any.
pub fn remove_comment(line: &str) -> &str {
    match line.find(';') {
        Some(idx) => &line[..idx],
        None => line,
    }
}

/// True when a comment-stripped line still carries something to send.
pub fn is_sendable(line: &str) -> bool {
    !line.trim().is_empty()
}
