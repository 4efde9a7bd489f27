//! Helpers for shaping data before it reaches span attributes or the
//! project record.
//!
//! Span fields must not leak absolute host paths, and the `error_message`
//! column is shown to students, so it carries a short single-line cause
//! while the deploy log keeps the full text.

use std::path::Path;

/// Maximum length of a surfaced error message, in characters.
pub const MAX_ERROR_MESSAGE_CHARS: usize = 500;

/// Returns only the filename component of a path (no directory).
pub fn redact_path(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("<unknown>")
        .to_string()
}

/// Collapses whitespace runs (including newlines) into single spaces.
pub fn single_line(message: &str) -> String {
    message.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Produces the human-readable cause stored in `Project.error_message`.
///
/// The result is a single line of at most `max_chars` characters; truncated
/// messages end with `...`.
pub fn truncate_message(message: &str, max_chars: usize) -> String {
    let line = single_line(message);
    if line.chars().count() <= max_chars {
        return line;
    }

    let keep = max_chars.saturating_sub(3);
    let mut truncated: String = line.chars().take(keep).collect();
    truncated.push_str("...");
    truncated
}

/// Returns the last `max_lines` lines of `text`.
pub fn tail_lines(text: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(max_lines);
    lines[start..].join("\n")
}
