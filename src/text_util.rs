/// Maximum number of characters in a report preview.
pub const DEFAULT_PREVIEW_CHARS: usize = 200;

/// Mojibake produced when a UTF-8 bullet (`•`) is decoded as CP437.
const MOJIBAKE_BULLET: &str = "ÔÇó";

/// Normalize extracted document text before fragmentation.
///
/// Non-breaking spaces become plain spaces, runs of spaces and tabs
/// collapse to one space, three or more consecutive newlines collapse to
/// a single blank line, and the result is trimmed. Horizontal whitespace
/// touching a line break is dropped.
///
/// # Examples
///
/// ```
/// use cvscreen::text_util::normalize;
///
/// assert_eq!(normalize("  Rust\t\t dev\n\n\n\nRemote \u{a0}"), "Rust dev\n\nRemote");
/// ```
pub fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;
    let mut newlines = 0usize;

    for c in text.chars() {
        match c {
            ' ' | '\t' | '\u{a0}' => pending_space = true,
            '\n' => {
                // Spaces never survive directly in front of a line break.
                pending_space = false;
                newlines += 1;
            }
            _ => {
                if newlines > 0 {
                    let keep = newlines.min(2);
                    out.extend(std::iter::repeat_n('\n', keep));
                    newlines = 0;
                    pending_space = false;
                }
                if pending_space {
                    out.push(' ');
                    pending_space = false;
                }
                out.push(c);
            }
        }
    }

    out.trim().to_string()
}

/// Return at most `max_chars` characters from the start of `text`.
pub fn preview(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// Replace mojibake bullets in generated text with ASCII hyphens.
pub fn repair_bullets(text: &str) -> String {
    text.replace(MOJIBAKE_BULLET, "-")
}
