//! Lesson text → sentence units.
//!
//! Line breaks count as sentence boundaries even when a line has no
//! terminal punctuation. Units split after `.`, `?` or `!` followed by
//! whitespace, with the mark kept on the preceding unit.

fn is_terminal(c: char) -> bool {
    matches!(c, '.' | '?' | '!')
}

/// Turn every newline into a sentence boundary.
///
/// A line that already ends with a terminal mark gets a plain space so the
/// mark is not doubled.
fn normalize_line_breaks(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 8);
    for c in text.chars() {
        if c == '\n' {
            if out.ends_with('\r') {
                out.pop();
            }
            let ends_sentence = out.trim_end().chars().last().is_some_and(is_terminal);
            if ends_sentence || out.trim().is_empty() {
                out.push(' ');
            } else {
                out.push_str(". ");
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn push_unit(units: &mut Vec<String>, fragment: &str) {
    let unit = fragment.trim();
    if !unit.is_empty() {
        units.push(unit.to_string());
    }
}

/// Split lesson text into ordered, trimmed, non-empty sentence units.
pub fn segment(text: &str) -> Vec<String> {
    let normalized = normalize_line_breaks(text);
    let mut units = Vec::new();
    let mut start = 0;
    let mut chars = normalized.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if !is_terminal(c) {
            continue;
        }
        if chars.peek().is_some_and(|&(_, next)| next.is_whitespace()) {
            let end = i + c.len_utf8();
            push_unit(&mut units, &normalized[start..end]);
            start = end;
        }
    }

    // Remainder
    push_unit(&mut units, &normalized[start..]);
    units
}
