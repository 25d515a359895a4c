/// Default number of lines in a snippet when no term matches.
pub const DEFAULT_SNIPPET_LINES: usize = 3;

/// Maximum number of characters in a snippet before truncation.
pub const DEFAULT_SNIPPET_MAX_CHARS: usize = 240;

/// Extract a snippet around the first line mentioning any word of `query`.
///
/// Front-matter never reaches here, so the snippet is plain body text.
/// Returns `(snippet_text, start_line_number)` where start_line_number is
/// 1-indexed. If no query word is found, returns the first few non-blank
/// lines. Returns `None` if the text is blank.
pub fn extract_snippet(text: &str, query: &str) -> Option<(String, usize)> {
    let lines: Vec<&str> = text.lines().collect();
    if lines.iter().all(|l| l.trim().is_empty()) {
        return None;
    }

    let terms: Vec<String> = query
        .split_whitespace()
        .map(str::to_lowercase)
        .filter(|t| t.chars().count() >= 2)
        .collect();

    let match_idx = lines.iter().position(|line| {
        let lower = line.to_lowercase();
        terms.iter().any(|t| lower.contains(t.as_str()))
    });

    let (start, end) = match match_idx {
        Some(idx) => (idx.saturating_sub(1), (idx + 2).min(lines.len())),
        None => {
            let first = lines
                .iter()
                .position(|l| !l.trim().is_empty())
                .unwrap_or(0);
            (first, (first + DEFAULT_SNIPPET_LINES).min(lines.len()))
        }
    };

    let snippet = lines[start..end].join("\n");
    Some((truncate_chars(&snippet, DEFAULT_SNIPPET_MAX_CHARS), start + 1))
}

/// Cut `text` to at most `max_chars` characters, marking the cut with `...`.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => format!("{}...", &text[..byte_idx]),
        None => text.to_string(),
    }
}

/// Indent every line of `text` by `width` spaces.
pub fn indent(text: &str, width: usize) -> String {
    let pad = " ".repeat(width);
    text.lines()
        .map(|line| format!("{pad}{line}"))
        .collect::<Vec<_>>()
        .join("\n")
}
