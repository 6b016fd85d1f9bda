/// Marker appended to any text cut short to fit a cap.
pub const TRUNCATED_MARKER: &str = "[TRUNCATED]";

/// A reference snippet being accumulated for total-cap processing.
pub struct Section {
    pub content: String,
    pub raw_chars: usize,
    pub truncated_per_snippet: bool,
    pub truncated_total_cap: bool,
    pub included: bool,
}

/// Byte offset of the `max_chars`-th character, or `s.len()` if shorter.
pub fn char_boundary(s: &str, max_chars: usize) -> usize {
    s.char_indices()
        .nth(max_chars)
        .map(|(idx, _)| idx)
        .unwrap_or(s.len())
}

/// Keep the first `max_chars` characters of `content`, appending
/// `\n[TRUNCATED]` when something was cut.
pub fn truncate_chars(content: &str, max_chars: usize) -> (String, bool) {
    let boundary = char_boundary(content, max_chars);
    if boundary == content.len() {
        return (content.to_string(), false);
    }
    (format!("{}\n{TRUNCATED_MARKER}", &content[..boundary]), true)
}

/// Apply a character budget across sections in order. The section that
/// crosses the budget is cut; everything after it is dropped.
pub fn apply_total_cap(sections: &mut [Section], total_max_chars: usize) {
    let mut accumulated: usize = 0;

    for section in sections.iter_mut() {
        if !section.included {
            continue;
        }

        let section_len = section.content.chars().count();

        if accumulated + section_len <= total_max_chars {
            accumulated += section_len;
        } else if accumulated < total_max_chars {
            let remaining = total_max_chars - accumulated;
            let boundary = char_boundary(&section.content, remaining);
            section.content = format!("{}\n{TRUNCATED_MARKER}", &section.content[..boundary]);
            section.truncated_total_cap = true;
            accumulated = total_max_chars;
        } else {
            section.content.clear();
            section.included = false;
        }
    }
}
