use std::sync::LazyLock;

use regex::Regex;

/// Matches `<br>`, `<BR/>`, `<br />`, and friends.
static LINE_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<\s*br\s*/?\s*>").expect("line break pattern"));

static WHITESPACE_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace pattern"));

const BREAK_MARKER: &str = "[[br]]";

/// Normalises authored text for reporting.
///
/// Entities are decoded, every line-break tag variant becomes `<br>`,
/// control characters are dropped (line feeds and tabs turn into spaces)
/// and whitespace runs collapse to a single space.
pub fn clean_text(raw: &str) -> String {
    let decoded = html_escape::decode_html_entities(raw);
    let marked = LINE_BREAK.replace_all(&decoded, BREAK_MARKER);

    let stripped: String = marked
        .chars()
        .filter_map(|c| match c {
            '\n' | '\r' | '\t' | '\u{a0}' => Some(' '),
            c if c.is_control() => None,
            c => Some(c),
        })
        .collect();

    let collapsed = WHITESPACE_RUN.replace_all(stripped.trim(), " ");
    collapsed.replace(BREAK_MARKER, "<br>")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_text_decodes_entities() {
        assert_eq!(clean_text("Tom &amp; Jerry&#39;s"), "Tom & Jerry's");
    }

    #[test]
    fn test_clean_text_normalizes_breaks() {
        assert_eq!(
            clean_text("First<BR/>Second<br >Third&lt;br /&gt;Fourth"),
            "First<br>Second<br>Third<br>Fourth"
        );
    }

    #[test]
    fn test_clean_text_strips_control_characters() {
        assert_eq!(clean_text("  Hello\u{7}\r\n\tthere  "), "Hello there");
        assert_eq!(clean_text("a&nbsp;&nbsp;b"), "a b");
    }
}
