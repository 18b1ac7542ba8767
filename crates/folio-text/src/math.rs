//! Math span protection
//!
//! Math notation routinely contains `_`, `^`, `{`, `}` and literal `*`
//! characters that markdown transforms would mangle. Each detected span is
//! swapped for a positional placeholder before the markdown pass and
//! restored afterwards; placeholders are built from private-use sentinels
//! and digits, so no markdown pattern can match inside them.
//!
//! Four delimiter forms are recognized, block forms first so `$$` never
//! half-matches as a single `$`: block `\[...\]`, block `$$...$$`, inline
//! `$...$`, inline `\(...\)`.

use std::sync::LazyLock;

use regex::Regex;

static MATH_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)\\\[(.+?)\\\]|\$\$(.+?)\$\$|\$([^$\n]+?)\$|\\\((.+?)\\\)").unwrap()
});

const PLACEHOLDER_OPEN: char = '\u{E000}';
const PLACEHOLDER_CLOSE: char = '\u{E001}';

/// Matches the placeholders produced by [`protect`].
pub(crate) static PLACEHOLDER_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x{E000}(\d+)\x{E001}").unwrap());

/// One extracted math span: delimiter-trimmed source plus display mode.
#[derive(Debug, Clone, PartialEq)]
pub struct MathSpan {
    pub source: String,
    /// Block spans render centered and full-width; inline spans size to
    /// the surrounding text.
    pub display: bool,
}

/// Text with math spans swapped for placeholders, plus the span table
/// indexed by placeholder number.
#[derive(Debug, Clone)]
pub struct ProtectedText {
    pub text: String,
    pub spans: Vec<MathSpan>,
}

pub(crate) fn placeholder(index: usize) -> String {
    format!("{PLACEHOLDER_OPEN}{index}{PLACEHOLDER_CLOSE}")
}

/// Replace every math span with a positional placeholder, recording the
/// trimmed, stray-markdown-stripped source for each.
pub fn protect(text: &str) -> ProtectedText {
    let mut spans = Vec::new();
    let protected = MATH_PATTERN.replace_all(text, |captures: &regex::Captures<'_>| {
        let (body, display) = if let Some(m) = captures.get(1) {
            (m.as_str(), true)
        } else if let Some(m) = captures.get(2) {
            (m.as_str(), true)
        } else if let Some(m) = captures.get(3) {
            (m.as_str(), false)
        } else {
            (captures.get(4).map(|m| m.as_str()).unwrap_or_default(), false)
        };
        let source = body.trim().replace("**", "");
        let token = placeholder(spans.len());
        spans.push(MathSpan { source, display });
        token
    });
    ProtectedText {
        text: protected.into_owned(),
        spans,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inline_dollar_span() {
        let protected = protect("The value $x_i$ is bold.");
        assert_eq!(protected.spans.len(), 1);
        assert_eq!(protected.spans[0].source, "x_i");
        assert!(!protected.spans[0].display);
        assert!(!protected.text.contains('$'));
        assert!(protected.text.contains(&placeholder(0)));
    }

    #[test]
    fn test_double_dollar_is_block_not_two_inline() {
        let protected = protect("$$\\sum_{i=0}^n x_i$$");
        assert_eq!(protected.spans.len(), 1);
        assert!(protected.spans[0].display);
        assert_eq!(protected.spans[0].source, "\\sum_{i=0}^n x_i");
    }

    #[test]
    fn test_bracket_block_form() {
        let protected = protect("Before \\[a^2 + b^2 = c^2\\] after");
        assert_eq!(protected.spans.len(), 1);
        assert!(protected.spans[0].display);
        assert_eq!(protected.spans[0].source, "a^2 + b^2 = c^2");
    }

    #[test]
    fn test_paren_inline_form() {
        let protected = protect("inline \\(e^{i\\pi}\\) math");
        assert_eq!(protected.spans.len(), 1);
        assert!(!protected.spans[0].display);
        assert_eq!(protected.spans[0].source, "e^{i\\pi}");
    }

    #[test]
    fn test_multiline_block_span() {
        let protected = protect("$$\nx = 1\ny = 2\n$$");
        assert_eq!(protected.spans.len(), 1);
        assert_eq!(protected.spans[0].source, "x = 1\ny = 2");
    }

    #[test]
    fn test_inline_dollar_does_not_cross_lines() {
        let protected = protect("price is $5 today\nand $6 tomorrow");
        assert!(protected.spans.is_empty());
    }

    #[test]
    fn test_stray_bold_markers_stripped_from_source() {
        let protected = protect("$a **b** c$");
        assert_eq!(protected.spans[0].source, "a b c");
    }

    #[test]
    fn test_multiple_spans_keep_positions() {
        let protected = protect("$a$ middle $b$");
        assert_eq!(protected.spans.len(), 2);
        assert_eq!(protected.text, format!("{} middle {}", placeholder(0), placeholder(1)));
    }

    #[test]
    fn test_placeholder_contains_no_markdown_triggers() {
        let token = placeholder(7);
        for ch in ['*', '#', '_', '$', '\\', '['] {
            assert!(!token.contains(ch));
        }
        assert!(PLACEHOLDER_PATTERN.is_match(&token));
    }
}
