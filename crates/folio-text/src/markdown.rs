//! Markdown transforms over math-protected text
//!
//! Only two transforms apply: line-leading `#`/`##`/`###` headings and
//! `**bold**` strong spans. The input has already had its math spans
//! replaced by placeholders, so these patterns cannot fire inside math
//! notation. Everything else passes through verbatim.

use std::sync::LazyLock;

use regex::Regex;

use crate::segment::TextStyle;

static HEADING_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(#{1,3})\s+(.*)$").unwrap());

static BOLD_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\*\*([^*]+)\*\*").unwrap());

/// A run of text with one style applied.
#[derive(Debug, Clone, PartialEq)]
pub struct StyledRun {
    pub content: String,
    pub style: TextStyle,
}

fn push_run(runs: &mut Vec<StyledRun>, content: &str, style: TextStyle) {
    if content.is_empty() {
        return;
    }
    // Coalesce adjacent plain runs so consumers see minimal segments.
    if style == TextStyle::Plain {
        if let Some(last) = runs.last_mut() {
            if last.style == TextStyle::Plain {
                last.content.push_str(content);
                return;
            }
        }
    }
    runs.push(StyledRun {
        content: content.to_string(),
        style,
    });
}

/// Split one line into plain and strong runs.
fn transform_bold(line: &str, runs: &mut Vec<StyledRun>) {
    let mut cursor = 0usize;
    for captures in BOLD_PATTERN.captures_iter(line) {
        let whole = captures.get(0).unwrap();
        push_run(runs, &line[cursor..whole.start()], TextStyle::Plain);
        push_run(runs, &captures[1], TextStyle::Strong);
        cursor = whole.end();
    }
    push_run(runs, &line[cursor..], TextStyle::Plain);
}

/// Apply the heading and bold transforms, producing styled runs in
/// original order.
pub fn transform(text: &str) -> Vec<StyledRun> {
    let mut runs = Vec::new();
    let mut first = true;

    for line in text.split('\n') {
        if !first {
            push_run(&mut runs, "\n", TextStyle::Plain);
        }
        first = false;

        if let Some(captures) = HEADING_PATTERN.captures(line) {
            let level = captures[1].len() as u8;
            push_run(&mut runs, &captures[2], TextStyle::Heading(level));
        } else {
            transform_bold(line, &mut runs);
        }
    }

    runs
}
