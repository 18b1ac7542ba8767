//! Citation marker resolution
//!
//! Scans content for bracketed positive integers (`[3]`) and resolves
//! each against the 1-indexed source list. Out-of-range numbers, and
//! sources with no extracted chunk text, stay literal text: a hallucinated
//! citation degrades to plain brackets instead of a broken anchor.

use std::sync::LazyLock;

use regex::Regex;

use folio_wire::MessageSource;

static CITATION_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[(\d+)\]").unwrap());

/// Alternating runs of plain text and resolved citation matches, in
/// original order with exact offsets preserved.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentRun {
    Text(String),
    Citation { number: u32, source: MessageSource },
}

/// Resolve a 1-indexed citation number against the source list.
fn resolve(number: u32, sources: &[MessageSource]) -> Option<&MessageSource> {
    let index = (number as usize).checked_sub(1)?;
    let source = sources.get(index)?;
    if source.chunk_text.is_empty() {
        return None;
    }
    Some(source)
}

/// Partition content into text runs and citation matches. No text is
/// dropped or duplicated across the boundary.
pub fn partition_citations(content: &str, sources: &[MessageSource]) -> Vec<ContentRun> {
    let mut runs = Vec::new();
    let mut cursor = 0usize;

    for captures in CITATION_PATTERN.captures_iter(content) {
        let whole = captures.get(0).unwrap();
        let Ok(number) = captures[1].parse::<u32>() else {
            // Absurdly long digit runs stay literal.
            continue;
        };
        let Some(source) = resolve(number, sources) else {
            continue;
        };

        if whole.start() > cursor {
            runs.push(ContentRun::Text(content[cursor..whole.start()].to_string()));
        }
        runs.push(ContentRun::Citation {
            number,
            source: source.clone(),
        });
        cursor = whole.end();
    }

    if cursor < content.len() {
        runs.push(ContentRun::Text(content[cursor..].to_string()));
    }
    runs
}
