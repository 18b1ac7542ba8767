//! The full annotation pipeline
//!
//! Order matters: citation anchors are carved out first and never touched
//! by later passes; within each remaining text run, math spans are
//! protected, markdown transforms run on the protected text, and
//! placeholders are then restored as standalone math segments.

use folio_wire::MessageSource;

use crate::citation::{ContentRun, partition_citations};
use crate::markdown::transform;
use crate::math::{MathSpan, PLACEHOLDER_PATTERN, protect};
use crate::segment::{Segment, TextStyle};

/// Annotate message content against its source list, producing the flat
/// ordered segment sequence described in the module docs.
pub fn annotate(content: &str, sources: &[MessageSource]) -> Vec<Segment> {
    let mut segments = Vec::new();

    for run in partition_citations(content, sources) {
        match run {
            ContentRun::Citation { number, source } => {
                segments.push(Segment::Citation { number, source });
            }
            ContentRun::Text(text) => {
                let protected = protect(&text);
                for styled in transform(&protected.text) {
                    restore_into(&styled.content, styled.style, &protected.spans, &mut segments);
                }
            }
        }
    }

    segments
}

/// Split a styled run at math placeholders, emitting text and math
/// segments in order.
fn restore_into(text: &str, style: TextStyle, spans: &[MathSpan], out: &mut Vec<Segment>) {
    let mut cursor = 0usize;

    for captures in PLACEHOLDER_PATTERN.captures_iter(text) {
        let whole = captures.get(0).unwrap();
        push_text(out, &text[cursor..whole.start()], style);
        cursor = whole.end();

        let span = captures[1]
            .parse::<usize>()
            .ok()
            .and_then(|index| spans.get(index));
        match span {
            Some(span) if !span.source.is_empty() => {
                out.push(Segment::Math {
                    source: span.source.clone(),
                    display: span.display,
                });
            }
            Some(span) => {
                // Empty span after trimming: degrade to showing whatever
                // source text there was rather than a broken math unit.
                tracing::debug!("dropping empty math span");
                push_text(out, &span.source, style);
            }
            None => {
                tracing::warn!("math placeholder with no recorded span");
            }
        }
    }

    push_text(out, &text[cursor..], style);
}

fn push_text(out: &mut Vec<Segment>, content: &str, style: TextStyle) {
    if content.is_empty() {
        return;
    }
    if let Some(Segment::Text {
        content: last,
        style: last_style,
    }) = out.last_mut()
    {
        if *last_style == style {
            last.push_str(content);
            return;
        }
    }
    out.push(Segment::Text {
        content: content.to_string(),
        style,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::plain_text;

    fn sources(n: usize) -> Vec<MessageSource> {
        (0..n)
            .map(|i| MessageSource {
                name: format!("doc-{i}"),
                source_id: format!("src-{i}"),
                chunk_text: format!("chunk {i}"),
                chunk_index: i as u32,
                score: 0.9,
            })
            .collect()
    }

    #[test]
    fn test_citation_resolution_mixed_range() {
        let segments = annotate("See [2] and [9].", &sources(3));
        assert_eq!(
            segments,
            vec![
                Segment::Text {
                    content: "See ".into(),
                    style: TextStyle::Plain,
                },
                Segment::Citation {
                    number: 2,
                    source: sources(3)[1].clone(),
                },
                Segment::Text {
                    content: " and [9].".into(),
                    style: TextStyle::Plain,
                },
            ]
        );
    }

    #[test]
    fn test_math_protected_from_bold_transform() {
        let segments = annotate("The value $x_i$ is **bold**.", &[]);
        assert_eq!(
            segments,
            vec![
                Segment::Text {
                    content: "The value ".into(),
                    style: TextStyle::Plain,
                },
                Segment::Math {
                    source: "x_i".into(),
                    display: false,
                },
                Segment::Text {
                    content: " is ".into(),
                    style: TextStyle::Plain,
                },
                Segment::Text {
                    content: "bold".into(),
                    style: TextStyle::Strong,
                },
                Segment::Text {
                    content: ".".into(),
                    style: TextStyle::Plain,
                },
            ]
        );
    }

    #[test]
    fn test_citation_anchor_never_enters_markdown_pass() {
        // A citation between two bold markers must not let them pair up
        // across the anchor boundary.
        let segments = annotate("**a** [1] **b**", &sources(1));
        let strong: Vec<_> = segments
            .iter()
            .filter(|s| matches!(s, Segment::Text { style: TextStyle::Strong, .. }))
            .collect();
        assert_eq!(strong.len(), 2);
        assert!(segments.iter().any(|s| matches!(s, Segment::Citation { number: 1, .. })));
    }

    #[test]
    fn test_block_math_display_flag() {
        let segments = annotate("Result:\n$$E = mc^2$$\ndone", &[]);
        assert!(segments.iter().any(|s| matches!(
            s,
            Segment::Math { source, display: true } if source == "E = mc^2"
        )));
    }

    #[test]
    fn test_heading_and_citation_together() {
        let segments = annotate("# Summary\nPer [1], yes.", &sources(1));
        assert!(matches!(
            &segments[0],
            Segment::Text { content, style: TextStyle::Heading(1) } if content == "Summary"
        ));
        assert!(segments.iter().any(|s| matches!(s, Segment::Citation { .. })));
    }

    #[test]
    fn test_pipeline_is_idempotent_on_plain_output() {
        let first = annotate(
            "# Head\nSee [1] and $x_i$, also **bold** and [9].",
            &sources(2),
        );
        // Re-run on the concatenated text of text-only segments.
        let text_only: String = first
            .iter()
            .filter_map(|s| match s {
                Segment::Text { content, .. } => Some(content.as_str()),
                _ => None,
            })
            .collect();
        let second = annotate(&text_only, &sources(2));
        assert!(
            second
                .iter()
                .all(|s| matches!(s, Segment::Text { .. })),
            "re-running must produce no new citation or math segments: {second:?}"
        );
    }

    #[test]
    fn test_plain_text_reconstruction() {
        let content = "See [2] and [9].";
        let segments = annotate(content, &sources(3));
        assert_eq!(plain_text(&segments), content);
    }

    #[test]
    fn test_empty_content() {
        assert!(annotate("", &sources(2)).is_empty());
    }

    #[test]
    fn test_underscore_survives_inside_math() {
        let segments = annotate("$a_b$ and _not italic_", &[]);
        assert!(segments.iter().any(|s| matches!(
            s,
            Segment::Math { source, .. } if source == "a_b"
        )));
        // Underscores outside math are untouched; no italic transform exists.
        assert!(segments.iter().any(|s| matches!(
            s,
            Segment::Text { content, .. } if content.contains("_not italic_")
        )));
    }
}
