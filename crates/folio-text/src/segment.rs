//! Typed output segments of the annotation pipeline

use folio_wire::MessageSource;

/// Style applied to a text segment by the markdown pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextStyle {
    Plain,
    Strong,
    /// Heading level 1-3
    Heading(u8),
}

/// One renderable unit of annotated message content.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    /// A run of text, possibly styled
    Text { content: String, style: TextStyle },
    /// An interactive citation anchor bound to a resolved source
    Citation { number: u32, source: MessageSource },
    /// A math span to render as a standalone unit.
    /// `display` spans render centered and full-width; inline spans size
    /// to the surrounding text.
    Math { source: String, display: bool },
}

/// Reconstruct readable text from a segment sequence. Citation anchors
/// contribute their `[n]` marker; math spans contribute their raw source.
pub fn plain_text(segments: &[Segment]) -> String {
    let mut out = String::new();
    for segment in segments {
        match segment {
            Segment::Text { content, .. } => out.push_str(content),
            Segment::Citation { number, .. } => out.push_str(&format!("[{number}]")),
            Segment::Math { source, .. } => out.push_str(source),
        }
    }
    out
}
