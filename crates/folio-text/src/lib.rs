//! folio-text: Text annotation pipeline and tooltip placement
//!
//! Post-processes generated message content into a flat ordered sequence
//! of typed segments: plain/styled text, interactive citation anchors
//! resolved against the message's source list, and math spans isolated
//! from markdown transforms. Also hosts the citation tooltip placement
//! resolver and its hover-intent timers.

pub mod citation;
pub mod markdown;
pub mod math;
pub mod pipeline;
pub mod segment;
pub mod tooltip;

pub use pipeline::annotate;
pub use segment::{Segment, TextStyle, plain_text};
pub use tooltip::{HoverIntent, HoverIntentConfig, Placement, Rect, Side, Size, TooltipCommand,
    resolve_placement};
