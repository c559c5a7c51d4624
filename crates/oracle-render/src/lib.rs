//! oracle-render: HTML rendering for oracle answers
//!
//! Markdown answers become sanitized HTML whose citation links point at the
//! anchors emitted for each source.

pub mod html;
pub mod tooltip;

pub use html::{render_answer, render_markdown, render_sources, render_transcript};
pub use tooltip::Tooltip;
