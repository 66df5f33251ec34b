//! Caption spans derived from word timing.

/// Span generation.
pub mod generator;

pub use generator::{CaptionSpan, CaptionSpans, CaptionWindow, spans_for};
