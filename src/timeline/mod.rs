//! Visual timeline.
//!
//! Merges the dialogue script with word timing into time-stamped visual events: pose changes
//! that partition the whole video per character, anchored overlay appearances, the opening
//! visual and caption chunks. Built once per job and queried for every frame.

/// Timeline construction and queries.
pub mod builder;

pub use builder::{
    ActiveVisual, EventPayload, LineSpan, PoseSource, TimelineOptions, VisualEvent, VisualTimeline,
    build,
};
