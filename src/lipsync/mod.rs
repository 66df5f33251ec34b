//! Per-character mouth animation.
//!
//! Each spoken word is cut into equal syllable slices; the mouth is open for the first half of
//! every slice and closed otherwise.

/// Mouth state machine and syllable estimate.
pub mod machine;

pub use machine::{LipSync, MouthSlice, MouthState, count_syllables};
