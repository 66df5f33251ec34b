//! Dialogue script model.
//!
//! A [`Script`] is the finished, validated-by-the-author dialogue: who speaks which line, which
//! camera pose each stretch of words uses, and which overlay images accompany a line.

/// Script data types and JSON loading.
pub mod model;

pub use model::{Character, DialogueLine, PoseSpan, Script, VisualAssetSpan};
