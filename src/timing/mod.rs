//! Word-level narration timing.
//!
//! [`TimingIndex`] is the validated, immutable table every later stage reads from. It is built
//! once per render job from [`RawWordAlignment`] rows, usually loaded through [`TimingDocument`].

/// Index construction, lookup and JSON documents.
pub mod index;

pub use index::{RawWordAlignment, TimingDocument, TimingIndex, TimingView, WordTiming};
