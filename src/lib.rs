//! Talkreel renders two-character dialogue videos.
//!
//! A finished script and per-word narration timing go in; a vertical MP4 with lip-synced
//! character poses, anchored overlay images and word-highlighted captions comes out.
//!
//! - Parse a [`Script`] and build a [`TimingIndex`]
//! - Resolve a [`VisualTimeline`] and a [`LipSync`] track
//! - Compose frames with a [`FrameCompositor`] and stream them into a [`FrameSink`]
//! - Or hand a [`JobSpec`] to the [`JobManager`] and poll its progress
#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod foundation;

/// Asset catalog, decoding and the shared image cache.
pub mod assets;
/// Caption chunking.
pub mod captions;
/// Render configuration.
pub mod config;
/// Encoding sinks.
pub mod encode;
/// Render jobs.
pub mod job;
/// Mouth open/closed state machine.
pub mod lipsync;
/// Frame composition.
pub mod render;
/// Dialogue script model.
pub mod script;
/// Visual timeline.
pub mod timeline;
/// Word timing.
pub mod timing;

pub use crate::foundation::core::{
    Affine, Canvas, Fps, FrameIndex, FrameRange, Point, Rect, Rgba8Premul, Vec2,
};
pub use crate::foundation::error::{AssetRef, RenderPosition, TalkreelError, TalkreelResult};
pub use crate::foundation::math::FrameFingerprint;

pub use crate::assets::{AssetCache, AssetCatalog, FrameAssets, LoadOptions, PreparedImage};
pub use crate::captions::{CaptionSpan, CaptionWindow, spans_for};
pub use crate::config::RenderConfig;
pub use crate::encode::{
    AudioInputConfig, FfmpegSink, FfmpegSinkOpts, FrameSink, InMemorySink, SinkConfig,
};
pub use crate::job::{
    CancelToken, JobId, JobManager, JobSpec, JobState, PreparedJob, RenderJob, RenderStats,
};
pub use crate::lipsync::{LipSync, MouthState};
pub use crate::render::{FrameCompositor, FrameRGBA, FrameState};
pub use crate::script::{Character, DialogueLine, Script};
pub use crate::timeline::{TimelineOptions, VisualTimeline};
pub use crate::timing::{TimingIndex, WordTiming};
