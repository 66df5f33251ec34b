//! Encoding sinks.
//!
//! Sinks consume composed frames in frame order. [`ffmpeg::FfmpegSink`] produces the final MP4;
//! [`sink::InMemorySink`] keeps frames for tests and previews.

/// `ffmpeg`-based MP4 sink.
pub mod ffmpeg;
/// Generic frame sink trait and built-in sinks.
pub mod sink;

pub use ffmpeg::{FfmpegSink, FfmpegSinkOpts, is_ffmpeg_on_path};
pub use sink::{AudioInputConfig, FrameSink, InMemorySink, SinkConfig};
