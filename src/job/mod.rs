//! Render jobs.
//!
//! A job turns a [`JobSpec`] into one MP4. [`worker::prepare`] runs every check that can fail
//! before the encoder starts, [`worker::render_to_sink`] drives the frame loop, and
//! [`JobManager`] runs both on a dedicated thread per job with progress, logs and cancellation.

/// Job registry, events and path leases.
pub mod manager;
/// Job description and input loading.
pub mod spec;
/// Pre-flight and frame loop.
pub mod worker;

pub use manager::{
    JobEvent, JobId, JobManager, JobState, PathLease, RenderJob, SinkFactory, ffmpeg_sink_for,
};
pub use spec::{JobInputs, JobSpec, ScriptSource};
pub use worker::{CancelToken, PreparedJob, RenderStats, prepare, render_to_sink};
