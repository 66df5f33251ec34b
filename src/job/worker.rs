use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use rayon::prelude::*;

use crate::assets::{AssetCache, FrameAssets, LoadOptions};
use crate::encode::sink::{AudioInputConfig, FrameSink, SinkConfig};
use crate::foundation::core::FrameIndex;
use crate::foundation::error::{TalkreelError, TalkreelResult};
use crate::foundation::math::FrameFingerprint;
use crate::job::spec::JobSpec;
use crate::lipsync::{LipSync, MouthState};
use crate::render::{FrameCompositor, FrameRGBA, FrameState};
use crate::script::Character;
use crate::timeline::{EventPayload, VisualTimeline};

/// Cooperative cancellation flag shared between a caller and a worker.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Fresh, not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn check(&self) -> TalkreelResult<()> {
        if self.is_cancelled() {
            Err(TalkreelError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// A job that passed pre-flight and is ready to render.
pub struct PreparedJob {
    compositor: FrameCompositor,
    total_frames: u64,
    warnings: Vec<String>,
}

impl PreparedJob {
    /// Compositor for single-frame access.
    pub fn compositor(&self) -> &FrameCompositor {
        &self.compositor
    }

    /// Frames in the output video.
    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    /// Anomalies tolerated while building the timeline.
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Resolved timeline.
    pub fn timeline(&self) -> &VisualTimeline {
        self.compositor.timeline()
    }
}

/// Frame loop counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RenderStats {
    /// Frames handed to the sink.
    pub frames_total: u64,
    /// Frames rasterized.
    pub frames_painted: u64,
    /// Frames reused from an identical predecessor.
    pub frames_reused: u64,
}

/// Everything that can fail before the first frame: inputs, timeline, every pose/mouth image
/// a frame can draw and every overlay.
#[tracing::instrument(level = "info", skip_all, fields(output = %spec.output_path.display()))]
pub fn prepare(spec: &JobSpec, cache: Arc<AssetCache>) -> TalkreelResult<PreparedJob> {
    spec.validate()?;
    let inputs = spec.load_inputs()?;
    let timeline = spec.timeline(&inputs, cache.default_poses())?;
    for w in timeline.warnings() {
        tracing::warn!("{w}");
    }

    let lipsync = LipSync::new(&inputs.timing, &timeline);
    for (character, pose_id, mouth) in mouths_on_screen(&timeline, &lipsync) {
        cache.poses().resolve(character, pose_id, mouth)?;
    }

    let load = LoadOptions {
        timeout: Duration::from_millis(spec.config.timeouts.load_timeout_ms),
    };
    let needed = timeline.referenced_assets();
    let assets = FrameAssets::load(cache, &spec.visual_assets, &needed, load)?;

    let total_frames = spec.config.fps.frames_for_duration_ms(timeline.duration_ms());
    let lipsync = Arc::new(lipsync);
    let warnings = timeline.warnings().to_vec();
    let hook = spec.effective_hook_text(&inputs).map(str::to_string);
    let compositor = FrameCompositor::new(
        Arc::new(timeline),
        Arc::new(inputs.timing),
        lipsync,
        assets,
        Arc::new(spec.config.clone()),
        hook.as_deref(),
    )?;
    tracing::info!(total_frames, "pre-flight passed");
    Ok(PreparedJob {
        compositor,
        total_frames,
        warnings,
    })
}

/// Every `(character, pose, mouth)` combination shown at some instant of a pose interval.
fn mouths_on_screen<'a>(
    timeline: &'a VisualTimeline,
    lipsync: &LipSync,
) -> Vec<(Character, &'a str, MouthState)> {
    let mut out: Vec<(Character, &'a str, MouthState)> = Vec::new();
    for character in Character::ALL {
        let transitions = lipsync.transitions(character);
        for ev in timeline.pose_changes(character) {
            let EventPayload::PoseChange { pose_id, .. } = &ev.payload else {
                continue;
            };
            let first = lipsync.state_at(character, ev.start_ms);
            let inside = transitions
                .iter()
                .filter(|(t, _)| ev.start_ms < *t && *t < ev.end_ms)
                .map(|&(_, m)| m);
            for mouth in std::iter::once(first).chain(inside) {
                let key = (character, pose_id.as_str(), mouth);
                if !out.contains(&key) {
                    out.push(key);
                }
            }
        }
    }
    out
}

/// Compose every frame of `job` into `sink`.
///
/// The sink always sees frames in order. `progress` receives the number of frames emitted so
/// far. On error or cancellation the sink is aborted.
#[tracing::instrument(level = "debug", skip_all, fields(total_frames = job.total_frames))]
pub fn render_to_sink(
    job: &PreparedJob,
    sink: &mut dyn FrameSink,
    audio: Option<AudioInputConfig>,
    cancel: &CancelToken,
    progress: &mut dyn FnMut(u64),
) -> TalkreelResult<RenderStats> {
    cancel.check()?;
    let cfg = job.compositor.config();
    sink.begin(SinkConfig {
        width: cfg.canvas.width,
        height: cfg.canvas.height,
        fps: cfg.fps,
        audio,
    })?;

    let result = if cfg.parallel {
        render_parallel(job, sink, cancel, progress)
    } else {
        render_sequential(job, sink, cancel, progress)
    };
    match result {
        Ok(stats) => {
            sink.end()?;
            Ok(stats)
        }
        Err(e) => {
            sink.abort();
            Err(e)
        }
    }
}

fn frame_time(job: &PreparedJob, f: u64) -> u64 {
    job.compositor.config().fps.frame_to_ms(FrameIndex(f))
}

fn resolve_frame(job: &PreparedJob, f: u64) -> TalkreelResult<FrameState> {
    let t_ms = frame_time(job, f);
    job.compositor
        .resolve(t_ms)
        .map_err(|e| e.at(Some(f), Some(t_ms)))
}

fn render_sequential(
    job: &PreparedJob,
    sink: &mut dyn FrameSink,
    cancel: &CancelToken,
    progress: &mut dyn FnMut(u64),
) -> TalkreelResult<RenderStats> {
    let mut stats = RenderStats::default();
    let mut painter = job.compositor.painter();
    let mut last: Option<(FrameFingerprint, FrameRGBA)> = None;

    for f in 0..job.total_frames {
        cancel.check()?;
        let state = resolve_frame(job, f)?;
        let fp = state.fingerprint();
        let reuse = matches!(&last, Some((prev, _)) if *prev == fp);
        if !reuse {
            let frame = job
                .compositor
                .paint_with(&mut painter, &state)
                .map_err(|e| e.at(Some(f), Some(state.t_ms)))?;
            last = Some((fp, frame));
            stats.frames_painted += 1;
        } else {
            stats.frames_reused += 1;
        }
        if let Some((_, frame)) = &last {
            sink.push_frame(FrameIndex(f), frame)
                .map_err(|e| e.at(Some(f), None))?;
        }
        stats.frames_total += 1;
        progress(f + 1);
    }
    Ok(stats)
}

fn render_parallel(
    job: &PreparedJob,
    sink: &mut dyn FrameSink,
    cancel: &CancelToken,
    progress: &mut dyn FnMut(u64),
) -> TalkreelResult<RenderStats> {
    let cfg = job.compositor.config();
    let pool = build_thread_pool(cfg.threads)?;
    let chunk_size = normalized_chunk_size(cfg.chunk_size);
    let mut stats = RenderStats::default();
    let mut last: Option<(FrameFingerprint, FrameRGBA)> = None;

    let mut chunk_start = 0;
    while chunk_start < job.total_frames {
        cancel.check()?;
        let chunk_end = (chunk_start + chunk_size).min(job.total_frames);

        // Resolution is cheap; only distinct states are painted.
        let mut unique: Vec<(u64, FrameState)> = Vec::new();
        let mut frame_to_unique: Vec<Option<usize>> = Vec::new();
        let mut prev_fp = last.as_ref().map(|(fp, _)| *fp);
        for f in chunk_start..chunk_end {
            let state = resolve_frame(job, f)?;
            let fp = state.fingerprint();
            if prev_fp == Some(fp) {
                frame_to_unique.push(unique.len().checked_sub(1));
            } else {
                frame_to_unique.push(Some(unique.len()));
                unique.push((f, state));
            }
            prev_fp = Some(fp);
        }

        let painted = pool.install(|| {
            unique
                .par_iter()
                .map_init(
                    || job.compositor.painter(),
                    |painter, (f, state)| -> TalkreelResult<FrameRGBA> {
                        cancel.check()?;
                        job.compositor
                            .paint_with(painter, state)
                            .map_err(|e| e.at(Some(*f), Some(state.t_ms)))
                    },
                )
                .collect::<Vec<_>>()
        });
        let mut frames = Vec::with_capacity(painted.len());
        for item in painted {
            frames.push(item?);
        }
        stats.frames_painted += frames.len() as u64;

        for (f, u) in (chunk_start..chunk_end).zip(frame_to_unique) {
            let frame = match u {
                Some(i) => frames.get(i),
                None => last.as_ref().map(|(_, fr)| fr),
            }
            .ok_or_else(|| TalkreelError::validation("internal error: frame missing in chunk"))?;
            sink.push_frame(FrameIndex(f), frame)
                .map_err(|e| e.at(Some(f), None))?;
            stats.frames_total += 1;
            progress(f + 1);
        }
        stats.frames_reused = stats.frames_total - stats.frames_painted;

        if let (Some(frame), Some((_, state))) = (frames.pop(), unique.last()) {
            last = Some((state.fingerprint(), frame));
        }
        tracing::debug!(chunk_start, chunk_end, painted = unique.len(), "chunk emitted");
        chunk_start = chunk_end;
    }
    Ok(stats)
}

fn build_thread_pool(threads: Option<usize>) -> TalkreelResult<rayon::ThreadPool> {
    if let Some(n) = threads
        && n == 0
    {
        return Err(TalkreelError::validation(
            "render threading 'threads' must be >= 1 when set",
        ));
    }

    let mut builder = rayon::ThreadPoolBuilder::new();
    if let Some(n) = threads {
        builder = builder.num_threads(n);
    }
    builder
        .build()
        .map_err(|e| TalkreelError::validation(format!("failed to build rayon thread pool: {e}")))
}

fn normalized_chunk_size(chunk_size: usize) -> u64 {
    if chunk_size == 0 {
        1
    } else {
        chunk_size as u64
    }
}

#[cfg(test)]
#[path = "../../tests/unit/job/worker.rs"]
mod tests;
