use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};

use crate::assets::AssetCache;
use crate::encode::ffmpeg::{FfmpegSink, FfmpegSinkOpts};
use crate::encode::sink::{AudioInputConfig, FrameSink};
use crate::foundation::error::{TalkreelError, TalkreelResult};
use crate::job::spec::JobSpec;
use crate::job::worker::{CancelToken, prepare, render_to_sink};

/// Opaque job handle.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

/// Lifecycle of a render job.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Accepted, worker not started yet.
    Queued,
    /// Pre-flight or frame loop in progress.
    Running,
    /// Output written.
    Completed,
    /// Stopped by an error.
    Failed,
    /// Stopped on request.
    Cancelled,
}

impl JobState {
    /// `Completed`, `Failed` or `Cancelled`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Snapshot of one job.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct RenderJob {
    /// Handle.
    pub id: JobId,
    /// Current state.
    pub state: JobState,
    /// `frames_emitted / total_frames`, never decreasing.
    pub progress_fraction: f64,
    /// Frames handed to the encoder.
    pub frames_emitted: u64,
    /// Frames in the video; zero until pre-flight passes.
    pub total_frames: u64,
    /// Final MP4 path.
    pub output_path: PathBuf,
    /// Error kind and message of a failed job.
    pub error: Option<String>,
    /// Lifecycle messages in order.
    pub log: Vec<String>,
}

/// Worker to manager messages.
#[derive(Clone, Debug)]
pub enum JobEvent {
    /// Worker picked the job up and started pre-flight.
    Preflight {
        /// Job.
        id: JobId,
    },
    /// Pre-flight passed.
    Started {
        /// Job.
        id: JobId,
        /// Frames to render.
        total_frames: u64,
    },
    /// Frames emitted so far.
    Progress {
        /// Job.
        id: JobId,
        /// Frames handed to the sink.
        frames_emitted: u64,
    },
    /// Free-form log line.
    Log {
        /// Job.
        id: JobId,
        /// Message.
        line: String,
    },
    /// Terminal outcome; always the job's last event.
    Finished {
        /// Job.
        id: JobId,
        /// Terminal state.
        state: JobState,
        /// Error text for `Failed`.
        error: Option<String>,
    },
}

struct JobEntry {
    job: RenderJob,
    cancel: CancelToken,
    worker: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct Registry {
    jobs: Mutex<BTreeMap<JobId, JobEntry>>,
    changed: Condvar,
}

impl Registry {
    fn lock(&self) -> MutexGuard<'_, BTreeMap<JobId, JobEntry>> {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn apply(&self, ev: JobEvent) {
        let mut jobs = self.lock();
        let id = match &ev {
            JobEvent::Preflight { id }
            | JobEvent::Started { id, .. }
            | JobEvent::Progress { id, .. }
            | JobEvent::Log { id, .. }
            | JobEvent::Finished { id, .. } => *id,
        };
        let Some(entry) = jobs.get_mut(&id) else {
            return;
        };
        let job = &mut entry.job;
        match ev {
            JobEvent::Preflight { .. } => {
                job.state = JobState::Running;
                job.log.push("preflight".to_string());
            }
            JobEvent::Started { total_frames, .. } => {
                job.state = JobState::Running;
                job.total_frames = total_frames;
                job.log.push(format!("running: {total_frames} frames"));
            }
            JobEvent::Progress { frames_emitted, .. } => {
                if frames_emitted > job.frames_emitted {
                    job.frames_emitted = frames_emitted;
                    if job.total_frames > 0 {
                        let p = frames_emitted as f64 / job.total_frames as f64;
                        job.progress_fraction = job.progress_fraction.max(p.min(1.0));
                    }
                }
            }
            JobEvent::Log { line, .. } => job.log.push(line),
            JobEvent::Finished { state, error, .. } => {
                job.state = state;
                match state {
                    JobState::Completed => {
                        job.progress_fraction = 1.0;
                        job.log
                            .push(format!("completed: {}", job.output_path.display()));
                    }
                    JobState::Cancelled => job.log.push("cancelled".to_string()),
                    _ => {}
                }
                if let Some(e) = &error {
                    job.log.push(format!("failed: {e}"));
                }
                job.error = error;
            }
        }
        drop(jobs);
        self.changed.notify_all();
    }
}

/// Exclusive claim on an output path; released on drop.
#[derive(Debug)]
pub struct PathLease {
    held: Arc<Mutex<HashSet<PathBuf>>>,
    path: PathBuf,
}

impl PathLease {
    fn acquire(held: &Arc<Mutex<HashSet<PathBuf>>>, path: PathBuf) -> Option<Self> {
        let mut set = held.lock().unwrap_or_else(|e| e.into_inner());
        if !set.insert(path.clone()) {
            return None;
        }
        Some(Self {
            held: Arc::clone(held),
            path,
        })
    }
}

impl Drop for PathLease {
    fn drop(&mut self) {
        let mut set = self.held.lock().unwrap_or_else(|e| e.into_inner());
        set.remove(&self.path);
    }
}

/// Builds the sink a job's frames are streamed into.
pub type SinkFactory = Arc<dyn Fn(&JobSpec) -> Box<dyn FrameSink> + Send + Sync>;

/// MP4 sink writing to `spec.output_path` with the job's timeouts and background.
pub fn ffmpeg_sink_for(spec: &JobSpec) -> Box<dyn FrameSink> {
    let timeouts = spec.config.timeouts;
    let mut opts = FfmpegSinkOpts::new(&spec.output_path);
    opts.bg_rgba = spec.config.background_rgba;
    opts.write_timeout = Duration::from_millis(timeouts.write_timeout_ms);
    opts.finish_timeout = Duration::from_millis(timeouts.finish_timeout_ms);
    Box::new(FfmpegSink::new(opts))
}

/// Runs render jobs on dedicated worker threads.
///
/// Callers address jobs only by [`JobId`]. Workers report through a `crossbeam-channel` event
/// stream that a pump thread folds into job snapshots.
pub struct JobManager {
    cache: Arc<AssetCache>,
    sinks: SinkFactory,
    registry: Arc<Registry>,
    leases: Arc<Mutex<HashSet<PathBuf>>>,
    events: Option<Sender<JobEvent>>,
    pump: Option<JoinHandle<()>>,
    next_id: AtomicU64,
}

impl JobManager {
    /// Manager sharing `cache` between all jobs, encoding with `ffmpeg`.
    pub fn new(cache: Arc<AssetCache>) -> Self {
        Self::with_sink_factory(cache, Arc::new(ffmpeg_sink_for))
    }

    /// Manager whose jobs render into sinks built by `sinks`.
    pub fn with_sink_factory(cache: Arc<AssetCache>, sinks: SinkFactory) -> Self {
        let registry = Arc::new(Registry::default());
        let (tx, rx): (Sender<JobEvent>, Receiver<JobEvent>) = crossbeam_channel::unbounded();
        let pump_registry = Arc::clone(&registry);
        let pump = std::thread::spawn(move || {
            for ev in rx {
                pump_registry.apply(ev);
            }
        });
        Self {
            cache,
            sinks,
            registry,
            leases: Arc::new(Mutex::new(HashSet::new())),
            events: Some(tx),
            pump: Some(pump),
            next_id: AtomicU64::new(1),
        }
    }

    /// Start a job and return immediately.
    ///
    /// Fails when `spec` is invalid or another active job writes the same output path.
    pub fn submit(&self, spec: JobSpec) -> TalkreelResult<JobId> {
        spec.validate()?;
        let events = self
            .events
            .clone()
            .ok_or_else(|| TalkreelError::validation("job manager is shutting down"))?;
        let lease = PathLease::acquire(&self.leases, spec.output_path.clone()).ok_or_else(|| {
            TalkreelError::validation(format!(
                "output path '{}' is already being rendered by another job",
                spec.output_path.display()
            ))
        })?;

        let id = JobId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let cancel = CancelToken::new();
        let job = RenderJob {
            id,
            state: JobState::Queued,
            progress_fraction: 0.0,
            frames_emitted: 0,
            total_frames: 0,
            output_path: spec.output_path.clone(),
            error: None,
            log: vec!["queued".to_string()],
        };

        let mut jobs = self.registry.lock();
        let cache = Arc::clone(&self.cache);
        let sinks = Arc::clone(&self.sinks);
        let worker_cancel = cancel.clone();
        let worker = std::thread::Builder::new()
            .name(format!("talkreel-{id}"))
            .spawn(move || run_job(id, spec, cache, sinks, worker_cancel, events, lease))
            .map_err(|e| TalkreelError::validation(format!("failed to spawn job worker: {e}")))?;
        jobs.insert(
            id,
            JobEntry {
                job,
                cancel,
                worker: Some(worker),
            },
        );
        tracing::info!(%id, "job submitted");
        Ok(id)
    }

    /// Current snapshot of `id`.
    pub fn status(&self, id: JobId) -> TalkreelResult<RenderJob> {
        self.registry
            .lock()
            .get(&id)
            .map(|e| e.job.clone())
            .ok_or_else(|| unknown(id))
    }

    /// Ask `id` to stop at the next frame boundary. No-op for finished jobs.
    pub fn cancel(&self, id: JobId) -> TalkreelResult<()> {
        let jobs = self.registry.lock();
        let entry = jobs.get(&id).ok_or_else(|| unknown(id))?;
        if !entry.job.state.is_terminal() {
            entry.cancel.cancel();
            tracing::info!(%id, "cancellation requested");
        }
        Ok(())
    }

    /// Last `n` log lines of `id`.
    pub fn log_tail(&self, id: JobId, n: usize) -> TalkreelResult<Vec<String>> {
        let jobs = self.registry.lock();
        let log = &jobs.get(&id).ok_or_else(|| unknown(id))?.job.log;
        Ok(log[log.len().saturating_sub(n)..].to_vec())
    }

    /// Block until `id` is terminal or `timeout` elapses; returns the latest snapshot.
    pub fn wait(&self, id: JobId, timeout: Duration) -> TalkreelResult<RenderJob> {
        let deadline = Instant::now() + timeout;
        let mut jobs = self.registry.lock();
        loop {
            let job = &jobs.get(&id).ok_or_else(|| unknown(id))?.job;
            let now = Instant::now();
            if job.state.is_terminal() || now >= deadline {
                return Ok(job.clone());
            }
            jobs = self
                .registry
                .changed
                .wait_timeout(jobs, deadline - now)
                .map(|(g, _)| g)
                .unwrap_or_else(|e| e.into_inner().0);
        }
    }

    /// Remove a finished job and return its final snapshot.
    pub fn acknowledge(&self, id: JobId) -> TalkreelResult<RenderJob> {
        let mut jobs = self.registry.lock();
        let state = jobs.get(&id).ok_or_else(|| unknown(id))?.job.state;
        if !state.is_terminal() {
            return Err(TalkreelError::validation(format!(
                "{id} is still {state:?} and cannot be acknowledged"
            )));
        }
        let mut entry = jobs.remove(&id).ok_or_else(|| unknown(id))?;
        drop(jobs);
        if let Some(h) = entry.worker.take() {
            let _ = h.join();
        }
        Ok(entry.job)
    }

    /// Snapshots of every job not yet acknowledged.
    pub fn jobs(&self) -> Vec<RenderJob> {
        self.registry
            .lock()
            .values()
            .map(|e| e.job.clone())
            .collect()
    }
}

impl Drop for JobManager {
    fn drop(&mut self) {
        let workers: Vec<JoinHandle<()>> = {
            let mut jobs = self.registry.lock();
            jobs.values_mut()
                .filter_map(|e| {
                    e.cancel.cancel();
                    e.worker.take()
                })
                .collect()
        };
        for h in workers {
            let _ = h.join();
        }
        drop(self.events.take());
        if let Some(p) = self.pump.take() {
            let _ = p.join();
        }
    }
}

/// An unfinished job must not leave an earlier render at its output path.
fn remove_stale_output(path: &std::path::Path) {
    match std::fs::remove_file(path) {
        Ok(()) => tracing::info!(path = %path.display(), "removed previous output"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "could not remove previous output"),
    }
}

fn unknown(id: JobId) -> TalkreelError {
    TalkreelError::validation(format!("unknown job {id}"))
}

fn run_job(
    id: JobId,
    spec: JobSpec,
    cache: Arc<AssetCache>,
    sinks: SinkFactory,
    cancel: CancelToken,
    events: Sender<JobEvent>,
    lease: PathLease,
) {
    let send = |ev: JobEvent| {
        let _ = events.send(ev);
    };
    let span = tracing::info_span!("job", %id);
    let _enter = span.enter();

    let outcome = (|| -> TalkreelResult<()> {
        if cancel.is_cancelled() {
            return Err(TalkreelError::Cancelled);
        }
        send(JobEvent::Preflight { id });
        let job = prepare(&spec, cache)?;
        for w in job.warnings() {
            send(JobEvent::Log {
                id,
                line: format!("warning: {w}"),
            });
        }
        send(JobEvent::Started {
            id,
            total_frames: job.total_frames(),
        });
        tracing::info!(total_frames = job.total_frames(), "rendering");

        let mut sink = sinks(&spec);
        let audio = spec
            .audio_path
            .clone()
            .map(|path| AudioInputConfig { path });

        let stats = render_to_sink(&job, sink.as_mut(), audio, &cancel, &mut |n| {
            send(JobEvent::Progress {
                id,
                frames_emitted: n,
            })
        })?;
        send(JobEvent::Log {
            id,
            line: format!(
                "frames: {} painted, {} reused",
                stats.frames_painted, stats.frames_reused
            ),
        });
        Ok(())
    })();

    let (state, error) = match outcome {
        Ok(()) => {
            tracing::info!("job completed");
            (JobState::Completed, None)
        }
        Err(e) if e.is_cancelled() => {
            tracing::info!("job cancelled");
            (JobState::Cancelled, None)
        }
        Err(e) => {
            tracing::error!(kind = e.kind(), error = %e, "job failed");
            (JobState::Failed, Some(format!("{}: {e}", e.kind())))
        }
    };
    if state != JobState::Completed {
        remove_stale_output(&spec.output_path);
    }
    drop(lease);
    send(JobEvent::Finished { id, state, error });
}

#[cfg(test)]
#[path = "../../tests/unit/job/manager.rs"]
mod tests;
