use std::io::{Read, Write as _};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, SendTimeoutError, Sender};

use crate::encode::sink::{FrameSink, SinkConfig};
use crate::foundation::core::{Fps, FrameIndex};
use crate::foundation::error::{TalkreelError, TalkreelResult};
use crate::foundation::math::mul_div255_u16;
use crate::render::FrameRGBA;

const FINISH_POLL: Duration = Duration::from_millis(20);

/// Options for [`FfmpegSink`] MP4 output.
#[derive(Clone, Debug)]
pub struct FfmpegSinkOpts {
    /// Output MP4 file path.
    pub out_path: PathBuf,
    /// Overwrite output file if it already exists.
    pub overwrite: bool,
    /// Background color used to flatten alpha (RGBA8, straight alpha).
    pub bg_rgba: [u8; 4],
    /// Maximum wait for the encoder to accept one frame.
    pub write_timeout: Duration,
    /// Maximum wait for the encoder to finalize the container after the last frame.
    pub finish_timeout: Duration,
}

impl FfmpegSinkOpts {
    /// Create options for outputting an MP4 to `out_path`.
    pub fn new(out_path: impl Into<PathBuf>) -> Self {
        Self {
            out_path: out_path.into(),
            overwrite: true,
            bg_rgba: [0, 0, 0, 255],
            write_timeout: Duration::from_secs(30),
            finish_timeout: Duration::from_secs(120),
        }
    }
}

/// Sink that spawns the system `ffmpeg` and streams raw frames to its stdin.
///
/// `ffmpeg` writes to a sibling `.partial` file that is renamed to the output path only after it
/// exits successfully. The partial file is removed on failure, on [`FrameSink::abort`] and when
/// the sink is dropped unfinished.
pub struct FfmpegSink {
    opts: FfmpegSinkOpts,
    running: Option<Running>,
    cfg: Option<SinkConfig>,
    last_idx: Option<FrameIndex>,
}

struct Running {
    child: Child,
    frames: Option<Sender<Vec<u8>>>,
    recycled: Receiver<Vec<u8>>,
    writer: Option<JoinHandle<std::io::Result<()>>>,
    stderr_drain: Option<JoinHandle<std::io::Result<Vec<u8>>>>,
    partial: PathBuf,
}

impl FfmpegSink {
    /// Create a new sink that streams into `ffmpeg`.
    pub fn new(opts: FfmpegSinkOpts) -> Self {
        Self {
            opts,
            running: None,
            cfg: None,
            last_idx: None,
        }
    }

    /// Path `ffmpeg` writes to while encoding.
    pub fn partial_path(&self) -> PathBuf {
        partial_path(&self.opts.out_path)
    }
}

/// `<out>.partial` next to `out`.
pub fn partial_path(out: &Path) -> PathBuf {
    let mut name = out.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".partial");
    out.with_file_name(name)
}

impl FrameSink for FfmpegSink {
    #[tracing::instrument(level = "debug", skip_all, fields(out = %self.opts.out_path.display()))]
    fn begin(&mut self, cfg: SinkConfig) -> TalkreelResult<()> {
        if self.running.is_some() {
            return Err(TalkreelError::encoder("ffmpeg sink already started"));
        }
        if cfg.fps.num == 0 || cfg.fps.den == 0 {
            return Err(TalkreelError::validation("fps must be non-zero"));
        }
        if cfg.width == 0 || cfg.height == 0 {
            return Err(TalkreelError::validation(
                "ffmpeg sink width/height must be non-zero",
            ));
        }
        if !cfg.width.is_multiple_of(2) || !cfg.height.is_multiple_of(2) {
            return Err(TalkreelError::validation(
                "ffmpeg sink width/height must be even (required for yuv420p mp4 output)",
            ));
        }

        ensure_parent_dir(&self.opts.out_path)?;
        if !self.opts.overwrite && self.opts.out_path.exists() {
            return Err(TalkreelError::validation(format!(
                "output file '{}' already exists",
                self.opts.out_path.display()
            )));
        }
        // A previous render at this path must not survive a failed or cancelled one.
        remove_stale_output(&self.opts.out_path)?;
        if let Some(audio) = &cfg.audio
            && !audio.path.is_file()
        {
            return Err(TalkreelError::validation(format!(
                "narration audio '{}' does not exist",
                audio.path.display()
            )));
        }

        if !is_ffmpeg_on_path() {
            return Err(TalkreelError::encoder(
                "ffmpeg is required for MP4 encoding, but was not found on PATH",
            ));
        }

        let partial = partial_path(&self.opts.out_path);
        let mut cmd = Command::new("ffmpeg");
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        // Input: raw RGBA8 frames, already flattened to opaque in push_frame.
        cmd.args([
            "-y",
            "-loglevel",
            "error",
            "-f",
            "rawvideo",
            "-pix_fmt",
            "rgba",
            "-s",
            &format!("{}x{}", cfg.width, cfg.height),
        ]);
        push_input_fps(&mut cmd, cfg.fps);
        cmd.args(["-i", "pipe:0"]);

        if let Some(audio) = cfg.audio.as_ref() {
            cmd.arg("-i").arg(&audio.path).args([
                "-map",
                "0:v:0",
                "-map",
                "1:a:0",
                "-c:v",
                "libx264",
                "-pix_fmt",
                "yuv420p",
                "-c:a",
                "aac",
                "-shortest",
            ]);
        } else {
            cmd.args(["-an", "-c:v", "libx264", "-pix_fmt", "yuv420p"]);
        }
        // The partial file name hides the container from ffmpeg's extension sniffing.
        cmd.args(["-movflags", "+faststart", "-f", "mp4"]);
        cmd.arg(&partial);

        let mut child = cmd.spawn().map_err(|e| {
            TalkreelError::encoder(format!(
                "failed to spawn ffmpeg (is it installed and on PATH?): {e}"
            ))
        })?;

        let Some(mut stdin) = child.stdin.take() else {
            kill_and_reap(&mut child);
            return Err(TalkreelError::encoder("failed to open ffmpeg stdin"));
        };
        let Some(mut stderr) = child.stderr.take() else {
            kill_and_reap(&mut child);
            return Err(TalkreelError::encoder("failed to open ffmpeg stderr"));
        };
        let stderr_drain = std::thread::spawn(move || {
            let mut stderr_bytes = Vec::new();
            stderr.read_to_end(&mut stderr_bytes)?;
            Ok(stderr_bytes)
        });

        let (frames_tx, frames_rx) = crossbeam_channel::bounded::<Vec<u8>>(2);
        let (recycle_tx, recycle_rx) = crossbeam_channel::bounded::<Vec<u8>>(4);
        let writer = std::thread::spawn(move || -> std::io::Result<()> {
            for buf in frames_rx {
                stdin.write_all(&buf)?;
                let _ = recycle_tx.try_send(buf);
            }
            stdin.flush()
        });

        tracing::debug!(partial = %partial.display(), "ffmpeg started");
        self.running = Some(Running {
            child,
            frames: Some(frames_tx),
            recycled: recycle_rx,
            writer: Some(writer),
            stderr_drain: Some(stderr_drain),
            partial,
        });
        self.cfg = Some(cfg);
        self.last_idx = None;
        Ok(())
    }

    fn push_frame(&mut self, idx: FrameIndex, frame: &FrameRGBA) -> TalkreelResult<()> {
        let at = |e: TalkreelError| e.at(Some(idx.0), None);
        let cfg = self
            .cfg
            .as_ref()
            .ok_or_else(|| at(TalkreelError::encoder("ffmpeg sink not started")))?;
        if let Some(last) = self.last_idx
            && idx.0 <= last.0
        {
            return Err(at(TalkreelError::encoder(
                "ffmpeg sink received out-of-order frame index",
            )));
        }
        if frame.width != cfg.width || frame.height != cfg.height {
            return Err(TalkreelError::validation(format!(
                "frame size mismatch: got {}x{}, expected {}x{}",
                frame.width, frame.height, cfg.width, cfg.height
            )));
        }
        let expected = (cfg.width as usize) * (cfg.height as usize) * 4;
        if frame.data.len() != expected {
            return Err(TalkreelError::validation(
                "frame.data size mismatch with width*height*4",
            ));
        }
        let running = self
            .running
            .as_mut()
            .ok_or_else(|| at(TalkreelError::encoder("ffmpeg sink is already finalized")))?;
        let Some(frames) = running.frames.as_ref() else {
            return Err(at(TalkreelError::encoder("ffmpeg sink is already finalized")));
        };

        let mut buf = running
            .recycled
            .try_recv()
            .unwrap_or_else(|_| vec![0u8; expected]);
        buf.resize(expected, 0);
        flatten_premul_over_bg_to_opaque_rgba8(&mut buf, &frame.data, self.opts.bg_rgba)?;

        match frames.send_timeout(buf, self.opts.write_timeout) {
            Ok(()) => {}
            Err(SendTimeoutError::Timeout(_)) => {
                return Err(at(TalkreelError::encoder(format!(
                    "ffmpeg did not accept a frame within {} ms",
                    self.opts.write_timeout.as_millis()
                ))));
            }
            Err(SendTimeoutError::Disconnected(_)) => {
                running.frames = None;
                let cause = match running.writer.take().map(JoinHandle::join) {
                    Some(Ok(Err(e))) => e.to_string(),
                    Some(Err(_)) => "writer thread panicked".to_string(),
                    _ => "writer thread exited".to_string(),
                };
                return Err(at(TalkreelError::encoder(format!(
                    "failed to write frame to ffmpeg stdin: {cause}"
                ))));
            }
        }
        self.last_idx = Some(idx);
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip_all, fields(out = %self.opts.out_path.display()))]
    fn end(&mut self) -> TalkreelResult<()> {
        let mut running = self
            .running
            .take()
            .ok_or_else(|| TalkreelError::encoder("ffmpeg sink not started"))?;
        self.cfg = None;
        let result = finish(&mut running, self.opts.finish_timeout);
        match result {
            Ok(()) => {
                std::fs::rename(&running.partial, &self.opts.out_path).map_err(|e| {
                    let _ = std::fs::remove_file(&running.partial);
                    TalkreelError::encoder(format!(
                        "failed to move '{}' to '{}': {e}",
                        running.partial.display(),
                        self.opts.out_path.display()
                    ))
                })?;
                tracing::debug!("ffmpeg finished");
                Ok(())
            }
            Err(e) => {
                let _ = std::fs::remove_file(&running.partial);
                Err(e)
            }
        }
    }

    fn abort(&mut self) {
        self.cfg = None;
        if let Some(mut running) = self.running.take() {
            teardown(&mut running);
            tracing::debug!(partial = %running.partial.display(), "ffmpeg aborted");
        }
    }
}

impl Drop for FfmpegSink {
    fn drop(&mut self) {
        self.abort();
    }
}

fn finish(running: &mut Running, timeout: Duration) -> TalkreelResult<()> {
    // Closing the frame channel lets the writer drain and close stdin.
    drop(running.frames.take());

    let deadline = Instant::now() + timeout;
    let status = loop {
        match running.child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) if Instant::now() >= deadline => {
                teardown(running);
                return Err(TalkreelError::encoder(format!(
                    "ffmpeg did not finish within {} ms",
                    timeout.as_millis()
                )));
            }
            Ok(None) => std::thread::sleep(FINISH_POLL),
            Err(e) => {
                teardown(running);
                return Err(TalkreelError::encoder(format!(
                    "failed to wait for ffmpeg to finish: {e}"
                )));
            }
        }
    };

    let write_result = match running.writer.take().map(JoinHandle::join) {
        Some(Ok(r)) => r.map_err(|e| e.to_string()),
        Some(Err(_)) => Err("writer thread panicked".to_string()),
        None => Ok(()),
    };
    let stderr_bytes = match running.stderr_drain.take().map(JoinHandle::join) {
        Some(Ok(Ok(bytes))) => bytes,
        _ => Vec::new(),
    };

    if !status.success() {
        let stderr = String::from_utf8_lossy(&stderr_bytes);
        return Err(TalkreelError::encoder(format!(
            "ffmpeg exited with status {}: {}",
            status,
            stderr.trim()
        )));
    }
    write_result
        .map_err(|e| TalkreelError::encoder(format!("failed to write frames to ffmpeg: {e}")))
}

fn teardown(running: &mut Running) {
    drop(running.frames.take());
    kill_and_reap(&mut running.child);
    if let Some(h) = running.writer.take() {
        let _ = h.join();
    }
    if let Some(h) = running.stderr_drain.take() {
        let _ = h.join();
    }
    let _ = std::fs::remove_file(&running.partial);
}

fn kill_and_reap(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

fn push_input_fps(cmd: &mut Command, fps: Fps) {
    // For rawvideo input, `-r` goes before `-i` and accepts `num/den`.
    cmd.args(["-r", &format!("{}/{}", fps.num, fps.den)]);
}

fn flatten_premul_over_bg_to_opaque_rgba8(
    dst: &mut [u8],
    src_premul: &[u8],
    bg_rgba: [u8; 4],
) -> TalkreelResult<()> {
    if dst.len() != src_premul.len() || !dst.len().is_multiple_of(4) {
        return Err(TalkreelError::validation(
            "flatten_premul_over_bg_to_opaque_rgba8 expects equal-length rgba8 buffers",
        ));
    }

    let bg_r = u16::from(bg_rgba[0]);
    let bg_g = u16::from(bg_rgba[1]);
    let bg_b = u16::from(bg_rgba[2]);

    for (d, s) in dst.chunks_exact_mut(4).zip(src_premul.chunks_exact(4)) {
        let a = u16::from(s[3]);
        if a == 255 {
            d.copy_from_slice(s);
            continue;
        }

        let inv = 255u16 - a;
        let r = u16::from(s[0]) + mul_div255_u16(bg_r, inv);
        let g = u16::from(s[1]) + mul_div255_u16(bg_g, inv);
        let b = u16::from(s[2]) + mul_div255_u16(bg_b, inv);

        d[0] = r.min(255) as u8;
        d[1] = g.min(255) as u8;
        d[2] = b.min(255) as u8;
        d[3] = 255;
    }

    Ok(())
}

/// Ensure the parent directory of `path` exists.
pub fn ensure_parent_dir(path: &Path) -> TalkreelResult<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        use anyhow::Context as _;
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create output directory '{}'", parent.display()))?;
    }
    Ok(())
}

fn remove_stale_output(path: &Path) -> TalkreelResult<()> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            tracing::debug!(path = %path.display(), "removed previous output");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(TalkreelError::encoder(format!(
            "failed to remove previous output '{}': {e}",
            path.display()
        ))),
    }
}

/// Return `true` when `ffmpeg` can be invoked from `PATH`.
pub fn is_ffmpeg_on_path() -> bool {
    Command::new("ffmpeg")
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

#[cfg(test)]
#[path = "../../tests/unit/encode/ffmpeg.rs"]
mod tests;
