use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use talkreel::{AssetCache, AssetCatalog, JobManager, JobSpec, JobState, LoadOptions};

#[derive(Parser, Debug)]
#[command(name = "talkreel", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Render the job to MP4 (requires `ffmpeg` on PATH).
    Render(RenderArgs),
    /// Render a single frame as a PNG.
    Frame(FrameArgs),
    /// Print the resolved visual timeline as JSON.
    Timeline(TimelineArgs),
}

#[derive(Parser, Debug)]
struct RenderArgs {
    /// Job spec JSON.
    #[arg(long)]
    job: PathBuf,

    /// Asset catalog JSON.
    #[arg(long)]
    catalog: PathBuf,

    /// Status poll interval in milliseconds.
    #[arg(long, default_value_t = 500)]
    poll_ms: u64,

    /// Log lines printed when the job ends.
    #[arg(long, default_value_t = 20)]
    log_tail: usize,
}

#[derive(Parser, Debug)]
struct FrameArgs {
    /// Job spec JSON.
    #[arg(long)]
    job: PathBuf,

    /// Asset catalog JSON.
    #[arg(long)]
    catalog: PathBuf,

    /// Presentation time in milliseconds.
    #[arg(long)]
    t_ms: u64,

    /// Output PNG path.
    #[arg(long)]
    out: PathBuf,
}

#[derive(Parser, Debug)]
struct TimelineArgs {
    /// Job spec JSON.
    #[arg(long)]
    job: PathBuf,

    /// Asset catalog JSON, for default poses.
    #[arg(long)]
    catalog: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Command::Render(args) => cmd_render(args),
        Command::Frame(args) => cmd_frame(args),
        Command::Timeline(args) => cmd_timeline(args),
    }
}

fn load_cache(catalog: &Path, spec: &JobSpec) -> anyhow::Result<Arc<AssetCache>> {
    let catalog = AssetCatalog::from_path(catalog)?;
    let opts = LoadOptions {
        timeout: Duration::from_millis(spec.config.timeouts.load_timeout_ms),
    };
    Ok(Arc::new(AssetCache::warm_up(&catalog, opts)?))
}

fn cmd_render(args: RenderArgs) -> anyhow::Result<()> {
    let spec = JobSpec::from_path(&args.job)?;
    let cache = load_cache(&args.catalog, &spec)?;
    let manager = JobManager::new(cache);
    let id = manager.submit(spec)?;

    let poll = Duration::from_millis(args.poll_ms.max(1));
    let job = loop {
        let job = manager.wait(id, poll)?;
        if job.state.is_terminal() {
            break job;
        }
        eprintln!(
            "{id}: {:?} {}/{} frames ({:.1}%)",
            job.state,
            job.frames_emitted,
            job.total_frames,
            job.progress_fraction * 100.0
        );
    };

    for line in manager.log_tail(id, args.log_tail)? {
        eprintln!("{id}: {line}");
    }
    match job.state {
        JobState::Completed => {
            eprintln!("wrote {}", job.output_path.display());
            Ok(())
        }
        state => anyhow::bail!(
            "{id} ended {state:?}: {}",
            job.error.unwrap_or_else(|| "no error recorded".to_string())
        ),
    }
}

fn cmd_frame(args: FrameArgs) -> anyhow::Result<()> {
    let spec = JobSpec::from_path(&args.job)?;
    let cache = load_cache(&args.catalog, &spec)?;
    let job = talkreel::job::prepare(&spec, cache)?;
    let frame = job.compositor().compose(args.t_ms)?;

    if let Some(parent) = args.out.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create output dir '{}'", parent.display()))?;
    }

    image::save_buffer_with_format(
        &args.out,
        &frame.to_straight_rgba8(),
        frame.width,
        frame.height,
        image::ColorType::Rgba8,
        image::ImageFormat::Png,
    )
    .with_context(|| format!("write png '{}'", args.out.display()))?;

    eprintln!("wrote {}", args.out.display());
    Ok(())
}

fn cmd_timeline(args: TimelineArgs) -> anyhow::Result<()> {
    let spec = JobSpec::from_path(&args.job)?;
    let default_poses = match &args.catalog {
        Some(p) => AssetCatalog::from_path(p)?.default_poses(),
        None => BTreeMap::new(),
    };
    let inputs = spec.load_inputs()?;
    let timeline = spec.timeline(&inputs, &default_poses)?;
    println!("{}", serde_json::to_string_pretty(&timeline)?);
    Ok(())
}
