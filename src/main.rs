use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use encode_bench::probe::DEFAULT_WARMUP;
use encode_bench::source::DEFAULT_EXTENSIONS;
use encode_bench::{
    BenchSettings, DEFAULT_CODECS, DEFAULT_RESOLUTIONS, FrameDecoder, FrameSource, GridOutcome,
    GridSpec, HwAccel, ImageFileDecoder, RateControl, ResizeFilter, Resolution, aggregate,
    default_encoder_factory, list_images, render_latency_table, render_markdown, run_grid,
    run_pipeline, run_synthetic_cell,
};
use tracing::info;

#[derive(Debug, Parser)]
#[command(about = "Measure encoder speed and output size across codecs and resolutions")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Decode a directory of images, resize, and encode per cell.
    Images(ImagesArgs),
    /// Encode generated test frames held in memory.
    Synthetic(SyntheticArgs),
}

#[derive(Debug, Args)]
struct GridArgs {
    /// Encoder name, e.g. libx264 or h264_nvenc. Repeatable.
    #[arg(long = "codec")]
    codecs: Vec<String>,

    /// Target resolution as WIDTHxHEIGHT. Repeatable.
    #[arg(long = "resolution")]
    resolutions: Vec<Resolution>,

    #[arg(long, default_value_t = BenchSettings::DEFAULT_FRAME_RATE)]
    fps: u32,

    #[arg(long, default_value_t = BenchSettings::DEFAULT_GOP_SIZE)]
    gop: u32,

    /// Encoder option as key=value (crf, qp, b, preset, tune). Repeatable.
    #[arg(long = "option", value_parser = parse_key_value)]
    options: Vec<(String, String)>,

    #[arg(long, value_enum, default_value_t = HwAccelMode::Off)]
    hwaccel: HwAccelMode,
}

#[derive(Debug, Args)]
struct ImagesArgs {
    #[command(flatten)]
    grid: GridArgs,

    /// Directory holding the source frames.
    #[arg(long)]
    images: PathBuf,

    /// File extension accepted as a frame. Repeatable.
    #[arg(long = "extension")]
    extensions: Vec<String>,

    #[arg(long, default_value_t = ResizeFilter::default())]
    filter: ResizeFilter,

    #[arg(long, default_value_t = BenchSettings::DEFAULT_CHANNEL_CAPACITY)]
    channel_capacity: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum HwAccelMode {
    Off,
    On,
    Both,
}

impl HwAccelMode {
    fn modes(self) -> Vec<HwAccel> {
        match self {
            Self::Off => vec![HwAccel::Off],
            Self::On => vec![HwAccel::On],
            Self::Both => vec![HwAccel::Off, HwAccel::On],
        }
    }
}

#[derive(Debug, Args)]
struct SyntheticArgs {
    #[command(flatten)]
    grid: GridArgs,

    /// Timed frames per cell.
    #[arg(long, default_value_t = 300)]
    frames: usize,

    /// Untimed frames submitted first to absorb encoder setup.
    #[arg(long, default_value_t = DEFAULT_WARMUP)]
    warmup: usize,
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got `{raw}`"))?;
    Ok((key.trim().to_string(), value.trim().to_string()))
}

impl GridArgs {
    fn settings(&self) -> Result<BenchSettings> {
        let mut settings = BenchSettings::default().with_frame_rate(self.fps)?;
        settings.gop_size = self.gop;
        if !self.options.is_empty() {
            let mut rate_control = RateControl::from_options(
                self.options.iter().map(|(k, v)| (k.as_str(), v.as_str())),
            )?;
            // Keep the default crf unless another rate mode was chosen.
            if rate_control.crf.is_none()
                && rate_control.qp.is_none()
                && rate_control.bitrate.is_none()
            {
                rate_control.crf = settings.rate_control.crf;
            }
            settings.rate_control = rate_control;
        }
        Ok(settings)
    }

    fn grid(&self) -> Result<GridSpec> {
        let codecs = if self.codecs.is_empty() {
            DEFAULT_CODECS.iter().map(|c| (*c).to_string()).collect()
        } else {
            self.codecs.clone()
        };
        let resolutions = if self.resolutions.is_empty() {
            DEFAULT_RESOLUTIONS
                .iter()
                .map(|(w, h)| Resolution::new(*w, *h))
                .collect::<Result<Vec<_>, _>>()?
        } else {
            self.resolutions.clone()
        };
        Ok(GridSpec::new(codecs, resolutions).with_hwaccel_modes(self.hwaccel.modes()))
    }
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    match cli.command {
        Command::Images(args) => run_images(&args),
        Command::Synthetic(args) => run_synthetic(&args),
    }
}

fn init_tracing() {
    let ansi_enabled = std::env::var_os("NO_COLOR").is_none() && io::stderr().is_terminal();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(io::stderr)
        .with_ansi(ansi_enabled)
        .init();
}

fn run_images(args: &ImagesArgs) -> Result<()> {
    let mut settings = args.grid.settings()?;
    settings.channel_capacity = args.channel_capacity;
    let spec = args.grid.grid()?;

    let extensions: Vec<&str> = if args.extensions.is_empty() {
        DEFAULT_EXTENSIONS.to_vec()
    } else {
        args.extensions.iter().map(String::as_str).collect()
    };
    let paths = list_images(&args.images, &extensions)
        .with_context(|| format!("list frames in {}", args.images.display()))?;
    if paths.is_empty() {
        bail!(
            "no frames with extension {:?} in {}",
            extensions,
            args.images.display()
        );
    }
    info!(frames = paths.len(), dir = %args.images.display(), "frame source ready");

    let factory = default_encoder_factory().context("initialize encoder backend")?;
    let decoder: Arc<dyn FrameDecoder> = Arc::new(ImageFileDecoder);
    let outcome = run_grid(&spec, |key| {
        let source = FrameSource::from_paths(paths.clone(), Arc::clone(&decoder));
        run_pipeline(source, key, &settings, args.filter, factory.as_ref()).map(|run| run.result)
    });
    print_report(&outcome, &spec, &settings, false)
}

fn run_synthetic(args: &SyntheticArgs) -> Result<()> {
    if args.frames == 0 {
        bail!("--frames must be at least 1");
    }
    let settings = args.grid.settings()?;
    let spec = args.grid.grid()?;
    let factory = default_encoder_factory().context("initialize encoder backend")?;
    let outcome = run_grid(&spec, |key| {
        run_synthetic_cell(key, &settings, args.frames, args.warmup, factory.as_ref())
    });
    print_report(&outcome, &spec, &settings, true)
}

fn print_report(
    outcome: &GridOutcome,
    spec: &GridSpec,
    settings: &BenchSettings,
    with_latency: bool,
) -> Result<()> {
    info!(
        finished = outcome.results.len(),
        skipped = outcome.skipped(),
        failed = outcome.failed(),
        "grid complete"
    );
    let rows = aggregate(&outcome.results, settings.frame_rate, &spec.codecs)
        .context("aggregate results")?;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    render_markdown(&mut out, &rows, &outcome.failures, settings.frame_rate)
        .context("write report")?;
    if with_latency && !rows.is_empty() {
        render_latency_table(&mut out, &rows).context("write latency table")?;
    }
    out.flush().context("flush report")?;
    Ok(())
}
