use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use std::time::{Duration, Instant};

use clap::Parser;

use faceoverlay_core::detection::domain::detection_engine::share;
use faceoverlay_core::detection::infrastructure::model_resolver::{ModelLocation, ProgressFn};
use faceoverlay_core::detection::infrastructure::onnx_face_engine::OnnxFaceEngine;
use faceoverlay_core::overlay::domain::overlay_renderer::{OverlayRenderer, OverlayStyle};
use faceoverlay_core::overlay::infrastructure::raster_surface::{
    load_font, system_font, OverlayView, RasterSurface,
};
use faceoverlay_core::pipeline::cycle_logger::StatsCycleLogger;
use faceoverlay_core::pipeline::player_shell::{PlayerConfig, PlayerShell};
use faceoverlay_core::shared::constants::{DEFAULT_CONFIDENCE, REQUIRED_MODELS};
use faceoverlay_core::shared::geometry::Size;
use faceoverlay_core::video::infrastructure::ffmpeg_frame_source::FfmpegMediaOpener;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Play a video headlessly with the live face overlay running, and report
/// how the overlay kept up.
#[derive(Parser, Debug)]
#[command(name = "faceoverlay")]
struct Cli {
    /// Input video file.
    input: PathBuf,

    /// Overlay size as WIDTHxHEIGHT.
    #[arg(long, default_value = "640x360")]
    display: Size,

    /// Milliseconds between detection cycles.
    #[arg(long, default_value = "100")]
    interval_ms: u64,

    /// Face detection confidence threshold (0.0-1.0).
    #[arg(long, default_value_t = DEFAULT_CONFIDENCE)]
    confidence: f64,

    /// Stop after this many seconds instead of at the end of the video.
    #[arg(long)]
    duration_secs: Option<f64>,

    /// Save every presented overlay as a PNG into this directory.
    #[arg(long)]
    snapshot_dir: Option<PathBuf>,

    /// Directory checked for model files before the download cache.
    #[arg(long)]
    model_dir: Option<PathBuf>,

    /// TrueType/OpenType font for score labels (default: a system font).
    #[arg(long)]
    label_font: Option<PathBuf>,
}

fn main() {
    env_logger::init();

    if let Err(e) = run() {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    validate(&cli)?;

    let location = model_location(&cli);
    prefetch_models(&location)?;
    let engine = OnnxFaceEngine::new(location).with_confidence(cli.confidence);

    let surface = overlay_surface(&cli)?;
    let view = surface.view();
    let renderer = OverlayRenderer::new(Box::new(surface), OverlayStyle::default());
    let config = PlayerConfig {
        display: cli.display,
        tick_interval: Duration::from_millis(cli.interval_ms),
    };

    let mut shell = PlayerShell::new(
        Box::new(FfmpegMediaOpener),
        share(Box::new(engine)),
        renderer,
        config,
    )
    .with_logger_factory(|| Box::new(StatsCycleLogger::new()));

    if let Some(dir) = &cli.snapshot_dir {
        fs::create_dir_all(dir)?;
    }

    shell.choose_file(&cli.input)?;
    shell.toggle_play_pause();

    let limit = cli.duration_secs.map(Duration::from_secs_f64);
    watch(&shell, &view, limit, cli.snapshot_dir.as_deref())?;
    eprintln!();

    if let Some(stats) = shell.stats() {
        log::info!(
            "{} cycles drawn, {} ticks dropped, {} cycles skipped",
            stats.cycles_drawn,
            stats.ticks_dropped,
            stats.cycles_skipped
        );
        if let Some(e) = &stats.last_error {
            log::warn!("Last overlay error: {e}");
        }
    }
    shell.unload();
    Ok(())
}

/// Polls the player until playback ends or `limit` passes, saving each new
/// overlay generation when a snapshot directory is given.
fn watch(
    shell: &PlayerShell,
    view: &OverlayView,
    limit: Option<Duration>,
    snapshot_dir: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let start = Instant::now();
    let mut saved_generation = view.generation();

    loop {
        std::thread::sleep(POLL_INTERVAL);
        let elapsed = start.elapsed();

        if let Some(dir) = snapshot_dir {
            let generation = view.generation();
            if generation != saved_generation {
                view.save_png(&snapshot_path(dir, generation))?;
                saved_generation = generation;
            }
        }

        let drawn = shell.stats().map_or(0, |s| s.cycles_drawn);
        eprint!(
            "\rPlaying {:6.1}s  {:?}  {drawn} cycles drawn",
            elapsed.as_secs_f64(),
            shell.state()
        );

        if limit.is_some_and(|limit| elapsed >= limit) {
            return Ok(());
        }
        if !shell.is_playing() {
            log::info!("Playback finished");
            return Ok(());
        }
    }
}

/// Overlay surface labelled with the given font, else a system font.
fn overlay_surface(cli: &Cli) -> Result<RasterSurface, Box<dyn std::error::Error>> {
    let surface = RasterSurface::new(cli.display);
    let font = match &cli.label_font {
        Some(path) => Some(load_font(path)?),
        None => system_font(),
    };
    Ok(match font {
        Some(font) => surface.with_label_font(font),
        None => {
            log::warn!("No label font found; score labels are disabled");
            surface
        }
    })
}

fn snapshot_path(dir: &Path, generation: u64) -> PathBuf {
    dir.join(format!("overlay_{generation:06}.png"))
}

fn model_location(cli: &Cli) -> ModelLocation {
    match &cli.model_dir {
        Some(dir) => ModelLocation::default().with_bundled_dir(dir),
        None => ModelLocation::default(),
    }
}

/// Downloads missing models up front so progress is visible; the engine
/// then finds them in the cache.
fn prefetch_models(location: &ModelLocation) -> Result<(), Box<dyn std::error::Error>> {
    log::info!("Resolving models: {}", REQUIRED_MODELS.join(", "));
    let progress: ProgressFn = Box::new(download_progress);
    location.resolve_all(REQUIRED_MODELS, Some(&*progress))?;
    eprintln!();
    Ok(())
}

fn validate(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    if !cli.input.exists() {
        return Err(format!("Input file not found: {}", cli.input.display()).into());
    }
    if cli.display.is_empty() {
        return Err(format!("Display size must be non-zero, got {}", cli.display).into());
    }
    if cli.interval_ms == 0 {
        return Err("Interval must be at least 1 ms, got 0".into());
    }
    if !(0.0..=1.0).contains(&cli.confidence) {
        return Err(format!(
            "Confidence must be between 0.0 and 1.0, got {}",
            cli.confidence
        )
        .into());
    }
    if let Some(secs) = cli.duration_secs {
        if !(secs.is_finite() && secs > 0.0) {
            return Err(format!("Duration must be a positive number of seconds, got {secs}").into());
        }
    }
    if let Some(dir) = &cli.model_dir {
        if !dir.is_dir() {
            return Err(format!("Model directory not found: {}", dir.display()).into());
        }
    }
    if let Some(font) = &cli.label_font {
        if !font.is_file() {
            return Err(format!("Label font not found: {}", font.display()).into());
        }
    }
    Ok(())
}

fn download_progress(downloaded: u64, total: u64) {
    if total > 0 {
        let pct = (downloaded as f64 / total as f64 * 100.0) as u32;
        eprint!("\rDownloading face detection model... {pct}%");
    } else {
        eprint!("\rDownloading face detection model... {downloaded} bytes");
    }
}
