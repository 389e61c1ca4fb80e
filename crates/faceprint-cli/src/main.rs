use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use faceprint_capture::{CaptureError, DirectorySource, FrameSource};
use faceprint_core::{CascadeDetector, FaceDetector, Frame, Pipeline};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;

mod config;
mod engine;

use config::Settings;
use engine::{spawn_analysis, DisplayEvent};

#[derive(Parser)]
#[command(name = "faceprint", about = "Enrol one face from a frame stream, then overlay recognition scores")]
struct Cli {
    /// TOML settings file; FACEPRINT_* variables override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// LBP cascade XML (overrides the configured path)
    #[arg(long, global = true)]
    cascade: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the enrol/recognize pipeline over a directory of frames
    Run {
        /// Directory of png/jpg/bmp frames, played in file-name order
        #[arg(long)]
        frames: PathBuf,
        /// Write annotated frames here as frame_NNNNNN.png
        #[arg(long)]
        out: Option<PathBuf>,
        /// Frame rate of the replayed stream
        #[arg(long)]
        fps: Option<u32>,
        /// Play the directory this many times
        #[arg(long, default_value_t = 1)]
        loops: usize,
    },
    /// Run only the face detector on one image
    Detect {
        image: PathBuf,
        /// Print regions as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let mut settings = Settings::load(cli.config.as_deref()).context("failed to load settings")?;
    if let Some(cascade) = cli.cascade {
        settings.cascade_path = cascade;
    }

    match cli.command {
        Commands::Run {
            frames,
            out,
            fps,
            loops,
        } => {
            if let Some(fps) = fps {
                settings.fps = fps;
                settings.validate()?;
            }
            run(settings, &frames, out, loops).await?;
        }
        Commands::Detect { image, json } => detect(&settings, &image, json)?,
        Commands::Config => {
            print!("{}", toml::to_string_pretty(&settings).context("failed to render settings")?);
        }
    }

    Ok(())
}

async fn run(settings: Settings, frames_dir: &Path, out: Option<PathBuf>, loops: usize) -> Result<()> {
    let pipeline = Pipeline::from_cascade_file(&settings.cascade_path, settings.pipeline.clone())
        .with_context(|| format!("failed to build pipeline from {}", settings.cascade_path.display()))?;
    let mut source = DirectorySource::open(frames_dir)?.looped(loops);

    if let Some(dir) = &out {
        std::fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    }

    let (display_tx, display_rx) = mpsc::unbounded_channel();
    let display = tokio::task::spawn_blocking(move || display_sink(display_rx, out));
    let engine = spawn_analysis(pipeline, display_tx, Handle::current())?;

    tracing::info!(
        frames = %frames_dir.display(),
        fps = settings.fps,
        enroll_target = settings.pipeline.enroll_target,
        "pipeline running"
    );

    let mut ticker = tokio::time::interval(Duration::from_secs_f64(1.0 / f64::from(settings.fps)));
    while let Some(frame) = read_frame(&mut source)? {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                break;
            }
        }
        if !engine.is_running() {
            break;
        }
        engine.submit(frame);
    }

    let stats = tokio::task::spawn_blocking(move || engine.finish()).await??;
    let written = display.await??;
    tracing::info!(
        processed = stats.processed,
        superseded = stats.superseded,
        written,
        "pipeline finished"
    );
    Ok(())
}

/// Pull the next frame on the current worker without stalling other tasks.
/// Image decoding blocks, so the worker is handed off for the duration.
fn read_frame<S: FrameSource>(source: &mut S) -> Result<Option<Frame>, CaptureError> {
    tokio::task::block_in_place(|| source.next_frame())
}

/// Display surface: prints status lines and writes annotated frames.
fn display_sink(mut rx: mpsc::UnboundedReceiver<DisplayEvent>, out: Option<PathBuf>) -> Result<usize> {
    let mut written = 0;
    while let Some(event) = rx.blocking_recv() {
        match event {
            DisplayEvent::Status(text) => println!("{text}"),
            DisplayEvent::Frame(frame) => {
                let Some(dir) = &out else { continue };
                let path = dir.join(format!("frame_{:06}.png", frame.sequence));
                frame
                    .image
                    .save(&path)
                    .with_context(|| format!("failed to write {}", path.display()))?;
                written += 1;
            }
        }
    }
    Ok(written)
}

fn detect(settings: &Settings, image_path: &Path, json: bool) -> Result<()> {
    let mut detector = CascadeDetector::load(&settings.cascade_path, settings.pipeline.detector.clone())
        .with_context(|| format!("failed to load cascade {}", settings.cascade_path.display()))?;
    let img = image::open(image_path).with_context(|| format!("failed to open {}", image_path.display()))?;
    let frame = Frame::from_dynamic(img, 0);
    let regions = detector.detect(&frame.grayscale())?;

    if json {
        println!("{}", serde_json::to_string_pretty(&regions)?);
    } else if regions.is_empty() {
        println!("no faces");
    } else {
        for r in &regions {
            println!("{} {} {}x{}", r.x, r.y, r.width, r.height);
        }
    }
    Ok(())
}
