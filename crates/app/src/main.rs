use std::{path::PathBuf, sync::Arc, time::Duration};

use clap::{Parser, Subcommand};
use starfield_stream_core::{
    AppConfig, FrameReport, FrameScheduler, HeadlessScene, LinearObserver, MeshLibrary,
    SimulatedSoundEngine,
};
use tracing_subscriber::EnvFilter;

fn main() -> starfield_stream_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            frames,
            fps,
            speed,
        } => run_headless(config.as_ref(), frames, fps, speed),
        Commands::Config { output } => write_default_config(&output),
    }
}

fn run_headless(
    config_path: Option<&PathBuf>,
    frames: u32,
    fps: f32,
    speed: f32,
) -> starfield_stream_core::Result<()> {
    let config = match config_path {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };
    tracing::info!(?config_path, frames, fps, speed, "starting headless run");

    let shutdown_timeout = Duration::from_millis(config.worker.shutdown_timeout_ms);
    let frame_interval = Duration::from_secs_f32(1.0 / fps.max(1.0));
    let mut scheduler = FrameScheduler::launch(
        config,
        HeadlessScene::new(),
        SimulatedSoundEngine::new(),
        LinearObserver::forward(speed),
        Arc::new(MeshLibrary::with_glyphs()),
    )?;

    let mut totals = FrameReport::default();
    for _ in 0..frames {
        let report = scheduler.tick(frame_interval.as_secs_f32());
        totals.promoted += report.promoted;
        totals.evicted += report.evicted;
        totals.requested += report.requested;
        totals.failed += report.failed;
        totals.reclaimed += report.reclaimed;
        totals.emissions_started += report.emissions_started;
        totals.emissions_skipped += report.emissions_skipped;
        totals.live = report.live;
        totals.in_flight = report.in_flight;
        totals.pending = report.pending;
        totals.queued = report.queued;
        // The worker runs in real time; pace the simulated frames to match.
        std::thread::sleep(frame_interval);
    }

    tracing::info!(
        live = totals.live,
        promoted = totals.promoted,
        evicted = totals.evicted,
        emissions = totals.emissions_started,
        skipped = totals.emissions_skipped,
        voices = ?scheduler.manager().pool().available_counts(),
        drum_rate = ?scheduler.manager().drum().map(|drum| drum.rate()),
        "run complete"
    );
    let summary = scheduler.shutdown(shutdown_timeout);
    println!("{}", summary_line(&totals, summary.worker_joined));
    Ok(())
}

fn summary_line(totals: &FrameReport, worker_joined: bool) -> String {
    format!(
        "promoted={} evicted={} requested={} failed={} emissions={} live={} worker_joined={}",
        totals.promoted,
        totals.evicted,
        totals.requested,
        totals.failed,
        totals.emissions_started,
        totals.live,
        worker_joined
    )
}

fn write_default_config(output: &PathBuf) -> starfield_stream_core::Result<()> {
    tracing::info!(?output, "writing default configuration");
    std::fs::write(output, AppConfig::default().to_json_pretty()?)?;
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Streaming starfield tunnel with spatial audio", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Drive the streaming pipeline headlessly for a number of frames.
    Run {
        /// Optional JSON configuration file; defaults are used otherwise.
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Number of frames to simulate.
        #[arg(short, long, default_value_t = 600)]
        frames: u32,
        /// Simulated frame rate.
        #[arg(long, default_value_t = 60.0)]
        fps: f32,
        /// Observer speed along the tunnel, in units per second.
        #[arg(short, long, default_value_t = 6.25)]
        speed: f32,
    },
    /// Write the default configuration as JSON.
    Config {
        /// Output path for the configuration file.
        output: PathBuf,
    },
}
