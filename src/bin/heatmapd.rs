//! heatmapd - vehicle density heatmap daemon
//!
//! Samples the configured stream, detects vehicles, and every N points writes
//! and publishes a heatmap PNG plus a CSV of the points behind it.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use heatmapper::{PipelineController, PipelineSettings, ShutdownSignal, SystemClock};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// JSON config file. Environment variables override its values.
    #[arg(long, env = "HEATMAPPER_CONFIG")]
    config: Option<PathBuf>,
    /// Override the stream location (file path, URL, or stub://name).
    #[arg(long)]
    stream: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut settings = PipelineSettings::load_from(args.config.as_deref())?;
    if let Some(stream) = args.stream {
        settings.stream_location = stream;
    }
    log::info!(
        "heatmapd: output={}, storage={:?}:{}, shutdown policy={}",
        settings.local_output_dir.display(),
        settings.storage.backend,
        settings.storage.container,
        settings.shutdown_policy
    );

    let mut pipeline = PipelineController::open(&settings, Arc::new(SystemClock))?;

    let shutdown = ShutdownSignal::new();
    shutdown.install_ctrlc()?;

    let stats = pipeline.run(&shutdown)?;
    log::info!(
        "heatmapd: processed {} frames, {} detections, {} heatmaps ({} publish failures)",
        stats.frames_processed,
        stats.detections,
        stats.emissions,
        stats.publish_failures
    );
    Ok(())
}
