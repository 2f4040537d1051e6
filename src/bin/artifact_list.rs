//! artifact_list - list published artifacts, newest first
//!
//! Reads the same storage settings as heatmapd and prints one key per line.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use heatmapper::artifact::HEATMAP_PREFIX;
use heatmapper::{default_extension, latest_first, open_publisher, with_extension, PipelineSettings};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// JSON config file. Environment variables override its values.
    #[arg(long, env = "HEATMAPPER_CONFIG")]
    config: Option<PathBuf>,
    /// Key prefix to list.
    #[arg(long, default_value = HEATMAP_PREFIX)]
    prefix: String,
    /// Only keys with this extension. Defaults to `.png` under `heatmaps/`
    /// and `.csv` under `detections/`; pass an empty string to list everything.
    #[arg(long)]
    ext: Option<String>,
    /// Print at most this many keys.
    #[arg(long)]
    limit: Option<usize>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();
    let storage = PipelineSettings::load_storage(args.config.as_deref())?;
    let publisher = open_publisher(&storage)?;

    let mut keys = publisher.list(&args.prefix)?;
    if let Some(ext) = args.ext.as_deref().or_else(|| default_extension(&args.prefix)) {
        keys = with_extension(keys, ext);
    }
    let keys = latest_first(keys);
    if keys.is_empty() {
        log::warn!("no artifacts under '{}'", args.prefix);
    }
    for key in keys.iter().take(args.limit.unwrap_or(usize::MAX)) {
        println!("{}", key);
    }
    Ok(())
}
