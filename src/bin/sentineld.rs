//! sentineld - Crowd Sentinel daemon
//!
//! This daemon:
//! 1. Loads configuration (file from --config / SENTINEL_CONFIG, then env)
//! 2. Opens the configured frame source, inference backend and stores
//! 3. Runs the detection pipeline until the stream ends or Ctrl-C
//! 4. Prints a run summary as JSON on stdout

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;

use crowd_sentinel::detect::backend_from_settings;
use crowd_sentinel::preview::FilePreview;
use crowd_sentinel::publish::publisher_from_settings;
use crowd_sentinel::{open_source, Pipeline, SentinelConfig};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// JSON or TOML config file.
    #[arg(long, env = "SENTINEL_CONFIG")]
    config: Option<PathBuf>,
    /// Stop after reading this many frames.
    #[arg(long)]
    max_frames: Option<u64>,
    /// Override the frame source (stub://name, http(s)://…, v4l2://N, a video file or a directory).
    #[arg(long)]
    source: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = SentinelConfig::load_from(args.config.as_deref())?;
    if let Some(source) = args.source {
        cfg.source.url = source;
    }
    if args.max_frames.is_some() {
        cfg.pipeline.max_frames = args.max_frames;
    }

    log::info!(
        "sentineld {} starting: source={} skip_interval={} person_threshold={} bright_threshold={} min_area={}",
        env!("CARGO_PKG_VERSION"),
        cfg.source.url,
        cfg.pipeline.skip_interval,
        cfg.pipeline.person_threshold,
        cfg.pipeline.bright_threshold,
        cfg.pipeline.min_area
    );

    let source = open_source(&cfg.source)?;
    let backend = backend_from_settings(&cfg.inference)?;
    let publisher = publisher_from_settings(&cfg.publish)?;

    let mut pipeline = Pipeline::new(source, backend, publisher, cfg.pipeline.clone())?;
    if let Some(preview) = &cfg.preview {
        log::info!(
            "local preview at {} (every {:?} at most)",
            preview.path.display(),
            preview.min_interval
        );
        pipeline = pipeline.with_preview(Box::new(FilePreview::new(
            &preview.path,
            preview.min_interval,
            cfg.pipeline.jpeg_quality,
        )));
    }

    let stop = pipeline.stop_handle();
    ctrlc::set_handler(move || {
        log::info!("stop requested");
        stop.request_stop();
    })
    .map_err(|e| anyhow!("failed to install Ctrl-C handler: {}", e))?;

    let summary = pipeline.run()?;
    log::info!(
        "sentineld stopped ({:?}): frames={} cycles={} publishes={} publish_failures={} detection_failures={}",
        summary.reason,
        summary.stats.frames_read,
        summary.stats.cycles,
        summary.stats.publishes,
        summary.stats.publish_failures,
        summary.stats.detection_failures
    );
    let json = serde_json::to_string_pretty(&summary).context("serialize run summary")?;
    println!("{}", json);
    Ok(())
}
