//! clip_video - cut incident clips out of one video file

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use incident_clipper::batch::{output_dir_for, process_video};
use incident_clipper::config::parse_start_time;
use incident_clipper::detect::backend_from_config;
use incident_clipper::{AlertThrottle, ClipperConfig, FfmpegEncoder};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Video file to process (or stub://name for a synthetic source).
    video: PathBuf,
    /// Config file (JSON, or TOML with a .toml extension).
    #[arg(long, env = "CLIPPER_CONFIG")]
    config: Option<PathBuf>,
    /// Output base directory; artifacts go to <output-dir>/<video stem>.
    #[arg(long)]
    output_dir: Option<PathBuf>,
    /// Detector backend: tract | scripted.
    #[arg(long, default_value = "tract")]
    backend: String,
    /// Detection script for the scripted backend.
    #[arg(long)]
    script: Option<PathBuf>,
    /// Start time of frame 0 (YYYY-MM-DD HH:MM:SS). Overrides the file name.
    #[arg(long)]
    start_time: Option<String>,
    /// Minimum confidence for a detection to count.
    #[arg(long)]
    threshold: Option<f32>,
    /// Verbose logging.
    #[arg(long)]
    debug: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let mut cfg = ClipperConfig::load_from(args.config.as_deref())?;
    cfg.debug |= args.debug;

    let default_filter = if cfg.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    if let Some(dir) = args.output_dir {
        cfg.output_dir = dir;
    }
    if let Some(threshold) = args.threshold {
        cfg.confidence_threshold = threshold;
    }
    if let Some(raw) = args.start_time.as_deref() {
        cfg.video_start_time = Some(parse_start_time(raw)?);
    }
    cfg.validate()?;

    let stop = Arc::new(AtomicBool::new(false));
    let handler_stop = Arc::clone(&stop);
    ctrlc::set_handler(move || {
        handler_stop.store(true, Ordering::SeqCst);
    })
    .context("error setting Ctrl-C handler")?;

    let mut detector = backend_from_config(&args.backend, &cfg, args.script.as_deref())?;
    let encoder = FfmpegEncoder::new(cfg.encoder.program.clone(), cfg.encoder.timeout);
    let throttle = Arc::new(AlertThrottle::new(cfg.alert_interval));
    let output_root = output_dir_for(&args.video, &cfg.output_dir);

    let report = process_video(
        &args.video,
        &output_root,
        &cfg,
        detector.as_mut(),
        Box::new(encoder),
        throttle,
        Some(&stop),
    )?;

    for entry in &report.entries {
        println!("{}", serde_json::to_string(entry)?);
    }
    log::info!(
        "{} events saved under {} ({} failed)",
        report.events_materialized,
        output_root.display(),
        report.events_failed
    );
    Ok(())
}
