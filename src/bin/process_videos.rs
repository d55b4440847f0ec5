//! process_videos - clip every .mp4 in a directory with a fixed worker pool

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use incident_clipper::batch::{list_videos, run_batch, WorkerFactory};
use incident_clipper::detect::backend_from_config;
use incident_clipper::{
    AlertThrottle, ClipEncoder, ClipperConfig, DetectorBackend, FfmpegEncoder,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Directory holding the videos.
    #[arg(long, default_value = "videos")]
    video_dir: PathBuf,
    /// Output base; each video gets <output-base>/<video stem>.
    #[arg(long)]
    output_base: Option<PathBuf>,
    /// Config file (JSON, or TOML with a .toml extension).
    #[arg(long, env = "CLIPPER_CONFIG")]
    config: Option<PathBuf>,
    /// Worker threads (defaults to the configured value).
    #[arg(long)]
    workers: Option<usize>,
    /// Detector backend: tract | scripted.
    #[arg(long, default_value = "tract")]
    backend: String,
    /// Detection script for the scripted backend (applied to every video).
    #[arg(long)]
    script: Option<PathBuf>,
    /// Verbose logging.
    #[arg(long)]
    debug: bool,
}

struct CliWorkerFactory {
    backend: String,
    script: Option<PathBuf>,
}

impl WorkerFactory for CliWorkerFactory {
    fn detector(&self, cfg: &ClipperConfig) -> Result<Box<dyn DetectorBackend>> {
        backend_from_config(&self.backend, cfg, self.script.as_deref())
    }

    fn encoder(&self, cfg: &ClipperConfig) -> Box<dyn ClipEncoder> {
        Box::new(FfmpegEncoder::new(
            cfg.encoder.program.clone(),
            cfg.encoder.timeout,
        ))
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let mut cfg = ClipperConfig::load_from(args.config.as_deref())?;
    cfg.debug |= args.debug;

    let default_filter = if cfg.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    if let Some(workers) = args.workers {
        cfg.workers = workers;
    }
    if let Some(base) = args.output_base {
        cfg.output_dir = base;
    }
    cfg.validate()?;

    let videos = list_videos(&args.video_dir)?;
    if videos.is_empty() {
        log::warn!("no .mp4 files in {}", args.video_dir.display());
        return Ok(());
    }

    let stop = Arc::new(AtomicBool::new(false));
    let handler_stop = Arc::clone(&stop);
    ctrlc::set_handler(move || {
        handler_stop.store(true, Ordering::SeqCst);
    })
    .context("error setting Ctrl-C handler")?;

    let factory = CliWorkerFactory {
        backend: args.backend,
        script: args.script,
    };
    let throttle = Arc::new(AlertThrottle::new(cfg.alert_interval));
    let outcomes = run_batch(
        videos,
        &cfg.output_dir,
        &cfg,
        &factory,
        throttle,
        Some(&stop),
    );

    let mut failed = 0usize;
    for outcome in &outcomes {
        match &outcome.result {
            Ok(report) => {
                for entry in &report.entries {
                    println!("{}", serde_json::to_string(entry)?);
                }
                log::info!(
                    "{}: {} events -> {}",
                    outcome.video.display(),
                    report.events_materialized,
                    outcome.output_root.display()
                );
            }
            Err(_) => failed += 1,
        }
    }

    if failed > 0 {
        return Err(anyhow!("{} of {} videos failed", failed, outcomes.len()));
    }
    Ok(())
}
