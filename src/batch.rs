//! Batch processing of video files.
//!
//! A fixed-size pool of worker threads drains a queue of videos. Every video
//! runs through its own session with its own detector, buffer and event
//! table; a failure (or panic) in one video is recorded in its outcome and
//! never affects the others. The alert throttle is the only shared state.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use anyhow::{anyhow, Context, Result};
use chrono::NaiveDateTime;
use regex::Regex;

use crate::clip::ClipEncoder;
use crate::config::ClipperConfig;
use crate::detect::DetectorBackend;
use crate::ingest::{FileConfig, FileSource};
use crate::session::{run_source, SessionReport, SessionSetup};
use crate::throttle::AlertThrottle;

/// Extension of the videos picked up by `list_videos`.
pub const VIDEO_EXTENSION: &str = "mp4";

fn start_time_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d{4}-\d{2}-\d{2}[_T ]?\d{2}-\d{2}-\d{2})").unwrap())
}

/// Recording start embedded in a file name such as
/// `2024-05-01_12-30-00_cam1.mp4` (also `T` or space separated).
pub fn start_time_from_filename(path: &Path) -> Option<NaiveDateTime> {
    let name = path.file_name()?.to_str()?;
    let matched = start_time_regex().find(name)?.as_str();
    let (date, time) = matched.split_at(10);
    let time = time.trim_start_matches(['_', 'T', ' ']);
    NaiveDateTime::parse_from_str(&format!("{} {}", date, time), "%Y-%m-%d %H-%M-%S").ok()
}

/// `<output_base>/<video stem>`.
pub fn output_dir_for(video: &Path, output_base: &Path) -> PathBuf {
    let stem = video
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "video".to_string());
    output_base.join(stem)
}

/// `.mp4` files directly inside `dir`, sorted by name.
pub fn list_videos(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read video dir {}", dir.display()))?;
    let mut videos = Vec::new();
    for entry in entries {
        let path = entry
            .with_context(|| format!("failed to list {}", dir.display()))?
            .path();
        let is_video = path.is_file()
            && path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case(VIDEO_EXTENSION));
        if is_video {
            videos.push(path);
        }
    }
    videos.sort();
    Ok(videos)
}

/// Start time for a video: the configured value, then the file name.
/// `None` lets the session use the processing start time.
pub fn resolve_start_time(video: &Path, cfg: &ClipperConfig) -> Option<NaiveDateTime> {
    cfg.video_start_time.or_else(|| start_time_from_filename(video))
}

/// Process one video file into `output_root`.
pub fn process_video(
    video: &Path,
    output_root: &Path,
    cfg: &ClipperConfig,
    detector: &mut dyn DetectorBackend,
    encoder: Box<dyn ClipEncoder>,
    throttle: Arc<AlertThrottle>,
    stop: Option<&AtomicBool>,
) -> Result<SessionReport> {
    let mut source = FileSource::new(FileConfig::for_path(video.to_string_lossy()))?;
    let setup = SessionSetup {
        video_start: resolve_start_time(video, cfg),
        output_root: output_root.to_path_buf(),
        encoder,
        throttle,
    };
    run_source(cfg, setup, &mut source, detector, stop)
        .with_context(|| format!("failed to process {}", video.display()))
}

/// Result of one video in a batch.
#[derive(Debug)]
pub struct BatchOutcome {
    pub video: PathBuf,
    pub output_root: PathBuf,
    pub result: Result<SessionReport>,
}

impl BatchOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Builds the per-video detector and encoder.
pub trait WorkerFactory: Sync {
    fn detector(&self, cfg: &ClipperConfig) -> Result<Box<dyn DetectorBackend>>;
    fn encoder(&self, cfg: &ClipperConfig) -> Box<dyn ClipEncoder>;
}

/// Process `videos` with `cfg.workers` threads. Outcomes are returned in
/// input order. Once `stop` is raised no further video is started; those
/// still queued get an `Err` outcome and no output directory.
pub fn run_batch(
    videos: Vec<PathBuf>,
    output_base: &Path,
    cfg: &ClipperConfig,
    factory: &dyn WorkerFactory,
    throttle: Arc<AlertThrottle>,
    stop: Option<&AtomicBool>,
) -> Vec<BatchOutcome> {
    let total = videos.len();
    if total == 0 {
        return Vec::new();
    }
    let workers = cfg.workers.clamp(1, total);
    log::info!("batch: {} videos, {} workers", total, workers);

    let queue: Mutex<VecDeque<(usize, PathBuf)>> =
        Mutex::new(videos.into_iter().enumerate().collect());
    let results: Mutex<Vec<Option<BatchOutcome>>> =
        Mutex::new((0..total).map(|_| None).collect());

    std::thread::scope(|scope| {
        for worker in 0..workers {
            let queue = &queue;
            let results = &results;
            let throttle = &throttle;
            scope.spawn(move || loop {
                if stop_requested(stop) {
                    break;
                }
                let next = queue
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .pop_front();
                let Some((slot, video)) = next else {
                    break;
                };
                log::debug!("batch worker {}: {}", worker, video.display());
                let output_root = output_dir_for(&video, output_base);
                let result = catch_unwind(AssertUnwindSafe(|| {
                    let mut detector = factory.detector(cfg)?;
                    process_video(
                        &video,
                        &output_root,
                        cfg,
                        detector.as_mut(),
                        factory.encoder(cfg),
                        Arc::clone(throttle),
                        stop,
                    )
                }))
                .unwrap_or_else(|_| Err(anyhow!("worker panicked while processing video")));

                if let Err(e) = &result {
                    log::error!("{}: {:#}", video.display(), e);
                }
                results.lock().unwrap_or_else(|poisoned| poisoned.into_inner())[slot] =
                    Some(BatchOutcome {
                        video,
                        output_root,
                        result,
                    });
            });
        }
    });

    let mut results = results
        .into_inner()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    let skipped = queue
        .into_inner()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    if !skipped.is_empty() {
        log::warn!("batch: stop requested, {} videos not started", skipped.len());
    }
    for (slot, video) in skipped {
        results[slot] = Some(BatchOutcome {
            output_root: output_dir_for(&video, output_base),
            result: Err(anyhow!("skipped: stop requested before processing")),
            video,
        });
    }
    results.into_iter().flatten().collect()
}

fn stop_requested(stop: Option<&AtomicBool>) -> bool {
    stop.is_some_and(|flag| flag.load(Ordering::SeqCst))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, s)
            .unwrap()
    }

    #[test]
    fn start_time_separators() {
        let expected = at(2024, 5, 1, 12, 30, 5);
        for name in [
            "2024-05-01_12-30-05_cam1.mp4",
            "cam1_2024-05-01T12-30-05.mp4",
            "2024-05-01 12-30-05.mp4",
            "2024-05-0112-30-05.mp4",
        ] {
            assert_eq!(
                start_time_from_filename(Path::new(name)),
                Some(expected),
                "{}",
                name
            );
        }
    }

    #[test]
    fn start_time_absent_or_invalid() {
        assert_eq!(start_time_from_filename(Path::new("camera.mp4")), None);
        assert_eq!(
            start_time_from_filename(Path::new("2024-13-45_99-99-99.mp4")),
            None
        );
    }

    #[test]
    fn start_time_uses_file_name_only() {
        let path = Path::new("/videos/2020-01-01_00-00-00/cam.mp4");
        assert_eq!(start_time_from_filename(path), None);
    }

    #[test]
    fn output_dir_is_stem_under_base() {
        assert_eq!(
            output_dir_for(Path::new("/in/2024-05-01_12-00-00_cam1.mp4"), Path::new("/out")),
            PathBuf::from("/out/2024-05-01_12-00-00_cam1")
        );
    }

    #[test]
    fn lists_only_mp4_sorted() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.mp4", "a.MP4", "notes.txt", "c.mkv"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        std::fs::create_dir(dir.path().join("d.mp4")).unwrap();
        let videos = list_videos(dir.path()).unwrap();
        let names: Vec<_> = videos
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.MP4", "b.mp4"]);
    }

    #[test]
    fn configured_start_time_wins_over_file_name() {
        let named = Path::new("2024-05-01_12-30-05.mp4");
        assert_eq!(
            resolve_start_time(named, &ClipperConfig::default()),
            Some(at(2024, 5, 1, 12, 30, 5))
        );
        assert_eq!(resolve_start_time(Path::new("cam.mp4"), &ClipperConfig::default()), None);

        let cfg = ClipperConfig {
            video_start_time: Some(at(2023, 1, 1, 0, 0, 0)),
            ..ClipperConfig::default()
        };
        assert_eq!(resolve_start_time(named, &cfg), Some(at(2023, 1, 1, 0, 0, 0)));
    }
}
