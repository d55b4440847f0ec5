use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use incident_clipper::batch::{run_batch, WorkerFactory};
use incident_clipper::{
    AlertThrottle, ClipEncoder, ClipperConfig, CommandOutcome, CommandStatus, Detection,
    DetectorBackend, Frame, ScriptedBackend,
};

struct PlaceholderEncoder;

impl ClipEncoder for PlaceholderEncoder {
    fn encode(
        &self,
        _frames: &[&Frame],
        _fps: f64,
        _raw_path: &Path,
        output_path: &Path,
    ) -> CommandOutcome {
        std::fs::write(output_path, b"mp4").unwrap();
        CommandOutcome {
            status: CommandStatus::Success,
            exit_code: Some(0),
            output_path: output_path.to_path_buf(),
            detail: String::new(),
        }
    }
}

/// Every video sees one theft around frame 10.
struct TestFactory;

impl WorkerFactory for TestFactory {
    fn detector(&self, _cfg: &ClipperConfig) -> Result<Box<dyn DetectorBackend>> {
        Ok(Box::new(
            ScriptedBackend::new().span(10..=20, Detection::new("theft", 0.95)),
        ))
    }

    fn encoder(&self, _cfg: &ClipperConfig) -> Box<dyn ClipEncoder> {
        Box::new(PlaceholderEncoder)
    }
}

fn config(workers: usize) -> ClipperConfig {
    ClipperConfig {
        workers,
        merge_gap_seconds: 3.0,
        ..ClipperConfig::default()
    }
}

#[test]
fn each_video_gets_its_own_output_dir() {
    let out = tempfile::tempdir().unwrap();
    let videos = vec![
        PathBuf::from("stub://cam1"),
        PathBuf::from("stub://cam2"),
        PathBuf::from("stub://cam3"),
    ];
    let throttle = Arc::new(AlertThrottle::disabled());

    let outcomes = run_batch(videos, out.path(), &config(2), &TestFactory, throttle, None);

    assert_eq!(outcomes.len(), 3);
    for (outcome, name) in outcomes.iter().zip(["cam1", "cam2", "cam3"]) {
        let report = outcome.result.as_ref().expect("video processed");
        assert_eq!(outcome.output_root, out.path().join(name));
        assert_eq!(report.frames_processed, 300);
        assert_eq!(report.events_materialized, 1);
        assert_eq!(report.entries[0].clip_index, 0);
        assert!(out.path().join(name).join("events.jsonl").exists());
    }
}

#[test]
fn failing_video_does_not_affect_others() {
    let out = tempfile::tempdir().unwrap();
    let videos = vec![
        PathBuf::from("stub://good"),
        out.path().join("does-not-exist.mp4"),
        PathBuf::from("rtsp://camera/stream"),
        PathBuf::from("stub://also-good"),
    ];
    let throttle = Arc::new(AlertThrottle::disabled());

    let outcomes = run_batch(videos, out.path(), &config(4), &TestFactory, throttle, None);

    let ok: Vec<bool> = outcomes.iter().map(|o| o.is_success()).collect();
    assert_eq!(ok, vec![true, false, false, true]);
}

#[test]
fn alert_throttle_is_shared_across_workers() {
    let out = tempfile::tempdir().unwrap();
    let videos = (0..4)
        .map(|i| PathBuf::from(format!("stub://cam{}", i)))
        .collect();
    let throttle = Arc::new(AlertThrottle::new(Duration::from_secs(3600)));

    let outcomes = run_batch(videos, out.path(), &config(4), &TestFactory, throttle, None);

    let entries: Vec<_> = outcomes
        .iter()
        .flat_map(|o| o.result.as_ref().unwrap().entries.iter())
        .collect();
    assert_eq!(entries.len(), 4);
    assert_eq!(entries.iter().filter(|e| e.alert).count(), 1);
}

/// Counts the detectors it hands out.
#[derive(Default)]
struct CountingFactory {
    built: AtomicUsize,
}

impl WorkerFactory for CountingFactory {
    fn detector(&self, cfg: &ClipperConfig) -> Result<Box<dyn DetectorBackend>> {
        self.built.fetch_add(1, Ordering::SeqCst);
        TestFactory.detector(cfg)
    }

    fn encoder(&self, cfg: &ClipperConfig) -> Box<dyn ClipEncoder> {
        TestFactory.encoder(cfg)
    }
}

#[test]
fn stop_before_start_skips_every_video() {
    let out = tempfile::tempdir().unwrap();
    let videos = (0..5)
        .map(|i| PathBuf::from(format!("stub://cam{}", i)))
        .collect();
    let factory = CountingFactory::default();
    let stop = AtomicBool::new(true);

    let outcomes = run_batch(
        videos,
        out.path(),
        &config(1),
        &factory,
        Arc::new(AlertThrottle::disabled()),
        Some(&stop),
    );

    assert_eq!(factory.built.load(Ordering::SeqCst), 0);
    assert_eq!(outcomes.len(), 5);
    assert!(outcomes.iter().all(|o| !o.is_success()));
    assert!(outcomes.iter().all(|o| !o.output_root.exists()));
    assert_eq!(std::fs::read_dir(out.path()).unwrap().count(), 0);
}

#[test]
fn empty_batch_is_a_no_op() {
    let out = tempfile::tempdir().unwrap();
    let outcomes = run_batch(
        Vec::new(),
        out.path(),
        &config(4),
        &TestFactory,
        Arc::new(AlertThrottle::disabled()),
        None,
    );
    assert!(outcomes.is_empty());
}
