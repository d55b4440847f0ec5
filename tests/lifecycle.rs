//! End-to-end lifecycle scenarios: source -> detector -> engine -> clips.
//!
//! The encoder is replaced by a fake that records the frame indices it is
//! handed, so no ffmpeg binary is needed.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use chrono::NaiveDate;

use incident_clipper::ingest::DecodedFrame;
use incident_clipper::{
    run_source, AlertThrottle, ClipEncoder, ClipperConfig, CommandOutcome, CommandStatus,
    Detection, Frame, FrameSource, MemorySource, RawLabel, ScriptedBackend, SessionReport,
    SessionSetup,
};

type Calls = Arc<Mutex<Vec<Vec<u64>>>>;

struct FakeEncoder {
    calls: Calls,
}

impl ClipEncoder for FakeEncoder {
    fn encode(
        &self,
        frames: &[&Frame],
        _fps: f64,
        _raw_path: &Path,
        output_path: &Path,
    ) -> CommandOutcome {
        self.calls
            .lock()
            .unwrap()
            .push(frames.iter().map(|f| f.index()).collect());
        std::fs::write(output_path, b"mp4").unwrap();
        CommandOutcome {
            status: CommandStatus::Success,
            exit_code: Some(0),
            output_path: output_path.to_path_buf(),
            detail: String::new(),
        }
    }
}

/// fps=10: base 5s = 50 frames, gap 3s = 30 frames, buffer 10s = 100
/// frames, padding 1s = 10 frames.
fn config() -> ClipperConfig {
    ClipperConfig {
        merge_gap_seconds: 3.0,
        max_buffer_seconds: 10.0,
        alert_interval: std::time::Duration::ZERO,
        ..ClipperConfig::default()
    }
}

fn run(
    cfg: &ClipperConfig,
    root: &Path,
    source: &mut dyn FrameSource,
    detector: ScriptedBackend,
    stop: Option<&AtomicBool>,
) -> (SessionReport, Vec<Vec<u64>>) {
    let calls: Calls = Arc::new(Mutex::new(Vec::new()));
    let setup = SessionSetup {
        video_start: Some(
            NaiveDate::from_ymd_opt(2024, 5, 1)
                .unwrap()
                .and_hms_opt(12, 0, 0)
                .unwrap(),
        ),
        output_root: root.to_path_buf(),
        encoder: Box::new(FakeEncoder {
            calls: Arc::clone(&calls),
        }),
        throttle: Arc::new(AlertThrottle::new(cfg.alert_interval)),
    };
    let mut detector = detector;
    let report = run_source(cfg, setup, source, &mut detector, stop).expect("run source");
    let calls = calls.lock().unwrap().clone();
    (report, calls)
}

fn theft(confidence: f32) -> Detection {
    Detection::new("theft", confidence)
}

#[test]
fn continuous_detection_ends_after_merge_gap_and_clamps_padding() {
    let dir = tempfile::tempdir().unwrap();
    let mut source = MemorySource::solid(120, 8, 6, 10.0);
    let detector = ScriptedBackend::new().span(0..=20, theft(0.95));

    let (report, calls) = run(&config(), dir.path(), &mut source, detector, None);

    assert_eq!(report.frames_processed, 120);
    assert_eq!(report.events_materialized, 1);
    assert_eq!(calls.len(), 1);
    // Ends at frame 51 (51 - 20 > 30); span [0-10, 70+10) clamped to the
    // frames buffered at that point, 0..=51.
    assert_eq!(calls[0], (0..=51).collect::<Vec<_>>());

    let entry = &report.entries[0];
    assert_eq!(entry.kind, "theft");
    assert_eq!(entry.timestamp, "2024-05-01T12-00-00");
    assert_eq!(
        entry.clip_url,
        "http://localhost:8000/clips/2024-05-01T12-00-00_theft_clip_0.mp4"
    );
    assert!(dir
        .path()
        .join("captures/2024-05-01T12-00-00_theft_capture_0.jpg")
        .exists());
}

#[test]
fn detections_within_merge_gap_form_one_event() {
    let dir = tempfile::tempdir().unwrap();
    let mut source = MemorySource::solid(150, 8, 6, 10.0);
    let detector = ScriptedBackend::new()
        .at(0, theft(0.95))
        .at(25, theft(0.97));

    let (report, calls) = run(&config(), dir.path(), &mut source, detector, None);

    assert_eq!(report.events_materialized, 1);
    // End frame is at least 25 + 50; padded end is 85, and the event ends
    // at frame 56 so the buffer holds 0..=56.
    assert_eq!(calls[0].first(), Some(&0));
    assert_eq!(calls[0].last(), Some(&56));
    assert_eq!(report.entries[0].max_confidence, 0.97);
}

#[test]
fn detections_beyond_merge_gap_form_two_events() {
    let dir = tempfile::tempdir().unwrap();
    let mut source = MemorySource::solid(150, 8, 6, 10.0);
    let detector = ScriptedBackend::new()
        .at(0, theft(0.95))
        .at(40, theft(0.95));

    let (report, calls) = run(&config(), dir.path(), &mut source, detector, None);

    assert_eq!(report.events_materialized, 2);
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].first(), Some(&0));
    assert_eq!(calls[1].first(), Some(&30));
    let indices: Vec<u64> = report.entries.iter().map(|e| e.clip_index).collect();
    assert_eq!(indices, vec![0, 1]);
}

#[test]
fn sub_threshold_and_untracked_labels_never_open_events() {
    let dir = tempfile::tempdir().unwrap();
    let mut source = MemorySource::solid(60, 8, 6, 10.0);
    let detector = ScriptedBackend::new()
        .span(0..=30, theft(0.89))
        .span(0..=30, Detection::new("person", 0.99))
        .span(0..=30, Detection::new(RawLabel::ClassIndex(7), 0.99));

    let (report, calls) = run(&config(), dir.path(), &mut source, detector, None);

    assert_eq!(report.events_materialized, 0);
    assert_eq!(report.events_failed, 0);
    assert!(calls.is_empty());
}

#[test]
fn labels_normalize_by_substring() {
    let dir = tempfile::tempdir().unwrap();
    let mut source = MemorySource::solid(20, 8, 6, 10.0);
    let detector = ScriptedBackend::new().at(2, Detection::new("smoke_detected", 0.92));

    let (report, _) = run(&config(), dir.path(), &mut source, detector, None);

    assert_eq!(report.entries.len(), 1);
    assert_eq!(report.entries[0].kind, "smoke");
}

#[test]
fn stream_end_flushes_open_events() {
    let dir = tempfile::tempdir().unwrap();
    let mut source = MemorySource::solid(20, 8, 6, 10.0);
    let detector = ScriptedBackend::new()
        .at(5, theft(0.95))
        .at(8, Detection::new("fall", 0.91));

    let (report, calls) = run(&config(), dir.path(), &mut source, detector, None);

    assert_eq!(report.events_materialized, 2);
    let kinds: Vec<&str> = report.entries.iter().map(|e| e.kind.as_str()).collect();
    assert_eq!(kinds, vec!["theft", "fall"]);
    assert!(calls.iter().all(|c| c.last() == Some(&19)));
}

#[test]
fn malformed_first_frame_does_not_sink_the_event() {
    let dir = tempfile::tempdir().unwrap();
    let mut frames = vec![DecodedFrame {
        pixels: vec![0u8; 5],
        width: 4,
        height: 4,
    }];
    frames.extend((0..21).map(|_| DecodedFrame {
        pixels: vec![40u8; 4 * 4 * 3],
        width: 4,
        height: 4,
    }));
    let mut source = MemorySource::new(frames, 10.0);
    let detector = ScriptedBackend::new().at(1, Detection::new("fall", 0.99));

    let (report, calls) = run(&config(), dir.path(), &mut source, detector, None);

    assert_eq!(report.malformed_frames, 1);
    assert_eq!(report.events_materialized, 1);
    assert_eq!(report.events_failed, 0);
    assert_eq!(calls[0].first(), Some(&0));
    assert!(dir
        .path()
        .join("captures/2024-05-01T12-00-00_fall_capture_0.jpg")
        .exists());
}

#[test]
fn evicted_span_is_reported_as_failed() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = ClipperConfig {
        base_clip_duration_seconds: 0.5,
        padding_seconds: 0.1,
        max_buffer_seconds: 1.0,
        ..config()
    };
    let mut source = MemorySource::solid(60, 8, 6, 10.0);
    let detector = ScriptedBackend::new().at(0, theft(0.95));

    let (report, calls) = run(&cfg, dir.path(), &mut source, detector, None);

    // Padded span is [-1, 6) but by frame 31 the buffer only holds 22..=31.
    assert_eq!(report.events_materialized, 0);
    assert_eq!(report.events_failed, 1);
    assert!(calls.is_empty());
    assert!(report.entries.is_empty());
}

#[test]
fn detector_failures_skip_detection_but_keep_buffering() {
    let dir = tempfile::tempdir().unwrap();
    let mut source = MemorySource::solid(40, 8, 6, 10.0);
    let detector = ScriptedBackend::new()
        .span(0..=5, theft(0.95))
        .fail_span(6..=12)
        .span(13..=15, theft(0.96));

    let (report, calls) = run(&config(), dir.path(), &mut source, detector, None);

    assert_eq!(report.detector_failures, 7);
    assert_eq!(report.frames_processed, 40);
    assert_eq!(report.events_materialized, 1);
    assert_eq!(calls[0], (0..40).collect::<Vec<_>>());
}

/// Raises the stop flag once `stop_after` frames have been read.
struct StoppingSource {
    inner: MemorySource,
    read: u64,
    stop_after: u64,
    stop: Arc<AtomicBool>,
}

impl FrameSource for StoppingSource {
    fn fps(&self) -> f64 {
        self.inner.fps()
    }

    fn total_frames(&self) -> Option<u64> {
        self.inner.total_frames()
    }

    fn next_frame(&mut self) -> Result<Option<DecodedFrame>> {
        self.read += 1;
        if self.read >= self.stop_after {
            self.stop.store(true, Ordering::SeqCst);
        }
        self.inner.next_frame()
    }

    fn describe(&self) -> String {
        "stopping".to_string()
    }
}

#[test]
fn stop_request_flushes_like_stream_end() {
    let dir = tempfile::tempdir().unwrap();
    let stop = Arc::new(AtomicBool::new(false));
    let mut source = StoppingSource {
        inner: MemorySource::solid(500, 8, 6, 10.0),
        read: 0,
        stop_after: 30,
        stop: Arc::clone(&stop),
    };
    let detector = ScriptedBackend::new().span(10..=400, theft(0.95));

    let (report, calls) = run(&config(), dir.path(), &mut source, detector, Some(&stop));

    assert!(report.stopped_early);
    assert_eq!(report.frames_processed, 30);
    assert_eq!(report.events_materialized, 1);
    assert_eq!(calls[0], (0..30).collect::<Vec<_>>());
}

#[test]
fn zero_fps_source_falls_back() {
    let dir = tempfile::tempdir().unwrap();
    let mut source = MemorySource::solid(10, 8, 6, 0.0);
    let detector = ScriptedBackend::new().at(0, theft(0.95));

    let (report, _) = run(&config(), dir.path(), &mut source, detector, None);

    assert_eq!(report.fps, 24.0);
    assert_eq!(report.events_materialized, 1);
}

#[test]
fn successful_events_are_journaled() {
    let dir = tempfile::tempdir().unwrap();
    let mut source = MemorySource::solid(150, 8, 6, 10.0);
    let detector = ScriptedBackend::new()
        .at(0, theft(0.95))
        .at(60, Detection::new("fight", 0.99));

    let (report, _) = run(&config(), dir.path(), &mut source, detector, None);

    let journal = std::fs::read_to_string(dir.path().join("events.jsonl")).unwrap();
    let lines: Vec<&str> = journal.lines().collect();
    assert_eq!(lines.len(), report.entries.len());
    assert_eq!(lines.len(), 2);
    let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
    assert_eq!(first["kind"], "theft");
}
