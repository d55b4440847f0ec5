//! Per-source clipping session.
//!
//! One session owns everything for a single video source: the frame ring
//! buffer, the active event table and the materializer. Frames are handled
//! strictly one at a time: buffered, detected, normalized, fed to the
//! engine, and any ended events materialized before the next frame is read.
//! Nothing here is shared with other sessions except the alert throttle.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Local, NaiveDateTime};

use crate::clip::{ClipEncoder, ClipMaterializer, EventLogEntry, MaterializerSettings};
use crate::config::ClipperConfig;
use crate::detect::DetectorBackend;
use crate::engine::{EndedEvent, EventEngine, LifecycleParams};
use crate::frame::{frame_timestamp, seconds_to_frames, Frame, FrameRingBuffer};
use crate::ingest::{DecodedFrame, FrameSource};
use crate::kind::{KindId, KindSet, Normalized};
use crate::throttle::AlertThrottle;

/// Frame rate assumed when a source reports none.
pub const FALLBACK_FPS: f64 = 24.0;

/// Where and how one source's artifacts are written.
pub struct SessionSetup {
    /// Wall-clock time of frame 0. `None` means "now".
    pub video_start: Option<NaiveDateTime>,
    /// Root holding `clips/`, `captures/` and the event journal.
    pub output_root: PathBuf,
    pub encoder: Box<dyn ClipEncoder>,
    pub throttle: Arc<AlertThrottle>,
}

/// Summary of one source's run.
#[derive(Clone, Debug, Default)]
pub struct SessionReport {
    pub source: String,
    pub fps: f64,
    pub frames_processed: u64,
    pub detector_failures: u64,
    pub malformed_frames: u64,
    pub events_materialized: u64,
    pub events_failed: u64,
    pub events_discarded: u64,
    /// A stop request ended the stream before the source was exhausted.
    pub stopped_early: bool,
    pub entries: Vec<EventLogEntry>,
}

/// `fps` if usable, otherwise `FALLBACK_FPS`.
pub fn effective_fps(reported: f64) -> f64 {
    if reported.is_finite() && reported > 0.0 {
        reported
    } else {
        FALLBACK_FPS
    }
}

pub struct ClipSession {
    kinds: KindSet,
    fps: f64,
    video_start: NaiveDateTime,
    engine: EventEngine,
    buffer: FrameRingBuffer,
    materializer: ClipMaterializer,
    warn_every: u64,
    consecutive_failures: u64,
    next_index: u64,
    report: SessionReport,
}

impl ClipSession {
    /// Build a session for a source running at `fps` (already validated).
    pub fn new(cfg: &ClipperConfig, fps: f64, setup: SessionSetup) -> Result<Self> {
        let kinds = cfg.kind_set()?;
        let video_start = setup
            .video_start
            .unwrap_or_else(|| Local::now().naive_local());
        let params = LifecycleParams::from_seconds(
            cfg.confidence_threshold,
            cfg.base_clip_duration_seconds,
            cfg.merge_gap_seconds,
            fps,
        );
        let buffer = FrameRingBuffer::for_duration(cfg.max_buffer_seconds, fps);
        let materializer = ClipMaterializer::new(
            MaterializerSettings {
                output_root: setup.output_root,
                web_base_url: cfg.web_base_url.clone(),
                video_start,
                fps,
                padding_frames: seconds_to_frames(cfg.padding_seconds, fps),
            },
            setup.encoder,
            setup.throttle,
        )?;

        log::debug!(
            "session: fps={:.3} base={}f gap={}f buffer={}f padding={}f start={}",
            fps,
            params.base_clip_frames,
            params.merge_gap_frames,
            buffer.capacity(),
            materializer.settings().padding_frames,
            video_start
        );

        Ok(Self {
            engine: EventEngine::new(params, kinds.len()),
            kinds,
            fps,
            video_start,
            buffer,
            materializer,
            warn_every: cfg.detector_failure_warn_every.max(1),
            consecutive_failures: 0,
            next_index: 0,
            report: SessionReport {
                fps,
                ..SessionReport::default()
            },
        })
    }

    /// Buffer one decoded frame, run detection on it and advance the event
    /// engine. Ended events are materialized before this returns.
    pub fn process_frame(&mut self, decoded: DecodedFrame, detector: &mut dyn DetectorBackend) {
        let index = self.next_index;
        self.next_index += 1;
        self.report.frames_processed += 1;

        let frame = Frame::new(
            decoded.pixels,
            decoded.width,
            decoded.height,
            index,
            frame_timestamp(self.video_start, index, self.fps),
        );
        let well_formed = frame.is_well_formed();
        self.buffer.append(frame);

        let hits = if well_formed {
            self.detect_latest(detector)
        } else {
            self.report.malformed_frames += 1;
            log::debug!("frame {}: malformed pixel buffer, detection skipped", index);
            Vec::new()
        };

        let ended = self.engine.observe(index, &hits);
        self.materialize_all(ended);
    }

    /// Flush every open event and return the run summary.
    pub fn finish(mut self) -> SessionReport {
        let ended = self.engine.flush();
        self.materialize_all(ended);
        log::debug!(
            "session end: buffer {} frames ({} bytes), start index {}",
            self.buffer.len(),
            self.buffer.memory_bytes(),
            self.buffer.start_index()
        );

        let mut report = self.report;
        report.entries = self.materializer.into_event_log().into_entries();
        report
    }

    fn detect_latest(&mut self, detector: &mut dyn DetectorBackend) -> Vec<(KindId, f32)> {
        let Some(frame) = self.buffer.latest() else {
            return Vec::new();
        };
        let index = frame.index();
        let detections = match detector.detect(frame) {
            Ok(detections) => {
                self.consecutive_failures = 0;
                detections
            }
            Err(e) => {
                self.report.detector_failures += 1;
                self.consecutive_failures += 1;
                if self.consecutive_failures % self.warn_every == 0 {
                    log::warn!(
                        "detector {} failed on {} consecutive frames (latest frame {}): {:#}",
                        detector.name(),
                        self.consecutive_failures,
                        index,
                        e
                    );
                } else {
                    log::debug!("detector failed on frame {}: {:#}", index, e);
                }
                return Vec::new();
            }
        };

        let params = *self.engine.params();
        let mut hits = Vec::with_capacity(detections.len());
        for detection in detections {
            match self.kinds.normalize(&detection.label) {
                Normalized::Kind(kind) if params.qualifies(detection.confidence) => {
                    hits.push((kind, detection.confidence));
                }
                Normalized::Kind(_) | Normalized::Untracked => {}
                Normalized::Invalid(marker) => {
                    log::debug!("frame {}: dropping detection with {}", index, marker);
                }
            }
        }
        hits
    }

    fn materialize_all(&mut self, ended: Vec<EndedEvent>) {
        for ended in ended {
            let kind = self.kinds.name(ended.kind);
            if !self.engine.params().qualifies(ended.event.max_confidence) {
                self.report.events_discarded += 1;
                log::warn!(
                    "{} event at frame {} discarded: max confidence {:.2} below threshold",
                    kind,
                    ended.event.start_frame,
                    ended.event.max_confidence
                );
                continue;
            }
            let outcome = self.materializer.materialize(kind, &ended.event, &self.buffer);
            if outcome.is_success() {
                self.report.events_materialized += 1;
            } else {
                self.report.events_failed += 1;
            }
        }
    }
}

/// Drive `source` to exhaustion (or until `stop` is raised) through a
/// fresh session.
pub fn run_source(
    cfg: &ClipperConfig,
    setup: SessionSetup,
    source: &mut dyn FrameSource,
    detector: &mut dyn DetectorBackend,
    stop: Option<&AtomicBool>,
) -> Result<SessionReport> {
    let description = source.describe();
    let reported_fps = source.fps();
    let fps = effective_fps(reported_fps);
    if fps != reported_fps {
        log::warn!(
            "{}: source reported fps {}, assuming {}",
            description,
            reported_fps,
            FALLBACK_FPS
        );
    }
    let total = source.total_frames();

    detector
        .warm_up()
        .with_context(|| format!("detector {} warm-up failed", detector.name()))?;

    let mut session = ClipSession::new(cfg, fps, setup)?;
    log::info!(
        "{}: processing ({} frames @ {:.3} fps, detector={})",
        description,
        total.map_or_else(|| "unknown".to_string(), |n| n.to_string()),
        fps,
        detector.name()
    );

    let mut stopped_early = false;
    loop {
        if stop.is_some_and(|flag| flag.load(Ordering::SeqCst)) {
            log::info!("{}: stop requested, flushing open events", description);
            stopped_early = true;
            break;
        }
        if total.is_some_and(|total| session.report.frames_processed >= total) {
            break;
        }
        match source.next_frame() {
            Ok(Some(decoded)) => session.process_frame(decoded, detector),
            Ok(None) => break,
            Err(e) => {
                log::warn!("{}: source read failed, ending stream: {:#}", description, e);
                break;
            }
        }
    }

    let mut report = session.finish();
    report.source = description;
    report.stopped_early = stopped_early;
    log::info!(
        "{}: done, frames={} events={} failed={} discarded={} detector_failures={}",
        report.source,
        report.frames_processed,
        report.events_materialized,
        report.events_failed,
        report.events_discarded,
        report.detector_failures
    );
    Ok(report)
}
