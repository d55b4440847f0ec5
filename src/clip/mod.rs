//! Clip materialization.
//!
//! Turns an ended event's frame span into persisted artifacts:
//! - a re-encoded MP4 clip of the padded span, and
//! - a JPEG still of the first well-formed frame in that span,
//!
//! then records successful pairs in the event log. Every failure mode is a
//! value in `MaterializeOutcome`; nothing here aborts the pipeline.

mod capture;
mod encoder;
mod event_log;
pub mod naming;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveDateTime;

pub use capture::write_capture;
pub use encoder::{write_raw_video, ClipEncoder, CommandOutcome, CommandStatus, FfmpegEncoder};
pub use event_log::{EventLog, EventLogEntry, EVENT_JOURNAL_FILE};
pub use naming::{ArtifactNames, CAPTURES_DIR, CLIPS_DIR};

use crate::engine::ActiveEvent;
use crate::frame::{frame_timestamp, FrameRingBuffer};
use crate::throttle::AlertThrottle;

/// Why one artifact of a materialization was not produced.
#[derive(Clone, Debug)]
pub enum MaterializeFailure {
    /// The padded span has no well-formed frame left in the buffer.
    EmptySlice {
        start: i64,
        end: i64,
        buffer_start: u64,
        buffer_len: usize,
    },
    Encoder(CommandOutcome),
    Capture(String),
}

impl std::fmt::Display for MaterializeFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MaterializeFailure::EmptySlice {
                start,
                end,
                buffer_start,
                buffer_len,
            } => write!(
                f,
                "frames [{}, {}) not in buffer (start={}, len={})",
                start, end, buffer_start, buffer_len
            ),
            MaterializeFailure::Encoder(outcome) => {
                write!(f, "encoder {:?}", outcome.status)?;
                if let Some(code) = outcome.exit_code {
                    write!(f, " (exit {})", code)?;
                }
                if !outcome.detail.is_empty() {
                    write!(f, ": {}", outcome.detail)?;
                }
                Ok(())
            }
            MaterializeFailure::Capture(msg) => write!(f, "capture failed: {}", msg),
        }
    }
}

/// Result of one materialization attempt.
#[derive(Clone, Debug)]
pub struct MaterializeOutcome {
    pub kind: String,
    pub clip_index: u64,
    pub timestamp: String,
    /// Frames handed to the encoder after clamping.
    pub frame_count: usize,
    pub clip: Result<PathBuf, MaterializeFailure>,
    pub capture: Result<PathBuf, MaterializeFailure>,
    /// Present only when both artifacts were written.
    pub entry: Option<EventLogEntry>,
}

impl MaterializeOutcome {
    pub fn is_success(&self) -> bool {
        self.clip.is_ok() && self.capture.is_ok()
    }
}

/// Per-source materializer settings.
#[derive(Clone, Debug)]
pub struct MaterializerSettings {
    /// Root holding `clips/`, `captures/` and the event journal.
    pub output_root: PathBuf,
    pub web_base_url: String,
    pub video_start: NaiveDateTime,
    pub fps: f64,
    pub padding_frames: u64,
}

pub struct ClipMaterializer {
    settings: MaterializerSettings,
    encoder: Box<dyn ClipEncoder>,
    throttle: Arc<AlertThrottle>,
    event_log: EventLog,
    clip_counter: u64,
}

impl ClipMaterializer {
    /// Create the output directories and open the event journal.
    pub fn new(
        settings: MaterializerSettings,
        encoder: Box<dyn ClipEncoder>,
        throttle: Arc<AlertThrottle>,
    ) -> Result<Self> {
        for dir in [CLIPS_DIR, CAPTURES_DIR] {
            let path = settings.output_root.join(dir);
            std::fs::create_dir_all(&path)
                .with_context(|| format!("failed to create output dir {}", path.display()))?;
        }
        let event_log = EventLog::with_journal(settings.output_root.join(EVENT_JOURNAL_FILE));
        Ok(Self {
            settings,
            encoder,
            throttle,
            event_log,
            clip_counter: 0,
        })
    }

    pub fn settings(&self) -> &MaterializerSettings {
        &self.settings
    }

    pub fn event_log(&self) -> &EventLog {
        &self.event_log
    }

    pub fn into_event_log(self) -> EventLog {
        self.event_log
    }

    /// Number of materialization attempts so far.
    pub fn clip_counter(&self) -> u64 {
        self.clip_counter
    }

    /// Materialize one ended event from the frames still buffered.
    pub fn materialize(
        &mut self,
        kind: &str,
        event: &ActiveEvent,
        buffer: &FrameRingBuffer,
    ) -> MaterializeOutcome {
        let clip_index = self.clip_counter;
        self.clip_counter += 1;

        let padding = self.settings.padding_frames as i64;
        let start = (event.start_frame as i64).saturating_sub(padding);
        let end = (event.end_frame as i64).saturating_add(padding);
        let frames = buffer.slice(start, end);

        let timestamp = naming::format_timestamp(frame_timestamp(
            self.settings.video_start,
            event.start_frame,
            self.settings.fps,
        ));
        let names = ArtifactNames::new(&self.settings.output_root, &timestamp, kind, clip_index);

        let mut outcome = MaterializeOutcome {
            kind: kind.to_string(),
            clip_index,
            timestamp,
            frame_count: frames.len(),
            clip: Err(MaterializeFailure::EmptySlice {
                start,
                end,
                buffer_start: buffer.start_index(),
                buffer_len: buffer.len(),
            }),
            capture: Err(MaterializeFailure::EmptySlice {
                start,
                end,
                buffer_start: buffer.start_index(),
                buffer_len: buffer.len(),
            }),
            entry: None,
        };

        // Malformed frames are skipped by the encoder; the still follows suit.
        let Some(first) = frames.iter().copied().find(|f| f.is_well_formed()) else {
            log::warn!(
                "{} event #{}: nothing to materialize ({})",
                kind,
                clip_index,
                outcome.clip.as_ref().err().map(ToString::to_string).unwrap_or_default()
            );
            return outcome;
        };

        let encoded = self.encoder.encode(
            &frames,
            self.settings.fps,
            &names.raw_path,
            &names.clip_path,
        );
        outcome.clip = if encoded.is_success() {
            Ok(names.clip_path.clone())
        } else {
            Err(MaterializeFailure::Encoder(encoded))
        };

        outcome.capture = match write_capture(first, &names.capture_path) {
            Ok(()) => Ok(names.capture_path.clone()),
            Err(e) => Err(MaterializeFailure::Capture(format!("{:#}", e))),
        };

        match (&outcome.clip, &outcome.capture) {
            (Ok(clip_path), Ok(capture_path)) => {
                let entry = EventLogEntry {
                    timestamp: outcome.timestamp.clone(),
                    kind: kind.to_string(),
                    capture_url: self.web_url(capture_path),
                    clip_url: self.web_url(clip_path),
                    clip_index,
                    max_confidence: event.max_confidence,
                    alert: self.throttle.try_acquire(),
                };
                log::info!(
                    "{} event #{} saved: {} -> {} ({} frames, conf={:.2}, alert={})",
                    kind,
                    clip_index,
                    outcome.timestamp,
                    clip_path.display(),
                    frames.len(),
                    event.max_confidence,
                    entry.alert
                );
                if let Err(e) = self.event_log.append(entry.clone()) {
                    log::error!("event journal write failed: {:#}", e);
                }
                outcome.entry = Some(entry);
            }
            (clip, capture) => {
                if let Err(e) = clip {
                    log::error!("{} event #{}: clip failed: {}", kind, clip_index, e);
                }
                if let Err(e) = capture {
                    log::error!("{} event #{}: {}", kind, clip_index, e);
                }
            }
        }
        outcome
    }

    fn web_url(&self, path: &Path) -> String {
        naming::web_url(&self.settings.web_base_url, &self.settings.output_root, path)
    }
}
