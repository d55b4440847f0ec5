//! Incident Clipper
//!
//! Turns a stream of video frames and per-frame detector output into a small
//! number of bounded incident clips: a re-encoded MP4 segment plus one JPEG
//! still per event.
//!
//! # Pipeline
//!
//! Per source, strictly sequential:
//!
//! 1. **Ingest**: a `FrameSource` yields decoded frames at a fixed fps.
//! 2. **Buffer**: every frame enters a bounded `FrameRingBuffer`.
//! 3. **Detect**: a `DetectorBackend` labels the frame.
//! 4. **Normalize**: raw labels map onto the configured `KindSet`.
//! 5. **Lifecycle**: the `EventEngine` opens, extends and ends one event per
//!    kind, merging detections separated by less than the merge gap.
//! 6. **Materialize**: ended events are cut from the buffer (with padding),
//!    encoded, captured, and appended to the event log.
//!
//! Sources never share state; `batch` runs many of them on a fixed pool and
//! only the `AlertThrottle` crosses source boundaries.
//!
//! # Module Structure
//!
//! - `kind`: canonical event kinds and label normalization
//! - `frame`: frames and the ring buffer
//! - `detect`: detector contract and backends
//! - `engine`: active event table and lifecycle state machine
//! - `clip`: naming contract, encoder, captures, event log
//! - `session` / `batch`: per-source pipeline and worker pool
//! - `config`: configuration layering and validation

pub mod batch;
pub mod clip;
pub mod config;
pub mod detect;
pub mod engine;
pub mod frame;
pub mod ingest;
pub mod kind;
pub mod session;
pub mod throttle;

pub use batch::{run_batch, BatchOutcome, WorkerFactory};
pub use clip::{
    ClipEncoder, ClipMaterializer, CommandOutcome, CommandStatus, EventLog, EventLogEntry,
    FfmpegEncoder, MaterializeFailure, MaterializeOutcome,
};
pub use config::ClipperConfig;
pub use detect::{Detection, DetectorBackend, RawLabel, ScriptedBackend};
pub use engine::{ActiveEvent, EventEngine, LifecycleParams};
pub use frame::{Frame, FrameRingBuffer};
pub use ingest::{FileConfig, FileSource, FrameSource, MemorySource};
pub use kind::{KindId, KindSet, Normalized};
pub use session::{run_source, ClipSession, SessionReport, SessionSetup};
pub use throttle::AlertThrottle;
