//! Frame ingestion sources.
//!
//! A source yields decoded RGB24 frames in order, with a fixed frame rate
//! and, when known, a total frame count. Exhaustion is `Ok(None)`, which the
//! session treats as stream end (flush), never as an error.
//!
//! Sources:
//! - Local video files (feature: ingest-file-ffmpeg)
//! - Synthetic `stub://` source (testing, demos)
//!
//! Frame indices and timestamps are assigned by the session, not the source.

pub mod file;
#[cfg(feature = "ingest-file-ffmpeg")]
pub(crate) mod file_ffmpeg;

use anyhow::Result;

pub use file::{FileConfig, FileSource, FileStats};

/// One decoded frame as produced by a source.
#[derive(Clone, Debug)]
pub struct DecodedFrame {
    /// Packed RGB24, row-major, no padding.
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Video source contract.
pub trait FrameSource {
    /// Frames per second. Values that are not positive and finite are
    /// replaced by a fallback rate by the session.
    fn fps(&self) -> f64;

    /// Total number of frames, when the container reports it.
    fn total_frames(&self) -> Option<u64>;

    /// Next decoded frame, or `None` once the source is exhausted.
    fn next_frame(&mut self) -> Result<Option<DecodedFrame>>;

    /// Short human-readable name for logs.
    fn describe(&self) -> String;
}

/// In-memory source over pre-built frames. Useful for tests and for
/// replaying frames captured elsewhere.
pub struct MemorySource {
    frames: std::collections::VecDeque<DecodedFrame>,
    fps: f64,
    total: u64,
}

impl MemorySource {
    pub fn new(frames: Vec<DecodedFrame>, fps: f64) -> Self {
        let total = frames.len() as u64;
        Self {
            frames: frames.into(),
            fps,
            total,
        }
    }

    /// `count` solid frames of `width`x`height`.
    pub fn solid(count: usize, width: u32, height: u32, fps: f64) -> Self {
        let frames = (0..count)
            .map(|i| DecodedFrame {
                pixels: vec![(i % 256) as u8; (width * height * 3) as usize],
                width,
                height,
            })
            .collect();
        Self::new(frames, fps)
    }
}

impl FrameSource for MemorySource {
    fn fps(&self) -> f64 {
        self.fps
    }

    fn total_frames(&self) -> Option<u64> {
        Some(self.total)
    }

    fn next_frame(&mut self) -> Result<Option<DecodedFrame>> {
        Ok(self.frames.pop_front())
    }

    fn describe(&self) -> String {
        format!("memory({} frames)", self.total)
    }
}
