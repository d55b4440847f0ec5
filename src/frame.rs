//! Frames and the bounded frame ring buffer.
//!
//! - `Frame`: immutable RGB24 bitmap tagged with its absolute index and a
//!   derived wall-clock timestamp.
//! - `FrameRingBuffer`: FIFO holding the most recent N frames. Tracks the
//!   absolute index of its oldest frame so event spans expressed in absolute
//!   indices can be mapped back to buffered frames.
//!
//! Buffered frames are never handed out mutably.

use chrono::{Duration as ChronoDuration, NaiveDateTime};
use std::collections::VecDeque;

/// Bytes per pixel for every frame flowing through the pipeline (RGB24).
pub const FRAME_CHANNELS: usize = 3;

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// Immutable decoded frame.
///
/// Pixel data is private; there is no mutable accessor. Cloning is explicit
/// and only done by sources handing a copy to the buffer.
#[derive(Clone)]
pub struct Frame {
    /// Packed RGB24, row-major, no padding.
    pixels: Vec<u8>,
    width: u32,
    height: u32,
    /// Absolute index in the source (0-based).
    index: u64,
    /// `video_start_time + index / fps`. Approximate to one frame period.
    timestamp: NaiveDateTime,
}

impl Frame {
    pub fn new(
        pixels: Vec<u8>,
        width: u32,
        height: u32,
        index: u64,
        timestamp: NaiveDateTime,
    ) -> Self {
        Self {
            pixels,
            width,
            height,
            index,
            timestamp,
        }
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn timestamp(&self) -> NaiveDateTime {
        self.timestamp
    }

    /// True when the pixel buffer matches `width * height * 3`.
    pub fn is_well_formed(&self) -> bool {
        (self.width as usize)
            .checked_mul(self.height as usize)
            .and_then(|v| v.checked_mul(FRAME_CHANNELS))
            .is_some_and(|expected| expected == self.pixels.len() && expected > 0)
    }

    pub(crate) fn byte_len(&self) -> usize {
        self.pixels.len()
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("index", &self.index)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("timestamp", &self.timestamp)
            .finish_non_exhaustive()
    }
}

/// Wall-clock time of `frame_index` given the video start and fps.
pub fn frame_timestamp(video_start: NaiveDateTime, frame_index: u64, fps: f64) -> NaiveDateTime {
    if fps <= 0.0 {
        return video_start;
    }
    let micros = (frame_index as f64 / fps * 1_000_000.0).round() as i64;
    video_start + ChronoDuration::microseconds(micros)
}

/// Whole frames in `seconds` at `fps`, truncated toward zero.
pub fn seconds_to_frames(seconds: f64, fps: f64) -> u64 {
    let frames = seconds * fps;
    if frames.is_finite() && frames > 0.0 {
        frames as u64
    } else {
        0
    }
}

// ----------------------------------------------------------------------------
// FrameRingBuffer
// ----------------------------------------------------------------------------

/// Bounded FIFO of the most recently seen frames.
///
/// Invariants:
/// - `len() <= capacity()`
/// - `start_index() == total_appended() - len()`
pub struct FrameRingBuffer {
    buffer: VecDeque<Frame>,
    capacity: usize,
    /// Absolute index of `buffer[0]`.
    start_index: u64,
    total_appended: u64,
}

impl FrameRingBuffer {
    /// Create a buffer holding at most `capacity` frames (minimum one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buffer: VecDeque::with_capacity(capacity),
            capacity,
            start_index: 0,
            total_appended: 0,
        }
    }

    /// Capacity for `max_seconds` of video at `fps`.
    pub fn for_duration(max_seconds: f64, fps: f64) -> Self {
        Self::new(seconds_to_frames(max_seconds, fps) as usize)
    }

    /// Append a frame, evicting the oldest one when at capacity.
    pub fn append(&mut self, frame: Frame) {
        if self.buffer.len() >= self.capacity {
            self.buffer.pop_front();
            self.start_index += 1;
        }
        self.buffer.push_back(frame);
        self.total_appended += 1;
    }

    /// Frames with absolute indices in `[abs_start, abs_end)`.
    ///
    /// Both ends are converted to buffer-relative positions and clamped to
    /// `[0, len]`. An empty or inverted range yields an empty vector; this
    /// never reads out of range.
    pub fn slice(&self, abs_start: i64, abs_end: i64) -> Vec<&Frame> {
        let (start, end) = self.clamp_range(abs_start, abs_end);
        if start >= end {
            return Vec::new();
        }
        self.buffer.range(start..end).collect()
    }

    fn clamp_range(&self, abs_start: i64, abs_end: i64) -> (usize, usize) {
        let base = self.start_index as i64;
        let len = self.buffer.len() as i64;
        let start = abs_start.saturating_sub(base).clamp(0, len);
        let end = abs_end.saturating_sub(base).clamp(0, len);
        (start as usize, end as usize)
    }

    /// Most recently appended frame.
    pub fn latest(&self) -> Option<&Frame> {
        self.buffer.back()
    }

    /// Absolute index of the oldest retained frame.
    pub fn start_index(&self) -> u64 {
        self.start_index
    }

    /// Total number of frames ever appended.
    pub fn total_appended(&self) -> u64 {
        self.total_appended
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Memory usage estimate.
    pub fn memory_bytes(&self) -> usize {
        self.buffer.iter().map(Frame::byte_len).sum()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn start() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    fn make_test_frame(index: u64) -> Frame {
        Frame::new(vec![index as u8; 2 * 2 * 3], 2, 2, index, start())
    }

    fn indices(frames: &[&Frame]) -> Vec<u64> {
        frames.iter().map(|f| f.index()).collect()
    }

    #[test]
    fn ring_buffer_enforces_capacity_and_start_index() {
        let mut buf = FrameRingBuffer::new(5);
        for i in 0..12 {
            buf.append(make_test_frame(i));
            assert!(buf.len() <= buf.capacity());
            assert_eq!(buf.start_index(), buf.total_appended() - buf.len() as u64);
        }
        assert_eq!(buf.len(), 5);
        assert_eq!(buf.start_index(), 7);
        assert_eq!(buf.latest().unwrap().index(), 11);
    }

    #[test]
    fn slice_maps_absolute_indices() {
        let mut buf = FrameRingBuffer::new(5);
        for i in 0..12 {
            buf.append(make_test_frame(i));
        }
        assert_eq!(indices(&buf.slice(8, 10)), vec![8, 9]);
    }

    #[test]
    fn slice_clamps_both_ends() {
        let mut buf = FrameRingBuffer::new(5);
        for i in 0..12 {
            buf.append(make_test_frame(i));
        }
        assert_eq!(indices(&buf.slice(-10, 100)), vec![7, 8, 9, 10, 11]);
        assert_eq!(indices(&buf.slice(3, 9)), vec![7, 8]);
    }

    #[test]
    fn slice_of_evicted_or_inverted_range_is_empty() {
        let mut buf = FrameRingBuffer::new(5);
        for i in 0..20 {
            buf.append(make_test_frame(i));
        }
        assert!(buf.slice(0, 10).is_empty());
        assert!(buf.slice(18, 16).is_empty());
        assert!(buf.slice(i64::MIN, i64::MIN + 1).is_empty());
        assert!(FrameRingBuffer::new(3).slice(0, 3).is_empty());
    }

    #[test]
    fn capacity_is_derived_from_duration() {
        assert_eq!(FrameRingBuffer::for_duration(30.0, 10.0).capacity(), 300);
        assert_eq!(FrameRingBuffer::for_duration(30.0, 29.97).capacity(), 899);
        assert_eq!(FrameRingBuffer::for_duration(0.0, 10.0).capacity(), 1);
    }

    #[test]
    fn frame_timestamp_advances_with_index() {
        let ts = frame_timestamp(start(), 25, 10.0);
        assert_eq!(ts, start() + ChronoDuration::milliseconds(2500));
        assert_eq!(frame_timestamp(start(), 25, 0.0), start());
    }

    #[test]
    fn well_formed_checks_pixel_length() {
        assert!(make_test_frame(0).is_well_formed());
        assert!(!Frame::new(vec![0; 5], 2, 2, 0, start()).is_well_formed());
    }
}
