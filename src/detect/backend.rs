use anyhow::Result;

use crate::detect::result::Detection;
use crate::frame::Frame;

/// Detector backend trait.
///
/// A backend wraps an opaque model. It is called once per frame, in frame
/// order, from a single source's pipeline; one backend instance is never
/// shared between sources.
///
/// Implementations must treat the frame as read-only and must not retain
/// it past the `detect` call.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    ///
    /// An `Err` skips detection for this frame only; the frame is still
    /// buffered and the pipeline keeps running.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
