use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::{ImageFormat, RgbImage};

use crate::frame::Frame;

/// Write `frame` as a JPEG still.
pub fn write_capture(frame: &Frame, path: &Path) -> Result<()> {
    let image = RgbImage::from_raw(frame.width(), frame.height(), frame.pixels().to_vec())
        .ok_or_else(|| {
            anyhow!(
                "frame {} is not a {}x{} RGB image",
                frame.index(),
                frame.width(),
                frame.height()
            )
        })?;
    image
        .save_with_format(path, ImageFormat::Jpeg)
        .with_context(|| format!("failed to write capture {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts() -> chrono::NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    #[test]
    fn writes_a_decodable_jpeg() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("still.jpg");
        let frame = Frame::new(vec![200u8; 8 * 6 * 3], 8, 6, 0, ts());
        write_capture(&frame, &path).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn rejects_malformed_frames() {
        let dir = tempfile::tempdir().unwrap();
        let frame = Frame::new(vec![0u8; 5], 8, 6, 0, ts());
        assert!(write_capture(&frame, &dir.path().join("bad.jpg")).is_err());
    }
}
