//! Frames as they move through the pipeline.
//!
//! A `Frame` is an owned RGB buffer at the configured capture resolution plus the
//! capture metadata the pipeline needs: a monotonically increasing index (the unit for
//! speed estimates) and a wall-clock timestamp (the unit for loitering and event rows).

use anyhow::{anyhow, Result};
use chrono::{DateTime, Local};
use image::RgbImage;

/// One decoded, normalized video frame.
pub struct Frame {
    image: RgbImage,
    /// Position in the stream, starting at 1.
    pub index: u64,
    /// Wall-clock capture time.
    pub captured_at: DateTime<Local>,
}

impl Frame {
    pub fn new(image: RgbImage, index: u64, captured_at: DateTime<Local>) -> Self {
        Self {
            image,
            index,
            captured_at,
        }
    }

    /// Build a frame from a packed RGB24 buffer.
    pub fn from_rgb(
        pixels: Vec<u8>,
        width: u32,
        height: u32,
        index: u64,
        captured_at: DateTime<Local>,
    ) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "expected {} RGB bytes for {}x{}, received {}",
                expected,
                width,
                height,
                pixels.len()
            ));
        }
        let image = RgbImage::from_raw(width, height, pixels)
            .ok_or_else(|| anyhow!("RGB buffer does not match {}x{}", width, height))?;
        Ok(Self::new(image, index, captured_at))
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn into_image(self) -> RgbImage {
        self.image
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_rgb_validates_length() {
        let now = Local::now();
        assert!(Frame::from_rgb(vec![0u8; 12], 2, 2, 1, now).is_ok());
        assert!(Frame::from_rgb(vec![0u8; 11], 2, 2, 1, now).is_err());
    }

    #[test]
    fn frame_reports_dimensions() -> Result<()> {
        let frame = Frame::from_rgb(vec![7u8; 4 * 3 * 3], 4, 3, 9, Local::now())?;
        assert_eq!(frame.width(), 4);
        assert_eq!(frame.height(), 3);
        assert_eq!(frame.index, 9);
        assert_eq!(frame.image().get_pixel(3, 2).0, [7, 7, 7]);
        Ok(())
    }
}
