//! Sampled video frames.
//!
//! A `Frame` is an immutable RGB raster produced once per sampling tick. It is
//! owned by the loop iteration that fetched it and dropped after detection.
//! There is no mutable pixel access once a frame is built.

use anyhow::{anyhow, Result};
use image::RgbImage;

/// One sampled image from the video source.
pub struct Frame {
    image: RgbImage,
    /// Position of this frame in the delivered sequence (1-based).
    pub sequence: u64,
}

impl Frame {
    pub fn new(image: RgbImage, sequence: u64) -> Self {
        Self { image, sequence }
    }

    /// Build a frame from tightly packed RGB24 bytes.
    pub fn from_rgb(pixels: Vec<u8>, width: u32, height: u32, sequence: u64) -> Result<Self> {
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
            .ok_or_else(|| anyhow!("pixel buffer does not match {}x{}", width, height))?;
        Ok(Self::new(image, sequence))
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Row-major RGB24 pixels.
    pub fn pixels(&self) -> &[u8] {
        self.image.as_raw()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("sequence", &self.sequence)
            .field("width", &self.width())
            .field("height", &self.height())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_rgb_checks_length() {
        assert!(Frame::from_rgb(vec![0u8; 12], 2, 2, 1).is_ok());
        let err = Frame::from_rgb(vec![0u8; 11], 2, 2, 1).unwrap_err();
        assert!(err.to_string().contains("expected 12 RGB bytes"));
    }

    #[test]
    fn exposes_dimensions_and_pixels() {
        let frame = Frame::from_rgb(vec![7u8; 4 * 3 * 3], 4, 3, 9).unwrap();
        assert_eq!(frame.width(), 4);
        assert_eq!(frame.height(), 3);
        assert_eq!(frame.sequence, 9);
        assert!(frame.pixels().iter().all(|&p| p == 7));
    }
}
