//! Frame buffers and image encoding/decoding.
//!
//! Every camera backend converts whatever its device delivers into an RGB
//! [`Frame`]. Uploaded files and downloaded result images go through the same
//! type so the rest of the app only ever sees one image representation.

use std::io::Cursor;
use std::path::Path;
use std::time::Instant;

use image::{ImageFormat, RgbImage};

/// Pixel format of a captured frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameFormat {
    /// RGB format (3 bytes per pixel)
    Rgb,
}

/// A captured camera frame or decoded image.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Raw pixel data in RGB format
    pub data: Vec<u8>,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Pixel format
    pub format: FrameFormat,
    /// Timestamp when frame was captured
    pub timestamp: Instant,
}

/// Errors from image encoding and decoding.
#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    /// The file or buffer is not a readable image
    #[error("Failed to decode image: {0}")]
    DecodeFailed(String),

    #[error("Failed to encode image: {0}")]
    EncodeFailed(String),

    #[error("Failed to read image file '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
}

impl Frame {
    /// Get the number of bytes per pixel (3 for RGB).
    pub fn bytes_per_pixel(&self) -> usize {
        match self.format {
            FrameFormat::Rgb => 3,
        }
    }

    /// Wrap a decoded RGB image.
    pub fn from_rgb_image(img: RgbImage) -> Self {
        let (width, height) = img.dimensions();
        Self {
            data: img.into_raw(),
            width,
            height,
            format: FrameFormat::Rgb,
            timestamp: Instant::now(),
        }
    }

    /// Decode an encoded image (PNG, JPEG, BMP, ...) from memory.
    pub fn decode(bytes: &[u8]) -> Result<Self, ImageError> {
        if bytes.is_empty() {
            return Err(ImageError::DecodeFailed("empty buffer".to_string()));
        }
        let img = image::load_from_memory(bytes)
            .map_err(|e| ImageError::DecodeFailed(e.to_string()))?;
        Ok(Self::from_rgb_image(img.to_rgb8()))
    }

    /// Read and decode an image file from disk.
    pub fn load(path: &Path) -> Result<Self, ImageError> {
        let bytes = std::fs::read(path).map_err(|e| ImageError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::decode(&bytes)
    }

    /// Encode the frame as PNG.
    pub fn to_png(&self) -> Result<Vec<u8>, ImageError> {
        let expected = self.width as usize * self.height as usize * self.bytes_per_pixel();
        if self.width == 0 || self.height == 0 || self.data.len() != expected {
            return Err(ImageError::EncodeFailed(format!(
                "buffer of {} bytes does not match {}x{} RGB",
                self.data.len(),
                self.width,
                self.height
            )));
        }
        let img = RgbImage::from_raw(self.width, self.height, self.data.clone())
            .ok_or_else(|| ImageError::EncodeFailed("invalid frame dimensions".to_string()))?;

        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png)
            .map_err(|e| ImageError::EncodeFailed(e.to_string()))?;
        Ok(out.into_inner())
    }

    /// Whether the frame holds any pixels.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0 || self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(width: u32, height: u32, rgb: [u8; 3]) -> Frame {
        Frame {
            data: rgb.repeat((width * height) as usize),
            width,
            height,
            format: FrameFormat::Rgb,
            timestamp: Instant::now(),
        }
    }

    #[test]
    fn test_png_encode_then_decode_keeps_pixels() {
        let frame = solid(4, 3, [10, 200, 30]);
        let png = frame.to_png().unwrap();
        assert_eq!(&png[1..4], b"PNG");

        let decoded = Frame::decode(&png).unwrap();
        assert_eq!(decoded.width, 4);
        assert_eq!(decoded.height, 3);
        assert_eq!(&decoded.data[0..3], &[10, 200, 30]);
    }

    #[test]
    fn test_decode_garbage_fails() {
        let err = Frame::decode(b"definitely not an image").unwrap_err();
        assert!(matches!(err, ImageError::DecodeFailed(_)));
    }

    #[test]
    fn test_decode_empty_fails() {
        assert!(matches!(Frame::decode(&[]), Err(ImageError::DecodeFailed(_))));
    }

    #[test]
    fn test_encode_rejects_mismatched_buffer() {
        let mut frame = solid(2, 2, [0, 0, 0]);
        frame.data.truncate(5);
        assert!(matches!(frame.to_png(), Err(ImageError::EncodeFailed(_))));
    }

    #[test]
    fn test_load_missing_file() {
        let err = Frame::load(Path::new("/nonexistent/medscan/image.png")).unwrap_err();
        assert!(matches!(err, ImageError::Io { .. }));
    }
}
