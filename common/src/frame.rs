use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;

/// Pixel layout of a raw frame buffer.
///
/// The capture backend decodes everything to packed RGB before it reaches the
/// pipeline, so `Rgb8` is the only layout produced today. The descriptor is
/// kept on every frame so consumers can validate buffers instead of trusting
/// the producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// 8-bit RGB, 3 bytes per pixel, row-major, no padding.
    Rgb8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Rgb8 => 3,
        }
    }
}

/// One frame pulled from the capture device.
///
/// Owned exclusively by the capture loop: created on read, handed by reference
/// to the video sink and the publisher, then dropped. The raw buffer is the
/// source of truth; images are re-materialized from it on demand.
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: Vec<u8>,
    /// Capture-order sequence number, starting at 1.
    pub seq: u64,
    /// Unix millis at capture time.
    pub captured_at_ms: i64,
}

impl CapturedFrame {
    pub fn new(width: u32, height: u32, data: Vec<u8>, seq: u64, captured_at_ms: i64) -> Self {
        Self {
            width,
            height,
            format: PixelFormat::Rgb8,
            data,
            seq,
            captured_at_ms,
        }
    }

    fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * self.format.bytes_per_pixel()
    }

    /// Rebuild an owned RGB image from the raw buffer.
    pub fn to_rgb_image(&self) -> Result<RgbImage, FrameError> {
        if self.data.len() != self.expected_len() {
            return Err(FrameError::BufferMismatch {
                got: self.data.len(),
                expected: self.expected_len(),
                width: self.width,
                height: self.height,
            });
        }
        RgbImage::from_raw(self.width, self.height, self.data.clone()).ok_or(
            FrameError::BufferMismatch {
                got: self.data.len(),
                expected: self.expected_len(),
                width: self.width,
                height: self.height,
            },
        )
    }

    /// Re-materialize the frame and encode it as JPEG at the given quality.
    pub fn encode_jpeg(&self, quality: u8) -> Result<Vec<u8>, FrameError> {
        let img = self.to_rgb_image()?;
        let mut buf = Vec::new();
        let encoder = JpegEncoder::new_with_quality(Cursor::new(&mut buf), quality);
        img.write_with_encoder(encoder)
            .map_err(|e| FrameError::JpegEncode(e.to_string()))?;
        Ok(buf)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame buffer is {got} bytes, expected {expected} for {width}x{height}")]
    BufferMismatch {
        got: usize,
        expected: usize,
        width: u32,
        height: u32,
    },
    #[error("JPEG encoding failed: {0}")]
    JpegEncode(String),
}
