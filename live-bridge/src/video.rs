//! Camera stills and their JPEG transport encoding.

use image::RgbImage;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};

use crate::codec::TransportChunk;
use crate::error::{LiveError, Result};

/// Mime type of encoded camera stills.
pub const JPEG_MIME: &str = "image/jpeg";

/// One raw camera frame in packed RGB8 layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrame {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// `width * height * 3` bytes, row-major RGB.
    pub rgb: Vec<u8>,
}

impl VideoFrame {
    /// Create a new frame.
    pub fn new(width: u32, height: u32, rgb: Vec<u8>) -> Self {
        Self { width, height, rgb }
    }
}

/// Downsample a frame to at most `max_width` pixels wide and encode it as a
/// JPEG transport chunk.
///
/// `quality` is clamped to `1..=100`. A `max_width` of `None` keeps the
/// camera resolution.
pub fn encode_jpeg(
    frame: VideoFrame,
    quality: u8,
    max_width: Option<u32>,
) -> Result<TransportChunk> {
    let VideoFrame { width, height, rgb } = frame;
    if width == 0 || height == 0 {
        return Err(LiveError::malformed("camera frame has zero size"));
    }

    let expected = width as usize * height as usize * 3;
    if rgb.len() != expected {
        return Err(LiveError::malformed(format!(
            "camera frame {width}x{height} needs {expected} RGB bytes, got {}",
            rgb.len()
        )));
    }

    let image = RgbImage::from_raw(width, height, rgb)
        .ok_or_else(|| LiveError::malformed("camera frame buffer rejected"))?;

    let image = match max_width {
        Some(limit) if limit > 0 && width > limit => {
            let scaled_height = ((height as u64 * limit as u64) / width as u64).max(1) as u32;
            imageops::resize(&image, limit, scaled_height, FilterType::Triangle)
        }
        _ => image,
    };

    let mut encoded = Vec::new();
    JpegEncoder::new_with_quality(&mut encoded, quality.clamp(1, 100))
        .encode_image(&image)
        .map_err(|e| LiveError::malformed(format!("JPEG encode failed: {e}")))?;

    Ok(TransportChunk::from_bytes(JPEG_MIME, &encoded))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32) -> VideoFrame {
        let mut rgb = Vec::with_capacity((width * height * 3) as usize);
        for y in 0..height {
            for x in 0..width {
                rgb.extend_from_slice(&[(x % 256) as u8, (y % 256) as u8, 128]);
            }
        }
        VideoFrame::new(width, height, rgb)
    }

    #[test]
    fn test_encode_produces_jpeg() {
        let chunk = encode_jpeg(gradient(32, 16), 50, None).unwrap();
        assert_eq!(chunk.mime_type(), JPEG_MIME);

        let bytes = chunk.decode_bytes().unwrap();
        // SOI marker
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn test_encode_downsamples_wide_frames() {
        let chunk = encode_jpeg(gradient(200, 100), 50, Some(50)).unwrap();
        let bytes = chunk.decode_bytes().unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!(decoded.width(), 50);
        assert_eq!(decoded.height(), 25);
    }

    #[test]
    fn test_rejects_short_buffer() {
        let frame = VideoFrame::new(4, 4, vec![0; 10]);
        assert!(matches!(encode_jpeg(frame, 50, None), Err(LiveError::MalformedPayload(_))));
    }

    #[test]
    fn test_rejects_empty_frame() {
        let frame = VideoFrame::new(0, 0, Vec::new());
        assert!(matches!(encode_jpeg(frame, 50, None), Err(LiveError::MalformedPayload(_))));
    }
}
