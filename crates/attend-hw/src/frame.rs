//! Frame type and pixel conversion — YUYV/GREY to RGB, JPEG encoding.

use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use std::path::Path;

/// A captured color camera frame.
#[derive(Clone)]
pub struct Frame {
    /// Packed RGB8 pixel data (width * height * 3 bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: std::time::Instant,
    pub sequence: u32,
}

impl Frame {
    /// Wrap an RGB8 buffer captured now.
    pub fn from_rgb(data: Vec<u8>, width: u32, height: u32, sequence: u32) -> Self {
        Self {
            data,
            width,
            height,
            timestamp: std::time::Instant::now(),
            sequence,
        }
    }

    /// Encode the frame as a baseline JPEG.
    pub fn encode_jpeg(&self, quality: u8) -> Result<Vec<u8>, FrameError> {
        let expected = self.width as usize * self.height as usize * 3;
        if self.data.len() != expected {
            return Err(FrameError::InvalidLength {
                expected,
                actual: self.data.len(),
            });
        }
        let mut out = Vec::new();
        JpegEncoder::new_with_quality(&mut out, quality).encode(
            &self.data,
            self.width,
            self.height,
            ExtendedColorType::Rgb8,
        )?;
        Ok(out)
    }

    /// Encode as JPEG and write to `path`, overwriting any existing file.
    pub fn save_jpeg(&self, path: &Path, quality: u8) -> Result<(), FrameError> {
        let bytes = self.encode_jpeg(quality)?;
        std::fs::write(path, bytes)?;
        Ok(())
    }
}

/// Convert packed YUYV (4:2:2) to RGB8 using BT.601 limited-range coefficients.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V]; both pixels share U/V.
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = width as usize * height as usize * 2;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }
    let mut rgb = Vec::with_capacity(width as usize * height as usize * 3);
    for chunk in yuyv[..expected].chunks_exact(4) {
        let (u, v) = (chunk[1], chunk[3]);
        for y in [chunk[0], chunk[2]] {
            rgb.extend_from_slice(&yuv_to_rgb(y, u, v));
        }
    }
    Ok(rgb)
}

fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    let clamp = |x: i32| (x >> 8).clamp(0, 255) as u8;
    [
        clamp(298 * c + 409 * e + 128),
        clamp(298 * c - 100 * d - 208 * e + 128),
        clamp(298 * c + 516 * d + 128),
    ]
}

/// Expand 8-bit grayscale to RGB8 by replicating the luma channel.
pub fn grey_to_rgb(gray: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let pixels = width as usize * height as usize;
    if gray.len() < pixels {
        return Err(FrameError::InvalidLength {
            expected: pixels,
            actual: gray.len(),
        });
    }
    Ok(gray[..pixels].iter().flat_map(|&p| [p, p, p]).collect())
}

/// Decode a motion-JPEG buffer to RGB8, returning its dimensions.
pub fn mjpeg_to_rgb(jpeg: &[u8]) -> Result<(Vec<u8>, u32, u32), FrameError> {
    let decoded = image::load_from_memory_with_format(jpeg, image::ImageFormat::Jpeg)?.to_rgb8();
    let (width, height) = decoded.dimensions();
    Ok((decoded.into_raw(), width, height))
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("image codec: {0}")]
    Codec(#[from] image::ImageError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuyv_black_and_white() {
        // Two pixels: Y=16 (black) and Y=235 (white), neutral chroma.
        let yuyv = vec![16, 128, 235, 128];
        let rgb = yuyv_to_rgb(&yuyv, 2, 1).unwrap();
        assert_eq!(rgb, vec![0, 0, 0, 255, 255, 255]);
    }

    #[test]
    fn test_yuyv_red_dominant() {
        // High V pushes red up and green down.
        let rgb = yuyv_to_rgb(&[81, 90, 81, 240], 2, 1).unwrap();
        assert!(rgb[0] > 200, "red = {}", rgb[0]);
        assert!(rgb[1] < 50, "green = {}", rgb[1]);
        assert_eq!(rgb[..3], rgb[3..]);
    }

    #[test]
    fn test_yuyv_invalid_length() {
        let result = yuyv_to_rgb(&[100, 128], 2, 1);
        assert!(matches!(
            result,
            Err(FrameError::InvalidLength { expected: 4, actual: 2 })
        ));
    }

    #[test]
    fn test_grey_to_rgb() {
        let rgb = grey_to_rgb(&[10, 200], 2, 1).unwrap();
        assert_eq!(rgb, vec![10, 10, 10, 200, 200, 200]);
    }

    #[test]
    fn test_jpeg_roundtrip_dimensions() {
        let frame = Frame::from_rgb(vec![128u8; 16 * 8 * 3], 16, 8, 0);
        let jpeg = frame.encode_jpeg(90).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        let (rgb, w, h) = mjpeg_to_rgb(&jpeg).unwrap();
        assert_eq!((w, h), (16, 8));
        assert_eq!(rgb.len(), 16 * 8 * 3);
    }

    #[test]
    fn test_encode_rejects_short_buffer() {
        let frame = Frame::from_rgb(vec![0u8; 10], 4, 4, 0);
        assert!(matches!(
            frame.encode_jpeg(90),
            Err(FrameError::InvalidLength { .. })
        ));
    }

    #[test]
    fn test_save_jpeg_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.jpg");
        let frame = Frame::from_rgb(vec![200u8; 8 * 8 * 3], 8, 8, 1);
        frame.save_jpeg(&path, 90).unwrap();
        assert!(std::fs::metadata(&path).unwrap().len() > 0);
    }
}
