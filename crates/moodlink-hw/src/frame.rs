//! Raw sensor buffers to 8-bit grayscale.

use thiserror::Error;

/// Pixel format negotiated with the capture driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed, two bytes per pixel; luma is every even byte.
    Yuyv,
    /// 8-bit grayscale.
    Grey,
    /// 16-bit little-endian grayscale, downscaled to the high byte.
    Y16,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Grey => 1,
            PixelFormat::Yuyv | PixelFormat::Y16 => 2,
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum FrameError {
    #[error("{format:?} buffer too short: expected {expected} bytes, got {actual}")]
    ShortBuffer {
        format: PixelFormat,
        expected: usize,
        actual: usize,
    },
}

/// Convert one raw driver buffer to `width * height` grayscale bytes.
pub fn to_grayscale(
    format: PixelFormat,
    buf: &[u8],
    width: u32,
    height: u32,
) -> Result<Vec<u8>, FrameError> {
    let pixels = (width * height) as usize;
    let expected = pixels * format.bytes_per_pixel();
    if buf.len() < expected {
        return Err(FrameError::ShortBuffer {
            format,
            expected,
            actual: buf.len(),
        });
    }
    let raw = &buf[..expected];
    Ok(match format {
        PixelFormat::Grey => raw.to_vec(),
        PixelFormat::Yuyv => raw.iter().step_by(2).copied().collect(),
        PixelFormat::Y16 => raw.chunks_exact(2).map(|le| le[1]).collect(),
    })
}
