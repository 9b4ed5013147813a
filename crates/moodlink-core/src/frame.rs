//! Frame type and the brightness/contrast normalization applied before face location.

/// A captured grayscale frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Grayscale pixel data (width * height bytes, row-major).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub sequence: u32,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, sequence: u32) -> Self {
        Self {
            data,
            width,
            height,
            sequence,
        }
    }
}

/// Gamma/contrast/brightness transform, applied through a 256-entry lookup table.
///
/// Each pixel `p` maps to `clamp((p/255)^(1/gamma) * contrast + brightness) * 255`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Normalization {
    pub gamma: f32,
    pub contrast: f32,
    pub brightness: f32,
}

impl Default for Normalization {
    /// Contrast boost tuned for the frontal face locator.
    fn default() -> Self {
        Self { gamma: 1.0, contrast: 1.5, brightness: 0.0 }
    }
}

impl Normalization {
    /// Transform that leaves every pixel unchanged.
    pub const IDENTITY: Normalization = Normalization { gamma: 1.0, contrast: 1.0, brightness: 0.0 };

    pub fn lut(&self) -> [u8; 256] {
        let inv_gamma = if self.gamma > 0.0 { 1.0 / self.gamma } else { 1.0 };
        std::array::from_fn(|i| {
            let x = (i as f32 / 255.0).powf(inv_gamma);
            let y = (x * self.contrast + self.brightness).clamp(0.0, 1.0);
            (y * 255.0).round() as u8
        })
    }

    /// Normalize `frame` in place.
    pub fn apply(&self, frame: &mut Frame) {
        let lut = self.lut();
        for px in frame.data.iter_mut() {
            *px = lut[*px as usize];
        }
    }
}
