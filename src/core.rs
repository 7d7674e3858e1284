use crate::error::{RetrackError, RetrackResult};

pub use kurbo::{Affine, Point, Rect, Vec2};

/// Focal point pinned per frame, in source pixel coordinates.
pub type Anchor = Point;

/// A decoded video frame: straight-alpha RGBA8, row-major, tightly packed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl Frame {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> RetrackResult<Self> {
        let expected = rgba_len(width, height)?;
        if data.len() != expected {
            return Err(RetrackError::validation(format!(
                "frame buffer size mismatch: got {} bytes, expected {expected} for {width}x{height}",
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    pub fn filled(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        Self {
            width,
            height,
            data: rgba.repeat(width as usize * height as usize),
        }
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let off = (y as usize * self.width as usize + x as usize) * 4;
        [
            self.data[off],
            self.data[off + 1],
            self.data[off + 2],
            self.data[off + 3],
        ]
    }

    pub fn to_image(&self) -> RetrackResult<image::RgbaImage> {
        image::RgbaImage::from_raw(self.width, self.height, self.data.clone())
            .ok_or_else(|| RetrackError::evaluation("frame buffer does not match its dimensions"))
    }

    pub fn from_image(img: image::RgbaImage) -> Self {
        let (width, height) = img.dimensions();
        Self {
            width,
            height,
            data: img.into_raw(),
        }
    }
}

pub(crate) fn rgba_len(width: u32, height: u32) -> RetrackResult<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(4))
        .ok_or_else(|| RetrackError::validation("frame buffer size overflow"))
}

/// Inclusive clamp bounds for one anchor component.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct Range1 {
    pub min: f64,
    pub max: f64,
}

impl Range1 {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Upper bound wins when the range is inverted.
    pub fn clamp(self, v: f64) -> f64 {
        let v = if v < self.min { self.min } else { v };
        if v > self.max { self.max } else { v }
    }
}

impl From<[f64; 2]> for Range1 {
    fn from(v: [f64; 2]) -> Self {
        Self::new(v[0], v[1])
    }
}

impl From<Range1> for [f64; 2] {
    fn from(r: Range1) -> Self {
        [r.min, r.max]
    }
}
