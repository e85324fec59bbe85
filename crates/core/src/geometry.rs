use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum CoreError {
    #[error("Unsupported rotation: {0}° (expected 0, 90, 180 or 270)")]
    InvalidRotation(u16),
    #[error("Crop area out of range: {0}")]
    InvalidCropArea(String),
    #[error("Manifest entry is missing its {0}")]
    EmptyManifestField(&'static str),
    #[error("Failed to parse capture rules: {0}")]
    Config(String),
}

/// Quarter-turn rotation applied to a label image before any crop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub enum Rotation {
    #[default]
    None,
    Cw90,
    Half,
    Cw270,
}

impl Rotation {
    pub fn degrees(self) -> u16 {
        match self {
            Rotation::None => 0,
            Rotation::Cw90 => 90,
            Rotation::Half => 180,
            Rotation::Cw270 => 270,
        }
    }

    /// Whether the rotated canvas swaps width and height.
    pub fn swaps_axes(self) -> bool {
        matches!(self, Rotation::Cw90 | Rotation::Cw270)
    }
}

impl TryFrom<u16> for Rotation {
    type Error = CoreError;

    fn try_from(degrees: u16) -> Result<Self, Self::Error> {
        match degrees % 360 {
            0 => Ok(Rotation::None),
            90 => Ok(Rotation::Cw90),
            180 => Ok(Rotation::Half),
            270 => Ok(Rotation::Cw270),
            _ => Err(CoreError::InvalidRotation(degrees)),
        }
    }
}

impl From<Rotation> for u16 {
    fn from(r: Rotation) -> Self {
        r.degrees()
    }
}

impl fmt::Display for Rotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}°", self.degrees())
    }
}

/// A capture zone expressed as fractions of the rotated image.
///
/// All four values live in `[0, 1]`, which keeps the zone valid at any render
/// resolution.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CropArea {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl CropArea {
    pub const FULL: CropArea = CropArea { x: 0.0, y: 0.0, w: 1.0, h: 1.0 };

    pub fn new(x: f64, y: f64, w: f64, h: f64) -> Result<Self, CoreError> {
        let area = Self { x, y, w, h };
        area.validate()?;
        Ok(area)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        let in_unit = |v: f64| (0.0..=1.0).contains(&v);
        if !(in_unit(self.x) && in_unit(self.y) && in_unit(self.w) && in_unit(self.h)) {
            return Err(CoreError::InvalidCropArea(format!("{self:?} has a value outside [0, 1]")));
        }
        if self.w <= 0.0 || self.h <= 0.0 {
            return Err(CoreError::InvalidCropArea(format!("{self:?} has no area")));
        }
        if self.x + self.w > 1.0 + f64::EPSILON || self.y + self.h > 1.0 + f64::EPSILON {
            return Err(CoreError::InvalidCropArea(format!("{self:?} extends past the image edge")));
        }
        Ok(())
    }

    /// Map onto a `width` × `height` pixel grid as `(x, y, w, h)`.
    ///
    /// The result is clamped to the grid and is never smaller than 1×1.
    pub fn to_pixels(&self, width: u32, height: u32) -> (u32, u32, u32, u32) {
        let width = width.max(1);
        let height = height.max(1);
        let px = ((self.x * width as f64).floor() as u32).min(width - 1);
        let py = ((self.y * height as f64).floor() as u32).min(height - 1);
        let pw = ((self.w * width as f64).round() as u32).clamp(1, width - px);
        let ph = ((self.h * height as f64).round() as u32).clamp(1, height - py);
        (px, py, pw, ph)
    }
}
