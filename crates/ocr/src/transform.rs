//! Rotate → crop → upscale → filter, the one path every raster read goes
//! through so barcode and OCR zones share identical coordinate semantics.

use dockmark_core::{CropArea, Rotation};
use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, ImageBuffer, Luma};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use thiserror::Error;

/// Cropped zones are resampled to this multiple of their source size so thin
/// strokes keep several pixels of ink before filtering.
pub const UPSCALE_FACTOR: u32 = 3;

/// Luminance below which the threshold filter paints a pixel black.
pub const THRESHOLD_CUTOFF: u8 = 120;

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("Failed to load image: {0}")]
    Load(#[from] image::ImageError),
    #[error("Failed to encode processed image: {0}")]
    Encode(String),
    #[error("Source image is empty")]
    EmptySource,
}

/// Pixel transform applied after cropping, gentlest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FilterKind {
    Raw,
    /// Grayscale with a 1.5× contrast boost.
    GrayscaleContrast,
    /// Pure black/white at [`THRESHOLD_CUTOFF`].
    Threshold,
    /// Grayscale with a 3.5× contrast boost and a slight brightening.
    HighContrast,
}

impl FilterKind {
    pub const ALL: [FilterKind; 4] = [
        FilterKind::Raw,
        FilterKind::GrayscaleContrast,
        FilterKind::Threshold,
        FilterKind::HighContrast,
    ];

    pub fn apply(self, img: &DynamicImage) -> DynamicImage {
        match self {
            FilterKind::Raw => img.clone(),
            FilterKind::GrayscaleContrast => {
                DynamicImage::ImageLuma8(map_luma(&img.to_luma8(), &tone_curve(1.5, 1.0)))
            }
            FilterKind::Threshold => {
                DynamicImage::ImageLuma8(binarize_luma(&img.to_luma8(), THRESHOLD_CUTOFF))
            }
            FilterKind::HighContrast => {
                DynamicImage::ImageLuma8(map_luma(&img.to_luma8(), &tone_curve(3.5, 1.1)))
            }
        }
    }
}

impl std::fmt::Display for FilterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FilterKind::Raw => write!(f, "raw"),
            FilterKind::GrayscaleContrast => write!(f, "grayscale"),
            FilterKind::Threshold => write!(f, "threshold"),
            FilterKind::HighContrast => write!(f, "high-contrast"),
        }
    }
}

/// Lookup table for `((v - 128) * contrast + 128) * brightness`, clamped.
pub(crate) fn tone_curve(contrast: f32, brightness: f32) -> [u8; 256] {
    let mut lut = [0u8; 256];
    for (v, out) in lut.iter_mut().enumerate() {
        let adjusted = ((v as f32 - 128.0) * contrast + 128.0) * brightness;
        *out = adjusted.round().clamp(0.0, 255.0) as u8;
    }
    lut
}

pub(crate) fn map_luma(gray: &GrayImage, lut: &[u8; 256]) -> GrayImage {
    ImageBuffer::from_fn(gray.width(), gray.height(), |x, y| {
        Luma([lut[gray.get_pixel(x, y)[0] as usize]])
    })
}

pub(crate) fn binarize_luma(gray: &GrayImage, cutoff: u8) -> GrayImage {
    ImageBuffer::from_fn(gray.width(), gray.height(), |x, y| {
        let v = if gray.get_pixel(x, y)[0] < cutoff { 0 } else { 255 };
        Luma([v])
    })
}

/// Rotate clockwise by quarter turns; 90° and 270° swap the canvas axes so
/// nothing is clipped.
pub fn rotate(source: &DynamicImage, rotation: Rotation) -> DynamicImage {
    match rotation {
        Rotation::None => source.clone(),
        Rotation::Cw90 => source.rotate90(),
        Rotation::Half => source.rotate180(),
        Rotation::Cw270 => source.rotate270(),
    }
}

/// Render one zone of a label for decoding or OCR.
///
/// With an `area`, the zone is cut from the rotated image and upscaled by
/// [`UPSCALE_FACTOR`]; without one, the whole rotated image is used at its
/// native size. The filter is applied last. Identical inputs always produce
/// identical pixels.
pub fn crop_and_filter(
    source: &DynamicImage,
    area: Option<&CropArea>,
    rotation: Rotation,
    filter: FilterKind,
) -> Result<DynamicImage, TransformError> {
    if source.width() == 0 || source.height() == 0 {
        return Err(TransformError::EmptySource);
    }

    let rotated = rotate(source, rotation);
    let region = match area {
        Some(area) => {
            let (x, y, w, h) = area.to_pixels(rotated.width(), rotated.height());
            rotated.crop_imm(x, y, w, h).resize_exact(
                w * UPSCALE_FACTOR,
                h * UPSCALE_FACTOR,
                FilterType::Lanczos3,
            )
        }
        None => rotated,
    };

    Ok(filter.apply(&region))
}

pub fn load_image(data: &[u8]) -> Result<DynamicImage, TransformError> {
    Ok(image::load_from_memory(data)?)
}

pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, TransformError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .map_err(|e| TransformError::Encode(e.to_string()))?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn gradient_gray(width: u32, height: u32) -> DynamicImage {
        let img: GrayImage =
            ImageBuffer::from_fn(width, height, |x, _| Luma([(x * 255 / (width - 1)) as u8]));
        DynamicImage::ImageLuma8(img)
    }

    /// 4×2 image whose top-left pixel is red and everything else white.
    fn marked_corner() -> DynamicImage {
        let img: RgbImage = ImageBuffer::from_fn(4, 2, |x, y| {
            if x == 0 && y == 0 {
                Rgb([255, 0, 0])
            } else {
                Rgb([255, 255, 255])
            }
        });
        DynamicImage::ImageRgb8(img)
    }

    #[test]
    fn quarter_turns_swap_dimensions() {
        let img = marked_corner();
        let r = rotate(&img, Rotation::Cw90);
        assert_eq!((r.width(), r.height()), (2, 4));
        // Clockwise: the top-left corner moves to the top-right.
        assert_eq!(r.to_rgb8().get_pixel(1, 0), &Rgb([255, 0, 0]));
        let r = rotate(&img, Rotation::Half);
        assert_eq!((r.width(), r.height()), (4, 2));
        assert_eq!(r.to_rgb8().get_pixel(3, 1), &Rgb([255, 0, 0]));
    }

    #[test]
    fn crop_is_relative_to_rotated_canvas_and_upscaled() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(200, 100));
        let area = CropArea::new(0.0, 0.0, 0.5, 0.5).unwrap();
        let out = crop_and_filter(&img, Some(&area), Rotation::Cw90, FilterKind::Raw).unwrap();
        // Rotated canvas is 100×200, so half of it is 50×100, then ×3.
        assert_eq!((out.width(), out.height()), (150, 300));
    }

    #[test]
    fn no_area_keeps_native_size() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(20, 10));
        let out = crop_and_filter(&img, None, Rotation::None, FilterKind::Threshold).unwrap();
        assert_eq!((out.width(), out.height()), (20, 10));
    }

    #[test]
    fn threshold_is_pure_black_and_white() {
        let out = FilterKind::Threshold.apply(&gradient_gray(256, 1)).to_luma8();
        assert!(out.pixels().all(|p| p[0] == 0 || p[0] == 255));
        assert_eq!(out.get_pixel(119, 0)[0], 0);
        assert_eq!(out.get_pixel(120, 0)[0], 255);
    }

    #[test]
    fn high_contrast_spreads_more_than_grayscale() {
        let img = gradient_gray(256, 1);
        let soft = FilterKind::GrayscaleContrast.apply(&img).to_luma8();
        let hard = FilterKind::HighContrast.apply(&img).to_luma8();
        let count_extremes =
            |g: &GrayImage| g.pixels().filter(|p| p[0] == 0 || p[0] == 255).count();
        assert!(count_extremes(&hard) > count_extremes(&soft));
    }

    #[test]
    fn tone_curve_is_identity_at_unit_gain() {
        let lut = tone_curve(1.0, 1.0);
        assert!(lut.iter().enumerate().all(|(i, v)| *v as usize == i));
    }

    #[test]
    fn output_is_deterministic() {
        let img = gradient_gray(64, 8);
        let area = CropArea::new(0.1, 0.0, 0.5, 1.0).unwrap();
        for filter in FilterKind::ALL {
            let a = crop_and_filter(&img, Some(&area), Rotation::Cw270, filter).unwrap();
            let b = crop_and_filter(&img, Some(&area), Rotation::Cw270, filter).unwrap();
            assert_eq!(a.as_bytes(), b.as_bytes(), "filter {filter} not deterministic");
        }
    }

    #[test]
    fn empty_source_is_rejected() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(0, 0));
        assert!(matches!(
            crop_and_filter(&img, None, Rotation::None, FilterKind::Raw),
            Err(TransformError::EmptySource)
        ));
    }

    #[test]
    fn png_round_trip_header() {
        let png = encode_png(&gradient_gray(4, 4)).unwrap();
        assert_eq!(&png[..4], b"\x89PNG");
        let back = load_image(&png).unwrap();
        assert_eq!((back.width(), back.height()), (4, 4));
    }
}
