//! Splits a reference strip into per-character glyphs by vertical ink
//! projection, then rebuilds a clean, evenly spaced strip from them.

use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, ImageBuffer, Luma};
use serde::Serialize;

use crate::transform::{binarize_luma, map_luma, tone_curve};

/// Luminance below which a pixel counts as ink after contrast boosting.
pub const INK_THRESHOLD: u8 = 140;
/// Every glyph is resampled to this height before recognition.
pub const GLYPH_HEIGHT: u32 = 64;
/// White border around each single-character canvas.
pub const GLYPH_PADDING: u32 = 20;
const MIN_GLYPH_WIDTH: u32 = 12;
const STRIP_MARGIN: u32 = 32;
const STRIP_GAP: u32 = 20;
const MIN_STRIP_WIDTH: u32 = 100;

/// Bounding box of one ink run, in strip pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Glyph {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

#[derive(Debug, Clone)]
pub struct Segmentation {
    pub glyphs: Vec<Glyph>,
    /// One padded, height-normalized canvas per glyph, left to right.
    pub chars: Vec<GrayImage>,
    /// All glyphs laid side by side on a white canvas with uniform gaps.
    pub strip: GrayImage,
}

/// Contrast ×3, brightness ×1.05, then hard threshold at [`INK_THRESHOLD`].
pub fn binarize(img: &DynamicImage) -> GrayImage {
    let boosted = map_luma(&img.to_luma8(), &tone_curve(3.0, 1.05));
    binarize_luma(&boosted, INK_THRESHOLD)
}

/// Locate glyphs in a binarized strip.
///
/// A column is inked if any pixel in it is black. Contiguous inked columns
/// form a run; runs one pixel wide are specks and are dropped, as are runs
/// whose ink occupies a single row.
pub fn find_glyphs(binary: &GrayImage) -> Vec<Glyph> {
    let (width, height) = binary.dimensions();
    let inked = |x: u32| (0..height).any(|y| binary.get_pixel(x, y)[0] == 0);

    let mut glyphs = Vec::new();
    let mut run_start: Option<u32> = None;
    for x in 0..=width {
        let ink = x < width && inked(x);
        match (ink, run_start) {
            (true, None) => run_start = Some(x),
            (false, Some(start)) => {
                run_start = None;
                if x - start > 1 {
                    if let Some(glyph) = vertical_bounds(binary, start, x) {
                        glyphs.push(glyph);
                    }
                }
            }
            _ => {}
        }
    }
    glyphs
}

fn vertical_bounds(binary: &GrayImage, x0: u32, x1: u32) -> Option<Glyph> {
    let rows: Vec<u32> = (0..binary.height())
        .filter(|&y| (x0..x1).any(|x| binary.get_pixel(x, y)[0] == 0))
        .collect();
    let (min_y, max_y) = (*rows.first()?, *rows.last()?);
    (max_y > min_y).then_some(Glyph { x: x0, y: min_y, w: x1 - x0, h: max_y - min_y + 1 })
}

/// Segment a strip. Returns `None` when no glyph is found, so callers can
/// fall back to whole-strip recognition.
///
/// Glyph pixels are taken from the original strip, not the binarized copy,
/// so anti-aliased edges survive into recognition.
pub fn segment(strip: &DynamicImage) -> Option<Segmentation> {
    let glyphs = find_glyphs(&binarize(strip));
    if glyphs.is_empty() {
        return None;
    }

    let source = strip.to_luma8();
    let scaled: Vec<GrayImage> = glyphs
        .iter()
        .map(|g| {
            let draw_w = ((g.w * GLYPH_HEIGHT) as f32 / g.h as f32).round() as u32;
            let view = imageops::crop_imm(&source, g.x, g.y, g.w, g.h).to_image();
            imageops::resize(&view, draw_w.max(MIN_GLYPH_WIDTH), GLYPH_HEIGHT, FilterType::Lanczos3)
        })
        .collect();

    let chars = scaled
        .iter()
        .map(|glyph| {
            let mut canvas = white(
                glyph.width() + 2 * GLYPH_PADDING,
                GLYPH_HEIGHT + 2 * GLYPH_PADDING,
            );
            imageops::replace(&mut canvas, glyph, GLYPH_PADDING as i64, GLYPH_PADDING as i64);
            canvas
        })
        .collect();

    let content_w: u32 = scaled.iter().map(|g| g.width() + STRIP_GAP).sum();
    let mut composite = white(
        (content_w + 2 * STRIP_MARGIN).max(MIN_STRIP_WIDTH),
        GLYPH_HEIGHT + 2 * STRIP_MARGIN,
    );
    let mut cursor = STRIP_MARGIN;
    for glyph in &scaled {
        imageops::replace(&mut composite, glyph, cursor as i64, STRIP_MARGIN as i64);
        cursor += glyph.width() + STRIP_GAP;
    }

    Some(Segmentation { glyphs, chars, strip: composite })
}

fn white(width: u32, height: u32) -> GrayImage {
    ImageBuffer::from_pixel(width, height, Luma([255]))
}
