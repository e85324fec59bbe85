use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;

use dockmark_core::{CropArea, Rotation};
use image::DynamicImage;
use regex::Regex;
use tracing::{debug, trace};

use crate::transform::{crop_and_filter, FilterKind};

/// Filters tried on the barcode zone, in order, until one decodes.
pub const BARCODE_FILTER_ORDER: [FilterKind; 4] = [
    FilterKind::Raw,
    FilterKind::HighContrast,
    FilterKind::GrayscaleContrast,
    FilterKind::Threshold,
];

/// Decodes a 2-D matrix symbol (Data Matrix) from a rendered zone.
pub trait MatrixDecoder: Send + Sync {
    fn decode(&self, image: &DynamicImage) -> Option<String>;
}

/// Fixed-position layout of the carrier's label payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CarrierPayloadFormat {
    pub sentinel: char,
    pub min_len: usize,
    pub reference: Range<usize>,
    pub total: Range<usize>,
}

impl Default for CarrierPayloadFormat {
    fn default() -> Self {
        Self { sentinel: 'S', min_len: 15, reference: 1..10, total: 12..15 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedPayload {
    pub reference: String,
    /// Only set when the payload layout carries a package number.
    pub sequence: Option<u32>,
    pub total_from_payload: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct BarcodeResult {
    pub raw_text: String,
    pub filter: FilterKind,
    pub parsed: Option<ParsedPayload>,
    /// The rendered zone that decoded.
    pub image: DynamicImage,
}

macro_rules! re {
    ($name:ident, $pat:expr) => {
        fn $name() -> &'static Regex {
            static R: OnceLock<Regex> = OnceLock::new();
            R.get_or_init(|| Regex::new($pat).expect("invalid regex"))
        }
    };
}

re!(re_marketplace_ref, r"(?i)FBA[A-Z0-9]{6,10}|X00[A-Z0-9]{6,10}");

impl CarrierPayloadFormat {
    /// Interpret a decoded payload.
    ///
    /// Control characters are stripped first. A payload that starts with the
    /// sentinel and is long enough is read by fixed positions; anything else
    /// is searched for a marketplace reference, then for a 9-character
    /// alphanumeric word with letters and digits, then for an 8-digit word.
    pub fn parse(&self, raw: &str) -> Option<ParsedPayload> {
        let chars: Vec<char> = raw.chars().filter(|c| !c.is_control()).collect();
        if chars.is_empty() {
            return None;
        }

        if chars[0] == self.sentinel && chars.len() >= self.min_len {
            let reference: String = chars
                .get(self.reference.clone())?
                .iter()
                .collect::<String>()
                .to_uppercase();
            let total = chars
                .get(self.total.clone())
                .and_then(|s| s.iter().collect::<String>().parse::<u32>().ok())
                .filter(|t| *t > 0);
            return Some(ParsedPayload { reference, sequence: None, total_from_payload: total });
        }

        let cleaned: String = chars.into_iter().collect();
        fallback_reference(&cleaned).map(|reference| ParsedPayload {
            reference,
            sequence: None,
            total_from_payload: None,
        })
    }
}

fn fallback_reference(text: &str) -> Option<String> {
    if let Some(m) = re_marketplace_ref().find(text) {
        return Some(m.as_str().to_uppercase());
    }
    let words: Vec<&str> = text.split(|c: char| !c.is_ascii_alphanumeric()).collect();
    words
        .iter()
        .find(|w| {
            w.len() == 9
                && w.chars().any(|c| c.is_ascii_alphabetic())
                && w.chars().any(|c| c.is_ascii_digit())
        })
        .or_else(|| words.iter().find(|w| w.len() == 8 && w.chars().all(|c| c.is_ascii_digit())))
        .map(|w| w.to_uppercase())
}

pub fn parse_payload(raw: &str) -> Option<ParsedPayload> {
    CarrierPayloadFormat::default().parse(raw)
}

/// Try each filter in [`BARCODE_FILTER_ORDER`] on the barcode zone and stop
/// at the first successful decode. `None` when every variant fails.
pub fn scan(
    decoder: &dyn MatrixDecoder,
    format: &CarrierPayloadFormat,
    source: &DynamicImage,
    area: Option<&CropArea>,
    rotation: Rotation,
) -> Option<BarcodeResult> {
    for filter in BARCODE_FILTER_ORDER {
        let image = match crop_and_filter(source, area, rotation, filter) {
            Ok(img) => img,
            Err(e) => {
                debug!(%filter, "barcode zone render failed: {e}");
                return None;
            }
        };
        match decoder.decode(&image) {
            Some(raw_text) => {
                debug!(%filter, "barcode decoded");
                let parsed = format.parse(&raw_text);
                return Some(BarcodeResult { raw_text, filter, parsed, image });
            }
            None => trace!(%filter, "no barcode"),
        }
    }
    None
}

/// Decoder for builds without a matrix engine; never decodes anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDecoder;

impl MatrixDecoder for NoDecoder {
    fn decode(&self, _image: &DynamicImage) -> Option<String> {
        None
    }
}

// ── Mock decoder (always available, used for tests) ──────────────────────────

/// Fails its first `fail_first` attempts, then returns its payload.
#[derive(Default)]
pub struct MockDecoder {
    payload: Option<String>,
    fail_first: usize,
    calls: AtomicUsize,
}

impl MockDecoder {
    pub fn new(payload: impl Into<String>) -> Self {
        Self { payload: Some(payload.into()), ..Self::default() }
    }

    pub fn none() -> Self {
        Self::default()
    }

    pub fn failing_first(mut self, attempts: usize) -> Self {
        self.fail_first = attempts;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl MatrixDecoder for MockDecoder {
    fn decode(&self, _image: &DynamicImage) -> Option<String> {
        let attempt = self.calls.fetch_add(1, Ordering::SeqCst);
        if attempt < self.fail_first {
            return None;
        }
        self.payload.clone()
    }
}

// ── rxing backend (optional, gated behind `rxing` feature) ────────────────────

#[cfg(feature = "rxing")]
pub mod rxing_backend {
    use super::MatrixDecoder;
    use image::DynamicImage;

    #[derive(Debug, Clone, Copy, Default)]
    pub struct RxingDecoder;

    impl MatrixDecoder for RxingDecoder {
        fn decode(&self, image: &DynamicImage) -> Option<String> {
            let luma = image.to_luma8();
            let (width, height) = luma.dimensions();
            rxing::helpers::detect_in_luma(
                luma.into_raw(),
                width,
                height,
                Some(rxing::BarcodeFormat::DATA_MATRIX),
            )
            .ok()
            .map(|result| result.getText().to_string())
        }
    }
}
