use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use dockmark_core::{
    clean_reference, CaptureRules, CropArea, DebugArtifacts, ExtractionResult, FailureReason,
    LabelStatus, ManifestEntry, PackageHint, PackageInfo, RefSource, Token,
};
use dockmark_manifest::{ReferenceMatcher, SequentialAssigner};
use image::DynamicImage;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::barcode::{self, CarrierPayloadFormat, MatrixDecoder};
use crate::extract::{glyph_char, parse_label_text, parse_package_statement, tokens_text};
use crate::recognizer::{OcrBackend, OcrError, OcrMode, OcrSession};
use crate::segment::{segment, Segmentation};
use crate::transform::{crop_and_filter, encode_png, FilterKind, TransformError};
use crate::types::{Label, MatchMode, Progress, RunAbort, RunOptions, RunReport, RunSummary};
use crate::vision::{VisionError, VisionFallback};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Image transform failed: {0}")]
    Transform(#[from] TransformError),
    #[error("OCR recognition failed: {0}")]
    Ocr(#[from] OcrError),
}

/// Outcome of resolving one label.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub result: ExtractionResult,
    /// Set when the run must stop after this label.
    pub abort: Option<RunAbort>,
}

/// Drives labels through extraction and manifest matching:
/// embedded text → barcode → glyph OCR → vision, then lookup.
pub struct Reconciler<'a, D: MatrixDecoder, V: VisionFallback> {
    rules: &'a CaptureRules,
    matcher: &'a ReferenceMatcher,
    ocr: &'a dyn OcrBackend,
    decoder: &'a D,
    vision: &'a V,
    format: CarrierPayloadFormat,
    options: RunOptions,
}

impl<'a, D: MatrixDecoder, V: VisionFallback> Reconciler<'a, D, V> {
    pub fn new(
        rules: &'a CaptureRules,
        matcher: &'a ReferenceMatcher,
        ocr: &'a dyn OcrBackend,
        decoder: &'a D,
        vision: &'a V,
    ) -> Self {
        Self {
            rules,
            matcher,
            ocr,
            decoder,
            vision,
            format: CarrierPayloadFormat::default(),
            options: RunOptions::default(),
        }
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_payload_format(mut self, format: CarrierPayloadFormat) -> Self {
        self.format = format;
        self
    }

    /// Process labels strictly in order.
    ///
    /// One label's failure never stops the run; only cancellation or a
    /// rejected vision credential does, and the report then carries the
    /// results produced so far. Progress is sent as each label completes.
    pub async fn run(
        &self,
        labels: &[Label],
        progress: Option<&mpsc::Sender<Progress>>,
        cancel: &AtomicBool,
    ) -> RunReport {
        let started_at = Utc::now();
        info!(labels = labels.len(), mode = ?self.options.mode, "reconciliation started");

        let mut session = OcrSession::new(self.ocr);
        let mut assigner = SequentialAssigner::new(self.matcher.entries());
        let mut seen: HashSet<&str> = HashSet::new();
        let mut results = Vec::with_capacity(labels.len());
        let mut skipped = 0;
        let mut aborted = None;

        for (index, label) in labels.iter().enumerate() {
            if cancel.load(Ordering::SeqCst) {
                info!(done = results.len(), "reconciliation cancelled");
                aborted = Some(RunAbort::Cancelled);
                break;
            }
            if !seen.insert(label.id.as_str()) {
                warn!(label = %label.id, source = %label.source_name, "duplicate label skipped");
                skipped += 1;
                continue;
            }
            let resolution = match self.options.mode {
                MatchMode::Reference => self.resolve_label(label, &mut session).await,
                MatchMode::Sequential => Resolution {
                    result: assign_next(label, &mut assigner),
                    abort: None,
                },
            };
            info!(label = %label.id, status = %resolution.result.status, "label resolved");
            if let Some(tx) = progress {
                let _ = tx.try_send(Progress {
                    current_index: index + 1,
                    total_count: labels.len(),
                    status_text: format!(
                        "Label {} of {}: {}",
                        index + 1,
                        labels.len(),
                        resolution.result.status
                    ),
                });
            }
            results.push(resolution.result);

            if let Some(abort) = resolution.abort {
                warn!(%abort, "reconciliation aborted");
                aborted = Some(abort);
                break;
            }
        }
        session.release();

        if self.options.mode == MatchMode::Reference {
            results = number_packages(results, self.matcher.entries());
        }

        let summary = RunSummary::from_results(&results, skipped);
        info!(
            matched = summary.matched,
            unmatched = summary.unmatched,
            skipped = summary.skipped_duplicates,
            "reconciliation finished"
        );
        RunReport { started_at, finished_at: Utc::now(), results, summary, aborted }
    }

    /// Extract a reference from one label and look it up in the manifest.
    /// Package numbering is left to [`number_packages`].
    pub async fn resolve_label(&self, label: &Label, session: &mut OcrSession<'_>) -> Resolution {
        let mut result = ExtractionResult::pending(&label.id);
        result.status = LabelStatus::Resolving;
        let mut artifacts = DebugArtifacts::default();
        let mut abort = None;

        let text = parse_label_text(&tokens_text(&label.tokens));
        let mut found = text.reference.map(|r| (r, RefSource::EmbeddedText));
        let mut payload_hint = PackageHint::default();

        if found.is_none() {
            let zone = self.rules.barcode_area.as_ref();
            if let Some(hit) =
                barcode::scan(self.decoder, &self.format, &label.image, zone, self.rules.rotation)
            {
                self.keep(&mut artifacts.barcode_crop, &hit.image);
                result.raw_barcode = Some(hit.raw_text);
                if let Some(parsed) = hit.parsed {
                    payload_hint = PackageHint {
                        sequence: parsed.sequence,
                        total: parsed.total_from_payload,
                    };
                    found = clean_reference(&parsed.reference).map(|r| (r, RefSource::Barcode));
                }
            }
        }

        if found.is_none() {
            if let Some(area) = &self.rules.ocr_area {
                found = self
                    .read_glyphs(label, area, session, &mut artifacts)
                    .map(|r| (r, RefSource::GlyphOcr));
            }
        }

        if found.is_none() && self.vision.is_enabled() {
            match self.ask_vision(label).await {
                Ok(reference) => found = reference.map(|r| (r, RefSource::Vision)),
                Err(VisionError::Unauthorized(message)) => {
                    abort = Some(RunAbort::VisionUnauthorized { message });
                }
                Err(e) => warn!(label = %label.id, "vision fallback failed: {e}"),
            }
        }

        let qty_hint = match &self.rules.package_qty_area {
            Some(area) => self.read_package_qty(label, area, session, &mut artifacts),
            None => PackageHint::default(),
        };
        // Explicit "N of M" statements are trusted for the sequence; the
        // carrier payload is trusted for the total.
        let statement = qty_hint.or(text.hint);
        result.hint = PackageHint {
            sequence: statement.sequence.or(payload_hint.sequence),
            total: payload_hint.total.or(statement.total),
        };
        result.debug = artifacts;

        match found {
            None => {
                result.status = LabelStatus::Unmatched { reason: FailureReason::NoReference };
            }
            Some((reference, source)) => {
                debug!(label = %label.id, %reference, ?source, "reference extracted");
                result.ref_source = Some(source);
                match self.matcher.find(&reference) {
                    Some(hit) => {
                        result.matched_order = Some(hit.entry.order_number.clone());
                        result.matched_ref = Some(hit.entry.amazon_ref.clone());
                        result.status = LabelStatus::Matched;
                    }
                    None => {
                        result.candidates =
                            self.matcher.suggest(&reference, self.options.suggestion_limit);
                        result.status = LabelStatus::Unmatched {
                            reason: FailureReason::NoManifestMatch { candidate: reference.clone() },
                        };
                    }
                }
                result.candidate_ref = Some(reference);
            }
        }

        Resolution { result, abort }
    }

    /// Segment the OCR zone and read it glyph by glyph; fall back to reading
    /// the whole strip when segmentation finds nothing usable.
    fn read_glyphs(
        &self,
        label: &Label,
        area: &CropArea,
        session: &mut OcrSession<'_>,
        artifacts: &mut DebugArtifacts,
    ) -> Option<String> {
        let crop = match crop_and_filter(&label.image, Some(area), self.rules.rotation, FilterKind::Raw)
        {
            Ok(img) => img,
            Err(e) => {
                warn!(label = %label.id, "ocr zone render failed: {e}");
                return None;
            }
        };
        self.keep(&mut artifacts.ocr_crop, &crop);

        if let Some(Segmentation { glyphs, chars, strip }) = segment(&crop) {
            debug!(label = %label.id, glyphs = glyphs.len(), "ocr zone segmented");
            self.keep(&mut artifacts.glyph_strip, &DynamicImage::ImageLuma8(strip));

            let mut text = Some(String::with_capacity(chars.len()));
            for glyph in chars {
                match session.recognize(OcrMode::SingleChar, &DynamicImage::ImageLuma8(glyph)) {
                    Ok(raw) => {
                        if let Some(t) = text.as_mut() {
                            t.extend(glyph_char(&raw));
                        }
                    }
                    Err(e) => {
                        warn!(label = %label.id, "glyph recognition failed: {e}");
                        text = None;
                        break;
                    }
                }
            }
            if let Some(reference) = text.as_deref().and_then(clean_reference) {
                return Some(reference);
            }
            debug!(label = %label.id, read = ?text, "glyph read unusable, trying whole strip");
        }

        match session.recognize(OcrMode::Strip, &crop) {
            Ok(raw) => clean_reference(&raw),
            Err(e) => {
                warn!(label = %label.id, "strip recognition failed: {e}");
                None
            }
        }
    }

    fn read_package_qty(
        &self,
        label: &Label,
        area: &CropArea,
        session: &mut OcrSession<'_>,
        artifacts: &mut DebugArtifacts,
    ) -> PackageHint {
        let crop = match crop_and_filter(
            &label.image,
            Some(area),
            self.rules.rotation,
            FilterKind::GrayscaleContrast,
        ) {
            Ok(img) => img,
            Err(e) => {
                warn!(label = %label.id, "package zone render failed: {e}");
                return PackageHint::default();
            }
        };
        self.keep(&mut artifacts.package_qty_crop, &crop);

        match session.recognize(OcrMode::Strip, &crop) {
            Ok(raw) => parse_package_statement(&raw),
            Err(e) => {
                warn!(label = %label.id, "package zone recognition failed: {e}");
                PackageHint::default()
            }
        }
    }

    async fn ask_vision(&self, label: &Label) -> Result<Option<String>, VisionError> {
        let image = crop_and_filter(
            &label.image,
            self.rules.ocr_area.as_ref(),
            self.rules.rotation,
            FilterKind::Raw,
        )
        .and_then(|img| encode_png(&img));
        let png = match image {
            Ok(png) => png,
            Err(e) => {
                warn!(label = %label.id, "vision image render failed: {e}");
                return Ok(None);
            }
        };
        let answer = self.vision.extract_reference(&png).await?;
        Ok(answer.as_deref().and_then(clean_reference))
    }

    fn keep(&self, slot: &mut Option<Vec<u8>>, image: &DynamicImage) {
        if self.options.capture_debug {
            *slot = encode_png(image).ok();
        }
    }
}

fn assign_next(label: &Label, assigner: &mut SequentialAssigner<'_>) -> ExtractionResult {
    let mut result = ExtractionResult::pending(&label.id);
    match assigner.next() {
        Some((entry, info)) => {
            result.ref_source = Some(RefSource::Sequential);
            result.candidate_ref = Some(entry.amazon_ref.clone());
            result.matched_order = Some(entry.order_number.clone());
            result.matched_ref = Some(entry.amazon_ref.clone());
            result.package_info = Some(info);
            result.status = LabelStatus::Matched;
        }
        None => {
            result.status = LabelStatus::Unmatched { reason: FailureReason::ManifestExhausted };
        }
    }
    result
}

/// Number matched labels within each order.
///
/// Every matched label of an order shares one counter, whatever manifest row
/// it matched. A label keeps the sequence it states when no earlier label of
/// the order already claimed it; the rest take the lowest free numbers in run
/// order. The total is the first stated total in the group, else the sum of
/// the order's manifest package counts, else the group size, and never less
/// than the group size.
pub fn number_packages(
    mut results: Vec<ExtractionResult>,
    entries: &[ManifestEntry],
) -> Vec<ExtractionResult> {
    let mut groups: HashMap<String, Vec<usize>> = HashMap::new();
    for (i, r) in results.iter().enumerate() {
        if let (true, Some(order)) = (r.is_matched(), &r.matched_order) {
            if r.package_info.is_none() {
                groups.entry(order.clone()).or_default().push(i);
            }
        }
    }

    for (order, members) in groups {
        let count = members.len() as u32;
        let stated = members.iter().find_map(|&i| results[i].hint.total);
        let listed: u32 = entries
            .iter()
            .filter(|e| e.order_number == order)
            .map(|e| e.total_packages)
            .sum();
        let listed = Some(listed).filter(|t| *t > 0);
        let total = stated.or(listed).unwrap_or(count).max(count);

        let mut taken = BTreeSet::new();
        let mut sequences: Vec<Option<u32>> = members
            .iter()
            .map(|&i| {
                results[i]
                    .sequence()
                    .filter(|s| *s >= 1 && *s <= total && taken.insert(*s))
            })
            .collect();
        let mut free = (1..).filter(|s| !taken.contains(s));
        for seq in sequences.iter_mut().filter(|s| s.is_none()) {
            *seq = free.next();
        }

        for (&i, seq) in members.iter().zip(sequences) {
            if let Some(sequence) = seq {
                results[i].package_info = Some(PackageInfo { sequence, total });
            }
        }
    }
    results
}

/// Full-page OCR of a manifest page that has no text layer.
pub fn page_tokens(ocr: &dyn OcrBackend, image: &DynamicImage) -> Result<Vec<Token>, PipelineError> {
    let mut session = OcrSession::new(ocr);
    Ok(session.page_tokens(image)?)
}
