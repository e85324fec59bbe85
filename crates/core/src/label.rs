use serde::{Deserialize, Serialize};
use std::fmt;

use crate::geometry::{CoreError, CropArea, Rotation};

/// Operator-drawn capture zones, applied uniformly to every label in a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureRules {
    pub barcode_area: Option<CropArea>,
    pub ocr_area: Option<CropArea>,
    pub package_qty_area: Option<CropArea>,
    pub rotation: Rotation,
}

impl CaptureRules {
    pub fn from_toml(toml_content: &str) -> Result<Self, CoreError> {
        let rules: CaptureRules =
            toml::from_str(toml_content).map_err(|e| CoreError::Config(e.to_string()))?;
        rules.validate()?;
        Ok(rules)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        [self.barcode_area, self.ocr_area, self.package_qty_area]
            .iter()
            .flatten()
            .try_for_each(CropArea::validate)
    }
}

/// Where a label's reference came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefSource {
    EmbeddedText,
    Barcode,
    GlyphOcr,
    Vision,
    /// Taken from the manifest row in sequential-assignment mode.
    Sequential,
}

/// A label's position within a multi-package order, e.g. "2/3".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageInfo {
    pub sequence: u32,
    pub total: u32,
}

impl fmt::Display for PackageInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.sequence, self.total)
    }
}

/// Package numbering read off the label itself, before reconciliation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageHint {
    pub sequence: Option<u32>,
    pub total: Option<u32>,
}

impl PackageHint {
    pub fn is_empty(&self) -> bool {
        self.sequence.is_none() && self.total.is_none()
    }

    /// Fill unknown fields from `other`, keeping what is already known.
    pub fn or(self, other: PackageHint) -> PackageHint {
        PackageHint {
            sequence: self.sequence.or(other.sequence),
            total: self.total.or(other.total),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    NoReference,
    NoManifestMatch { candidate: String },
    ManifestExhausted,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::NoReference => write!(f, "no reference detected"),
            FailureReason::NoManifestMatch { candidate } => {
                write!(f, "no manifest match for '{candidate}'")
            }
            FailureReason::ManifestExhausted => write!(f, "manifest exhausted"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LabelStatus {
    Pending,
    Resolving,
    Matched,
    Unmatched { reason: FailureReason },
}

impl LabelStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LabelStatus::Matched | LabelStatus::Unmatched { .. })
    }
}

impl fmt::Display for LabelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LabelStatus::Pending => write!(f, "pending"),
            LabelStatus::Resolving => write!(f, "resolving"),
            LabelStatus::Matched => write!(f, "matched"),
            LabelStatus::Unmatched { reason } => write!(f, "unmatched: {reason}"),
        }
    }
}

/// A near-miss manifest row offered to the operator on a failed match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchCandidate {
    pub order_number: String,
    pub amazon_ref: String,
    pub confidence: f32,
}

/// PNG snapshots of the exact crops a label was read from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DebugArtifacts {
    pub barcode_crop: Option<Vec<u8>>,
    pub ocr_crop: Option<Vec<u8>>,
    pub glyph_strip: Option<Vec<u8>>,
    pub package_qty_crop: Option<Vec<u8>>,
}

impl DebugArtifacts {
    pub fn is_empty(&self) -> bool {
        self.barcode_crop.is_none()
            && self.ocr_crop.is_none()
            && self.glyph_strip.is_none()
            && self.package_qty_crop.is_none()
    }
}

/// Terminal outcome for one label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionResult {
    pub label_id: String,
    pub candidate_ref: Option<String>,
    pub ref_source: Option<RefSource>,
    pub raw_barcode: Option<String>,
    pub hint: PackageHint,
    pub matched_order: Option<String>,
    pub matched_ref: Option<String>,
    pub package_info: Option<PackageInfo>,
    pub status: LabelStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub candidates: Vec<MatchCandidate>,
    #[serde(skip)]
    pub debug: DebugArtifacts,
}

impl ExtractionResult {
    pub fn pending(label_id: impl Into<String>) -> Self {
        Self {
            label_id: label_id.into(),
            candidate_ref: None,
            ref_source: None,
            raw_barcode: None,
            hint: PackageHint::default(),
            matched_order: None,
            matched_ref: None,
            package_info: None,
            status: LabelStatus::Pending,
            candidates: Vec::new(),
            debug: DebugArtifacts::default(),
        }
    }

    pub fn is_matched(&self) -> bool {
        self.status == LabelStatus::Matched
    }

    /// Barcode- or label-reported sequence, used to order packages of one order.
    pub fn sequence(&self) -> Option<u32> {
        self.hint.sequence
    }
}
