use chrono::{DateTime, Utc};
use dockmark_core::{ExtractionResult, LabelStatus, Token};
use image::DynamicImage;
use serde::{Deserialize, Serialize};

use crate::hash;
use crate::transform::{load_image, TransformError};

/// One label page ready for reconciliation.
#[derive(Debug, Clone)]
pub struct Label {
    pub id: String,
    pub source_name: String,
    pub page_number: u32,
    pub image: DynamicImage,
    /// Embedded text layer, empty for plain photos and scans.
    pub tokens: Vec<Token>,
}

impl Label {
    /// Decode an image file and derive its content-addressed id.
    pub fn from_bytes(
        source_name: impl Into<String>,
        page_number: u32,
        data: &[u8],
        tokens: Vec<Token>,
    ) -> Result<Self, TransformError> {
        Ok(Self {
            id: hash::label_id(data, page_number),
            source_name: source_name.into(),
            page_number,
            image: load_image(data)?,
            tokens,
        })
    }
}

/// How labels are paired with manifest rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchMode {
    /// Read each label's reference and look it up.
    #[default]
    Reference,
    /// Assign rows to labels in run order, one slot per package.
    Sequential,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    pub mode: MatchMode,
    pub capture_debug: bool,
    /// Near-miss rows offered on a failed match.
    pub suggestion_limit: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self { mode: MatchMode::Reference, capture_debug: false, suggestion_limit: 3 }
    }
}

/// Emitted as each label reaches a terminal state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub current_index: usize,
    pub total_count: usize,
    pub status_text: String,
}

/// Why a run stopped before its last label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunAbort {
    Cancelled,
    VisionUnauthorized { message: String },
}

impl std::fmt::Display for RunAbort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunAbort::Cancelled => write!(f, "cancelled"),
            RunAbort::VisionUnauthorized { message } => {
                write!(f, "vision service rejected the API key: {message}")
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total: usize,
    pub matched: usize,
    pub unmatched: usize,
    pub skipped_duplicates: usize,
}

impl RunSummary {
    pub fn from_results(results: &[ExtractionResult], skipped_duplicates: usize) -> Self {
        let matched = results.iter().filter(|r| r.is_matched()).count();
        let unmatched = results
            .iter()
            .filter(|r| matches!(r.status, LabelStatus::Unmatched { .. }))
            .count();
        Self { total: results.len(), matched, unmatched, skipped_duplicates }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub results: Vec<ExtractionResult>,
    pub summary: RunSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aborted: Option<RunAbort>,
}
