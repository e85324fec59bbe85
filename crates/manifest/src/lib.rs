pub mod csv;
pub mod match_engine;
pub mod spatial;
pub mod text;
pub(crate) mod util;

pub use csv::{CsvColumnMapping, CsvError, CsvManifestProfile};
pub use match_engine::{
    MatchResult, MatchType, ReferenceMatcher, SequentialAssigner, MIN_CONTAINMENT_LEN,
};
pub use spatial::{
    find_examples, learn_manifest, ColumnExamples, ColumnLayout, LearnError, LearnerConfig,
};
pub use text::parse_manifest_text;

pub mod import {
    use crate::*;
    use dockmark_core::{ManifestEntry, Token};

    pub fn import_csv<R: std::io::Read>(
        data: R,
        profile: &CsvManifestProfile,
    ) -> Result<Vec<ManifestEntry>, CsvError> {
        crate::csv::import_csv(data, profile)
    }

    /// Auto-detect delimiter and columns from raw CSV text.
    pub fn import_csv_text(text: &str) -> Result<Vec<ManifestEntry>, CsvError> {
        let profile = CsvManifestProfile {
            delimiter: (crate::csv::detect_delimiter(text) as char).to_string(),
            ..CsvManifestProfile::default()
        };
        crate::csv::import_csv(text.as_bytes(), &profile)
    }

    pub fn import_text(text: &str) -> Vec<ManifestEntry> {
        parse_manifest_text(text)
    }

    pub fn import_spatial(
        pages: &[Vec<Token>],
        examples: ColumnExamples<'_>,
        config: LearnerConfig,
    ) -> Result<Vec<ManifestEntry>, LearnError> {
        learn_manifest(pages, examples, config)
    }

    pub fn create_matcher(
        entries: Vec<ManifestEntry>,
        min_containment_len: usize,
    ) -> ReferenceMatcher {
        ReferenceMatcher::new(entries).with_min_containment_len(min_containment_len)
    }
}
