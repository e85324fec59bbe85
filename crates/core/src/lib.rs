pub mod geometry;
pub mod label;
pub mod manifest;
pub mod reference;
pub mod token;

pub use geometry::{CoreError, CropArea, Rotation};
pub use label::{
    CaptureRules, DebugArtifacts, ExtractionResult, FailureReason, LabelStatus, MatchCandidate,
    PackageHint, PackageInfo, RefSource,
};
pub use manifest::{dedup_entries, ManifestEntry};
pub use reference::{
    clean_reference, normalize, CONFUSABLES, MAX_REFERENCE_LEN, MIN_REFERENCE_LEN,
};
pub use token::{group_lines, Line, Token};
