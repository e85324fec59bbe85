pub mod barcode;
pub mod extract;
pub mod hash;
pub mod pipeline;
pub mod recognizer;
pub mod segment;
pub mod transform;
pub mod types;
pub mod vision;

pub use barcode::{
    parse_payload, scan, BarcodeResult, CarrierPayloadFormat, MatrixDecoder, MockDecoder,
    NoDecoder, ParsedPayload, BARCODE_FILTER_ORDER,
};
pub use extract::{parse_label_text, parse_package_statement, LabelText};
pub use hash::{label_id, sha256_bytes, to_hex};
pub use pipeline::{number_packages, page_tokens, PipelineError, Reconciler, Resolution};
pub use recognizer::{
    MockRecognizer, OcrBackend, OcrError, OcrMode, OcrSession, OcrWorker, UnavailableRecognizer,
};
pub use segment::{segment, Glyph, Segmentation};
pub use transform::{crop_and_filter, encode_png, load_image, FilterKind, TransformError};
pub use types::{Label, MatchMode, Progress, RunAbort, RunOptions, RunReport, RunSummary};
pub use vision::{GeminiVision, MockReply, MockVision, VisionBackend, VisionError, VisionFallback};
