use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dockmark_core::Token;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::transform::encode_png;

#[derive(Debug, Error)]
pub enum OcrError {
    #[error("Image decode error: {0}")]
    ImageDecode(String),
    #[error("OCR engine error: {0}")]
    Engine(String),
    #[error("OCR backend does not support {0}")]
    Unsupported(&'static str),
    #[error("Tesseract not available, build with the `tesseract` feature")]
    NotAvailable,
}

/// Characters single-glyph recognition is restricted to.
pub const REFERENCE_ALPHABET: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Strip recognition also keeps the separators of "N/M" and "N DE M".
pub const STRIP_ALPHABET: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789/ ";

/// How a worker is tuned. Switching mode means a fresh worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OcrMode {
    /// One line of reference characters or a package statement.
    Strip,
    /// One isolated character.
    SingleChar,
    /// Unrestricted page layout with word boxes.
    FullPage,
}

impl OcrMode {
    /// Character whitelist for the mode, `None` when unrestricted.
    pub fn whitelist(self) -> Option<&'static str> {
        match self {
            OcrMode::Strip => Some(STRIP_ALPHABET),
            OcrMode::SingleChar => Some(REFERENCE_ALPHABET),
            OcrMode::FullPage => None,
        }
    }
}

/// Factory for OCR workers. Workers are expensive; callers hold them through
/// an [`OcrSession`] rather than creating one per image.
pub trait OcrBackend: Send + Sync {
    fn create_worker(&self, mode: OcrMode) -> Result<Box<dyn OcrWorker>, OcrError>;
}

/// A configured recognizer. Accepts PNG/JPEG bytes.
///
/// Workers stay on the task that created them, so engine handles need not
/// be `Send`.
pub trait OcrWorker {
    fn recognize(&mut self, image_bytes: &[u8]) -> Result<String, OcrError>;

    /// Word-level tokens with page coordinates (origin bottom-left).
    fn recognize_words(&mut self, _image_bytes: &[u8]) -> Result<Vec<Token>, OcrError> {
        Err(OcrError::Unsupported("word boxes"))
    }
}

/// Holds at most one live worker for the duration of a run.
///
/// The worker is created lazily, kept while consecutive calls use the same
/// mode, and replaced when the mode changes. It is dropped on [`release`] or
/// when the session goes out of scope, so no worker outlives its run.
///
/// [`release`]: OcrSession::release
pub struct OcrSession<'a> {
    backend: &'a dyn OcrBackend,
    active: Option<(OcrMode, Box<dyn OcrWorker>)>,
}

impl<'a> OcrSession<'a> {
    pub fn new(backend: &'a dyn OcrBackend) -> Self {
        Self { backend, active: None }
    }

    pub fn active_mode(&self) -> Option<OcrMode> {
        self.active.as_ref().map(|(mode, _)| *mode)
    }

    pub fn acquire(&mut self, mode: OcrMode) -> Result<&mut dyn OcrWorker, OcrError> {
        if self.active_mode() != Some(mode) {
            self.release();
            let worker = self.backend.create_worker(mode)?;
            debug!(?mode, "ocr worker created");
            self.active = Some((mode, worker));
        }
        match self.active.as_mut() {
            Some((_, worker)) => Ok(worker.as_mut()),
            None => Err(OcrError::Engine("worker unavailable".into())),
        }
    }

    pub fn release(&mut self) {
        if let Some((mode, _)) = self.active.take() {
            debug!(?mode, "ocr worker released");
        }
    }

    pub fn recognize(&mut self, mode: OcrMode, image: &DynamicImage) -> Result<String, OcrError> {
        let png = encode_png(image).map_err(|e| OcrError::ImageDecode(e.to_string()))?;
        self.acquire(mode)?.recognize(&png)
    }

    /// Full-page OCR of an image into positioned tokens.
    pub fn page_tokens(&mut self, image: &DynamicImage) -> Result<Vec<Token>, OcrError> {
        let png = encode_png(image).map_err(|e| OcrError::ImageDecode(e.to_string()))?;
        self.acquire(OcrMode::FullPage)?.recognize_words(&png)
    }
}

impl Drop for OcrSession<'_> {
    fn drop(&mut self) {
        self.release();
    }
}

/// Parse Tesseract TSV output into word tokens, flipping `top` so that `y`
/// grows towards the top of the page.
pub fn parse_tsv_words(tsv: &str, page_height: f64) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut line_ids: HashMap<(u32, u32, u32), usize> = HashMap::new();

    for row in tsv.lines().skip(1) {
        let cols: Vec<&str> = row.split('\t').collect();
        if cols.len() < 12 || cols[0] != "5" {
            continue;
        }
        let text = cols[11].trim();
        if text.is_empty() {
            continue;
        }
        let num = |i: usize| cols[i].trim().parse::<f64>().ok();
        let (Some(left), Some(top), Some(width), Some(height)) = (num(6), num(7), num(8), num(9))
        else {
            continue;
        };
        let key = |i: usize| cols[i].trim().parse::<u32>().unwrap_or(0);
        let next_line = line_ids.len();
        let line_index = *line_ids.entry((key(2), key(3), key(4))).or_insert(next_line);

        let mut token = Token::new(text, left, page_height - top - height, width, height);
        token.line_index = line_index;
        token.token_index = tokens.len();
        tokens.push(token);
    }
    tokens
}

/// Backend for builds without an OCR engine. Every worker request fails, so
/// OCR stages degrade to "nothing read".
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableRecognizer;

impl OcrBackend for UnavailableRecognizer {
    fn create_worker(&self, _mode: OcrMode) -> Result<Box<dyn OcrWorker>, OcrError> {
        Err(OcrError::NotAvailable)
    }
}

// ── Mock backend (always available, used for tests) ───────────────────────────

/// Scripted recognizer. Each mode replays its own response list in order and
/// repeats the last entry once exhausted; unscripted modes return the default
/// text.
#[derive(Clone, Default)]
pub struct MockRecognizer {
    text: String,
    scripts: HashMap<OcrMode, Vec<String>>,
    failures: HashMap<OcrMode, usize>,
    words: Vec<Token>,
    created: Arc<AtomicUsize>,
}

impl MockRecognizer {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into(), ..Self::default() }
    }

    pub fn with_script(mut self, mode: OcrMode, responses: &[&str]) -> Self {
        self.scripts.insert(mode, responses.iter().map(|s| s.to_string()).collect());
        self
    }

    /// Workers of `mode` fail every call after the first `ok_calls`.
    pub fn failing_after(mut self, mode: OcrMode, ok_calls: usize) -> Self {
        self.failures.insert(mode, ok_calls);
        self
    }

    pub fn with_words(mut self, words: Vec<Token>) -> Self {
        self.words = words;
        self
    }

    /// How many workers have been created so far.
    pub fn workers_created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl OcrBackend for MockRecognizer {
    fn create_worker(&self, mode: OcrMode) -> Result<Box<dyn OcrWorker>, OcrError> {
        self.created.fetch_add(1, Ordering::SeqCst);
        let responses = self.scripts.get(&mode).cloned().unwrap_or_else(|| vec![self.text.clone()]);
        Ok(Box::new(MockWorker {
            responses,
            next: 0,
            fail_after: self.failures.get(&mode).copied(),
            words: self.words.clone(),
        }))
    }
}

struct MockWorker {
    responses: Vec<String>,
    next: usize,
    fail_after: Option<usize>,
    words: Vec<Token>,
}

impl OcrWorker for MockWorker {
    fn recognize(&mut self, _image_bytes: &[u8]) -> Result<String, OcrError> {
        if self.fail_after.is_some_and(|ok| self.next >= ok) {
            return Err(OcrError::Engine("scripted failure".into()));
        }
        let idx = self.next.min(self.responses.len().saturating_sub(1));
        self.next += 1;
        Ok(self.responses.get(idx).cloned().unwrap_or_default())
    }

    fn recognize_words(&mut self, _image_bytes: &[u8]) -> Result<Vec<Token>, OcrError> {
        Ok(self.words.clone())
    }
}

// ── Tesseract backend (optional, gated behind `tesseract` feature) ─────────────

#[cfg(feature = "tesseract")]
pub mod tesseract_backend {
    use super::{parse_tsv_words, OcrBackend, OcrError, OcrMode, OcrWorker};
    use dockmark_core::Token;
    use leptess::{LepTess, Variable};

    pub struct TesseractRecognizer {
        data_path: Option<String>,
        lang: String,
    }

    impl TesseractRecognizer {
        pub fn new(data_path: Option<String>, lang: &str) -> Self {
            Self { data_path, lang: lang.to_string() }
        }
    }

    impl OcrBackend for TesseractRecognizer {
        fn create_worker(&self, mode: OcrMode) -> Result<Box<dyn OcrWorker>, OcrError> {
            let mut lt = LepTess::new(self.data_path.as_deref(), &self.lang)
                .map_err(|e| OcrError::Engine(e.to_string()))?;
            let psm = match mode {
                OcrMode::Strip => "7",
                OcrMode::SingleChar => "10",
                OcrMode::FullPage => "3",
            };
            lt.set_variable(Variable::TesseditPagesegMode, psm)
                .map_err(|e| OcrError::Engine(e.to_string()))?;
            if let Some(whitelist) = mode.whitelist() {
                lt.set_variable(Variable::TesseditCharWhitelist, whitelist)
                    .map_err(|e| OcrError::Engine(e.to_string()))?;
            }
            Ok(Box::new(TesseractWorker { lt }))
        }
    }

    struct TesseractWorker {
        lt: LepTess,
    }

    impl OcrWorker for TesseractWorker {
        fn recognize(&mut self, image_bytes: &[u8]) -> Result<String, OcrError> {
            self.lt
                .set_image_from_mem(image_bytes)
                .map_err(|e| OcrError::ImageDecode(e.to_string()))?;
            self.lt.get_utf8_text().map_err(|e| OcrError::Engine(e.to_string()))
        }

        fn recognize_words(&mut self, image_bytes: &[u8]) -> Result<Vec<Token>, OcrError> {
            let height = image::load_from_memory(image_bytes)
                .map_err(|e| OcrError::ImageDecode(e.to_string()))?
                .height();
            self.lt
                .set_image_from_mem(image_bytes)
                .map_err(|e| OcrError::ImageDecode(e.to_string()))?;
            let tsv = self.lt.get_tsv_text(0).map_err(|e| OcrError::Engine(e.to_string()))?;
            Ok(parse_tsv_words(&tsv, height as f64))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Engine handle that must stay on its thread.
    struct PinnedWorker(std::rc::Rc<()>);

    impl OcrWorker for PinnedWorker {
        fn recognize(&mut self, _image_bytes: &[u8]) -> Result<String, OcrError> {
            Ok(format!("refs={}", std::rc::Rc::strong_count(&self.0)))
        }
    }

    struct PinnedBackend;

    impl OcrBackend for PinnedBackend {
        fn create_worker(&self, _mode: OcrMode) -> Result<Box<dyn OcrWorker>, OcrError> {
            Ok(Box::new(PinnedWorker(std::rc::Rc::new(()))))
        }
    }

    #[test]
    fn session_drives_thread_bound_workers() {
        let backend = PinnedBackend;
        let mut session = OcrSession::new(&backend);
        let img = DynamicImage::ImageLuma8(image::GrayImage::from_pixel(4, 4, image::Luma([255])));
        assert_eq!(session.recognize(OcrMode::Strip, &img).unwrap(), "refs=1");
    }

    #[test]
    fn strip_whitelist_keeps_statement_separators() {
        let strip = OcrMode::Strip.whitelist().unwrap();
        assert!(strip.contains('/') && strip.contains(' '));
        assert!(!OcrMode::SingleChar.whitelist().unwrap().contains('/'));
        assert_eq!(OcrMode::FullPage.whitelist(), None);
    }

    #[test]
    fn mock_replays_script_then_repeats_last() {
        let r = MockRecognizer::new("fallback").with_script(OcrMode::SingleChar, &["A", "B"]);
        let mut w = r.create_worker(OcrMode::SingleChar).unwrap();
        assert_eq!(w.recognize(b"").unwrap(), "A");
        assert_eq!(w.recognize(b"").unwrap(), "B");
        assert_eq!(w.recognize(b"").unwrap(), "B");
        let mut strip = r.create_worker(OcrMode::Strip).unwrap();
        assert_eq!(strip.recognize(b"anything").unwrap(), "fallback");
    }

    #[test]
    fn session_reuses_worker_within_a_mode() {
        let r = MockRecognizer::new("x");
        let mut session = OcrSession::new(&r);
        session.acquire(OcrMode::SingleChar).unwrap();
        session.acquire(OcrMode::SingleChar).unwrap();
        assert_eq!(r.workers_created(), 1);
        assert_eq!(session.active_mode(), Some(OcrMode::SingleChar));
    }

    #[test]
    fn session_recreates_worker_on_mode_switch() {
        let r = MockRecognizer::new("x");
        let mut session = OcrSession::new(&r);
        session.acquire(OcrMode::SingleChar).unwrap();
        session.acquire(OcrMode::Strip).unwrap();
        session.acquire(OcrMode::Strip).unwrap();
        session.acquire(OcrMode::SingleChar).unwrap();
        assert_eq!(r.workers_created(), 3);
    }

    #[test]
    fn release_drops_the_worker() {
        let r = MockRecognizer::new("x");
        let mut session = OcrSession::new(&r);
        session.acquire(OcrMode::Strip).unwrap();
        session.release();
        assert_eq!(session.active_mode(), None);
        session.acquire(OcrMode::Strip).unwrap();
        assert_eq!(r.workers_created(), 2);
    }

    #[test]
    fn unavailable_backend_never_creates_workers() {
        let mut session = OcrSession::new(&UnavailableRecognizer);
        assert!(matches!(session.acquire(OcrMode::Strip), Err(OcrError::NotAvailable)));
        assert_eq!(session.active_mode(), None);
    }

    #[test]
    fn default_worker_has_no_word_boxes() {
        struct TextOnly;
        impl OcrWorker for TextOnly {
            fn recognize(&mut self, _: &[u8]) -> Result<String, OcrError> {
                Ok(String::new())
            }
        }
        assert!(matches!(TextOnly.recognize_words(b""), Err(OcrError::Unsupported(_))));
    }

    #[test]
    fn tsv_words_are_flipped_and_grouped() {
        let tsv = "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext\n\
                   1\t1\t0\t0\t0\t0\t0\t0\t1000\t800\t-1\t\n\
                   5\t1\t1\t1\t1\t1\t50\t100\t80\t20\t96\t12345678\n\
                   5\t1\t1\t1\t1\t2\t300\t102\t120\t20\t91\tFBA15ABCDEF\n\
                   5\t1\t1\t1\t2\t1\t50\t140\t80\t20\t90\t87654321\n";
        let words = parse_tsv_words(tsv, 800.0);
        assert_eq!(words.len(), 3);
        assert_eq!(words[0].text, "12345678");
        assert_eq!(words[0].y, 680.0);
        assert_eq!(words[0].line_index, words[1].line_index);
        assert_ne!(words[0].line_index, words[2].line_index);
        assert_eq!(words[2].token_index, 2);
    }
}
