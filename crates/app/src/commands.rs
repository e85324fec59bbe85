use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context};
use dockmark_core::{ExtractionResult, ManifestEntry, Token};
use dockmark_manifest::{find_examples, import, LearnerConfig};
use dockmark_ocr::{
    load_image, page_tokens, GeminiVision, Label, OcrBackend, Progress, Reconciler, RunOptions,
    RunReport, VisionBackend,
};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::config::AppConfig;

#[cfg(feature = "rxing")]
type Decoder = dockmark_ocr::barcode::rxing_backend::RxingDecoder;
#[cfg(not(feature = "rxing"))]
type Decoder = dockmark_ocr::NoDecoder;

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

pub struct ReconcileArgs {
    pub config: AppConfig,
    pub manifest: PathBuf,
    pub labels: Vec<PathBuf>,
    pub out: Option<PathBuf>,
}

pub struct LearnArgs {
    pub config: AppConfig,
    pub pages: Vec<PathBuf>,
    pub order: String,
    pub reference: String,
    pub packages: Option<String>,
}

pub async fn reconcile(args: ReconcileArgs) -> anyhow::Result<RunReport> {
    let ReconcileArgs { config, manifest, labels, out } = args;

    let entries = load_manifest(&manifest)?;
    if entries.is_empty() {
        bail!("manifest {} has no usable rows", manifest.display());
    }
    info!(entries = entries.len(), "manifest loaded");
    let matcher = import::create_matcher(entries, config.matching.min_containment_len);

    let labels = load_labels(&expand_label_paths(&labels)?).await?;
    if labels.is_empty() {
        bail!("no label images found");
    }

    let ocr = ocr_backend(&config);
    let decoder = Decoder::default();
    let vision = vision_backend(&config)?;
    let options = RunOptions {
        mode: config.matching.mode,
        capture_debug: config.output.debug_dir.is_some(),
        ..RunOptions::default()
    };
    let reconciler = Reconciler::new(&config.capture, &matcher, ocr.as_ref(), &decoder, &vision)
        .with_options(options);

    let cancel = Arc::new(AtomicBool::new(false));
    let cancel_on_signal = Arc::clone(&cancel);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping after the current label");
            cancel_on_signal.store(true, Ordering::SeqCst);
        }
    });

    let (progress_tx, mut progress_rx) = mpsc::channel::<Progress>(64);
    let progress_log = tokio::spawn(async move {
        while let Some(p) = progress_rx.recv().await {
            info!("{}", p.status_text);
        }
    });

    let report = reconciler.run(&labels, Some(&progress_tx), &cancel).await;
    drop(progress_tx);
    let _ = progress_log.await;

    if let Some(dir) = &config.output.debug_dir {
        write_debug_artifacts(dir, &report.results)?;
    }

    let json = serde_json::to_string_pretty(&report)?;
    match out {
        Some(path) => {
            std::fs::write(&path, json).with_context(|| format!("writing {}", path.display()))?;
            info!("report written to {}", path.display());
        }
        None => println!("{json}"),
    }
    Ok(report)
}

pub async fn learn(args: LearnArgs) -> anyhow::Result<Vec<ManifestEntry>> {
    let LearnArgs { config, pages, order, reference, packages } = args;
    let ocr = ocr_backend(&config);

    let mut token_pages = Vec::with_capacity(pages.len());
    for path in &pages {
        token_pages.push(load_page_tokens(path, ocr.as_ref())?);
    }

    let learner = LearnerConfig::default();
    let examples = token_pages
        .iter()
        .find_map(|page| find_examples(page, &order, &reference, packages.as_deref(), &learner))
        .with_context(|| format!("no page has '{order}' and '{reference}' on one line"))?;

    let entries = import::import_spatial(&token_pages, examples, learner)?;
    info!(entries = entries.len(), pages = token_pages.len(), "manifest learned");

    let mut writer = csv::Writer::from_writer(std::io::stdout());
    writer.write_record(["order_number", "amazon_ref", "total_packages"])?;
    for entry in &entries {
        let packages = entry.total_packages.to_string();
        writer.write_record([&entry.order_number, &entry.amazon_ref, &packages])?;
    }
    writer.flush()?;
    Ok(entries)
}

fn load_manifest(path: &Path) -> anyhow::Result<Vec<ManifestEntry>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading manifest {}", path.display()))?;
    let entries = match extension(path).as_deref() {
        Some("csv") | Some("tsv") => import::import_csv_text(&raw)
            .with_context(|| format!("parsing manifest {}", path.display()))?,
        _ => import::import_text(&raw),
    };
    Ok(entries)
}

fn load_page_tokens(path: &Path, ocr: &dyn OcrBackend) -> anyhow::Result<Vec<Token>> {
    if extension(path).as_deref() == Some("json") {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading tokens {}", path.display()))?;
        return serde_json::from_str(&raw)
            .with_context(|| format!("parsing tokens {}", path.display()));
    }
    let data = std::fs::read(path).with_context(|| format!("reading page {}", path.display()))?;
    let image = load_image(&data).with_context(|| format!("decoding page {}", path.display()))?;
    page_tokens(ocr, &image).with_context(|| format!("recognizing page {}", path.display()))
}

/// Directories expand to their image files, sorted by name.
fn expand_label_paths(inputs: &[PathBuf]) -> anyhow::Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for input in inputs {
        if input.is_dir() {
            let mut found: Vec<PathBuf> = std::fs::read_dir(input)
                .with_context(|| format!("listing {}", input.display()))?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| is_image(p))
                .collect();
            found.sort();
            paths.extend(found);
        } else {
            paths.push(input.clone());
        }
    }
    Ok(paths)
}

/// Decode label images in parallel, keeping input order. Unreadable files are
/// reported and left out.
async fn load_labels(paths: &[PathBuf]) -> anyhow::Result<Vec<Label>> {
    let handles: Vec<_> = paths
        .iter()
        .cloned()
        .map(|path| tokio::task::spawn_blocking(move || (load_label(&path), path)))
        .collect();

    let mut labels = Vec::with_capacity(handles.len());
    for handle in handles {
        let (loaded, path) = handle.await.context("label loader panicked")?;
        match loaded {
            Ok(label) => labels.push(label),
            Err(e) => warn!("skipping {}: {e:#}", path.display()),
        }
    }
    Ok(labels)
}

fn load_label(path: &Path) -> anyhow::Result<Label> {
    let data = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let sidecar = tokens_sidecar(path);
    let tokens = if sidecar.exists() {
        let raw = std::fs::read_to_string(&sidecar)?;
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", sidecar.display()))?
    } else {
        Vec::new()
    };
    let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    Ok(Label::from_bytes(name, 1, &data, tokens)?)
}

/// `label.png` → `label.tokens.json`.
fn tokens_sidecar(path: &Path) -> PathBuf {
    path.with_extension("tokens.json")
}

fn write_debug_artifacts(dir: &Path, results: &[ExtractionResult]) -> anyhow::Result<()> {
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    for result in results {
        let debug = &result.debug;
        let crops = [
            ("barcode", &debug.barcode_crop),
            ("ocr", &debug.ocr_crop),
            ("glyphs", &debug.glyph_strip),
            ("packages", &debug.package_qty_crop),
        ];
        for (kind, png) in crops {
            if let Some(png) = png {
                let path = dir.join(format!("{}-{kind}.png", result.label_id));
                std::fs::write(&path, png)
                    .with_context(|| format!("writing {}", path.display()))?;
            }
        }
    }
    Ok(())
}

#[cfg(feature = "tesseract")]
fn ocr_backend(config: &AppConfig) -> Box<dyn OcrBackend> {
    use dockmark_ocr::recognizer::tesseract_backend::TesseractRecognizer;
    let data_path = config.ocr.tessdata.as_ref().map(|p| p.to_string_lossy().into_owned());
    Box::new(TesseractRecognizer::new(data_path, &config.ocr.lang))
}

#[cfg(not(feature = "tesseract"))]
fn ocr_backend(config: &AppConfig) -> Box<dyn OcrBackend> {
    if config.capture.ocr_area.is_some() || config.capture.package_qty_area.is_some() {
        warn!("OCR zones configured but this build has no OCR engine (enable `tesseract`)");
    }
    Box::new(dockmark_ocr::UnavailableRecognizer)
}

fn vision_backend(config: &AppConfig) -> anyhow::Result<VisionBackend> {
    if !config.vision.enabled {
        return Ok(VisionBackend::Disabled);
    }
    let key = std::env::var(&config.vision.api_key_env).with_context(|| {
        format!("vision is enabled but {} is not set", config.vision.api_key_env)
    })?;
    let client =
        GeminiVision::new(key, config.vision.model.clone()).with_endpoint(&config.vision.endpoint);
    Ok(VisionBackend::Gemini(client))
}

fn extension(path: &Path) -> Option<String> {
    path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase)
}

fn is_image(path: &Path) -> bool {
    extension(path).is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.as_str()))
}
