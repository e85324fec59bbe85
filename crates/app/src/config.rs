use std::path::{Path, PathBuf};

use anyhow::Context;
use dockmark_core::{CaptureRules, CoreError};
use dockmark_manifest::MIN_CONTAINMENT_LEN;
use dockmark_ocr::vision::{DEFAULT_VISION_ENDPOINT, DEFAULT_VISION_MODEL};
use dockmark_ocr::MatchMode;
use serde::{Deserialize, Serialize};

const CONFIG_FILE: &str = "dockmark.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub capture: CaptureRules,
    pub matching: MatchingConfig,
    pub ocr: OcrConfig,
    pub vision: VisionConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    pub mode: MatchMode,
    /// Containment matches require the contained key to be longer than this.
    pub min_containment_len: usize,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self { mode: MatchMode::Reference, min_containment_len: MIN_CONTAINMENT_LEN }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    pub tessdata: Option<PathBuf>,
    pub lang: String,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self { tessdata: None, lang: "eng".to_string() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionConfig {
    pub enabled: bool,
    pub model: String,
    pub endpoint: String,
    /// Environment variable holding the API key. The key itself never lives
    /// in the config file.
    pub api_key_env: String,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            model: DEFAULT_VISION_MODEL.to_string(),
            endpoint: DEFAULT_VISION_ENDPOINT.to_string(),
            api_key_env: "GEMINI_API_KEY".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Where debug crops are written. Capturing is off when unset.
    pub debug_dir: Option<PathBuf>,
}

impl AppConfig {
    pub fn from_toml(toml_content: &str) -> Result<Self, CoreError> {
        let config: AppConfig =
            toml::from_str(toml_content).map_err(|e| CoreError::Config(e.to_string()))?;
        config.capture.validate()?;
        if config.ocr.lang.trim().is_empty() {
            return Err(CoreError::Config("ocr.lang must not be empty".into()));
        }
        Ok(config)
    }

    /// Load `path`, or the per-user default location when `None`. A missing
    /// default file yields the built-in defaults; a missing explicit file is
    /// an error.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match default_path() {
                Some(p) if p.exists() => p,
                _ => return Ok(Self::default()),
            },
        };
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_toml(&raw).with_context(|| format!("parsing config {}", path.display()))
    }
}

pub fn default_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("com", "dockmark", "Dockmark")
        .map(|dirs| dirs.config_dir().join(CONFIG_FILE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use dockmark_core::Rotation;
    use std::io::Write;

    #[test]
    fn empty_config_is_all_defaults() {
        let config = AppConfig::from_toml("").unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.matching.min_containment_len, 6);
        assert!(!config.vision.enabled);
    }

    #[test]
    fn full_config_round_trips_sections() {
        let config = AppConfig::from_toml(
            r#"
            [capture]
            rotation = 270
            barcode_area = { x = 0.6, y = 0.05, w = 0.35, h = 0.3 }
            ocr_area = { x = 0.05, y = 0.75, w = 0.6, h = 0.08 }

            [matching]
            mode = "sequential"

            [ocr]
            lang = "spa"

            [vision]
            enabled = true
            api_key_env = "DOCK_VISION_KEY"

            [output]
            debug_dir = "debug"
            "#,
        )
        .unwrap();
        assert_eq!(config.capture.rotation, Rotation::Cw270);
        assert!(config.capture.package_qty_area.is_none());
        assert_eq!(config.matching.mode, MatchMode::Sequential);
        assert_eq!(config.ocr.lang, "spa");
        assert_eq!(config.vision.api_key_env, "DOCK_VISION_KEY");
        assert_eq!(config.vision.model, DEFAULT_VISION_MODEL);
        assert_eq!(config.output.debug_dir, Some(PathBuf::from("debug")));
    }

    #[test]
    fn invalid_zone_is_rejected() {
        let err = AppConfig::from_toml("[capture]\nocr_area = { x = 0.8, y = 0.0, w = 0.5, h = 0.1 }")
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidCropArea(_)));
    }

    #[test]
    fn load_reads_explicit_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[capture]\nrotation = 90").unwrap();
        let config = AppConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.capture.rotation, Rotation::Cw90);
    }

    #[test]
    fn load_fails_on_missing_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(AppConfig::load(Some(&dir.path().join("nope.toml"))).is_err());
    }
}
