use anyhow::{Context, Result};
use facemesh_core::detector::DEFAULT_DETECTION_CONFIDENCE;
use facemesh_core::{Thresholds, DUPLICATE_THRESHOLD, RECOGNITION_THRESHOLD};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Daemon configuration.
///
/// Built from defaults, then an optional TOML file named by
/// `FACEMESH_CONFIG`, then `FACEMESH_*` environment variables.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address the HTTP server binds to.
    pub bind: String,
    /// Directory holding one `<name>.json` feature file per identity.
    pub data_dir: PathBuf,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// Registration is refused above this similarity.
    pub duplicate_threshold: f32,
    /// Recognition names a face only above this similarity.
    pub recognition_threshold: f32,
    /// Minimum SCRFD score for a face to be reported.
    pub detection_confidence: f32,
    /// Largest accepted request body, in bytes.
    pub max_body_bytes: usize,
    /// Default tracing filter when `RUST_LOG` is unset.
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:5000".into(),
            data_dir: PathBuf::from("face_data"),
            model_dir: PathBuf::from("models"),
            duplicate_threshold: DUPLICATE_THRESHOLD,
            recognition_threshold: RECOGNITION_THRESHOLD,
            detection_confidence: DEFAULT_DETECTION_CONFIDENCE,
            max_body_bytes: 16 * 1024 * 1024,
            log_level: "info".into(),
        }
    }
}

impl Config {
    /// Load the file named by `FACEMESH_CONFIG` (if set), then apply env overrides.
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var("FACEMESH_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing config file {}", path.display()))
    }

    /// Override fields from `FACEMESH_*` variables. Unparseable values are ignored.
    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("FACEMESH_BIND") {
            self.bind = v;
        }
        if let Some(v) = var("FACEMESH_DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Some(v) = var("FACEMESH_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Some(v) = var("FACEMESH_LOG_LEVEL") {
            self.log_level = v;
        }
        override_parsed(&var, "FACEMESH_DUPLICATE_THRESHOLD", &mut self.duplicate_threshold);
        override_parsed(&var, "FACEMESH_RECOGNITION_THRESHOLD", &mut self.recognition_threshold);
        override_parsed(&var, "FACEMESH_DETECTION_CONFIDENCE", &mut self.detection_confidence);
        override_parsed(&var, "FACEMESH_MAX_BODY_BYTES", &mut self.max_body_bytes);
    }

    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            duplicate: self.duplicate_threshold,
            recognition: self.recognition_threshold,
        }
    }
}

fn override_parsed<T: std::str::FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    key: &str,
    slot: &mut T,
) {
    if let Some(raw) = var(key) {
        match raw.parse() {
            Ok(value) => *slot = value,
            Err(_) => tracing::warn!(key, value = %raw, "ignoring unparseable config override"),
        }
    }
}
