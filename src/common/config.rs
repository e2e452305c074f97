use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use crate::common::error::{AccessError, Result};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub recognition: RecognitionConfig,
    #[serde(default)]
    pub lbph: LbphConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub lockout: LockoutConfig,
    #[serde(default)]
    pub doors: DoorsConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PathsConfig {
    #[serde(default = "default_dataset_dir")]
    pub dataset_dir: PathBuf,
    #[serde(default = "default_roster_file")]
    pub roster_file: PathBuf,
    #[serde(default = "default_labels_file")]
    pub labels_file: PathBuf,
    #[serde(default = "default_model_file")]
    pub model_file: PathBuf,
    #[serde(default = "default_event_log_file")]
    pub event_log_file: PathBuf,
    #[serde(default = "default_detector_model")]
    pub detector_model: PathBuf,
}

fn default_dataset_dir() -> PathBuf { PathBuf::from("dataset") }
fn default_roster_file() -> PathBuf { PathBuf::from("textfiles/names.csv") }
fn default_labels_file() -> PathBuf { PathBuf::from("recognizer/labels.txt") }
fn default_model_file() -> PathBuf { PathBuf::from("recognizer/model.bin") }
fn default_event_log_file() -> PathBuf { PathBuf::from("textfiles/framedata.csv") }
fn default_detector_model() -> PathBuf { PathBuf::from("models/face_detector.onnx") }

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            dataset_dir: default_dataset_dir(),
            roster_file: default_roster_file(),
            labels_file: default_labels_file(),
            model_file: default_model_file(),
            event_log_file: default_event_log_file(),
            detector_model: default_detector_model(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ModelBackend {
    Lbph,
    Embedding,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RecognitionConfig {
    /// Predictions are accepted only when confidence is strictly greater.
    #[serde(default = "default_acceptance_threshold")]
    pub acceptance_threshold: f64,
    #[serde(default = "default_window_capacity")]
    pub window_capacity: usize,
    #[serde(default = "default_frame_interval")]
    pub frame_interval_ms: u64,
    #[serde(default = "default_face_size")]
    pub face_size: u32,
    #[serde(default = "default_backend")]
    pub backend: ModelBackend,
}

fn default_acceptance_threshold() -> f64 { 7.0 }
fn default_window_capacity() -> usize { 60 }
fn default_frame_interval() -> u64 { 30 }
fn default_face_size() -> u32 { 100 }
fn default_backend() -> ModelBackend { ModelBackend::Lbph }

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            acceptance_threshold: default_acceptance_threshold(),
            window_capacity: default_window_capacity(),
            frame_interval_ms: default_frame_interval(),
            face_size: default_face_size(),
            backend: default_backend(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct LbphConfig {
    #[serde(default = "default_radius")]
    pub radius: u32,
    #[serde(default = "default_neighbors")]
    pub neighbors: u32,
    #[serde(default = "default_grid")]
    pub grid_x: u32,
    #[serde(default = "default_grid")]
    pub grid_y: u32,
    #[serde(default = "default_lbph_threshold")]
    pub threshold: f64,
}

fn default_radius() -> u32 { 1 }
fn default_neighbors() -> u32 { 10 }
fn default_grid() -> u32 { 8 }
fn default_lbph_threshold() -> f64 { 100.0 }

impl Default for LbphConfig {
    fn default() -> Self {
        Self {
            radius: default_radius(),
            neighbors: default_neighbors(),
            grid_x: default_grid(),
            grid_y: default_grid(),
            threshold: default_lbph_threshold(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_model")]
    pub model_path: PathBuf,
    #[serde(default = "default_embedding_input")]
    pub input_size: u32,
    #[serde(default = "default_normalization")]
    pub normalization_value: f32,
}

fn default_embedding_model() -> PathBuf { PathBuf::from("models/face_embedding.onnx") }
fn default_embedding_input() -> u32 { 112 }
fn default_normalization() -> f32 { 127.5 }

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model_path: default_embedding_model(),
            input_size: default_embedding_input(),
            normalization_value: default_normalization(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DetectorConfig {
    #[serde(default = "default_detector_input")]
    pub input_width: u32,
    #[serde(default = "default_detector_input")]
    pub input_height: u32,
    #[serde(default = "default_detection_confidence")]
    pub confidence: f32,
    #[serde(default = "default_iou")]
    pub iou_threshold: f32,
    #[serde(default = "default_min_face")]
    pub min_face_size: u32,
    #[serde(default = "default_max_face")]
    pub max_face_size: u32,
}

fn default_detector_input() -> u32 { 640 }
fn default_detection_confidence() -> f32 { 0.5 }
fn default_iou() -> f32 { 0.45 }
fn default_min_face() -> u32 { 60 }
fn default_max_face() -> u32 { 350 }

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            input_width: default_detector_input(),
            input_height: default_detector_input(),
            confidence: default_detection_confidence(),
            iou_threshold: default_iou(),
            min_face_size: default_min_face(),
            max_face_size: default_max_face(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CameraConfig {
    #[serde(default)]
    pub device_index: u32,
    #[serde(default = "default_camera_width")]
    pub width: u32,
    #[serde(default = "default_camera_height")]
    pub height: u32,
    #[serde(default = "default_warmup_frames")]
    pub warmup_frames: u32,
}

fn default_camera_width() -> u32 { 640 }
fn default_camera_height() -> u32 { 480 }
fn default_warmup_frames() -> u32 { 4 }

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            width: default_camera_width(),
            height: default_camera_height(),
            warmup_frames: default_warmup_frames(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LockoutConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_lockout_secs")]
    pub duration_secs: u32,
    /// Plaintext PIN. Ignored when `pin_hash` is set.
    #[serde(default)]
    pub pin: Option<String>,
    /// Hex HMAC-SHA256 of the PIN keyed by `pin_salt`.
    #[serde(default)]
    pub pin_hash: Option<String>,
    #[serde(default)]
    pub pin_salt: Option<String>,
}

fn default_max_attempts() -> u32 { 2 }
fn default_lockout_secs() -> u32 { 30 }

impl Default for LockoutConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            duration_secs: default_lockout_secs(),
            pin: None,
            pin_hash: None,
            pin_salt: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DoorsConfig {
    #[serde(default = "default_door_count")]
    pub count: u32,
}

fn default_door_count() -> u32 { 3 }

impl Default for DoorsConfig {
    fn default() -> Self {
        Self { count: default_door_count() }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            paths: PathsConfig::default(),
            recognition: RecognitionConfig::default(),
            lbph: LbphConfig::default(),
            embedding: EmbeddingConfig::default(),
            detector: DetectorConfig::default(),
            camera: CameraConfig::default(),
            lockout: LockoutConfig::default(),
            doors: DoorsConfig::default(),
        }
    }
}

impl Config {
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(AccessError::Config(format!(
                "Config file not found: {}. Please create it from configs/door-access.toml.",
                path.display()
            )));
        }

        tracing::info!("Loading config from: {}", path.display());
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)
            .map_err(|e| AccessError::Config(format!("Config parse error: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Rewrites every relative path in `[paths]` and `[embedding]` against `base`.
    pub fn resolve_paths(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        resolve(&mut self.paths.dataset_dir);
        resolve(&mut self.paths.roster_file);
        resolve(&mut self.paths.labels_file);
        resolve(&mut self.paths.model_file);
        resolve(&mut self.paths.event_log_file);
        resolve(&mut self.paths.detector_model);
        resolve(&mut self.embedding.model_path);
    }

    pub fn validate(&self) -> Result<()> {
        let rec = &self.recognition;
        if !rec.acceptance_threshold.is_finite() || rec.acceptance_threshold < 0.0 {
            return Err(AccessError::Config(format!(
                "Acceptance threshold must be a non-negative number, got {}",
                rec.acceptance_threshold
            )));
        }
        if rec.window_capacity == 0 || rec.window_capacity > 10_000 {
            return Err(AccessError::Config(format!(
                "Window capacity must be between 1 and 10000, got {}", rec.window_capacity
            )));
        }
        if rec.frame_interval_ms == 0 || rec.frame_interval_ms > 1000 {
            return Err(AccessError::Config(format!(
                "Frame interval must be between 1 and 1000 ms, got {}", rec.frame_interval_ms
            )));
        }
        if rec.face_size < 16 || rec.face_size > 512 {
            return Err(AccessError::Config(format!(
                "Face size must be between 16 and 512, got {}", rec.face_size
            )));
        }

        let lbph = &self.lbph;
        if lbph.radius == 0 || lbph.radius > 8 {
            return Err(AccessError::Config(format!(
                "LBPH radius must be between 1 and 8, got {}", lbph.radius
            )));
        }
        if lbph.neighbors == 0 || lbph.neighbors > 16 {
            return Err(AccessError::Config(format!(
                "LBPH neighbors must be between 1 and 16, got {}", lbph.neighbors
            )));
        }
        if lbph.grid_x == 0 || lbph.grid_y == 0 {
            return Err(AccessError::Config("LBPH grid must be at least 1x1".into()));
        }

        if self.detector.confidence < 0.0 || self.detector.confidence > 1.0 {
            return Err(AccessError::Config(format!(
                "Detection confidence must be between 0.0 and 1.0, got {}",
                self.detector.confidence
            )));
        }
        if self.detector.min_face_size > self.detector.max_face_size {
            return Err(AccessError::Config(format!(
                "Detector min face size {} exceeds max face size {}",
                self.detector.min_face_size, self.detector.max_face_size
            )));
        }

        if self.lockout.max_attempts == 0 {
            return Err(AccessError::Config("Lockout max attempts must be at least 1".into()));
        }
        if self.lockout.duration_secs == 0 || self.lockout.duration_secs > 3600 {
            return Err(AccessError::Config(format!(
                "Lockout duration must be between 1 and 3600 seconds, got {}",
                self.lockout.duration_secs
            )));
        }
        match (&self.lockout.pin_hash, &self.lockout.pin_salt) {
            (Some(_), None) | (None, Some(_)) => {
                return Err(AccessError::Config(
                    "pin_hash and pin_salt must be set together".into(),
                ));
            }
            _ => {}
        }
        if let Some(pin) = &self.lockout.pin {
            if pin.len() != 4 || !pin.chars().all(|c| c.is_ascii_digit()) {
                return Err(AccessError::Config("PIN must be exactly 4 digits".into()));
            }
        }

        if self.doors.count == 0 || self.doors.count > 16 {
            return Err(AccessError::Config(format!(
                "Door count must be between 1 and 16, got {}", self.doors.count
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.recognition.window_capacity, 60);
        assert_eq!(config.recognition.acceptance_threshold, 7.0);
        assert_eq!(config.lockout.max_attempts, 2);
        assert_eq!(config.lockout.duration_secs, 30);
        assert_eq!(config.recognition.backend, ModelBackend::Lbph);
    }

    #[test]
    fn rejects_half_configured_pin_hash() {
        let err = Config::from_toml_str("[lockout]\npin_hash = \"00\"\n").unwrap_err();
        assert!(err.to_string().contains("pin_salt"));
    }

    #[test]
    fn rejects_non_numeric_pin() {
        assert!(Config::from_toml_str("[lockout]\npin = \"12a4\"\n").is_err());
    }

    #[test]
    fn resolve_paths_keeps_absolute_entries() {
        let mut config = Config::from_toml_str(
            "[paths]\nroster_file = \"/srv/names.csv\"\n",
        )
        .unwrap();
        config.resolve_paths(Path::new("/data"));
        assert_eq!(config.paths.roster_file, PathBuf::from("/srv/names.csv"));
        assert_eq!(config.paths.dataset_dir, PathBuf::from("/data/dataset"));
    }

    #[test]
    fn shipped_example_config_parses() {
        let config = Config::from_toml_str(include_str!("../../configs/door-access.toml")).unwrap();
        assert_eq!(config.doors.count, 3);
        assert_eq!(config.lockout.pin.as_deref(), Some("1234"));
    }
}
