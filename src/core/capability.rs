//! The identity capability: face detection plus a trained identity model and
//! its label map, consumed by the live station and the corpus builder.

use std::path::Path;
use image::{imageops::{self, FilterType}, GrayImage};
use crate::common::config::{Config, ModelBackend};
use crate::common::Result;
use crate::core::embedding::EmbeddingModel;
use crate::core::labels::LabelMap;
use crate::core::lbph::LbphModel;

/// Face bounding box in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaceRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl FaceRect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Crops the region out of `frame` (clamped to the frame) and resizes it to
    /// a `size` x `size` patch. Returns `None` for regions entirely off-frame.
    pub fn normalized_patch(&self, frame: &GrayImage, size: u32) -> Option<GrayImage> {
        if self.x >= frame.width() || self.y >= frame.height() {
            return None;
        }
        let width = self.width.min(frame.width() - self.x);
        let height = self.height.min(frame.height() - self.y);
        if width == 0 || height == 0 {
            return None;
        }
        let crop = imageops::crop_imm(frame, self.x, self.y, width, height).to_image();
        Some(imageops::resize(&crop, size, size, FilterType::Triangle))
    }
}

/// Output of a single identity prediction. `label` is `None` when the model
/// could not place the face within its own distance threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub label: Option<u32>,
    pub confidence: f64,
}

#[derive(Debug, Clone)]
pub struct TrainingSample {
    pub face: GrayImage,
    pub label: u32,
}

pub trait FaceDetect {
    fn detect_faces(&self, frame: &GrayImage) -> Result<Vec<FaceRect>>;
}

pub trait IdentityModel {
    /// Trains from scratch on one batch; previous training is discarded.
    fn train(&mut self, samples: &[TrainingSample]) -> Result<()>;
    fn predict(&self, face: &GrayImage) -> Result<Prediction>;
    fn save(&self, path: &Path) -> Result<()>;
}

/// Creates an untrained model for the configured backend.
pub fn new_identity_model(config: &Config) -> Result<Box<dyn IdentityModel>> {
    match config.recognition.backend {
        ModelBackend::Lbph => Ok(Box::new(LbphModel::new(config.lbph))),
        ModelBackend::Embedding => Ok(Box::new(EmbeddingModel::new(&config.embedding)?)),
    }
}

/// Loads the persisted model for the configured backend.
pub fn load_identity_model(config: &Config) -> Result<Box<dyn IdentityModel>> {
    let path = &config.paths.model_file;
    match config.recognition.backend {
        ModelBackend::Lbph => Ok(Box::new(LbphModel::load(path)?)),
        ModelBackend::Embedding => Ok(Box::new(EmbeddingModel::load(&config.embedding, path)?)),
    }
}

pub struct IdentityCapability {
    detector: Box<dyn FaceDetect>,
    model: Box<dyn IdentityModel>,
    labels: LabelMap,
    face_size: u32,
}

impl IdentityCapability {
    pub fn new(
        detector: Box<dyn FaceDetect>,
        model: Box<dyn IdentityModel>,
        labels: LabelMap,
        face_size: u32,
    ) -> Self {
        Self { detector, model, labels, face_size }
    }

    pub fn detect_faces(&self, frame: &GrayImage) -> Result<Vec<FaceRect>> {
        self.detector.detect_faces(frame)
    }

    /// Predicts the identity of `face` within `frame`, using the same canonical
    /// patch size the model was trained on.
    pub fn predict(&self, frame: &GrayImage, face: &FaceRect) -> Result<Option<Prediction>> {
        match face.normalized_patch(frame, self.face_size) {
            Some(patch) => self.model.predict(&patch).map(Some),
            None => Ok(None),
        }
    }

    pub fn label_name(&self, label: Option<u32>) -> &str {
        self.labels.name(label)
    }

    pub fn labels(&self) -> &LabelMap {
        &self.labels
    }

    /// Swaps in a freshly trained model and its label map as one unit.
    pub fn replace_model(&mut self, model: Box<dyn IdentityModel>, labels: LabelMap) {
        self.model = model;
        self.labels = labels;
    }
}
