use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use image::{imageops::{self, FilterType}, GrayImage};
use ndarray::{Array4, CowArray};
use ort::{Environment, GraphOptimizationLevel, Session, SessionBuilder, Value};
use serde::{Deserialize, Serialize};
use crate::common::config::EmbeddingConfig;
use crate::common::{AccessError, Result};
use crate::core::capability::{IdentityModel, Prediction, TrainingSample};
use crate::storage::write_atomic;

pub type Embedding = Vec<f32>;

const STORAGE_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct StoredCentroids {
    version: u32,
    input_size: u32,
    centroids: Vec<(u32, Embedding)>,
}

/// ONNX embedding network with one centroid per enrolled label. Confidence is
/// the best cosine similarity scaled to 0..100, so higher means closer.
pub struct EmbeddingModel {
    session: Session,
    _environment: Arc<Environment>,
    input_size: u32,
    normalization_value: f32,
    centroids: Vec<(u32, Embedding)>,
}

impl EmbeddingModel {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let environment = Arc::new(
            Environment::builder()
                .with_name("face_embedding")
                .build()
                .map_err(|e| AccessError::Model(format!("Failed to create environment: {}", e)))?,
        );

        let model_path = &config.model_path;
        if !model_path.exists() {
            return Err(AccessError::Model(format!(
                "Embedding model not found at: {:?}", model_path
            )));
        }

        let session = SessionBuilder::new(&environment)?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_model_from_file(model_path)?;

        Ok(Self {
            session,
            _environment: environment,
            input_size: config.input_size,
            normalization_value: config.normalization_value,
            centroids: Vec::new(),
        })
    }

    pub fn load(config: &EmbeddingConfig, path: &Path) -> Result<Self> {
        let mut model = Self::new(config)?;
        let data = fs::read(path)?;
        let stored: StoredCentroids = bincode::deserialize(&data)
            .map_err(|e| AccessError::Model(format!("Failed to deserialize centroids: {}", e)))?;
        if stored.input_size != config.input_size {
            return Err(AccessError::Model(format!(
                "Centroids were trained at input size {}, config says {}",
                stored.input_size, config.input_size
            )));
        }
        model.centroids = stored.centroids;
        Ok(model)
    }

    fn embed(&self, face: &GrayImage) -> Result<Embedding> {
        let resized = imageops::resize(face, self.input_size, self.input_size, FilterType::Triangle);
        let input_array = self.preprocess_face(&resized);
        let cow_array = CowArray::from(input_array.into_dyn());
        let input_tensor = Value::from_array(self.session.allocator(), &cow_array)?;

        let outputs = self.session.run(vec![input_tensor])?;
        let embedding = outputs[0].try_extract::<f32>()?.view().to_owned().into_raw_vec();
        Ok(embedding)
    }

    fn preprocess_face(&self, gray: &GrayImage) -> Array4<f32> {
        let size = self.input_size as usize;
        let norm = self.normalization_value;
        let mut array = Array4::<f32>::zeros((1, 1, size, size));
        for (x, y, pixel) in gray.enumerate_pixels() {
            array[[0, 0, y as usize, x as usize]] = (pixel[0] as f32 - norm) / norm;
        }
        array
    }
}

impl IdentityModel for EmbeddingModel {
    fn train(&mut self, samples: &[TrainingSample]) -> Result<()> {
        if samples.is_empty() {
            return Err(AccessError::Model("Empty training data".into()));
        }
        let mut grouped: BTreeMap<u32, Vec<Embedding>> = BTreeMap::new();
        for sample in samples {
            grouped.entry(sample.label).or_default().push(self.embed(&sample.face)?);
        }
        self.centroids = grouped
            .into_iter()
            .map(|(label, embeddings)| (label, average_embeddings(&embeddings)))
            .collect();
        tracing::info!("Embedding model trained: {} identities", self.centroids.len());
        Ok(())
    }

    fn predict(&self, face: &GrayImage) -> Result<Prediction> {
        if self.centroids.is_empty() {
            return Err(AccessError::Model("Embedding model has no centroids".into()));
        }
        let embedding = self.embed(face)?;
        Ok(best_match(&embedding, &self.centroids))
    }

    fn save(&self, path: &Path) -> Result<()> {
        let stored = StoredCentroids {
            version: STORAGE_VERSION,
            input_size: self.input_size,
            centroids: self.centroids.clone(),
        };
        let encoded = bincode::serialize(&stored)
            .map_err(|e| AccessError::Model(format!("Failed to serialize centroids: {}", e)))?;
        write_atomic(path, &encoded)
    }
}

fn best_match(embedding: &[f32], centroids: &[(u32, Embedding)]) -> Prediction {
    let mut best = Prediction { label: None, confidence: 0.0 };
    for (label, centroid) in centroids {
        let score = cosine_similarity(embedding, centroid) as f64 * 100.0;
        if best.label.is_none() || score > best.confidence {
            best = Prediction { label: Some(*label), confidence: score };
        }
    }
    best
}

pub fn average_embeddings(embeddings: &[Embedding]) -> Embedding {
    if embeddings.is_empty() {
        return vec![];
    }

    let mut averaged = vec![0.0f32; embeddings[0].len()];
    for embedding in embeddings {
        for (i, &value) in embedding.iter().enumerate() {
            averaged[i] += value;
        }
    }

    let count = embeddings.len() as f32;
    for value in &mut averaged {
        *value /= count;
    }
    averaged
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}
