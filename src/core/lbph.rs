//! Local binary pattern histogram recognizer.
//!
//! Each face patch is encoded with extended (circular, bilinearly sampled) LBP
//! codes, split into a `grid_x` x `grid_y` grid of per-cell histograms that are
//! normalised and concatenated. Prediction is nearest neighbour under the
//! alternative chi-square distance; the distance is reported as confidence, so
//! lower means closer.

use std::f64::consts::PI;
use std::fs;
use std::path::Path;
use image::GrayImage;
use serde::{Deserialize, Serialize};
use crate::common::config::LbphConfig;
use crate::common::{AccessError, Result};
use crate::core::capability::{IdentityModel, Prediction, TrainingSample};
use crate::storage::write_atomic;

const STORAGE_VERSION: u32 = 1;
const EPSILON: f64 = f64::EPSILON;

#[derive(Serialize, Deserialize)]
struct StoredModel {
    version: u32,
    params: LbphConfig,
    histograms: Vec<(u32, Vec<f32>)>,
}

pub struct LbphModel {
    params: LbphConfig,
    histograms: Vec<(u32, Vec<f32>)>,
}

impl LbphModel {
    pub fn new(params: LbphConfig) -> Self {
        Self { params, histograms: Vec::new() }
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(AccessError::Model(format!("LBPH model not found at: {:?}", path)));
        }
        let data = fs::read(path)?;
        let stored: StoredModel = bincode::deserialize(&data)
            .map_err(|e| AccessError::Model(format!("Failed to deserialize model: {}", e)))?;
        if stored.version > STORAGE_VERSION {
            return Err(AccessError::Model(format!(
                "Model version {} is newer than supported version {}",
                stored.version, STORAGE_VERSION
            )));
        }
        tracing::debug!("Loaded LBPH model with {} samples", stored.histograms.len());
        Ok(Self { params: stored.params, histograms: stored.histograms })
    }

    pub fn sample_count(&self) -> usize {
        self.histograms.len()
    }

    fn spatial_histogram(&self, face: &GrayImage) -> Vec<f32> {
        let (codes, width, height) = extended_lbp(face, self.params.radius, self.params.neighbors);
        let bins = 1usize << self.params.neighbors;
        let (grid_x, grid_y) = (self.params.grid_x as usize, self.params.grid_y as usize);
        let mut histogram = vec![0f32; grid_x * grid_y * bins];

        let cell_w = width / grid_x;
        let cell_h = height / grid_y;
        if cell_w == 0 || cell_h == 0 {
            return histogram;
        }
        let cell_area = (cell_w * cell_h) as f32;

        for gy in 0..grid_y {
            for gx in 0..grid_x {
                let offset = (gy * grid_x + gx) * bins;
                for row in gy * cell_h..(gy + 1) * cell_h {
                    for col in gx * cell_w..(gx + 1) * cell_w {
                        histogram[offset + codes[row * width + col] as usize] += 1.0;
                    }
                }
                for bin in &mut histogram[offset..offset + bins] {
                    *bin /= cell_area;
                }
            }
        }
        histogram
    }
}

impl IdentityModel for LbphModel {
    fn train(&mut self, samples: &[TrainingSample]) -> Result<()> {
        if samples.is_empty() {
            return Err(AccessError::Model("Empty training data".into()));
        }
        self.histograms = samples
            .iter()
            .map(|s| (s.label, self.spatial_histogram(&s.face)))
            .collect();
        tracing::info!("LBPH trained on {} samples", self.histograms.len());
        Ok(())
    }

    fn predict(&self, face: &GrayImage) -> Result<Prediction> {
        if self.histograms.is_empty() {
            return Err(AccessError::Model("LBPH model has not been trained".into()));
        }
        let query = self.spatial_histogram(face);

        let mut best = Prediction { label: None, confidence: f64::MAX };
        for (label, histogram) in &self.histograms {
            let distance = chi_square_alt(histogram, &query);
            if distance < best.confidence && distance < self.params.threshold {
                best = Prediction { label: Some(*label), confidence: distance };
            }
        }
        Ok(best)
    }

    fn save(&self, path: &Path) -> Result<()> {
        let stored = StoredModel {
            version: STORAGE_VERSION,
            params: self.params,
            histograms: self.histograms.clone(),
        };
        let encoded = bincode::serialize(&stored)
            .map_err(|e| AccessError::Model(format!("Failed to serialize model: {}", e)))?;
        write_atomic(path, &encoded)
    }
}

/// Circular LBP codes for every pixel at least `radius` away from the border.
/// Returns the codes row-major with their width and height.
fn extended_lbp(src: &GrayImage, radius: u32, neighbors: u32) -> (Vec<u32>, usize, usize) {
    let r = radius as usize;
    let (w, h) = (src.width() as usize, src.height() as usize);
    if w <= 2 * r || h <= 2 * r {
        return (Vec::new(), 0, 0);
    }
    let (out_w, out_h) = (w - 2 * r, h - 2 * r);
    let mut codes = vec![0u32; out_w * out_h];
    let pixel = |row: usize, col: usize| src.get_pixel(col as u32, row as u32)[0] as f64;

    for n in 0..neighbors {
        let angle = 2.0 * PI * n as f64 / neighbors as f64;
        let x = radius as f64 * angle.cos();
        let y = -(radius as f64) * angle.sin();
        let (fx, fy) = (x.floor(), y.floor());
        let (cx, cy) = (x.ceil(), y.ceil());
        let (tx, ty) = (x - fx, y - fy);
        let w1 = (1.0 - tx) * (1.0 - ty);
        let w2 = tx * (1.0 - ty);
        let w3 = (1.0 - tx) * ty;
        let w4 = tx * ty;
        let offset = |base: usize, delta: f64| (base as f64 + delta) as usize;

        for row in r..h - r {
            for col in r..w - r {
                let sample = w1 * pixel(offset(row, fy), offset(col, fx))
                    + w2 * pixel(offset(row, fy), offset(col, cx))
                    + w3 * pixel(offset(row, cy), offset(col, fx))
                    + w4 * pixel(offset(row, cy), offset(col, cx));
                let center = pixel(row, col);
                if sample > center || (sample - center).abs() < EPSILON {
                    codes[(row - r) * out_w + (col - r)] += 1 << n;
                }
            }
        }
    }
    (codes, out_w, out_h)
}

fn chi_square_alt(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(&x, &y)| {
            let (x, y) = (x as f64, y as f64);
            let sum = x + y;
            if sum > EPSILON { 2.0 * (x - y).powi(2) / sum } else { 0.0 }
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;
    use tempfile::tempdir;

    fn params() -> LbphConfig {
        LbphConfig { radius: 1, neighbors: 8, grid_x: 4, grid_y: 4, threshold: 100.0 }
    }

    fn gradient() -> GrayImage {
        GrayImage::from_fn(64, 64, |x, y| Luma([((x * 3 + y) % 256) as u8]))
    }

    fn checkerboard() -> GrayImage {
        GrayImage::from_fn(64, 64, |x, y| Luma([if (x / 4 + y / 4) % 2 == 0 { 30 } else { 220 }]))
    }

    fn trained() -> LbphModel {
        let mut model = LbphModel::new(params());
        model
            .train(&[
                TrainingSample { face: gradient(), label: 0 },
                TrainingSample { face: checkerboard(), label: 1 },
            ])
            .unwrap();
        model
    }

    #[test]
    fn identical_patch_predicts_its_label_at_zero_distance() {
        let model = trained();
        let prediction = model.predict(&checkerboard()).unwrap();
        assert_eq!(prediction.label, Some(1));
        assert!(prediction.confidence.abs() < 1e-9);
    }

    #[test]
    fn nothing_under_threshold_yields_no_label() {
        let mut model = trained();
        model.params.threshold = 0.0;
        let prediction = model.predict(&gradient()).unwrap();
        assert_eq!(prediction.label, None);
        assert_eq!(prediction.confidence, f64::MAX);
    }

    #[test]
    fn untrained_model_refuses_to_predict() {
        let model = LbphModel::new(params());
        assert!(model.predict(&gradient()).is_err());
    }

    #[test]
    fn empty_batch_is_rejected() {
        let mut model = LbphModel::new(params());
        assert!(model.train(&[]).is_err());
    }

    #[test]
    fn saved_model_predicts_the_same() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("model.bin");
        let model = trained();
        model.save(&path).unwrap();

        let loaded = LbphModel::load(&path).unwrap();
        assert_eq!(loaded.sample_count(), 2);
        assert_eq!(loaded.predict(&gradient()).unwrap().label, Some(0));
    }

    #[test]
    fn histogram_cells_are_normalised() {
        let model = LbphModel::new(params());
        let histogram = model.spatial_histogram(&gradient());
        let bins = 1 << 8;
        let first_cell: f32 = histogram[..bins].iter().sum();
        assert!((first_cell - 1.0).abs() < 1e-4);
    }
}
