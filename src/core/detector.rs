use std::path::Path;
use std::sync::Arc;
use image::{imageops::{self, FilterType}, GrayImage};
use ndarray::{Array4, CowArray};
use ort::{Environment, GraphOptimizationLevel, Session, SessionBuilder, Value};
use crate::common::config::DetectorConfig;
use crate::common::{AccessError, Result};
use crate::core::capability::{FaceDetect, FaceRect};

/// Candidate box in detector input space, before scaling back to the frame.
#[derive(Debug, Clone)]
struct Candidate {
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    confidence: f32,
}

/// YOLO-style single-class face detector running on ONNX Runtime.
pub struct OnnxFaceDetector {
    session: Session,
    _environment: Arc<Environment>,
    config: DetectorConfig,
}

impl OnnxFaceDetector {
    pub fn new(model_path: &Path, config: &DetectorConfig) -> Result<Self> {
        let environment = Arc::new(
            Environment::builder()
                .with_name("face_detector")
                .build()
                .map_err(|e| AccessError::Model(format!("Failed to create environment: {}", e)))?,
        );

        if !model_path.exists() {
            return Err(AccessError::Model(format!(
                "Detector model not found at: {:?}", model_path
            )));
        }

        let session = SessionBuilder::new(&environment)?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_model_from_file(model_path)?;

        Ok(Self {
            session,
            _environment: environment,
            config: config.clone(),
        })
    }

    fn image_to_array(&self, gray: &GrayImage) -> Array4<f32> {
        let (width, height) = (gray.width() as usize, gray.height() as usize);
        let mut array = Array4::<f32>::zeros((1, 3, height, width));
        let norm_factor = 1.0 / 255.0;

        // Replicate the single channel into the three the network expects
        for (x, y, pixel) in gray.enumerate_pixels() {
            let value = pixel[0] as f32 * norm_factor;
            let (x, y) = (x as usize, y as usize);
            array[[0, 0, y, x]] = value;
            array[[0, 1, y, x]] = value;
            array[[0, 2, y, x]] = value;
        }
        array
    }

    fn parse_detections(&self, outputs: &[Value]) -> Result<Vec<Candidate>> {
        let mut candidates = Vec::new();
        let Some(first) = outputs.first() else {
            return Ok(candidates);
        };
        let output = first.try_extract::<f32>()?.view().to_owned();
        let shape = output.shape().to_vec();
        let values: Vec<f32> = output.iter().copied().collect();

        // [1, 5, N] (transposed) or [1, N, 5]
        let (num_predictions, prediction_length, is_transposed) = match shape.as_slice() {
            [_, a, b] if b > a && *a <= 10 => (*b, *a, true),
            [_, a, b] => (*a, *b, false),
            [a, b] => (*a, *b, false),
            _ => {
                tracing::warn!("Unexpected detector output shape: {:?}", shape);
                return Ok(candidates);
            }
        };
        if prediction_length < 5 {
            tracing::warn!("Detector output has no confidence column: {:?}", shape);
            return Ok(candidates);
        }

        let input_w = self.config.input_width as f32;
        let input_h = self.config.input_height as f32;
        for i in 0..num_predictions {
            let field = |k: usize| {
                if is_transposed {
                    values[k * num_predictions + i]
                } else {
                    values[i * prediction_length + k]
                }
            };
            let (mut cx, mut cy, mut w, mut h, confidence) =
                (field(0), field(1), field(2), field(3), field(4));
            if confidence <= 0.001 {
                continue;
            }

            // Normalised coordinates need scaling to input pixels
            if cx <= 1.0 && cy <= 1.0 && w <= 1.0 && h <= 1.0 {
                cx *= input_w;
                cy *= input_h;
                w *= input_w;
                h *= input_h;
            }

            let x1 = (cx - w / 2.0).max(0.0);
            let y1 = (cy - h / 2.0).max(0.0);
            let x2 = (cx + w / 2.0).min(input_w);
            let y2 = (cy + h / 2.0).min(input_h);
            if x2 > x1 && y2 > y1 {
                candidates.push(Candidate { x1, y1, x2, y2, confidence });
            }
        }

        let mut kept = apply_nms(candidates, self.config.iou_threshold);
        kept.retain(|c| c.confidence >= self.config.confidence);
        Ok(kept)
    }
}

impl FaceDetect for OnnxFaceDetector {
    fn detect_faces(&self, frame: &GrayImage) -> Result<Vec<FaceRect>> {
        let (orig_w, orig_h) = (frame.width() as f32, frame.height() as f32);
        let (in_w, in_h) = (self.config.input_width, self.config.input_height);

        let array = if frame.dimensions() == (in_w, in_h) {
            self.image_to_array(frame)
        } else {
            let resized = imageops::resize(frame, in_w, in_h, FilterType::Nearest);
            self.image_to_array(&resized)
        };

        let cow_array = CowArray::from(array.into_dyn());
        let input_tensor = Value::from_array(self.session.allocator(), &cow_array)?;
        let outputs = self.session.run(vec![input_tensor])?;
        let candidates = self.parse_detections(&outputs)?;

        let scale_x = orig_w / in_w as f32;
        let scale_y = orig_h / in_h as f32;
        let min = self.config.min_face_size as f32;
        let max = self.config.max_face_size as f32;

        let faces = candidates
            .into_iter()
            .map(|c| {
                FaceRect::new(
                    (c.x1 * scale_x) as u32,
                    (c.y1 * scale_y) as u32,
                    ((c.x2 - c.x1) * scale_x) as u32,
                    ((c.y2 - c.y1) * scale_y) as u32,
                )
            })
            .filter(|r| {
                let side = r.width.min(r.height) as f32;
                side >= min && side <= max
            })
            .collect();
        Ok(faces)
    }
}

/// Greedy non-maximum suppression; the result is sorted by confidence.
fn apply_nms(mut boxes: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
    boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<Candidate> = Vec::new();
    for candidate in boxes {
        if keep.iter().all(|k| calculate_iou(k, &candidate) < iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}

fn calculate_iou(box1: &Candidate, box2: &Candidate) -> f32 {
    let x1 = box1.x1.max(box2.x1);
    let y1 = box1.y1.max(box2.y1);
    let x2 = box1.x2.min(box2.x2);
    let y2 = box1.y2.min(box2.y2);

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let area1 = (box1.x2 - box1.x1) * (box1.y2 - box1.y1);
    let area2 = (box2.x2 - box2.x1) * (box2.y2 - box2.y1);
    let union = area1 + area2 - intersection;

    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(x1: f32, y1: f32, x2: f32, y2: f32, confidence: f32) -> Candidate {
        Candidate { x1, y1, x2, y2, confidence }
    }

    #[test]
    fn nms_drops_overlapping_weaker_box() {
        let kept = apply_nms(
            vec![
                candidate(0.0, 0.0, 100.0, 100.0, 0.6),
                candidate(5.0, 5.0, 105.0, 105.0, 0.9),
                candidate(300.0, 300.0, 400.0, 400.0, 0.7),
            ],
            0.45,
        );
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].confidence, 0.9);
        assert_eq!(kept[1].confidence, 0.7);
    }

    #[test]
    fn disjoint_boxes_have_zero_iou() {
        let a = candidate(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = candidate(20.0, 20.0, 30.0, 30.0, 1.0);
        assert_eq!(calculate_iou(&a, &b), 0.0);
    }
}
