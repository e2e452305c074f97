//! Offline training pipeline: enrollment tree in, trained model and label map out.

use std::fs;
use std::path::{Path, PathBuf};
use image::GrayImage;
use crate::common::{AccessError, Config, Result};
use crate::core::capability::{new_identity_model, FaceDetect, IdentityModel, TrainingSample};
use crate::core::detector::OnnxFaceDetector;
use crate::core::labels::LabelMap;
use crate::storage::list_identities;

/// Samples gathered from one enrollment tree, ready for a single training call.
pub struct Corpus {
    pub samples: Vec<TrainingSample>,
    pub labels: LabelMap,
    /// Usable samples per identity, in label order.
    pub per_identity: Vec<(String, usize)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainingReport {
    pub per_identity: Vec<(String, usize)>,
    pub total_samples: usize,
}

impl TrainingReport {
    pub fn identities(&self) -> usize {
        self.per_identity.len()
    }
}

pub struct CorpusBuilder<'a> {
    detector: &'a dyn FaceDetect,
    face_size: u32,
}

impl<'a> CorpusBuilder<'a> {
    pub fn new(detector: &'a dyn FaceDetect, face_size: u32) -> Self {
        Self { detector, face_size }
    }

    /// Walks every identity folder under `dataset_dir`. An unreadable folder
    /// aborts the walk; an undecodable or faceless image is skipped.
    pub fn collect(&self, dataset_dir: &Path) -> Result<Corpus> {
        if !dataset_dir.is_dir() {
            return Err(AccessError::InvalidPath(dataset_dir.to_path_buf()));
        }

        let mut samples = Vec::new();
        let mut labels = LabelMap::new();
        let mut per_identity = Vec::new();

        for identity in list_identities(dataset_dir)? {
            let label = labels.assign(&identity.name);
            let before = samples.len();

            let mut files: Vec<PathBuf> = fs::read_dir(&identity.path)?
                .map(|entry| entry.map(|e| e.path()))
                .collect::<std::io::Result<_>>()?;
            files.sort();

            for path in files.into_iter().filter(|p| p.is_file()) {
                if let Some(face) = self.face_patch(&path) {
                    samples.push(TrainingSample { face, label });
                }
            }

            let count = samples.len() - before;
            if count == 0 {
                tracing::warn!("No usable faces for {}", identity.name);
            } else {
                tracing::info!("{}: {} sample(s) as label {}", identity.name, count, label);
            }
            per_identity.push((identity.name, count));
        }

        Ok(Corpus { samples, labels, per_identity })
    }

    fn face_patch(&self, path: &Path) -> Option<GrayImage> {
        let image = match image::open(path) {
            Ok(image) => image.to_luma8(),
            Err(e) => {
                tracing::warn!("Could not read image {}: {}", path.display(), e);
                return None;
            }
        };

        let faces = match self.detector.detect_faces(&image) {
            Ok(faces) => faces,
            Err(e) => {
                tracing::warn!("Face detection failed on {}: {}", path.display(), e);
                return None;
            }
        };
        let Some(face) = faces.first() else {
            tracing::warn!("No face detected in {}", path.display());
            return None;
        };
        if faces.len() > 1 {
            tracing::debug!("{} faces in {}, using the first", faces.len(), path.display());
        }
        face.normalized_patch(&image, self.face_size)
    }

    /// Collects, trains `model` in one batch and persists it, then writes the
    /// label map. Nothing is written when the corpus has no samples.
    pub fn run(
        &self,
        dataset_dir: &Path,
        model: &mut dyn IdentityModel,
        model_file: &Path,
        labels_file: &Path,
    ) -> Result<TrainingReport> {
        ensure_writable_parent(model_file)?;
        ensure_writable_parent(labels_file)?;

        let corpus = self.collect(dataset_dir)?;
        if corpus.samples.is_empty() {
            tracing::error!("No training samples found under {}", dataset_dir.display());
            return Err(AccessError::EmptyCorpus(dataset_dir.to_path_buf()));
        }

        tracing::info!(
            "Training on {} samples from {} identities",
            corpus.samples.len(),
            corpus.labels.len()
        );
        model.train(&corpus.samples)?;
        model.save(model_file)?;
        corpus.labels.save(labels_file)?;
        tracing::info!("Model saved to {}, labels to {}", model_file.display(), labels_file.display());

        Ok(TrainingReport {
            total_samples: corpus.samples.len(),
            per_identity: corpus.per_identity,
        })
    }
}

fn ensure_writable_parent(path: &Path) -> Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            fs::create_dir_all(parent).map_err(|e| {
                tracing::error!("Cannot create {}: {}", parent.display(), e);
                AccessError::InvalidPath(path.to_path_buf())
            })
        }
        Some(_) => Ok(()),
        None => Err(AccessError::InvalidPath(path.to_path_buf())),
    }
}

/// Full training run from configuration: ONNX detector, configured backend,
/// configured input and output paths.
pub fn run_training(config: &Config) -> Result<TrainingReport> {
    let paths = &config.paths;
    if !paths.detector_model.is_file() {
        return Err(AccessError::InvalidPath(paths.detector_model.clone()));
    }

    let detector = OnnxFaceDetector::new(&paths.detector_model, &config.detector)?;
    let mut model = new_identity_model(config)?;
    CorpusBuilder::new(&detector, config.recognition.face_size).run(
        &paths.dataset_dir,
        model.as_mut(),
        &paths.model_file,
        &paths.labels_file,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;
    use tempfile::tempdir;
    use crate::core::capability::{FaceRect, Prediction};

    /// Sees a face covering the whole image unless the image is all black.
    struct BrightnessDetector;

    impl FaceDetect for BrightnessDetector {
        fn detect_faces(&self, frame: &GrayImage) -> Result<Vec<FaceRect>> {
            if frame.pixels().any(|p| p[0] > 0) {
                Ok(vec![FaceRect::new(0, 0, frame.width(), frame.height())])
            } else {
                Ok(vec![])
            }
        }
    }

    #[derive(Default)]
    struct RecordingModel {
        trained: Vec<(u32, (u32, u32))>,
    }

    impl IdentityModel for RecordingModel {
        fn train(&mut self, samples: &[TrainingSample]) -> Result<()> {
            self.trained = samples.iter().map(|s| (s.label, s.face.dimensions())).collect();
            Ok(())
        }

        fn predict(&self, _face: &GrayImage) -> Result<Prediction> {
            Ok(Prediction { label: None, confidence: 0.0 })
        }

        fn save(&self, path: &Path) -> Result<()> {
            fs::write(path, format!("{}", self.trained.len()))?;
            Ok(())
        }
    }

    fn face(seed: u8) -> GrayImage {
        GrayImage::from_fn(64, 64, |x, y| Luma([((x + y) as u8).wrapping_add(seed) | 1]))
    }

    fn write_image(dir: &Path, name: &str, image: &GrayImage) {
        fs::create_dir_all(dir).unwrap();
        image.save(dir.join(name)).unwrap();
    }

    #[test]
    fn labels_are_dense_and_faceless_identities_do_not_abort() {
        let root = tempdir().unwrap();
        let dataset = root.path().join("dataset");
        write_image(&dataset.join("alice"), "1.png", &face(10));
        write_image(&dataset.join("alice"), "2.png", &face(20));
        write_image(&dataset.join("bob"), "dark.png", &GrayImage::new(64, 64));
        fs::write(dataset.join("bob/broken.png"), "not a png").unwrap();
        write_image(&dataset.join("carol"), "1.png", &face(30));

        let corpus = CorpusBuilder::new(&BrightnessDetector, 32).collect(&dataset).unwrap();

        assert!(corpus.labels.is_dense());
        assert_eq!(corpus.labels.to_file_string(), "0 alice\n1 bob\n2 carol\n");
        assert_eq!(
            corpus.per_identity,
            vec![("alice".to_string(), 2), ("bob".to_string(), 0), ("carol".to_string(), 1)]
        );
        assert!(corpus.samples.iter().all(|s| s.face.dimensions() == (32, 32)));
    }

    #[test]
    fn run_writes_model_then_labels() {
        let root = tempdir().unwrap();
        let dataset = root.path().join("dataset");
        write_image(&dataset.join("alice"), "1.png", &face(1));
        write_image(&dataset.join("bob"), "1.png", &face(2));
        let model_file = root.path().join("recognizer/model.bin");
        let labels_file = root.path().join("recognizer/labels.txt");

        let mut model = RecordingModel::default();
        let report = CorpusBuilder::new(&BrightnessDetector, 100)
            .run(&dataset, &mut model, &model_file, &labels_file)
            .unwrap();

        assert_eq!(report.total_samples, 2);
        assert_eq!(report.identities(), 2);
        assert_eq!(model.trained, vec![(0, (100, 100)), (1, (100, 100))]);
        assert_eq!(fs::read_to_string(&model_file).unwrap(), "2");
        assert_eq!(fs::read_to_string(&labels_file).unwrap(), "0 alice\n1 bob\n");
    }

    #[test]
    fn empty_corpus_is_distinct_and_writes_nothing() {
        let root = tempdir().unwrap();
        let dataset = root.path().join("dataset");
        write_image(&dataset.join("alice"), "dark.png", &GrayImage::new(64, 64));
        let model_file = root.path().join("model.bin");
        let labels_file = root.path().join("labels.txt");
        fs::write(&labels_file, "0 previous\n").unwrap();

        let err = CorpusBuilder::new(&BrightnessDetector, 100)
            .run(&dataset, &mut RecordingModel::default(), &model_file, &labels_file)
            .unwrap_err();

        assert!(matches!(err, AccessError::EmptyCorpus(_)));
        assert!(!model_file.exists());
        assert_eq!(fs::read_to_string(&labels_file).unwrap(), "0 previous\n");
    }

    #[test]
    fn single_identity_single_image_trains() {
        let root = tempdir().unwrap();
        let dataset = root.path().join("dataset");
        write_image(&dataset.join("alice"), "1.png", &face(1));
        let model_file = root.path().join("model.bin");
        let labels_file = root.path().join("labels.txt");

        let mut model = RecordingModel::default();
        let report = CorpusBuilder::new(&BrightnessDetector, 100)
            .run(&dataset, &mut model, &model_file, &labels_file)
            .unwrap();

        assert_eq!(report.total_samples, 1);
        assert_eq!(report.identities(), 1);
        assert_eq!(model.trained, vec![(0, (100, 100))]);
        assert_eq!(fs::read_to_string(&model_file).unwrap(), "1");
        assert_eq!(fs::read_to_string(&labels_file).unwrap(), "0 alice\n");
    }

    #[test]
    fn missing_dataset_is_an_invalid_path() {
        let root = tempdir().unwrap();
        let err = CorpusBuilder::new(&BrightnessDetector, 100)
            .collect(&root.path().join("absent"))
            .err()
            .unwrap();
        assert!(matches!(err, AccessError::InvalidPath(_)));
    }
}
