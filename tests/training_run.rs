use std::fs;
use std::path::Path;

use door_access::common::config::LbphConfig;
use door_access::common::{AccessError, Result};
use door_access::core::{
    CorpusBuilder, FaceDetect, FaceRect, IdentityCapability, IdentityModel, LabelMap, LbphModel,
};
use door_access::storage::{JobStatus, RosterStore};
use image::{GrayImage, Luma};
use tempfile::tempdir;

/// Treats any non-black image as one face filling the frame.
struct WholeFrameDetector;

impl FaceDetect for WholeFrameDetector {
    fn detect_faces(&self, frame: &GrayImage) -> Result<Vec<FaceRect>> {
        if frame.pixels().any(|p| p[0] > 0) {
            Ok(vec![FaceRect::new(0, 0, frame.width(), frame.height())])
        } else {
            Ok(vec![])
        }
    }
}

fn lbph() -> LbphModel {
    LbphModel::new(LbphConfig { radius: 1, neighbors: 8, grid_x: 4, grid_y: 4, threshold: 100.0 })
}

fn gradient(slope: u32) -> GrayImage {
    GrayImage::from_fn(64, 64, |x, y| Luma([((x * slope + y) % 250 + 1) as u8]))
}

fn checkerboard(cell: u32) -> GrayImage {
    GrayImage::from_fn(64, 64, |x, y| Luma([if (x / cell + y / cell) % 2 == 0 { 30 } else { 220 }]))
}

fn save(dir: &Path, name: &str, image: &GrayImage) {
    fs::create_dir_all(dir).unwrap();
    image.save(dir.join(name)).unwrap();
}

#[test]
fn training_run_produces_a_usable_model_and_dense_labels() {
    let root = tempdir().unwrap();
    let dataset = root.path().join("dataset");
    save(&dataset.join("alice"), "1.png", &gradient(3));
    save(&dataset.join("alice"), "2.png", &gradient(4));
    save(&dataset.join("bob"), "1.png", &checkerboard(4));
    save(&dataset.join("carol"), "dark.png", &GrayImage::new(64, 64));
    fs::write(dataset.join("carol/corrupt.jpg"), b"\xff\xd8 not really").unwrap();

    let model_file = root.path().join("recognizer/model.bin");
    let labels_file = root.path().join("recognizer/labels.txt");
    let mut model = lbph();
    let report = CorpusBuilder::new(&WholeFrameDetector, 64)
        .run(&dataset, &mut model, &model_file, &labels_file)
        .unwrap();

    assert_eq!(report.total_samples, 3);
    assert_eq!(
        report.per_identity,
        vec![("alice".to_string(), 2), ("bob".to_string(), 1), ("carol".to_string(), 0)]
    );

    let labels = LabelMap::load(&labels_file).unwrap();
    assert!(labels.is_dense());
    assert_eq!(labels.len(), 3);

    let capability = IdentityCapability::new(
        Box::new(WholeFrameDetector),
        Box::new(LbphModel::load(&model_file).unwrap()),
        labels,
        64,
    );
    let frame = checkerboard(4);
    let faces = capability.detect_faces(&frame).unwrap();
    let prediction = capability.predict(&frame, &faces[0]).unwrap().unwrap();
    assert_eq!(capability.label_name(prediction.label), "bob");
}

#[test]
fn retraining_replaces_the_label_map() {
    let root = tempdir().unwrap();
    let dataset = root.path().join("dataset");
    let model_file = root.path().join("model.bin");
    let labels_file = root.path().join("labels.txt");
    save(&dataset.join("alice"), "1.png", &gradient(3));
    save(&dataset.join("bob"), "1.png", &checkerboard(4));

    let builder = CorpusBuilder::new(&WholeFrameDetector, 64);
    builder.run(&dataset, &mut lbph(), &model_file, &labels_file).unwrap();

    fs::remove_dir_all(dataset.join("alice")).unwrap();
    builder.run(&dataset, &mut lbph(), &model_file, &labels_file).unwrap();

    assert_eq!(fs::read_to_string(&labels_file).unwrap(), "0 bob\n");
}

#[test]
fn all_faceless_dataset_fails_without_writing_a_model() {
    let root = tempdir().unwrap();
    let dataset = root.path().join("dataset");
    save(&dataset.join("alice"), "dark.png", &GrayImage::new(64, 64));
    fs::create_dir_all(dataset.join("bob")).unwrap();

    let model_file = root.path().join("model.bin");
    let mut model = lbph();
    let err = CorpusBuilder::new(&WholeFrameDetector, 64)
        .run(&dataset, &mut model, &model_file, &root.path().join("labels.txt"))
        .unwrap_err();

    assert!(matches!(err, AccessError::EmptyCorpus(_)));
    assert!(!model_file.exists());
    assert!(model.predict(&gradient(3)).is_err());
}

#[test]
fn roster_rebuild_follows_the_dataset() {
    let root = tempdir().unwrap();
    let dataset = root.path().join("dataset");
    for name in ["alice", "bob"] {
        fs::create_dir_all(dataset.join(name)).unwrap();
    }
    let roster = RosterStore::new(root.path().join("textfiles/names.csv"));

    assert_eq!(roster.rebuild_from_enrollment_tree(&dataset).unwrap(), 2);
    let bob = roster.lookup("bob").unwrap().unwrap();
    assert_eq!(bob.job_status, JobStatus::Employee);
    assert_eq!(bob.access_level.get(), 1);
    assert_eq!(bob.door_number, "1");
}
