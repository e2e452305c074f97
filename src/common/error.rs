use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AccessError {
    #[error("Camera error: {0}")]
    Camera(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Roster has no entry for: {0}")]
    RosterEntryNotFound(String),

    #[error("No training data found under {}: every image was unreadable or faceless", .0.display())]
    EmptyCorpus(PathBuf),

    #[error("Path does not resolve: {}", .0.display())]
    InvalidPath(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("ORT error: {0}")]
    Ort(#[from] ort::OrtError),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, AccessError>;
