pub mod replay;
pub mod v4l2;

use image::GrayImage;
use crate::common::Result;

pub use replay::DirectoryReplay;
pub use v4l2::{Camera, CameraSession};

/// Anything that yields grayscale frames for the live loop.
pub trait FrameSource {
    /// Next frame, or `None` once a finite source is exhausted.
    fn next_frame(&mut self) -> Result<Option<GrayImage>>;
}
