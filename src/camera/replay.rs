use std::fs;
use std::path::{Path, PathBuf};
use image::GrayImage;
use crate::camera::FrameSource;
use crate::common::{AccessError, Result};
use crate::storage::enrollment::IMAGE_EXTENSIONS;

/// Replays the images of a directory in file-name order as camera frames.
pub struct DirectoryReplay {
    frames: Vec<PathBuf>,
    position: usize,
    repeat: usize,
    emitted: usize,
}

impl DirectoryReplay {
    /// Each image is emitted `repeat` times in a row, so a still photo can
    /// fill an observation window on its own.
    pub fn new(dir: &Path, repeat: usize) -> Result<Self> {
        if !dir.is_dir() {
            return Err(AccessError::InvalidPath(dir.to_path_buf()));
        }
        let mut frames: Vec<PathBuf> = fs::read_dir(dir)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| {
                p.is_file()
                    && p.extension()
                        .and_then(|e| e.to_str())
                        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
                        .unwrap_or(false)
            })
            .collect();
        frames.sort();
        tracing::info!("Replaying {} frame(s) from {}", frames.len(), dir.display());

        Ok(Self {
            frames,
            position: 0,
            repeat: repeat.max(1),
            emitted: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl FrameSource for DirectoryReplay {
    fn next_frame(&mut self) -> Result<Option<GrayImage>> {
        while let Some(path) = self.frames.get(self.position) {
            match image::open(path) {
                Ok(image) => {
                    self.emitted += 1;
                    if self.emitted >= self.repeat {
                        self.emitted = 0;
                        self.position += 1;
                    }
                    return Ok(Some(image.to_luma8()));
                }
                Err(e) => {
                    tracing::warn!("Skipping unreadable frame {}: {}", path.display(), e);
                    self.position += 1;
                    self.emitted = 0;
                }
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;
    use tempfile::tempdir;

    #[test]
    fn replays_images_in_order_with_repeats() {
        let dir = tempdir().unwrap();
        GrayImage::from_pixel(4, 4, Luma([200])).save(dir.path().join("b.png")).unwrap();
        GrayImage::from_pixel(4, 4, Luma([100])).save(dir.path().join("a.png")).unwrap();
        fs::write(dir.path().join("c.png"), "corrupt").unwrap();
        fs::write(dir.path().join("notes.txt"), "skip").unwrap();

        let mut replay = DirectoryReplay::new(dir.path(), 2).unwrap();
        assert_eq!(replay.len(), 3);

        let mut seen = Vec::new();
        while let Some(frame) = replay.next_frame().unwrap() {
            seen.push(frame.get_pixel(0, 0)[0]);
        }
        assert_eq!(seen, vec![100, 100, 200, 200]);
    }
}
