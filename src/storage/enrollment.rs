use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use crate::common::{AccessError, Result};
use crate::core::labels::UNKNOWN;

pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "xpm"];

/// One identity folder directly under the dataset root.
#[derive(Debug, Clone)]
pub struct IdentityDir {
    pub name: String,
    pub path: PathBuf,
    pub modified: SystemTime,
}

/// Lists the immediate subdirectories of `root`, sorted by name. Any error
/// reading the root or a directory's metadata aborts the listing.
pub fn list_identities(root: &Path) -> Result<Vec<IdentityDir>> {
    let mut identities = Vec::new();
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        let path = entry.path();
        let metadata = fs::metadata(&path)?;
        if !metadata.is_dir() {
            continue;
        }
        identities.push(IdentityDir {
            name: entry.file_name().to_string_lossy().into_owned(),
            path,
            modified: metadata.modified()?,
        });
    }
    identities.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(identities)
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct AddReport {
    pub copied: usize,
    pub failed: usize,
}

/// The dataset directory: one folder of face images per identity.
pub struct EnrollmentTree {
    root: PathBuf,
}

impl EnrollmentTree {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn identities(&self) -> Result<Vec<IdentityDir>> {
        list_identities(&self.root)
    }

    /// Folder for `identity`, which must be a single path component usable in
    /// both the roster (comma separated) and label map (whitespace separated).
    /// The reserved name for unrecognised faces is refused.
    pub fn identity_dir(&self, identity: &str) -> Result<PathBuf> {
        let valid = !identity.is_empty()
            && identity != "."
            && identity != ".."
            && identity != UNKNOWN
            && !identity.contains(['/', '\\', ','])
            && !identity.chars().any(char::is_whitespace);
        if !valid {
            return Err(AccessError::InvalidPath(self.root.join(identity)));
        }
        Ok(self.root.join(identity))
    }

    /// Copies images into the identity's folder, creating it if needed.
    /// Same-named files already there are replaced.
    pub fn add_images(&self, identity: &str, sources: &[PathBuf]) -> Result<AddReport> {
        let target = self.identity_dir(identity)?;
        fs::create_dir_all(&target)?;

        let mut report = AddReport::default();
        for source in sources {
            let Some(file_name) = source.file_name() else {
                report.failed += 1;
                continue;
            };
            if !has_image_extension(source) {
                tracing::warn!("Not an image, skipping: {}", source.display());
                report.failed += 1;
                continue;
            }
            let dest = target.join(file_name);
            if dest.exists() {
                fs::remove_file(&dest)?;
            }
            match fs::copy(source, &dest) {
                Ok(_) => {
                    tracing::debug!("Copied {} to {}", source.display(), dest.display());
                    report.copied += 1;
                }
                Err(e) => {
                    tracing::warn!("Failed to copy {} to {}: {}", source.display(), dest.display(), e);
                    report.failed += 1;
                }
            }
        }
        tracing::info!("Added {} image(s) to {}", report.copied, target.display());
        Ok(report)
    }

    /// Deletes the named files from the identity's folder and returns how many
    /// were removed. Names with path components are ignored.
    pub fn delete_images(&self, identity: &str, file_names: &[String]) -> Result<usize> {
        let target = self.identity_dir(identity)?;
        if !target.is_dir() {
            return Err(AccessError::InvalidPath(target));
        }

        let mut deleted = 0;
        for name in file_names {
            if Path::new(name).file_name().map(|f| f != name.as_str()).unwrap_or(true) {
                tracing::warn!("Refusing to delete outside {}: {}", target.display(), name);
                continue;
            }
            let path = target.join(name);
            if !path.is_file() {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => {
                    tracing::debug!("Deleted {}", path.display());
                    deleted += 1;
                }
                Err(e) => tracing::warn!("Failed to delete {}: {}", path.display(), e),
            }
        }
        tracing::info!("Deleted {} image(s) from {}", deleted, target.display());
        Ok(deleted)
    }

    /// First image in the identity's folder by file name, used as the profile picture.
    pub fn first_image(&self, identity: &str) -> Option<PathBuf> {
        let dir = self.identity_dir(identity).ok()?;
        let mut images: Vec<PathBuf> = fs::read_dir(dir)
            .ok()?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && has_image_extension(p))
            .collect();
        images.sort();
        images.into_iter().next()
    }
}
