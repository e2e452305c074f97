use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use crate::common::Result;

/// Append-only `name,count` log of stabilized recognition decisions.
pub struct EventLog {
    path: PathBuf,
    file: File,
}

impl EventLog {
    /// Starts a fresh log, discarding whatever an earlier run left behind.
    pub fn create_fresh(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        tracing::debug!("Event log started at {}", path.display());
        Ok(Self { path: path.to_path_buf(), file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&mut self, name: &str, count: usize) -> Result<()> {
        writeln!(self.file, "{},{}", name, count)?;
        self.file.flush()?;
        Ok(())
    }
}
