pub mod enrollment;
pub mod event_log;
pub mod roster;

use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use crate::common::Result;

pub use enrollment::{EnrollmentTree, IdentityDir, list_identities};
pub use event_log::EventLog;
pub use roster::{AccessLevel, JobStatus, RosterRecord, RosterStore};

/// Replaces `path` with `contents` via a synced temp file in the same
/// directory and a rename, so readers see either the old or the new file.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;

    let mut temp = NamedTempFile::new_in(parent)?;
    temp.write_all(contents)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn write_atomic_creates_parents_and_replaces() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/table.csv");
        write_atomic(&path, b"first\n").unwrap();
        write_atomic(&path, b"second\n").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "second\n");

        let leftovers = fs::read_dir(path.parent().unwrap()).unwrap().count();
        assert_eq!(leftovers, 1);
    }
}
