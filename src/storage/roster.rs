//! The roster table: one comma-separated row per enrolled identity,
//! `name,dateEnrolled,jobStatus,accessLevel,doorNumber`, no header.
//!
//! Every mutation rewrites the whole table through [`write_atomic`] while
//! holding an exclusive lock on a sibling `.lock` file, so a concurrent trainer
//! process cannot interleave a rebuild with an edit and readers never observe a
//! partially written table. A crash between the temp write and the rename is
//! not recovered; the previous table simply stays in place.

use std::fmt;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use chrono::{DateTime, Local, NaiveDateTime};
use fs2::FileExt;
use serde::Serialize;
use crate::common::{AccessError, Result};
use crate::storage::enrollment::list_identities;
use crate::storage::write_atomic;

pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
pub const DEFAULT_DOOR: &str = "1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum JobStatus {
    Manager,
    #[default]
    Employee,
    Admin,
}

impl FromStr for JobStatus {
    type Err = AccessError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "manager" => Ok(Self::Manager),
            "employee" => Ok(Self::Employee),
            "admin" => Ok(Self::Admin),
            other => Err(AccessError::Storage(format!("Unknown job status: {:?}", other))),
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Manager => "Manager",
            Self::Employee => "Employee",
            Self::Admin => "Admin",
        };
        f.write_str(s)
    }
}

/// Access level 1 through 3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct AccessLevel(u8);

impl AccessLevel {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 3;

    pub fn new(level: u8) -> Result<Self> {
        if (Self::MIN..=Self::MAX).contains(&level) {
            Ok(Self(level))
        } else {
            Err(AccessError::Storage(format!(
                "Access level must be between {} and {}, got {}", Self::MIN, Self::MAX, level
            )))
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl Default for AccessLevel {
    fn default() -> Self {
        Self(Self::MIN)
    }
}

impl FromStr for AccessLevel {
    type Err = AccessError;

    fn from_str(s: &str) -> Result<Self> {
        let level = s
            .trim()
            .parse::<u8>()
            .map_err(|_| AccessError::Storage(format!("Invalid access level: {:?}", s)))?;
        Self::new(level)
    }
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RosterRecord {
    pub name: String,
    pub date_enrolled: NaiveDateTime,
    pub job_status: JobStatus,
    pub access_level: AccessLevel,
    pub door_number: String,
}

impl RosterRecord {
    /// Parses one table row. Missing trailing fields take their defaults;
    /// name and date are required.
    pub fn parse_line(line: &str) -> Result<Self> {
        let parts: Vec<&str> = line.split(',').map(str::trim).collect();
        let name = parts.first().copied().unwrap_or_default();
        if name.is_empty() {
            return Err(AccessError::Storage(format!("Roster row without a name: {:?}", line)));
        }
        let date = parts
            .get(1)
            .ok_or_else(|| AccessError::Storage(format!("Roster row without a date: {:?}", line)))?;
        let date_enrolled = NaiveDateTime::parse_from_str(date, DATE_FORMAT)
            .map_err(|e| AccessError::Storage(format!("Bad date in roster row {:?}: {}", line, e)))?;

        let job_status = match parts.get(2) {
            Some(s) if !s.is_empty() => s.parse()?,
            _ => JobStatus::default(),
        };
        let access_level = match parts.get(3) {
            Some(s) if !s.is_empty() => s.parse()?,
            _ => AccessLevel::default(),
        };
        let door_number = parts.get(4).map(|s| s.to_string()).unwrap_or_default();

        Ok(Self {
            name: name.to_string(),
            date_enrolled,
            job_status,
            access_level,
            door_number,
        })
    }

    pub fn to_line(&self) -> String {
        format!(
            "{},{},{},{},{}",
            self.name,
            self.date_enrolled.format(DATE_FORMAT),
            self.job_status,
            self.access_level,
            self.door_number
        )
    }
}

fn row_name(line: &str) -> &str {
    line.split(',').next().unwrap_or_default().trim()
}

/// Exclusive lock on the table, released when dropped.
struct TableLock(File);

impl Drop for TableLock {
    fn drop(&mut self) {
        let _ = self.0.unlock();
    }
}

pub struct RosterStore {
    path: PathBuf,
}

impl RosterStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<TableLock> {
        let lock_path = self.path.with_extension("lock");
        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = File::create(&lock_path)?;
        file.lock_exclusive()?;
        Ok(TableLock(file))
    }

    /// Raw table contents. A table that does not exist yet reads as empty.
    fn read_table(&self) -> Result<String> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => Ok(contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("Roster {} does not exist yet", self.path.display());
                Ok(String::new())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Linear scan for the first row whose name matches exactly.
    pub fn lookup(&self, name: &str) -> Result<Option<RosterRecord>> {
        let table = self.read_table()?;
        table
            .lines()
            .find(|line| row_name(line) == name)
            .map(RosterRecord::parse_line)
            .transpose()
    }

    /// Every parseable row in table order; malformed rows are skipped with a warning.
    pub fn list(&self) -> Result<Vec<RosterRecord>> {
        let table = self.read_table()?;
        Ok(table
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match RosterRecord::parse_line(line) {
                Ok(record) => Some(record),
                Err(e) => {
                    tracing::warn!("Skipping roster row: {}", e);
                    None
                }
            })
            .collect())
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.list()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn record_at(&self, index: usize) -> Result<Option<RosterRecord>> {
        Ok(self.list()?.into_iter().nth(index))
    }

    /// Rewrites job status and access level of `name`'s row, leaving the
    /// enrollment date, door and every other row untouched. Nothing is written
    /// when no row matches.
    pub fn update(&self, name: &str, job_status: JobStatus, access_level: AccessLevel) -> Result<()> {
        let _lock = self.lock()?;
        let table = self.read_table()?;

        let mut modified = false;
        let mut lines = Vec::new();
        for line in table.lines() {
            if !modified && row_name(line) == name {
                let mut record = RosterRecord::parse_line(line)?;
                record.job_status = job_status;
                record.access_level = access_level;
                lines.push(record.to_line());
                modified = true;
            } else {
                lines.push(line.to_string());
            }
        }

        if !modified {
            tracing::warn!("No roster entry found for: {}", name);
            return Err(AccessError::RosterEntryNotFound(name.to_string()));
        }

        let mut contents = lines.join("\n");
        contents.push('\n');
        write_atomic(&self.path, contents.as_bytes())?;
        tracing::info!("Updated {} to {} / level {}", name, job_status, access_level);
        Ok(())
    }

    /// Replaces the whole table with one default row per immediate
    /// subdirectory of `dataset_dir`. Manual edits made since the last rebuild
    /// are lost. Returns the number of rows written.
    pub fn rebuild_from_enrollment_tree(&self, dataset_dir: &Path) -> Result<usize> {
        let identities = list_identities(dataset_dir)?;
        let _lock = self.lock()?;

        let contents: String = identities
            .iter()
            .map(|identity| {
                let modified: DateTime<Local> = identity.modified.into();
                let record = RosterRecord {
                    name: identity.name.clone(),
                    date_enrolled: modified.naive_local(),
                    job_status: JobStatus::default(),
                    access_level: AccessLevel::default(),
                    door_number: DEFAULT_DOOR.to_string(),
                };
                record.to_line() + "\n"
            })
            .collect();

        write_atomic(&self.path, contents.as_bytes())?;
        tracing::info!("Roster rebuilt with {} identities from {}", identities.len(), dataset_dir.display());
        Ok(identities.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const TABLE: &str = "alice,2024-03-01 09:30:00,Manager,3,2\n\
                         bob,2024-03-02 10:00:00,Employee,1,1\n";

    fn store_with(contents: &str) -> (tempfile::TempDir, RosterStore) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("names.csv");
        fs::write(&path, contents).unwrap();
        (dir, RosterStore::new(path))
    }

    #[test]
    fn lookup_finds_exact_match() {
        let (_dir, store) = store_with(TABLE);
        let alice = store.lookup("alice").unwrap().unwrap();
        assert_eq!(alice.job_status, JobStatus::Manager);
        assert_eq!(alice.access_level.get(), 3);
        assert_eq!(alice.door_number, "2");
        assert!(store.lookup("ali").unwrap().is_none());
    }

    #[test]
    fn lookup_on_missing_table_is_a_miss() {
        let dir = tempdir().unwrap();
        let store = RosterStore::new(dir.path().join("names.csv"));
        assert!(store.lookup("alice").unwrap().is_none());
    }

    #[test]
    fn absent_optional_fields_take_defaults() {
        let record = RosterRecord::parse_line("carol,2024-01-01 00:00:00").unwrap();
        assert_eq!(record.job_status, JobStatus::Employee);
        assert_eq!(record.access_level.get(), 1);
        assert_eq!(record.door_number, "");
    }

    #[test]
    fn update_rewrites_only_matching_fields() {
        let (_dir, store) = store_with(TABLE);
        store.update("bob", JobStatus::Admin, AccessLevel::new(2).unwrap()).unwrap();

        let contents = fs::read_to_string(store.path()).unwrap();
        assert_eq!(
            contents,
            "alice,2024-03-01 09:30:00,Manager,3,2\n\
             bob,2024-03-02 10:00:00,Admin,2,1\n"
        );
    }

    #[test]
    fn update_of_missing_name_leaves_table_untouched() {
        let (_dir, store) = store_with(TABLE);
        let before = fs::read(store.path()).unwrap();

        let err = store.update("mallory", JobStatus::Admin, AccessLevel::new(3).unwrap()).unwrap_err();
        assert!(matches!(err, AccessError::RosterEntryNotFound(ref n) if n == "mallory"));
        assert_eq!(fs::read(store.path()).unwrap(), before);
    }

    #[test]
    fn rebuild_replaces_table_with_one_row_per_subdirectory() {
        let (dir, store) = store_with("ghost,2020-01-01 00:00:00,Admin,3,9\nalice,2020-01-01 00:00:00,Manager,2,3\n");
        let dataset = dir.path().join("dataset");
        for name in ["alice", "bob", "carol"] {
            fs::create_dir_all(dataset.join(name)).unwrap();
        }
        fs::create_dir_all(dataset.join("bob/deeper")).unwrap();
        fs::write(dataset.join("README"), "not an identity").unwrap();

        assert_eq!(store.rebuild_from_enrollment_tree(&dataset).unwrap(), 3);

        let records = store.list().unwrap();
        let names: Vec<&str> = records.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["alice", "bob", "carol"]);
        assert!(records.iter().all(|r| r.job_status == JobStatus::Employee
            && r.access_level.get() == 1
            && r.door_number == DEFAULT_DOOR));
        assert!(store.lookup("ghost").unwrap().is_none());
    }

    #[test]
    fn record_at_steps_through_profiles() {
        let (_dir, store) = store_with(TABLE);
        assert_eq!(store.len().unwrap(), 2);
        assert_eq!(store.record_at(1).unwrap().unwrap().name, "bob");
        assert!(store.record_at(2).unwrap().is_none());
    }

    #[test]
    fn access_level_is_bounded() {
        assert!(AccessLevel::new(0).is_err());
        assert!(AccessLevel::new(4).is_err());
        assert!("2".parse::<AccessLevel>().is_ok());
    }
}
