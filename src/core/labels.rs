use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use crate::common::Result;
use crate::storage::write_atomic;

/// Placeholder name for predictions that resolve to no enrolled identity.
pub const UNKNOWN: &str = "Unknown";

/// Numeric model label to enrolled name. A training run assigns labels
/// densely from 0 via [`LabelMap::assign`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelMap {
    names: BTreeMap<u32, String>,
}

impl LabelMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assigns the next dense label to `name` and returns it.
    pub fn assign(&mut self, name: &str) -> u32 {
        let label = self.names.len() as u32;
        self.names.insert(label, name.to_string());
        label
    }

    pub fn name(&self, label: Option<u32>) -> &str {
        label
            .and_then(|l| self.names.get(&l))
            .map(String::as_str)
            .unwrap_or(UNKNOWN)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &str)> {
        self.names.iter().map(|(l, n)| (*l, n.as_str()))
    }

    /// True when the labels are exactly `0..len` with no gaps.
    pub fn is_dense(&self) -> bool {
        self.names.keys().enumerate().all(|(i, l)| i as u32 == *l)
    }

    /// Parses `label name` pairs, one per line. Malformed lines are skipped.
    pub fn parse(contents: &str) -> Self {
        let mut names = BTreeMap::new();
        for (line_no, line) in contents.lines().enumerate() {
            let mut fields = line.split_whitespace();
            let (Some(label), Some(name)) = (fields.next(), fields.next()) else {
                if !line.trim().is_empty() {
                    tracing::warn!("Skipping malformed label line {}: {:?}", line_no + 1, line);
                }
                continue;
            };
            match label.parse::<u32>() {
                Ok(label) => {
                    names.insert(label, name.to_string());
                }
                Err(_) => tracing::warn!("Skipping label line {} with bad id {:?}", line_no + 1, label),
            }
        }
        Self { names }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Ok(Self::parse(&contents))
    }

    /// Missing or unreadable label files degrade to an empty map, so every
    /// prediction resolves to [`UNKNOWN`].
    pub fn load_or_empty(path: &Path) -> Self {
        match Self::load(path) {
            Ok(labels) => labels,
            Err(e) => {
                tracing::warn!("Error opening labels file {}: {}", path.display(), e);
                Self::new()
            }
        }
    }

    pub fn to_file_string(&self) -> String {
        self.iter().map(|(label, name)| format!("{} {}\n", label, name)).collect()
    }

    /// Replaces the label file as a whole; a previous map is never merged.
    pub fn save(&self, path: &Path) -> Result<()> {
        write_atomic(path, self.to_file_string().as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn assign_is_dense_from_zero() {
        let mut labels = LabelMap::new();
        assert_eq!(labels.assign("alice"), 0);
        assert_eq!(labels.assign("bob"), 1);
        assert!(labels.is_dense());
        assert_eq!(labels.name(Some(1)), "bob");
    }

    #[test]
    fn unknown_for_missing_or_absent_label() {
        let labels = LabelMap::parse("0 alice\n");
        assert_eq!(labels.name(Some(7)), UNKNOWN);
        assert_eq!(labels.name(None), UNKNOWN);
    }

    #[test]
    fn parse_skips_malformed_lines() {
        let labels = LabelMap::parse("0 alice\nnot-a-number bob\n\n2\n1   carol\n");
        assert_eq!(labels.len(), 2);
        assert_eq!(labels.name(Some(1)), "carol");
    }

    #[test]
    fn save_replaces_stale_map() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("labels.txt");
        fs::write(&path, "0 old\n1 stale\n2 gone\n").unwrap();

        let mut labels = LabelMap::new();
        labels.assign("alice");
        labels.save(&path).unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "0 alice\n");
    }

    #[test]
    fn load_or_empty_on_missing_file() {
        let dir = tempdir().unwrap();
        assert!(LabelMap::load_or_empty(&dir.path().join("absent.txt")).is_empty());
    }
}
