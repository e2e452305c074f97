use std::fs;
use std::path::{Path, PathBuf};
use directories::ProjectDirs;
use crate::common::config::Config;
use crate::common::error::{AccessError, Result};

pub enum RunMode {
    Development(PathBuf), // Base directory for dev mode
    System,
    User(PathBuf),
}

/// Resolves where the station keeps its config, dataset and recognizer files.
pub struct Paths {
    mode: RunMode,
}

impl Paths {
    pub fn new(dev: bool, system: bool) -> Result<Self> {
        match (dev, system) {
            (true, true) => Err(AccessError::Config(
                "Cannot use both --dev and --system flags".into(),
            )),
            (true, false) => Self::development(PathBuf::from("./dev_data")),
            (false, true) => Ok(Self { mode: RunMode::System }),
            (false, false) => {
                let dirs = ProjectDirs::from("com", "dooraccess", "DoorAccess")
                    .ok_or_else(|| AccessError::Storage("Failed to get project dirs".into()))?;
                let base = dirs.data_dir().to_path_buf();
                fs::create_dir_all(&base)?;
                tracing::debug!("User mode - using data directory: {}", base.display());
                Ok(Self { mode: RunMode::User(base) })
            }
        }
    }

    pub fn development(base_dir: PathBuf) -> Result<Self> {
        for sub in ["dataset", "recognizer", "textfiles", "configs", "debug"] {
            fs::create_dir_all(base_dir.join(sub))?;
        }
        tracing::info!("Development mode - using local directory: {}", base_dir.display());
        Ok(Self { mode: RunMode::Development(base_dir) })
    }

    pub fn base_dir(&self) -> PathBuf {
        match &self.mode {
            RunMode::Development(base) | RunMode::User(base) => base.clone(),
            RunMode::System => PathBuf::from("/var/lib/door-access"),
        }
    }

    pub fn config_file(&self) -> PathBuf {
        match &self.mode {
            RunMode::Development(base) => base.join("configs/door-access.toml"),
            RunMode::System => PathBuf::from("/etc/door-access/door-access.toml"),
            RunMode::User(_) => {
                // Try user config first, then system config
                if let Some(config_dir) = dirs::config_dir() {
                    let user_config = config_dir.join("door-access/door-access.toml");
                    if user_config.exists() {
                        return user_config;
                    }
                }
                PathBuf::from("/etc/door-access/door-access.toml")
            }
        }
    }

    /// Directory for annotated decision frames; development mode only.
    pub fn debug_dir(&self) -> Option<PathBuf> {
        match &self.mode {
            RunMode::Development(base) => Some(base.join("debug")),
            RunMode::System | RunMode::User(_) => None,
        }
    }

    pub fn is_development(&self) -> bool {
        matches!(self.mode, RunMode::Development(_))
    }

    /// Loads the config (explicit path wins), falling back to defaults when the
    /// mode's config file is absent, and resolves relative paths against the base dir.
    pub fn load_config(&self, explicit: Option<&Path>) -> Result<Config> {
        let mut config = match explicit {
            Some(path) => Config::load_from_path(path)?,
            None => {
                let path = self.config_file();
                if path.exists() {
                    Config::load_from_path(&path)?
                } else {
                    tracing::warn!(
                        "No config at {}, using built-in defaults", path.display()
                    );
                    Config::default()
                }
            }
        };
        config.resolve_paths(&self.base_dir());
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn development_mode_creates_layout() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("dev");
        let paths = Paths::development(base.clone()).unwrap();
        assert!(paths.is_development());
        assert!(base.join("dataset").is_dir());
        assert!(base.join("textfiles").is_dir());
        assert_eq!(paths.debug_dir(), Some(base.join("debug")));
    }

    #[test]
    fn missing_config_falls_back_to_defaults_under_base() {
        let dir = tempdir().unwrap();
        let paths = Paths::development(dir.path().to_path_buf()).unwrap();
        let config = paths.load_config(None).unwrap();
        assert_eq!(config.paths.dataset_dir, dir.path().join("dataset"));
    }

    #[test]
    fn rejects_dev_and_system_together() {
        assert!(Paths::new(true, true).is_err());
    }
}
