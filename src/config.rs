//! Runtime configuration
//!
//! Every pipeline receives a [`VaultConfig`] at construction instead of
//! reading global paths. Defaults mirror the layout of a plain working
//! directory:
//!
//! | field         | default              |
//! |---------------|----------------------|
//! | `source_dir`  | `source_data`        |
//! | `backup_dir`  | `backups`            |
//! | `restore_dir` | `restored_data`      |
//! | `work_dir`    | OS temp directory    |
//! | `backup_log`  | `logs/backup.log`    |
//! | `restore_log` | `logs/restore.log`   |
//! | `key_file`    | `secret.key`         |
//! | `key_env`     | `SECUREVAULT_KEY`    |
//! | `schedule_at` | `12:00`              |

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable consulted for the encryption key before the key file
pub const DEFAULT_KEY_ENV: &str = "SECUREVAULT_KEY";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Directory tree to back up
    pub source_dir: PathBuf,
    /// Where encrypted artifacts are written
    pub backup_dir: PathBuf,
    /// Default restore destination
    pub restore_dir: PathBuf,
    /// Parent directory for staging trees and temporary containers
    pub work_dir: PathBuf,
    /// Append-only log of backup runs
    pub backup_log: PathBuf,
    /// Append-only log of restore runs
    pub restore_log: PathBuf,
    /// Persisted encryption key
    pub key_file: PathBuf,
    /// Environment variable holding a hex key, checked before `key_file`
    pub key_env: String,
    /// Local time of day (`HH:MM`) for scheduled backups
    pub schedule_at: String,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            source_dir: PathBuf::from("source_data"),
            backup_dir: PathBuf::from("backups"),
            restore_dir: PathBuf::from("restored_data"),
            work_dir: std::env::temp_dir(),
            backup_log: PathBuf::from("logs/backup.log"),
            restore_log: PathBuf::from("logs/restore.log"),
            key_file: PathBuf::from("secret.key"),
            key_env: DEFAULT_KEY_ENV.to_string(),
            schedule_at: "12:00".to_string(),
        }
    }
}

impl VaultConfig {
    /// Load configuration from a TOML file. Missing fields keep their defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| Error::Configuration {
            reason: format!("Failed to read {}: {}", path.display(), e),
        })?;

        toml::from_str(&content).map_err(|e| Error::Configuration {
            reason: format!("Failed to parse {}: {}", path.display(), e),
        })
    }

    /// Use `path` when given, defaults otherwise
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    /// Save configuration as TOML
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self).map_err(|e| Error::Configuration {
            reason: format!("Failed to serialize config: {}", e),
        })?;

        fs::write(path, content)?;
        Ok(())
    }

    /// Read the external key source, if set
    pub fn external_key(&self) -> Option<String> {
        std::env::var(&self.key_env).ok()
    }

    /// Create the output, work and log directories
    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.backup_dir)?;
        fs::create_dir_all(&self.work_dir)?;
        for log in [&self.backup_log, &self.restore_log] {
            if let Some(parent) = log.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }

    /// Rebase every relative path onto `base`. Useful for tests and for
    /// running against a self-contained directory.
    pub fn rooted_at<P: AsRef<Path>>(base: P) -> Self {
        let base = base.as_ref();
        let defaults = Self::default();
        Self {
            source_dir: base.join(defaults.source_dir),
            backup_dir: base.join(defaults.backup_dir),
            restore_dir: base.join(defaults.restore_dir),
            work_dir: base.join("work"),
            backup_log: base.join(defaults.backup_log),
            restore_log: base.join(defaults.restore_log),
            key_file: base.join(defaults.key_file),
            ..defaults
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = VaultConfig::default();
        assert_eq!(config.backup_dir, PathBuf::from("backups"));
        assert_eq!(config.key_env, "SECUREVAULT_KEY");
        assert_eq!(config.schedule_at, "12:00");
    }

    #[test]
    fn test_partial_toml_keeps_defaults() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("securevault.toml");
        fs::write(&path, "backup_dir = \"/srv/vault\"\nschedule_at = \"03:30\"\n")?;

        let config = VaultConfig::load(&path)?;
        assert_eq!(config.backup_dir, PathBuf::from("/srv/vault"));
        assert_eq!(config.schedule_at, "03:30");
        assert_eq!(config.source_dir, PathBuf::from("source_data"));
        Ok(())
    }

    #[test]
    fn test_save_then_load() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("conf/securevault.toml");
        let config = VaultConfig::rooted_at(temp_dir.path());

        config.save(&path)?;
        assert_eq!(VaultConfig::load(&path)?, config);
        Ok(())
    }

    #[test]
    fn test_missing_or_invalid_file() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let missing = VaultConfig::load(temp_dir.path().join("nope.toml"));
        assert!(matches!(missing, Err(Error::Configuration { .. })));

        let path = temp_dir.path().join("bad.toml");
        fs::write(&path, "backup_dir = [")?;
        assert!(matches!(VaultConfig::load(&path), Err(Error::Configuration { .. })));
        Ok(())
    }

    #[test]
    fn test_ensure_directories() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let config = VaultConfig::rooted_at(temp_dir.path());
        config.ensure_directories()?;

        assert!(config.backup_dir.is_dir());
        assert!(config.work_dir.is_dir());
        assert!(temp_dir.path().join("logs").is_dir());
        Ok(())
    }
}
