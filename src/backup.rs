//! Backup pipeline: stage, archive, encrypt, self-check, clean up
//!
//! A run moves through `Copying → Archiving → Encrypting → Verifying →
//! Cleanup`. The staging tree and the plaintext container belong to a
//! [`BackupRun`] whose temporary artifacts are removed when it is dropped, so
//! they are gone after every run whether it succeeded, returned early or
//! failed with an error.
//!
//! The verification step re-checks the staging tree after the encrypted
//! artifact has been written. A failure there is logged and reported but
//! cannot un-commit the artifact.

use crate::archive;
use crate::cipher::{self, EncryptionKey};
use crate::config::VaultConfig;
use crate::hasher::{copy_and_digest, FileDigest};
use crate::logging::RunLog;
use crate::manifest::{manifest_path_string, Manifest, ManifestWriter, Verification, MANIFEST_PATH};
use crate::{Error, Result};
use chrono::Local;
use rayon::prelude::*;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::{NamedTempFile, TempDir};
use tracing::{debug, span, Level};
use walkdir::WalkDir;

/// File extension of encrypted artifacts
pub const ARTIFACT_EXTENSION: &str = "tar.gz.enc";

/// Result of a completed backup run
#[derive(Debug)]
pub struct BackupReport {
    /// Encrypted artifact written by this run
    pub artifact: PathBuf,
    /// Number of source files captured
    pub files: usize,
    /// Outcome of the post-encryption self-check, `None` if it could not run
    pub verification: Option<Verification>,
}

impl BackupReport {
    pub fn verified(&self) -> bool {
        self.verification.as_ref().is_some_and(Verification::is_intact)
    }
}

/// Temporary artifacts owned by a single backup run
struct BackupRun {
    staging: TempDir,
    container: NamedTempFile,
}

impl BackupRun {
    fn begin(work_dir: &Path, stamp: &str) -> Result<Self> {
        let staging = tempfile::Builder::new()
            .prefix(&format!("staging_{}_", stamp))
            .tempdir_in(work_dir)?;
        let container = tempfile::Builder::new()
            .prefix(&format!("snapshot_{}_", stamp))
            .suffix(".tar.gz")
            .tempfile_in(work_dir)?;

        Ok(Self { staging, container })
    }

    fn staging(&self) -> &Path {
        self.staging.path()
    }

    fn container(&self) -> &Path {
        self.container.path()
    }

    fn close(self) -> std::io::Result<()> {
        self.staging.close()?;
        self.container.close()
    }
}

/// Produces one encrypted snapshot of `config.source_dir` per run
pub struct BackupPipeline {
    config: VaultConfig,
    log: RunLog,
}

impl BackupPipeline {
    /// Create a pipeline writing its audit trail to `log`
    pub fn new(config: VaultConfig, log: RunLog) -> Self {
        Self { config, log }
    }

    /// Create a pipeline that logs to `config.backup_log`
    pub fn from_config(config: VaultConfig) -> Self {
        let log = RunLog::new(config.backup_log.clone());
        Self::new(config, log)
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    /// Run one full backup
    pub fn run(&self) -> Result<BackupReport> {
        let stamp = run_stamp();
        let span = span!(Level::INFO, "backup", run = %stamp);
        let _enter = span.enter();

        self.log.info(format!(
            "Starting backup: {} -> {}",
            self.config.source_dir.display(),
            self.config.backup_dir.display()
        ));

        let result = self.run_stages(&stamp);
        match &result {
            Ok(report) => self.log.info(format!(
                "Backup process completed: {} files in {}",
                report.files,
                report.artifact.display()
            )),
            Err(e) => self.log.error(format!("Backup failed: {}", e)),
        }
        result
    }

    fn run_stages(&self, stamp: &str) -> Result<BackupReport> {
        if !self.config.source_dir.is_dir() {
            return Err(Error::Configuration {
                reason: format!(
                    "source directory does not exist: {}",
                    self.config.source_dir.display()
                ),
            });
        }
        self.config.ensure_directories()?;

        let run = BackupRun::begin(&self.config.work_dir, stamp)?;

        // Copying
        let manifest = self.copy_into_staging(run.staging())?;
        self.log.info(format!(
            "File copy complete: {} files staged in {}",
            manifest.len(),
            run.staging().display()
        ));

        // Archiving
        archive::pack(run.staging(), run.container())?;
        self.log.info(format!("Compressed to: {}", run.container().display()));

        // Encrypting
        let key = cipher::load_or_create_key(self.config.external_key().as_deref(), &self.config.key_file)?;
        let artifact = self.encrypt_container(run.container(), &key, stamp)?;
        self.log.info(format!("Encrypted backup saved to: {}", artifact.display()));

        // Verifying
        let verification = match manifest.verify(run.staging()) {
            Ok(outcome) if outcome.is_intact() => {
                self.log.info("Hash verification successful.");
                Some(outcome)
            }
            Ok(outcome) => {
                self.log.error(format!("Hash verification failed: {}", outcome));
                Some(outcome)
            }
            Err(e) => {
                self.log.error(format!("Hash verification could not run: {}", e));
                None
            }
        };

        // Cleanup
        if let Err(e) = run.close() {
            self.log.warn(format!("Cleanup of temporary files failed: {}", e));
        }

        Ok(BackupReport {
            artifact,
            files: manifest.len(),
            verification,
        })
    }

    /// Copy every regular source file into `staging`, hashing while copying,
    /// and write the manifest in discovery order.
    fn copy_into_staging(&self, staging: &Path) -> Result<Manifest> {
        let source = &self.config.source_dir;
        let files = discover_files(source)?;

        let mut writer = ManifestWriter::create(staging)?;

        let digests: Vec<FileDigest> = files
            .par_iter()
            .map(|relative| {
                let dst = staging.join(relative);
                if let Some(parent) = dst.parent() {
                    fs::create_dir_all(parent)?;
                }
                copy_and_digest(source.join(relative), &dst)
            })
            .collect::<Result<_>>()?;

        for (relative, digest) in files.iter().zip(digests) {
            writer.record(relative, digest)?;
            self.log.info(format!(
                "Backed up: {} -> {}",
                source.join(relative).display(),
                staging.join(relative).display()
            ));
        }

        writer.finish()
    }

    /// Encrypt the container and atomically place the artifact in `backup_dir`
    fn encrypt_container(&self, container: &Path, key: &EncryptionKey, stamp: &str) -> Result<PathBuf> {
        let plaintext = fs::read(container)?;
        let ciphertext = cipher::encrypt(&plaintext, key)?;
        drop(plaintext);

        let artifact_path = self
            .config
            .backup_dir
            .join(format!("{}.{}", stamp, ARTIFACT_EXTENSION));

        let mut pending = NamedTempFile::new_in(&self.config.backup_dir)?;
        pending.write_all(&ciphertext)?;
        pending.as_file().sync_all()?;
        pending
            .persist_noclobber(&artifact_path)
            .map_err(|e| Error::Io(e.error))?;

        debug!("Wrote {} bytes to {}", ciphertext.len(), artifact_path.display());
        Ok(artifact_path)
    }
}

/// Walk `source` and return relative paths of regular files, sorted by name
/// within each directory. Symlinks and special files are skipped.
fn discover_files(source: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for entry in WalkDir::new(source).follow_links(false).sort_by_file_name() {
        let entry = entry.map_err(|e| Error::Io(e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|_| Error::Configuration {
                reason: format!("{} is not under {}", entry.path().display(), source.display()),
            })?
            .to_path_buf();

        match manifest_path_string(&relative) {
            Some(path) if path == MANIFEST_PATH => {
                return Err(Error::ReservedPath { path: relative });
            }
            Some(_) => files.push(relative),
            None => {
                return Err(Error::ManifestFormat {
                    line: files.len() + 1,
                    reason: format!(
                        "path cannot be stored in a manifest line: {}",
                        relative.display()
                    ),
                });
            }
        }
    }

    Ok(files)
}

/// Timestamp naming one run, unique to the millisecond
fn run_stamp() -> String {
    Local::now().format("%Y%m%d_%H%M%S_%3f").to_string()
}
