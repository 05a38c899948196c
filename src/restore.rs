//! Restore pipeline: decrypt, extract, re-verify, then copy out
//!
//! Nothing is written to the destination until the extracted snapshot has
//! been checked against its manifest. Decrypt, extract and manifest-parse
//! errors end the run with `Err`; a failed check ends it with
//! [`RestoreOutcome::VerificationFailed`]. Both temporary artifacts belong to a
//! [`RestoreRun`] and are removed on every exit path.
//!
//! The final copy is best-effort: a file that can't be written is logged,
//! recorded in the [`RestoreSummary`] and skipped. Whether that is acceptable
//! for a given restore is left to the caller via
//! [`RestoreSummary::is_bulk_restored`].

use crate::archive;
use crate::cipher;
use crate::config::VaultConfig;
use crate::logging::RunLog;
use crate::manifest::{Manifest, Verification};
use crate::{Error, Result};
use chrono::Local;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::{NamedTempFile, TempDir};
use tracing::{debug, span, Level};

/// Deliberate damage applied after extraction and before re-verification,
/// used to exercise the integrity gate
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FaultInjection {
    #[default]
    None,
    /// Delete the file behind the first manifest record
    MissingFile,
    /// Append a record for a file that does not exist
    CorruptManifest,
}

/// Bogus record appended by [`FaultInjection::CorruptManifest`]
pub const BOGUS_MANIFEST_LINE: &str = "tampered.txt deadbeef";

/// Result of the final copy into the destination
#[derive(Debug, Default)]
pub struct RestoreSummary {
    /// Files written to the destination
    pub restored: usize,
    /// Files that could not be written, with the reason
    pub failed: Vec<(PathBuf, Error)>,
}

impl RestoreSummary {
    /// At least as many files were restored as failed
    pub fn is_bulk_restored(&self) -> bool {
        self.restored >= self.failed.len()
    }
}

/// How a restore ended when no hard error occurred
#[derive(Debug)]
pub enum RestoreOutcome {
    /// Snapshot verified and copied out
    Restored(RestoreSummary),
    /// Snapshot failed re-verification; the destination was not touched
    VerificationFailed(Verification),
}

impl RestoreOutcome {
    pub fn is_success(&self) -> bool {
        match self {
            RestoreOutcome::Restored(summary) => summary.is_bulk_restored(),
            RestoreOutcome::VerificationFailed(_) => false,
        }
    }
}

/// Temporary artifacts owned by a single restore run
struct RestoreRun {
    container: NamedTempFile,
    extracted: TempDir,
}

impl RestoreRun {
    fn begin(work_dir: &Path, stamp: &str) -> Result<Self> {
        let container = tempfile::Builder::new()
            .prefix(&format!("restore_{}_", stamp))
            .suffix(".tar.gz")
            .tempfile_in(work_dir)?;
        let extracted = tempfile::Builder::new()
            .prefix(&format!("restore_{}_dir_", stamp))
            .tempdir_in(work_dir)?;

        Ok(Self { container, extracted })
    }

    fn container(&self) -> &Path {
        self.container.path()
    }

    fn extracted(&self) -> &Path {
        self.extracted.path()
    }

    fn close(self) -> std::io::Result<()> {
        self.extracted.close()?;
        self.container.close()
    }
}

/// Restores encrypted artifacts produced by [`crate::backup::BackupPipeline`]
pub struct RestorePipeline {
    config: VaultConfig,
    log: RunLog,
    fault: FaultInjection,
}

impl RestorePipeline {
    /// Create a pipeline writing its audit trail to `log`
    pub fn new(config: VaultConfig, log: RunLog) -> Self {
        Self {
            config,
            log,
            fault: FaultInjection::None,
        }
    }

    /// Create a pipeline that logs to `config.restore_log`
    pub fn from_config(config: VaultConfig) -> Self {
        let log = RunLog::new(config.restore_log.clone());
        Self::new(config, log)
    }

    /// Enable a test-mode fault
    pub fn with_fault_injection(mut self, fault: FaultInjection) -> Self {
        self.fault = fault;
        self
    }

    /// Restore `artifact` into `destination`
    pub fn run<P: AsRef<Path>, Q: AsRef<Path>>(&self, artifact: P, destination: Q) -> Result<RestoreOutcome> {
        let artifact = artifact.as_ref();
        let destination = destination.as_ref();
        let stamp = Local::now().format("%Y%m%d_%H%M%S_%3f").to_string();

        let span = span!(Level::INFO, "restore", artifact = %artifact.display());
        let _enter = span.enter();

        self.log.info(format!(
            "Starting restore: {} -> {}",
            artifact.display(),
            destination.display()
        ));

        let result = self.run_stages(artifact, destination, &stamp);
        match &result {
            Ok(RestoreOutcome::Restored(summary)) if summary.failed.is_empty() => {
                self.log.info(format!(
                    "Restore completed successfully: {} files",
                    summary.restored
                ));
            }
            Ok(RestoreOutcome::Restored(summary)) => {
                self.log.warn(format!(
                    "Restore completed with errors: {} restored, {} failed",
                    summary.restored,
                    summary.failed.len()
                ));
            }
            Ok(RestoreOutcome::VerificationFailed(verification)) => {
                self.log.error(format!(
                    "Restore aborted: hash verification failed: {}",
                    verification
                ));
            }
            Err(e) => self.log.error(format!("Restore failed: {}", e)),
        }
        result
    }

    fn run_stages(&self, artifact: &Path, destination: &Path, stamp: &str) -> Result<RestoreOutcome> {
        fs::create_dir_all(&self.config.work_dir)?;
        let run = RestoreRun::begin(&self.config.work_dir, stamp)?;

        // Decrypting
        let key = cipher::load_key(self.config.external_key().as_deref(), &self.config.key_file)?
            .ok_or_else(|| Error::InvalidKey {
                reason: format!(
                    "no key in ${} and no key file at {}",
                    self.config.key_env,
                    self.config.key_file.display()
                ),
            })?;
        let encrypted = fs::read(artifact)?;
        let container = cipher::decrypt(&encrypted, &key)?;
        write_synced(run.container(), &container)?;
        drop(container);
        self.log.info(format!(
            "Decrypted: {} -> {}",
            artifact.display(),
            run.container().display()
        ));

        // Extracting
        let extracted = archive::unpack(run.container(), run.extracted())?;
        self.log.info(format!(
            "Extracted {} files: {} -> {}",
            extracted,
            run.container().display(),
            run.extracted().display()
        ));

        self.inject_fault(run.extracted())?;

        // ReVerifying
        let manifest_path = Manifest::path_in(run.extracted());
        if !manifest_path.is_file() {
            return Ok(RestoreOutcome::VerificationFailed(Verification::ManifestMissing));
        }
        let manifest = Manifest::load(&manifest_path)?;
        let verification = manifest.verify(run.extracted())?;
        if !verification.is_intact() {
            return Ok(RestoreOutcome::VerificationFailed(verification));
        }
        self.log.info("All hashes verified successfully.");

        // Copying
        fs::create_dir_all(destination)?;
        let summary = self.copy_out(&manifest, run.extracted(), destination);

        if let Err(e) = run.close() {
            self.log.warn(format!("Cleanup of temporary files failed: {}", e));
        }

        Ok(RestoreOutcome::Restored(summary))
    }

    /// Apply the configured fault. Without a manifest nothing is touched, so
    /// the run ends as [`Verification::ManifestMissing`] either way.
    fn inject_fault(&self, extracted: &Path) -> Result<()> {
        let manifest_path = Manifest::path_in(extracted);
        if self.fault != FaultInjection::None && !manifest_path.is_file() {
            self.log.warn("TEST: Snapshot has no manifest; fault not applied");
            return Ok(());
        }

        match self.fault {
            FaultInjection::None => {}
            FaultInjection::MissingFile => {
                let manifest = Manifest::load(&manifest_path)?;
                let entry = manifest.entries().first().ok_or_else(|| Error::FaultInjection {
                    reason: "snapshot has no files to remove".to_string(),
                })?;
                fs::remove_file(entry.resolve(extracted))?;
                self.log.warn(format!("TEST: Simulated missing file: {}", entry.path));
            }
            FaultInjection::CorruptManifest => {
                let mut file = OpenOptions::new().append(true).open(&manifest_path)?;
                writeln!(file, "{}", BOGUS_MANIFEST_LINE)?;
                self.log.warn("TEST: Simulated corrupted hash.");
            }
        }
        Ok(())
    }

    /// Copy every recorded file into `destination`; the manifest stays behind.
    fn copy_out(&self, manifest: &Manifest, extracted: &Path, destination: &Path) -> RestoreSummary {
        let mut summary = RestoreSummary::default();

        for entry in manifest.entries() {
            let src = entry.resolve(extracted);
            let dst = entry.resolve(destination);

            match restore_file(&src, &dst) {
                Ok(()) => {
                    summary.restored += 1;
                    self.log.info(format!("Restored: {}", dst.display()));
                }
                Err(e) => {
                    self.log.error(format!("Failed to restore {}: {}", entry.path, e));
                    summary.failed.push((dst, e));
                }
            }
        }

        summary
    }
}

fn restore_file(src: &Path, dst: &Path) -> Result<()> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(src, dst)?;

    if let Ok(modified) = fs::metadata(src).and_then(|m| m.modified()) {
        File::options().write(true).open(dst)?.set_modified(modified)?;
    }
    debug!("Copied {} -> {}", src.display(), dst.display());
    Ok(())
}

fn write_synced(path: &Path, data: &[u8]) -> Result<()> {
    let mut file = File::create(path)?;
    file.write_all(data)?;
    file.sync_all()?;
    Ok(())
}
