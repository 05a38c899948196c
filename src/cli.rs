//! Command-line interface for SecureVault

use crate::backup::BackupPipeline;
use crate::config::VaultConfig;
use crate::restore::{FaultInjection, RestoreOutcome, RestorePipeline};
use crate::scheduler::DailyScheduler;
use anyhow::Context;
use clap::{ArgGroup, CommandFactory, Parser};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn};

/// SecureVault - encrypted, integrity-checked directory backups
#[derive(Parser, Debug)]
#[command(name = "securevault")]
#[command(about = "SecureVault Backup/Restore Tool")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(group(
    ArgGroup::new("action")
        .args(["backup", "restore", "schedule", "test_missing", "test_corrupt"])
        .multiple(false)
))]
pub struct Cli {
    /// Perform a backup now
    #[arg(long)]
    pub backup: bool,

    /// Path to encrypted backup (.tar.gz.enc) to restore
    #[arg(long, value_name = "FILE")]
    pub restore: Option<PathBuf>,

    /// Restore destination directory
    #[arg(long, value_name = "DIR")]
    pub output: Option<PathBuf>,

    /// Run the backup scheduler (daily at the configured time)
    #[arg(long)]
    pub schedule: bool,

    /// Restore, simulating a missing file before verification
    #[arg(long, value_name = "FILE")]
    pub test_missing: Option<PathBuf>,

    /// Restore, simulating a bad checksum before verification
    #[arg(long, value_name = "FILE")]
    pub test_corrupt: Option<PathBuf>,

    /// TOML configuration file
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

/// What a parsed command line asks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Backup,
    Restore {
        artifact: PathBuf,
        fault: FaultInjection,
    },
    Schedule,
    Help,
}

impl Cli {
    pub fn action(&self) -> Action {
        if self.backup {
            Action::Backup
        } else if let Some(artifact) = &self.restore {
            Action::Restore {
                artifact: artifact.clone(),
                fault: FaultInjection::None,
            }
        } else if let Some(artifact) = &self.test_missing {
            Action::Restore {
                artifact: artifact.clone(),
                fault: FaultInjection::MissingFile,
            }
        } else if let Some(artifact) = &self.test_corrupt {
            Action::Restore {
                artifact: artifact.clone(),
                fault: FaultInjection::CorruptManifest,
            }
        } else if self.schedule {
            Action::Schedule
        } else {
            Action::Help
        }
    }
}

/// Execute the parsed command line
pub async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = VaultConfig::load_or_default(cli.config.as_deref())?;

    match cli.action() {
        Action::Backup => run_backup(config).await,
        Action::Restore { artifact, fault } => {
            let destination = cli.output.clone().unwrap_or_else(|| config.restore_dir.clone());
            run_restore(config, artifact, destination, fault).await
        }
        Action::Schedule => {
            DailyScheduler::new(config)?.run().await?;
            Ok(ExitCode::SUCCESS)
        }
        Action::Help => {
            Cli::command().print_help()?;
            println!();
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run_backup(config: VaultConfig) -> anyhow::Result<ExitCode> {
    let pipeline = BackupPipeline::from_config(config);
    let result = tokio::task::spawn_blocking(move || pipeline.run())
        .await
        .context("backup task panicked")?;

    match result {
        Ok(report) => {
            info!("Backup written to {}", report.artifact.display());
            if !report.verified() {
                warn!("Post-backup hash verification did not pass; see the backup log");
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            error!("Backup failed: {}", e);
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn run_restore(
    config: VaultConfig,
    artifact: PathBuf,
    destination: PathBuf,
    fault: FaultInjection,
) -> anyhow::Result<ExitCode> {
    let pipeline = RestorePipeline::from_config(config).with_fault_injection(fault);
    let result = tokio::task::spawn_blocking(move || pipeline.run(&artifact, &destination))
        .await
        .context("restore task panicked")?;

    match result {
        Ok(RestoreOutcome::Restored(summary)) if summary.is_bulk_restored() => Ok(ExitCode::SUCCESS),
        Ok(RestoreOutcome::Restored(summary)) => {
            error!(
                "Restore incomplete: {} restored, {} failed",
                summary.restored,
                summary.failed.len()
            );
            Ok(ExitCode::FAILURE)
        }
        Ok(RestoreOutcome::VerificationFailed(verification)) => {
            error!("Restore aborted: {}", verification);
            Ok(ExitCode::FAILURE)
        }
        Err(e) => {
            error!("Restore failed: {}", e);
            Ok(ExitCode::FAILURE)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_restore_with_output() {
        let cli = Cli::try_parse_from(["securevault", "--restore", "b.tar.gz.enc", "--output", "out"]).unwrap();
        assert_eq!(
            cli.action(),
            Action::Restore {
                artifact: PathBuf::from("b.tar.gz.enc"),
                fault: FaultInjection::None,
            }
        );
        assert_eq!(cli.output, Some(PathBuf::from("out")));
    }

    #[test]
    fn test_fault_injection_flags() {
        let cli = Cli::try_parse_from(["securevault", "--test-missing", "b.enc"]).unwrap();
        assert!(matches!(
            cli.action(),
            Action::Restore { fault: FaultInjection::MissingFile, .. }
        ));

        let cli = Cli::try_parse_from(["securevault", "--test-corrupt", "b.enc"]).unwrap();
        assert!(matches!(
            cli.action(),
            Action::Restore { fault: FaultInjection::CorruptManifest, .. }
        ));
    }

    #[test]
    fn test_actions_are_exclusive() {
        assert!(Cli::try_parse_from(["securevault", "--backup", "--schedule"]).is_err());
        assert!(Cli::try_parse_from(["securevault", "--backup", "--restore", "x"]).is_err());
    }

    #[test]
    fn test_no_action_means_help() {
        let cli = Cli::try_parse_from(["securevault"]).unwrap();
        assert_eq!(cli.action(), Action::Help);
    }
}
