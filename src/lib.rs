//! # SecureVault
//!
//! Encrypted, integrity-checked directory backups.
//!
//! ## Features
//!
//! - **Backup Pipeline**: Snapshot a directory tree with a SHA-256 manifest,
//!   pack it as tar.gz and seal it with ChaCha20-Poly1305
//! - **Restore Pipeline**: Decrypt, unpack and verify every file against the
//!   manifest before anything reaches the destination
//! - **Scheduling**: Daily backups at a fixed local time
//! - **Run Logs**: Timestamped, append-only backup and restore logs
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use securevault::backup::BackupPipeline;
//! use securevault::config::VaultConfig;
//! use securevault::restore::RestorePipeline;
//!
//! # fn main() -> securevault::Result<()> {
//! let config = VaultConfig::default();
//! let report = BackupPipeline::from_config(config.clone()).run()?;
//! println!("Backup written to {}", report.artifact.display());
//!
//! let outcome = RestorePipeline::from_config(config.clone())
//!     .run(&report.artifact, &config.restore_dir)?;
//! assert!(outcome.is_success());
//! # Ok(())
//! # }
//! ```

pub mod archive;
pub mod backup;
pub mod cipher;
pub mod cli;
pub mod config;
pub mod error;
pub mod hasher;
pub mod logging;
pub mod manifest;
pub mod restore;
pub mod scheduler;

#[cfg(test)]
mod test_support;

// Re-export commonly used types
pub use backup::{BackupPipeline, BackupReport};
pub use config::VaultConfig;
pub use error::{Error, Result};
pub use manifest::{Manifest, Verification};
pub use restore::{RestoreOutcome, RestorePipeline};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
