//! Error types for SecureVault

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for SecureVault operations
///
/// Integrity problems found while checking a manifest are not errors; they are
/// reported through [`crate::manifest::Verification`].
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Archive is corrupt: {reason}")]
    ArchiveCorrupt { reason: String },

    /// Wrong key and tampered ciphertext both surface as this variant.
    #[error("Decryption failed: invalid key or corrupted data")]
    Decryption,

    #[error("Encryption failed: {reason}")]
    Encryption { reason: String },

    #[error("Invalid manifest line {line}: {reason}")]
    ManifestFormat { line: usize, reason: String },

    #[error("Manifest not found: {path}")]
    ManifestNotFound { path: PathBuf },

    #[error("Invalid encryption key: {reason}")]
    InvalidKey { reason: String },

    #[error("Invalid configuration: {reason}")]
    Configuration { reason: String },

    #[error("Source file collides with reserved snapshot path: {path}")]
    ReservedPath { path: PathBuf },

    #[error("Fault injection failed: {reason}")]
    FaultInjection { reason: String },

    #[error("Scheduling error: {reason}")]
    Scheduling { reason: String },
}

impl Error {
    pub(crate) fn archive_corrupt(err: impl std::fmt::Display) -> Self {
        Error::ArchiveCorrupt {
            reason: err.to_string(),
        }
    }
}

/// Result type alias for SecureVault operations
pub type Result<T> = std::result::Result<T, Error>;
