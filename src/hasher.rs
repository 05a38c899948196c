//! Streaming SHA-256 content digests

use crate::Result;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;

/// Read size used while hashing. Memory use does not depend on file size.
pub const HASH_CHUNK_SIZE: usize = 4096;

/// Lowercase hex SHA-256 digest of a file's content
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileDigest(String);

impl FileDigest {
    /// Wrap an already hex-encoded digest, e.g. one read back from a manifest
    pub fn new(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    /// Get the digest as a hex string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Digest an in-memory buffer
    pub fn from_bytes(data: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(data)))
    }

    fn from_hasher(hasher: Sha256) -> Self {
        Self(hex::encode(hasher.finalize()))
    }
}

impl std::fmt::Display for FileDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Compute the digest of a file in fixed-size chunks.
///
/// Only content is hashed; names, timestamps and permissions don't take part.
pub fn digest_file<P: AsRef<Path>>(path: P) -> Result<FileDigest> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; HASH_CHUNK_SIZE];

    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(FileDigest::from_hasher(hasher))
}

/// Copy `src` to `dst` and hash the bytes as they are written.
///
/// The returned digest always describes exactly what landed in `dst`.
/// Modification time and permissions are carried over from `src`.
pub fn copy_and_digest<P: AsRef<Path>, Q: AsRef<Path>>(src: P, dst: Q) -> Result<FileDigest> {
    let src = src.as_ref();
    let mut reader = File::open(src)?;
    let mut writer = File::create(dst.as_ref())?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; HASH_CHUNK_SIZE];

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        writer.write_all(&buffer[..bytes_read])?;
        hasher.update(&buffer[..bytes_read]);
    }
    writer.flush()?;

    let metadata = fs::metadata(src)?;
    if let Ok(modified) = metadata.modified() {
        writer.set_modified(modified)?;
    }
    fs::set_permissions(dst.as_ref(), metadata.permissions())?;

    Ok(FileDigest::from_hasher(hasher))
}
