//! Authenticated encryption of snapshot containers
//!
//! Artifacts are laid out as `version || nonce || ciphertext+tag`, using
//! ChaCha20-Poly1305 with the version byte bound as associated data. Flipping
//! any bit of a stored artifact makes [`decrypt`] fail.
//!
//! Only one key is active per installation. Rotating it (for instance by
//! deleting the key file) leaves older artifacts undecryptable; keep the old
//! key around for as long as its backups matter.

use crate::{Error, Result};
use chacha20poly1305::aead::rand_core::RngCore;
use chacha20poly1305::aead::{Aead, KeyInit, OsRng, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use tracing::info;
use zeroize::Zeroize;

/// Key length required by ChaCha20-Poly1305
pub const KEY_SIZE: usize = 32;

/// Size of the nonce in bytes (96 bits)
const NONCE_SIZE: usize = 12;

/// Size of the Poly1305 authentication tag
const TAG_SIZE: usize = 16;

/// Current artifact format version
const FORMAT_VERSION: u8 = 1;

/// Symmetric key, wiped from memory on drop
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptionKey([u8; KEY_SIZE]);

impl EncryptionKey {
    /// Generate a fresh key from the OS random source
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Parse a hex-encoded key
    pub fn from_hex(encoded: &str) -> Result<Self> {
        let mut decoded = hex::decode(encoded.trim()).map_err(|e| Error::InvalidKey {
            reason: format!("not valid hex: {}", e),
        })?;

        if decoded.len() != KEY_SIZE {
            let len = decoded.len();
            decoded.zeroize();
            return Err(Error::InvalidKey {
                reason: format!("expected {} bytes, got {}", KEY_SIZE, len),
            });
        }

        let mut bytes = [0u8; KEY_SIZE];
        bytes.copy_from_slice(&decoded);
        decoded.zeroize();
        Ok(Self(bytes))
    }

    /// Hex encoding, as stored in key files and the environment
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Drop for EncryptionKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptionKey([REDACTED])")
    }
}

/// Resolve the active key.
///
/// Precedence: `external` (typically an environment variable), then the key
/// file, then a freshly generated key that is written to `key_file`. A key
/// file that exists but can't be parsed is an error; it is never replaced.
pub fn load_or_create_key<P: AsRef<Path>>(external: Option<&str>, key_file: P) -> Result<EncryptionKey> {
    let key_file = key_file.as_ref();

    if let Some(key) = load_key(external, key_file)? {
        return Ok(key);
    }

    let key = EncryptionKey::generate();
    persist_key(&key, key_file)?;
    info!("Generated new encryption key at {}", key_file.display());
    Ok(key)
}

/// Resolve an existing key without generating one. Restores use this: a
/// freshly generated key could never open an older artifact.
pub fn load_key<P: AsRef<Path>>(external: Option<&str>, key_file: P) -> Result<Option<EncryptionKey>> {
    let key_file = key_file.as_ref();

    if let Some(value) = external.filter(|v| !v.trim().is_empty()) {
        return EncryptionKey::from_hex(value).map(Some);
    }

    if !key_file.exists() {
        return Ok(None);
    }

    let mut content = fs::read_to_string(key_file)?;
    let key = EncryptionKey::from_hex(&content).map_err(|e| Error::InvalidKey {
        reason: format!("{}: {}", key_file.display(), e),
    });
    content.zeroize();
    key.map(Some)
}

fn persist_key(key: &EncryptionKey, key_file: &Path) -> Result<()> {
    if let Some(parent) = key_file.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(key_file)?;
    let mut encoded = key.to_hex();
    let written = file.write_all(encoded.as_bytes());
    encoded.zeroize();
    written?;
    file.sync_all()?;
    Ok(())
}

/// Encrypt a container with a fresh random nonce
pub fn encrypt(plaintext: &[u8], key: &EncryptionKey) -> Result<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let aad = [FORMAT_VERSION];
    let ciphertext = cipher
        .encrypt(nonce, Payload { msg: plaintext, aad: &aad })
        .map_err(|e| Error::Encryption {
            reason: e.to_string(),
        })?;

    let mut out = Vec::with_capacity(1 + NONCE_SIZE + ciphertext.len());
    out.push(FORMAT_VERSION);
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt an artifact produced by [`encrypt`].
///
/// Any structural problem, wrong key or tampering yields [`Error::Decryption`];
/// no partial plaintext is ever returned.
pub fn decrypt(artifact: &[u8], key: &EncryptionKey) -> Result<Vec<u8>> {
    if artifact.len() < 1 + NONCE_SIZE + TAG_SIZE || artifact[0] != FORMAT_VERSION {
        return Err(Error::Decryption);
    }

    let (header, body) = artifact.split_at(1 + NONCE_SIZE);
    let nonce = Nonce::from_slice(&header[1..]);
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));

    cipher
        .decrypt(nonce, Payload { msg: body, aad: &header[..1] })
        .map_err(|_| Error::Decryption)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_encrypt_decrypt() -> Result<()> {
        let key = EncryptionKey::generate();
        let plaintext = b"snapshot bytes";

        let artifact = encrypt(plaintext, &key)?;
        assert_ne!(&artifact[1 + NONCE_SIZE..], plaintext.as_slice());
        assert_eq!(decrypt(&artifact, &key)?, plaintext);
        Ok(())
    }

    #[test]
    fn test_different_nonces() -> Result<()> {
        let key = EncryptionKey::generate();
        let first = encrypt(b"same", &key)?;
        let second = encrypt(b"same", &key)?;
        assert_ne!(first, second);
        Ok(())
    }

    #[test]
    fn test_wrong_key_fails() -> Result<()> {
        let artifact = encrypt(b"secret", &EncryptionKey::generate())?;
        let result = decrypt(&artifact, &EncryptionKey::generate());
        assert!(matches!(result, Err(Error::Decryption)));
        Ok(())
    }

    #[test]
    fn test_every_single_byte_flip_is_detected() -> Result<()> {
        let key = EncryptionKey::generate();
        let artifact = encrypt(b"tamper-evident payload", &key)?;

        for index in 0..artifact.len() {
            let mut tampered = artifact.clone();
            tampered[index] ^= 0x01;
            assert!(
                matches!(decrypt(&tampered, &key), Err(Error::Decryption)),
                "flip at byte {} was accepted",
                index
            );
        }
        Ok(())
    }

    #[test]
    fn test_truncated_artifact_fails() -> Result<()> {
        let key = EncryptionKey::generate();
        let artifact = encrypt(b"payload", &key)?;

        assert!(matches!(decrypt(&artifact[..artifact.len() - 1], &key), Err(Error::Decryption)));
        assert!(matches!(decrypt(&[], &key), Err(Error::Decryption)));
        Ok(())
    }

    #[test]
    fn test_empty_plaintext() -> Result<()> {
        let key = EncryptionKey::generate();
        let artifact = encrypt(b"", &key)?;
        assert!(decrypt(&artifact, &key)?.is_empty());
        Ok(())
    }

    #[test]
    fn test_key_hex_roundtrip_and_validation() {
        let key = EncryptionKey::generate();
        assert_eq!(EncryptionKey::from_hex(&key.to_hex()).unwrap(), key);

        assert!(matches!(EncryptionKey::from_hex("zz"), Err(Error::InvalidKey { .. })));
        assert!(matches!(EncryptionKey::from_hex("abcd"), Err(Error::InvalidKey { .. })));
    }

    #[test]
    fn test_debug_redacts_key() {
        let key = EncryptionKey::generate();
        assert_eq!(format!("{:?}", key), "EncryptionKey([REDACTED])");
    }

    #[test]
    fn test_external_key_takes_precedence() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let key_file = temp_dir.path().join("secret.key");
        let external = EncryptionKey::generate();

        let resolved = load_or_create_key(Some(&external.to_hex()), &key_file)?;
        assert_eq!(resolved, external);
        assert!(!key_file.exists());
        Ok(())
    }

    #[test]
    fn test_key_file_is_created_then_reused() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let key_file = temp_dir.path().join("keys/secret.key");

        let first = load_or_create_key(None, &key_file)?;
        assert!(key_file.exists());
        let second = load_or_create_key(Some("  "), &key_file)?;
        assert_eq!(first, second);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&key_file)?.permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
        Ok(())
    }

    #[test]
    fn test_load_key_never_generates() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let key_file = temp_dir.path().join("secret.key");

        assert!(load_key(None, &key_file)?.is_none());
        assert!(!key_file.exists());
        Ok(())
    }

    #[test]
    fn test_malformed_key_file_is_not_replaced() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let key_file = temp_dir.path().join("secret.key");
        fs::write(&key_file, "not a key")?;

        let result = load_or_create_key(None, &key_file);
        assert!(matches!(result, Err(Error::InvalidKey { .. })));
        assert_eq!(fs::read_to_string(&key_file)?, "not a key");
        Ok(())
    }
}
