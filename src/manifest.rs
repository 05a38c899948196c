//! Hash manifest for snapshot trees
//!
//! A manifest is a plain text file with one `<relative_path> <hex_digest>` line
//! per regular file, in the order the files were discovered. It travels inside
//! the snapshot under [`MANIFEST_PATH`] and is what restore checks before any
//! file reaches its destination.
//!
//! Paths are `/`-separated and are not escaped, so a path containing
//! whitespace cannot be represented. [`ManifestWriter::record`] refuses such
//! paths up front rather than producing a manifest that can't be loaded.

use crate::hasher::{digest_file, FileDigest};
use crate::{Error, Result};
use std::collections::HashSet;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Location of the manifest inside a snapshot tree.
///
/// Lives under a dot-directory so it is unlikely to collide with backed-up
/// content. A source file at exactly this path is rejected during backup.
pub const MANIFEST_PATH: &str = ".securevault/hashes.txt";

/// One manifest record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    /// `/`-separated path relative to the snapshot root
    pub path: String,
    /// Digest of the file content
    pub digest: FileDigest,
}

impl ManifestEntry {
    /// Resolve this entry against a snapshot root
    pub fn resolve(&self, root: &Path) -> PathBuf {
        self.path.split('/').fold(root.to_path_buf(), |acc, part| acc.join(part))
    }
}

/// Ordered list of manifest records
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    entries: Vec<ManifestEntry>,
}

impl Manifest {
    /// Create an empty manifest
    pub fn new() -> Self {
        Self::default()
    }

    /// Records in discovery order
    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Path of the manifest file inside a snapshot root
    pub fn path_in(root: &Path) -> PathBuf {
        MANIFEST_PATH.split('/').fold(root.to_path_buf(), |acc, part| acc.join(part))
    }

    /// Load a manifest file
    pub fn load<P: AsRef<Path>>(manifest_path: P) -> Result<Self> {
        let manifest_path = manifest_path.as_ref();
        let content = fs::read_to_string(manifest_path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::ManifestNotFound {
                    path: manifest_path.to_path_buf(),
                }
            } else {
                Error::Io(e)
            }
        })?;

        Self::parse(&content)
    }

    /// Parse manifest text.
    ///
    /// Every line must split into exactly two whitespace-separated tokens.
    pub fn parse(content: &str) -> Result<Self> {
        let mut entries = Vec::new();

        for (index, line) in content.lines().enumerate() {
            let line_no = index + 1;
            let tokens: Vec<&str> = line.split_whitespace().collect();
            let [path, digest] = tokens.as_slice() else {
                return Err(Error::ManifestFormat {
                    line: line_no,
                    reason: format!("expected 2 fields, found {}", tokens.len()),
                });
            };

            if !is_relative_manifest_path(path) {
                return Err(Error::ManifestFormat {
                    line: line_no,
                    reason: format!("path escapes snapshot root: {}", path),
                });
            }

            entries.push(ManifestEntry {
                path: (*path).to_string(),
                digest: FileDigest::new(*digest),
            });
        }

        Ok(Self { entries })
    }

    /// Re-hash every recorded file under `root` and compare.
    ///
    /// Stops at the first failing record; it does not collect every mismatch.
    /// Once all records pass, the tree is also checked for files that have no
    /// record. Hashing errors other than a missing file are returned as `Err`.
    pub fn verify<P: AsRef<Path>>(&self, root: P) -> Result<Verification> {
        let root = root.as_ref();
        let mut seen = HashSet::with_capacity(self.entries.len());

        for entry in &self.entries {
            if !seen.insert(entry.path.as_str()) {
                warn!("Duplicate manifest record: {}", entry.path);
                return Ok(Verification::Duplicate {
                    path: entry.path.clone(),
                });
            }

            let file_path = entry.resolve(root);
            if !file_path.is_file() {
                warn!("Missing file: {}", entry.path);
                return Ok(Verification::Missing {
                    path: entry.path.clone(),
                });
            }

            let actual = digest_file(&file_path)?;
            if actual != entry.digest {
                warn!("Hash mismatch: {}", entry.path);
                return Ok(Verification::Mismatch {
                    path: entry.path.clone(),
                    expected: entry.digest.clone(),
                    actual,
                });
            }
            debug!("Verified {}", entry.path);
        }

        for walked in WalkDir::new(root).sort_by_file_name() {
            let walked = walked.map_err(|e| Error::Io(e.into()))?;
            if !walked.file_type().is_file() {
                continue;
            }

            let relative = walked.path().strip_prefix(root).unwrap_or(walked.path());
            let listed = manifest_path_string(relative)
                .map(|p| p == MANIFEST_PATH || seen.contains(p.as_str()))
                .unwrap_or(false);

            if !listed {
                let path = relative.to_string_lossy().replace('\\', "/");
                warn!("File without manifest record: {}", path);
                return Ok(Verification::Unlisted { path });
            }
        }

        Ok(Verification::Intact {
            files: self.entries.len(),
        })
    }
}

/// Outcome of checking a tree against its manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    /// Every record matched and every file is recorded
    Intact { files: usize },
    /// The snapshot carries no manifest at all
    ManifestMissing,
    /// A recorded file does not exist
    Missing { path: String },
    /// A recorded file's content changed
    Mismatch {
        path: String,
        expected: FileDigest,
        actual: FileDigest,
    },
    /// The same path is recorded twice
    Duplicate { path: String },
    /// A file exists in the tree without a record
    Unlisted { path: String },
}

impl Verification {
    pub fn is_intact(&self) -> bool {
        matches!(self, Verification::Intact { .. })
    }
}

impl fmt::Display for Verification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verification::Intact { files } => write!(f, "all {} hashes verified", files),
            Verification::ManifestMissing => write!(f, "no hash manifest found"),
            Verification::Missing { path } => write!(f, "missing file: {}", path),
            Verification::Mismatch {
                path,
                expected,
                actual,
            } => write!(
                f,
                "hash mismatch: {} (expected {}, got {})",
                path, expected, actual
            ),
            Verification::Duplicate { path } => write!(f, "duplicate manifest record: {}", path),
            Verification::Unlisted { path } => write!(f, "file not in manifest: {}", path),
        }
    }
}

/// Append-only manifest writer used while a snapshot is being staged
#[derive(Debug)]
pub struct ManifestWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    manifest: Manifest,
}

impl ManifestWriter {
    /// Open (or create) the manifest inside `root`
    pub fn create<P: AsRef<Path>>(root: P) -> Result<Self> {
        let path = Manifest::path_in(root.as_ref());
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            path,
            writer: BufWriter::new(file),
            manifest: Manifest::new(),
        })
    }

    /// Append one record
    pub fn record(&mut self, relative_path: &Path, digest: FileDigest) -> Result<()> {
        let path = manifest_path_string(relative_path).ok_or_else(|| Error::ManifestFormat {
            line: self.manifest.len() + 1,
            reason: format!(
                "path cannot be stored in a manifest line: {}",
                relative_path.display()
            ),
        })?;

        writeln!(self.writer, "{} {}", path, digest)?;
        self.manifest.entries.push(ManifestEntry { path, digest });
        Ok(())
    }

    /// Path of the manifest file being written
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush and fsync the manifest, returning the in-memory copy
    pub fn finish(mut self) -> Result<Manifest> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(self.manifest)
    }
}

/// Convert a relative path to its manifest form.
///
/// Returns `None` for paths that the line format can't carry: non-UTF-8,
/// containing whitespace or `\`, or not purely relative. Anything accepted
/// here is accepted again by [`Manifest::parse`].
pub fn manifest_path_string(relative: &Path) -> Option<String> {
    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => {
                let part = part.to_str()?;
                if part.chars().any(char::is_whitespace) {
                    return None;
                }
                parts.push(part);
            }
            Component::CurDir => continue,
            _ => return None,
        }
    }

    Some(parts.join("/")).filter(|path| is_relative_manifest_path(path))
}

fn is_relative_manifest_path(path: &str) -> bool {
    !path.starts_with('/')
        && !path.contains('\\')
        && path
            .split('/')
            .all(|part| !part.is_empty() && part != "." && part != "..")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn write_tree(root: &Path, files: &[(&str, &str)]) -> Result<Manifest> {
        let mut writer = ManifestWriter::create(root)?;
        for (path, content) in files {
            let full = root.join(path);
            fs::create_dir_all(full.parent().unwrap())?;
            fs::write(&full, content)?;
            writer.record(Path::new(path), FileDigest::from_bytes(content.as_bytes()))?;
        }
        writer.finish()
    }

    #[test]
    fn test_writer_and_load_agree() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let written = write_tree(temp_dir.path(), &[("a.txt", "hello"), ("sub/b.txt", "world")])?;

        let loaded = Manifest::load(Manifest::path_in(temp_dir.path()))?;
        assert_eq!(loaded, written);
        assert_eq!(loaded.entries()[0].path, "a.txt");
        assert_eq!(loaded.entries()[1].path, "sub/b.txt");

        let text = fs::read_to_string(Manifest::path_in(temp_dir.path()))?;
        assert_eq!(text.lines().count(), 2);
        Ok(())
    }

    #[test]
    fn test_parse_rejects_malformed_lines() {
        let result = Manifest::parse("a.txt abc\nonly-one-token\n");
        assert!(matches!(result, Err(Error::ManifestFormat { line: 2, .. })));

        let result = Manifest::parse("a b c\n");
        assert!(matches!(result, Err(Error::ManifestFormat { line: 1, .. })));

        let result = Manifest::parse("a.txt abc\n\n");
        assert!(matches!(result, Err(Error::ManifestFormat { line: 2, .. })));
    }

    #[test]
    fn test_parse_rejects_escaping_paths() {
        assert!(Manifest::parse("../etc/passwd abc\n").is_err());
        assert!(Manifest::parse("/etc/passwd abc\n").is_err());
        assert!(Manifest::parse("a//b abc\n").is_err());
    }

    #[test]
    fn test_load_missing_manifest() {
        let temp_dir = TempDir::new().unwrap();
        let result = Manifest::load(temp_dir.path().join("hashes.txt"));
        assert!(matches!(result, Err(Error::ManifestNotFound { .. })));
    }

    #[test]
    fn test_record_rejects_whitespace_paths() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let mut writer = ManifestWriter::create(temp_dir.path())?;
        let result = writer.record(Path::new("my file.txt"), FileDigest::from_bytes(b""));
        assert!(matches!(result, Err(Error::ManifestFormat { .. })));
        Ok(())
    }

    #[test]
    fn test_verify_intact_tree() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let manifest = write_tree(temp_dir.path(), &[("a.txt", "hello"), ("sub/b.txt", "world")])?;

        assert_eq!(
            manifest.verify(temp_dir.path())?,
            Verification::Intact { files: 2 }
        );
        Ok(())
    }

    #[test]
    fn test_verify_detects_missing_file() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let manifest = write_tree(temp_dir.path(), &[("a.txt", "hello"), ("sub/b.txt", "world")])?;
        fs::remove_file(temp_dir.path().join("sub/b.txt"))?;

        assert_eq!(
            manifest.verify(temp_dir.path())?,
            Verification::Missing {
                path: "sub/b.txt".to_string()
            }
        );
        Ok(())
    }

    #[test]
    fn test_verify_detects_modified_content() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let manifest = write_tree(temp_dir.path(), &[("a.txt", "hello")])?;
        fs::write(temp_dir.path().join("a.txt"), "HELLO")?;

        let outcome = manifest.verify(temp_dir.path())?;
        assert!(matches!(outcome, Verification::Mismatch { ref path, .. } if path == "a.txt"));
        assert!(!outcome.is_intact());
        Ok(())
    }

    #[test]
    fn test_verify_detects_unlisted_file() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let manifest = write_tree(temp_dir.path(), &[("a.txt", "hello")])?;
        fs::write(temp_dir.path().join("extra.txt"), "sneaky")?;

        assert_eq!(
            manifest.verify(temp_dir.path())?,
            Verification::Unlisted {
                path: "extra.txt".to_string()
            }
        );
        Ok(())
    }

    #[test]
    fn test_verify_detects_duplicate_record() -> Result<()> {
        let temp_dir = TempDir::new()?;
        fs::write(temp_dir.path().join("a.txt"), "hello")?;
        let digest = FileDigest::from_bytes(b"hello");
        let manifest = Manifest::parse(&format!("a.txt {}\na.txt {}\n", digest, digest))?;

        assert_eq!(
            manifest.verify(temp_dir.path())?,
            Verification::Duplicate {
                path: "a.txt".to_string()
            }
        );
        Ok(())
    }

    #[test]
    fn test_manifest_path_string() {
        assert_eq!(
            manifest_path_string(Path::new("sub/b.txt")),
            Some("sub/b.txt".to_string())
        );
        assert_eq!(manifest_path_string(Path::new("sub/my file")), None);
        assert_eq!(manifest_path_string(Path::new("../x")), None);
        assert_eq!(manifest_path_string(Path::new("")), None);
        #[cfg(unix)]
        assert_eq!(manifest_path_string(Path::new("weird\\name.txt")), None);
    }

    #[test]
    fn test_recordable_paths_parse_back() -> Result<()> {
        let digest = FileDigest::from_bytes(b"x");
        for candidate in ["a.txt", "sub/b.txt", "weird\\name.txt", "x/./y.txt", ".hidden/z"] {
            if let Some(path) = manifest_path_string(Path::new(candidate)) {
                let parsed = Manifest::parse(&format!("{} {}\n", path, digest))?;
                assert_eq!(parsed.entries()[0].path, path);
            }
        }
        Ok(())
    }
}
