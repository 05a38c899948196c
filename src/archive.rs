//! Compressed snapshot container (tar + gzip)

use crate::{Error, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use tracing::{debug, span, warn, Level};
use walkdir::WalkDir;

/// Pack every regular file under `source_dir` into a gzip-compressed tar at
/// `archive_path`.
///
/// Entries are written in file-name order, so the same tree always produces
/// the same entry layout. Symlinks, special files and empty directories are
/// skipped. Returns the number of files packed.
pub fn pack<P: AsRef<Path>, Q: AsRef<Path>>(source_dir: P, archive_path: Q) -> Result<usize> {
    let source_dir = source_dir.as_ref();
    let archive_path = archive_path.as_ref();

    let span = span!(Level::DEBUG, "pack", source = %source_dir.display());
    let _enter = span.enter();

    let file = File::create(archive_path)?;
    let encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);

    let mut count = 0;
    for entry in WalkDir::new(source_dir).follow_links(false).sort_by_file_name() {
        let entry = entry.map_err(|e| Error::Io(e.into()))?;

        if !entry.file_type().is_file() {
            if entry.file_type().is_symlink() {
                warn!("Skipping symlink: {}", entry.path().display());
            }
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(source_dir)
            .map_err(|_| Error::Configuration {
                reason: format!(
                    "{} is not under {}",
                    entry.path().display(),
                    source_dir.display()
                ),
            })?;

        builder.append_path_with_name(entry.path(), relative)?;
        debug!("Packed {}", relative.display());
        count += 1;
    }

    let mut writer = builder.into_inner()?.finish()?;
    writer.flush()?;
    writer.get_ref().sync_all()?;

    Ok(count)
}

/// Extract the container at `archive_path` into `dest_dir`.
///
/// Anything wrong with the container itself (bad gzip header, truncated
/// stream, malformed tar headers, entries escaping `dest_dir`) is reported as
/// [`Error::ArchiveCorrupt`]. Returns the number of files extracted.
pub fn unpack<P: AsRef<Path>, Q: AsRef<Path>>(archive_path: P, dest_dir: Q) -> Result<usize> {
    let archive_path = archive_path.as_ref();
    let dest_dir = dest_dir.as_ref();

    let span = span!(Level::DEBUG, "unpack", archive = %archive_path.display());
    let _enter = span.enter();

    fs::create_dir_all(dest_dir)?;
    let file = File::open(archive_path)?;
    let mut archive = tar::Archive::new(GzDecoder::new(BufReader::new(file)));

    let mut count = 0;
    for entry in archive.entries().map_err(Error::archive_corrupt)? {
        let mut entry = entry.map_err(Error::archive_corrupt)?;
        let path = entry.path().map_err(Error::archive_corrupt)?.into_owned();

        let unpacked = entry.unpack_in(dest_dir).map_err(Error::archive_corrupt)?;
        if !unpacked {
            return Err(Error::ArchiveCorrupt {
                reason: format!("entry escapes extraction directory: {}", path.display()),
            });
        }

        if entry.header().entry_type().is_file() {
            count += 1;
        }
        debug!("Extracted {}", path.display());
    }

    Ok(count)
}
