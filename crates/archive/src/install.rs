//! Archive Extraction

use crate::error::{ErrorKind, Result};
use crate::replace::atomic_replace;
use exn::ResultExt;
use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use tar::{Archive, EntryType};
use time::OffsetDateTime;
use tracing::instrument;

/// Case-sensitive substrings marking the database entry of an archive: the
/// compiled `.mmdb` format and the legacy `.BIN` variant.
pub const DATABASE_MARKERS: [&str; 2] = ["mmdb", "BIN"];

/// Returns `true` if an archive entry name looks like the database file.
#[inline]
#[must_use]
pub fn is_database_entry(name: &str) -> bool {
    DATABASE_MARKERS.iter().any(|marker| name.contains(marker))
}

/// Extract the database from a gzip tar `archive` and install it at `target`.
///
/// Entries are visited in archive order. Directories are skipped, and the
/// first regular file whose name contains one of the [`DATABASE_MARKERS`] is
/// streamed into a staging file beside `target` which then replaces `target`
/// via [`atomic_replace`]. Later matching entries are never looked at.
///
/// Returns `Ok(None)` when the archive ends without a matching entry; nothing
/// is written in that case and the caller must not assume the live database
/// changed.
///
/// # Errors
/// - [`NotFound`](ErrorKind::NotFound) if `archive` does not exist.
/// - [`InvalidData`](ErrorKind::InvalidData) for broken gzip/tar framing.
/// - [`UnsupportedEntry`](ErrorKind::UnsupportedEntry) for anything that is
///   neither a directory nor a regular file.
/// - [`Io`](ErrorKind::Io) if writing or renaming fails. `target` is left
///   untouched and the staging file is removed.
#[instrument(skip_all, fields(archive = %archive.display(), target = %target.display()))]
pub fn install(archive: &Path, target: &Path) -> Result<Option<PathBuf>> {
    let file = match File::open(archive) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => exn::bail!(ErrorKind::NotFound(archive.to_path_buf())),
        Err(e) => return Err(e).or_raise(|| ErrorKind::Io),
    };
    let mut tarball = Archive::new(GzDecoder::new(BufReader::new(file)));

    for entry in tarball.entries().or_raise(|| ErrorKind::InvalidData)? {
        let mut entry = entry.or_raise(|| ErrorKind::InvalidData)?;
        let name = entry.path().or_raise(|| ErrorKind::InvalidData)?.to_string_lossy().into_owned();
        match entry.header().entry_type() {
            EntryType::Directory => continue,
            EntryType::Regular => {
                if !is_database_entry(&name) {
                    tracing::trace!(entry = %name, "Skipping non-database archive entry");
                    continue;
                }
                let size = place(&mut entry, target)?;
                tracing::info!(entry = %name, bytes = size, "Installed database from archive");
                return Ok(Some(target.to_path_buf()));
            },
            other => exn::bail!(ErrorKind::UnsupportedEntry { path: name, kind: format!("{other:?}") }),
        }
    }

    tracing::warn!("Archive contains no database entry; nothing installed");
    Ok(None)
}

/// Stream `reader` into a staging file next to `target` and swap it in.
fn place(reader: &mut impl Read, target: &Path) -> Result<u64> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).or_raise(|| ErrorKind::Io)?;
    }
    let staging = staging_path(target);
    let written = write_staging(reader, &staging).and_then(|size| atomic_replace(&staging, target).map(|()| size));
    if written.is_err() {
        _ = fs::remove_file(&staging);
    }
    written
}

fn write_staging(reader: &mut impl Read, staging: &Path) -> Result<u64> {
    let mut file = File::create(staging).or_raise(|| ErrorKind::Io)?;
    let size = io::copy(reader, &mut file).or_raise(|| ErrorKind::Io)?;
    // The rename must not overtake the data.
    file.sync_all().or_raise(|| ErrorKind::Io)?;
    Ok(size)
}

/// Hidden sibling of `target`; same directory means same filesystem, which is
/// what makes the final rename atomic.
fn staging_path(target: &Path) -> PathBuf {
    let name = target.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    let nanos = OffsetDateTime::now_utc().unix_timestamp_nanos();
    target.with_file_name(format!(".{name}.{nanos}.part"))
}
