//! Atomic File Placement

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::instrument;

/// Path of the backup kept for `target` (`<target>.bak`).
#[must_use]
pub fn backup_path(target: &Path) -> PathBuf {
    let mut name = OsString::from(target.as_os_str());
    name.push(".bak");
    PathBuf::from(name)
}

/// Move a fully-written `source` file over `target`.
///
/// The current `target` (if any) is preserved as [`backup_path`] first; that
/// step is best-effort and its failure is only logged. The target directory
/// is created if needed and `source` is then renamed onto `target`. Both
/// paths must be on the same filesystem for the rename to be atomic, so
/// readers opening `target` see either the old file or the new one.
///
/// The backup is a hard link (or a copy where links are unsupported) rather
/// than a rename, so there is no window in which `target` does not exist.
#[instrument(level = "debug", skip_all, fields(source = %source.display(), target = %target.display()))]
pub fn atomic_replace(source: &Path, target: &Path) -> Result<()> {
    if let Err(e) = backup(target) {
        tracing::debug!(error = %e, "Previous database not backed up");
    }
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).or_raise(|| ErrorKind::Io)?;
    }
    fs::rename(source, target).or_raise(|| ErrorKind::Io)
}

fn backup(target: &Path) -> io::Result<()> {
    let backup = backup_path(target);
    match fs::remove_file(&backup) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e),
        _ => {},
    }
    fs::hard_link(target, &backup).or_else(|_| fs::copy(target, &backup).map(|_| ()))
}
