//! Archive Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// An archive error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for archive operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The archive file does not exist (yet).
    #[display("archive not found: {}", _0.display())]
    NotFound(#[error(not(source))] PathBuf),
    /// Gzip or tar framing is corrupt. Don't retry with the same input.
    #[display("invalid or corrupted archive")]
    InvalidData,
    /// The archive contains an entry type the installer does not understand
    /// (symlinks, devices, FIFOs...). The archive layout has changed upstream.
    #[display("unsupported archive entry {kind} at {path}")]
    UnsupportedEntry { path: String, kind: String },
    /// Writing or renaming on the local filesystem failed.
    #[display("I/O error")]
    Io,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::Io)
    }
}
