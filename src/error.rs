//! Database Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction. Failures from the archive, fetch and
//! config crates are kept as children in the error tree.

use derive_more::{Display, Error};
use std::path::PathBuf;
use std::time::Duration;

/// A database error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for database operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// No database has been loaded yet. Distinct from "address not found";
    /// URL-backed handles return this until their first download completes.
    #[display("database not available yet")]
    Unavailable,
    /// The handle was closed.
    #[display("database closed")]
    Closed,
    /// The database file could not be read or is not a valid database.
    #[display("could not open database {}", _0.display())]
    Open(#[error(not(source))] PathBuf),
    /// The reader failed while resolving an address.
    #[display("lookup failed")]
    Lookup,
    /// The file watcher could not be set up.
    #[display("could not watch {}", _0.display())]
    Watch(#[error(not(source))] PathBuf),
    /// A background update failed; the next attempt happens after the delay.
    #[display("update failed (will retry in {:.2}s)", _0.as_secs_f64())]
    Update(#[error(not(source))] Duration),
    /// Checking for or downloading a new archive failed.
    #[display("could not fetch database archive")]
    Fetch,
    /// Extracting or moving the downloaded archive failed.
    #[display("could not install database archive")]
    Install,
    /// The downloaded archive has no database entry.
    #[display("archive contains no database")]
    NothingInstalled,
    /// The archive holds an entry type that cannot be installed. The update
    /// loop stops after reporting this.
    #[display("archive layout not supported, updates stopped")]
    UnsupportedArchive,
    /// Settings failed validation.
    #[display("invalid configuration")]
    Config,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable | Self::Update(_) | Self::Fetch | Self::Install)
    }
}
