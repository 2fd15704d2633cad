//! Fetch Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};

/// A fetch error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for fetch operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The HTTP client could not be constructed (TLS backend, bad settings).
    #[display("could not build HTTP client")]
    Client,
    /// Connecting, sending or receiving failed (DNS, refused, reset, timeout).
    #[display("request to {_0} failed")]
    Transport(#[error(not(source))] String),
    /// The server answered with a non-success status.
    #[display("unexpected HTTP status {_0}")]
    Status(#[error(not(source))] u16),
    /// A response header the staleness check depends on is malformed.
    #[display("invalid {_0} header")]
    InvalidHeader(#[error(not(source))] &'static str),
    /// Writing the download to the local filesystem failed.
    #[display("I/O error")]
    Io,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Io => true,
            Self::Status(code) => *code == 429 || *code >= 500,
            Self::Client | Self::InvalidHeader(_) => false,
        }
    }
}
