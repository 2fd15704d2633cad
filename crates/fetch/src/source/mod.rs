//! Archive source trait and implementations.

mod http;
#[cfg(feature = "mock")]
mod mock;

pub use self::http::HttpSource;
#[cfg(feature = "mock")]
pub use self::mock::MockSource;
use crate::error::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;

/// Where database archives come from.
///
/// Implementations must be shareable between the update task and whoever
/// constructed them, hence `Send + Sync` and `&self` everywhere.
#[async_trait]
pub trait Source: Send + Sync {
    /// Identifier of the source (the URL, for HTTP). Used for logging only.
    fn name(&self) -> &str;

    /// Returns `true` if the archive cached at `cached` should be replaced.
    ///
    /// A missing or unreadable cached archive always needs an update, and
    /// no remote request is made in that case.
    async fn needs_update(&self, cached: &Path) -> Result<bool>;

    /// Download the current archive into a new temporary file inside `dir`
    /// and return its path. Nothing is left behind in `dir` on failure.
    async fn download(&self, dir: &Path) -> Result<PathBuf>;
}

/// Unique temporary download path inside `dir`.
///
/// Files are named `_geodb.<nanos>.tar.gz`, sharing the directory (and
/// therefore the filesystem) of the cached archive they will be renamed to.
#[must_use]
pub fn download_path(dir: &Path) -> PathBuf {
    let nanos = OffsetDateTime::now_utc().unix_timestamp_nanos();
    dir.join(format!("_geodb.{nanos}.tar.gz"))
}
