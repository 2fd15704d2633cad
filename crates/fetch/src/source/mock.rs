//! In-memory archive source for testing.

use super::{Source, download_path};
use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use exn::ResultExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

/// Archive source serving bytes held in memory.
///
/// The cached archive is stale whenever its contents differ from what the
/// mock currently serves. Failures can be scripted for the next N checks or
/// downloads, which fail with [`Transport`](ErrorKind::Transport).
///
/// # Examples
///
/// ```
/// use geodb_fetch::Source;
/// use geodb_fetch::source::MockSource;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let temp = tempfile::tempdir().unwrap();
/// let source = MockSource::serving(b"archive".to_vec()).failing_downloads(1);
/// assert!(source.download(temp.path()).await.is_err());
/// assert!(source.download(temp.path()).await.is_ok());
/// assert_eq!(source.downloads(), 2);
/// # }
/// ```
pub struct MockSource {
    name: String,
    archive: RwLock<Vec<u8>>,
    failing_checks: AtomicUsize,
    failing_downloads: AtomicUsize,
    checks: AtomicUsize,
    downloads: AtomicUsize,
}

impl MockSource {
    pub fn serving(archive: impl Into<Vec<u8>>) -> Self {
        Self {
            name: "mock".to_string(),
            archive: RwLock::new(archive.into()),
            failing_checks: AtomicUsize::new(0),
            failing_downloads: AtomicUsize::new(0),
            checks: AtomicUsize::new(0),
            downloads: AtomicUsize::new(0),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Make the next `count` staleness checks fail.
    pub fn failing_checks(self, count: usize) -> Self {
        self.failing_checks.store(count, Ordering::SeqCst);
        self
    }

    /// Make the next `count` downloads fail.
    pub fn failing_downloads(self, count: usize) -> Self {
        self.failing_downloads.store(count, Ordering::SeqCst);
        self
    }

    /// Replace the archive served from now on.
    pub async fn publish(&self, archive: impl Into<Vec<u8>>) {
        *self.archive.write().await = archive.into();
    }

    /// Number of staleness checks performed so far, failed ones included.
    pub fn checks(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }

    /// Number of downloads attempted so far, failed ones included.
    pub fn downloads(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)).is_ok()
    }
}

#[async_trait]
impl Source for MockSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn needs_update(&self, cached: &Path) -> Result<bool> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.failing_checks) {
            exn::bail!(ErrorKind::Transport(self.name.clone()));
        }
        match tokio::fs::read(cached).await {
            Ok(local) => Ok(local != *self.archive.read().await),
            Err(_) => Ok(true),
        }
    }

    async fn download(&self, dir: &Path) -> Result<PathBuf> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.failing_downloads) {
            exn::bail!(ErrorKind::Transport(self.name.clone()));
        }
        tokio::fs::create_dir_all(dir).await.or_raise(|| ErrorKind::Io)?;
        let path = download_path(dir);
        let archive = self.archive.read().await.clone();
        tokio::fs::write(&path, archive).await.or_raise(|| ErrorKind::Io)?;
        Ok(path)
    }
}
