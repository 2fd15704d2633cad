//! Background update loop.
//!
//! Each iteration asks the [`Source`] whether the cached archive is stale,
//! and if so downloads, installs and swaps in the new database. Failed
//! iterations are retried after a delay growing by a factor of *e*, capped
//! at the configured ceiling; a successful one waits the regular interval.

use crate::db::Shared;
use crate::error::{ErrorKind, Result};
use crate::reader::Reader;
use exn::ResultExt;
use geodb_archive::error::ErrorKind as ArchiveErrorKind;
use geodb_config::Settings;
use geodb_fetch::{Source, SourceHandle};
use std::f64::consts::E;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tracing::instrument;

/// Where the cached archive lives and how often to look for a new one.
#[derive(Debug, Clone)]
pub(crate) struct Schedule {
    archive: PathBuf,
    interval: Duration,
    ceiling: Duration,
}

impl Schedule {
    pub(crate) fn new(archive: PathBuf, settings: &Settings) -> Self {
        Self { archive, interval: settings.update_interval(), ceiling: settings.max_retry_interval() }
    }
}

/// Delay before the next update attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Backoff {
    delay: Duration,
    interval: Duration,
    ceiling: Duration,
}

impl Backoff {
    pub(crate) const SEED: Duration = Duration::from_secs(1);

    pub(crate) fn new(interval: Duration, ceiling: Duration) -> Self {
        Self { delay: Self::SEED, interval, ceiling }
    }

    /// Grow the previous delay by *e*, up to the ceiling.
    pub(crate) fn failure(&mut self) -> Duration {
        self.delay = Duration::try_from_secs_f64(self.delay.as_secs_f64() * E).map_or(self.ceiling, |d| d.min(self.ceiling));
        self.delay
    }

    pub(crate) fn success(&mut self) -> Duration {
        self.delay = self.interval;
        self.delay
    }
}

pub(crate) fn spawn<R: Reader>(shared: Arc<Shared<R>>, source: SourceHandle, schedule: Schedule) -> JoinHandle<()> {
    tokio::spawn(run(shared, source, schedule))
}

async fn run<R: Reader>(shared: Arc<Shared<R>>, source: SourceHandle, schedule: Schedule) {
    let mut backoff = Backoff::new(schedule.interval, schedule.ceiling);
    loop {
        shared.send_info("starting update");
        let outcome = update(&shared, source.as_ref(), &schedule.archive).await;
        shared.send_info("finished update");

        let delay = match outcome {
            Ok(_) => backoff.success(),
            Err(e) if *e == ErrorKind::UnsupportedArchive => {
                tracing::error!(error = ?e, "Archive layout not supported, stopping updates");
                shared.send_error(e);
                break;
            },
            Err(e) => {
                let delay = backoff.failure();
                tracing::warn!(error = ?e, retry_in = ?delay, "Database update failed");
                shared.send_error(e.raise(ErrorKind::Update(delay)));
                delay
            },
        };

        tokio::select! {
            () = shared.quit().cancelled() => break,
            () = tokio::time::sleep(delay) => {},
        }
    }
    tracing::debug!(source = source.name(), "Update loop stopped");
}

/// One update attempt. Returns whether a new database was swapped in.
///
/// The download only becomes the cached archive once its database has been
/// opened and swapped in; any failure before that removes it.
#[instrument(skip_all, fields(source = source.name()))]
async fn update<R: Reader>(shared: &Arc<Shared<R>>, source: &dyn Source, archive: &Path) -> Result<bool> {
    if !source.needs_update(archive).await.or_raise(|| ErrorKind::Fetch)? {
        tracing::debug!("Database is up to date");
        return Ok(false);
    }
    let dir = archive.parent().unwrap_or_else(|| Path::new("."));
    let download = source.download(dir).await.or_raise(|| ErrorKind::Fetch)?;

    let (installing, from) = (Arc::clone(shared), download.clone());
    let installed = match tokio::task::spawn_blocking(move || install(&installing, &from)).await {
        Ok(installed) => installed,
        Err(e) => Err(e).or_raise(|| ErrorKind::Install),
    };
    let cached = match installed {
        Ok(()) => tokio::fs::rename(&download, archive).await.or_raise(|| ErrorKind::Install),
        Err(e) => Err(e),
    };
    if let Err(e) = cached {
        _ = tokio::fs::remove_file(&download).await;
        return Err(e);
    }
    tracing::info!(path = %shared.path().display(), "Installed database update");
    Ok(true)
}

/// Extract the database from `archive` beside the live one, open it, and
/// only then move it into place and swap it in. Blocking.
pub(crate) fn install<R: Reader>(shared: &Shared<R>, archive: &Path) -> Result<()> {
    let target = shared.path();
    let staging = staging_path(target);
    let result = stage(archive, &staging).and_then(|modified| {
        let reader = R::open(&staging)?;
        geodb_archive::atomic_replace(&staging, target).or_raise(|| ErrorKind::Install)?;
        shared.swap(reader, modified);
        Ok(())
    });
    if result.is_err() {
        _ = std::fs::remove_file(&staging);
    }
    result
}

fn stage(archive: &Path, staging: &Path) -> Result<OffsetDateTime> {
    let installed = geodb_archive::install(archive, staging).map_err(|e| {
        let kind = if matches!(*e, ArchiveErrorKind::UnsupportedEntry { .. }) {
            ErrorKind::UnsupportedArchive
        } else {
            ErrorKind::Install
        };
        e.raise(kind)
    })?;
    let Some(installed) = installed else {
        exn::bail!(ErrorKind::NothingInstalled);
    };
    let modified = std::fs::metadata(&installed)
        .and_then(|metadata| metadata.modified())
        .or_raise(|| ErrorKind::Open(installed.clone()))?;
    Ok(OffsetDateTime::from(modified))
}

fn staging_path(target: &Path) -> PathBuf {
    let name = target.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    let nanos = OffsetDateTime::now_utc().unix_timestamp_nanos();
    target.with_file_name(format!(".{name}.{nanos}.new"))
}
