//! The self-refreshing database handle.

use crate::error::{Error, ErrorKind, Result};
use crate::mailbox::Mailbox;
use crate::reader::{MaxMindReader, Reader};
use crate::{update, watch};
use exn::ResultExt;
use geodb_config::Settings;
use geodb_fetch::SourceHandle;
use geodb_fetch::source::HttpSource;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use time::{OffsetDateTime, UtcOffset};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// State shared between the handle and its background tasks.
pub(crate) struct Shared<R> {
    path: PathBuf,
    state: RwLock<State<R>>,
    quit: CancellationToken,
    open: Mailbox<PathBuf>,
    error: Mailbox<Error>,
    info: Mailbox<String>,
}

/// Everything the lock protects. Reader, timestamp and the closed flag change
/// together so no one sees a reader installed into a closed handle.
struct State<R> {
    reader: Option<R>,
    last_updated: Option<OffsetDateTime>,
    closed: bool,
}

impl<R: Reader> Shared<R> {
    pub(crate) fn new(path: PathBuf) -> Self {
        Self {
            path,
            state: RwLock::new(State { reader: None, last_updated: None, closed: false }),
            quit: CancellationToken::new(),
            open: Mailbox::new(),
            error: Mailbox::new(),
            info: Mailbox::new(),
        }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn quit(&self) -> &CancellationToken {
        &self.quit
    }

    pub(crate) fn lookup<T: DeserializeOwned>(&self, ip: IpAddr) -> Result<Option<T>> {
        let state = self.state.read();
        if state.closed {
            exn::bail!(ErrorKind::Closed);
        }
        match &state.reader {
            Some(reader) => reader.lookup(ip),
            None => exn::bail!(ErrorKind::Unavailable),
        }
    }

    /// Install `reader` as the active snapshot, modified at `modified`.
    ///
    /// The previous reader is released once the new one is active. On a
    /// closed handle `reader` is released instead and nothing changes.
    pub(crate) fn swap(&self, reader: R, modified: OffsetDateTime) {
        let previous = {
            let mut state = self.state.write();
            if state.closed {
                tracing::debug!(path = %self.path.display(), "Handle closed; discarding new reader");
                return;
            }
            let previous = state.reader.replace(reader);
            state.last_updated = Some(modified.to_offset(UtcOffset::UTC));
            self.open.try_send(self.path.clone());
            previous
        };
        drop(previous);
    }

    /// Read the file at `path` and swap it in. Blocking.
    #[instrument(level = "debug", skip_all, fields(path = %self.path.display()))]
    pub(crate) fn reload(&self) -> Result<()> {
        let modified = std::fs::metadata(&self.path)
            .and_then(|metadata| metadata.modified())
            .or_raise(|| ErrorKind::Open(self.path.clone()))?;
        let reader = R::open(&self.path)?;
        self.swap(reader, OffsetDateTime::from(modified));
        Ok(())
    }

    pub(crate) fn date(&self) -> Option<OffsetDateTime> {
        self.state.read().last_updated
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state.read().closed
    }

    pub(crate) fn send_error(&self, err: Error) {
        let state = self.state.read();
        if !state.closed {
            self.error.try_send(err);
        }
    }

    pub(crate) fn send_info(&self, message: impl Into<String>) {
        let state = self.state.read();
        if !state.closed {
            self.info.try_send(message.into());
        }
    }

    /// Returns `false` if the handle was already closed.
    pub(crate) fn close(&self) -> bool {
        let reader = {
            let mut state = self.state.write();
            if state.closed {
                return false;
            }
            state.closed = true;
            self.quit.cancel();
            self.open.close();
            self.error.close();
            self.info.close();
            state.reader.take()
        };
        drop(reader);
        tracing::debug!(path = %self.path.display(), "Database closed");
        true
    }
}

/// A geolocation database that keeps itself up to date.
///
/// The handle always answers lookups from a complete snapshot. A background
/// watcher reloads the file whenever it is replaced on disk and, for handles
/// created with [`open_url`](Self::open_url) or
/// [`open_source`](Self::open_source), an update loop periodically downloads
/// and installs newer archives.
///
/// Background tasks run on the Tokio runtime the handle was opened on and
/// stop when the handle is [closed](Self::close) or dropped.
///
/// Progress is reported through single-slot mailboxes: [`notify_open`]
/// receives the path after each swap, [`notify_error`] background update
/// failures, [`notify_info`] lifecycle messages and [`notify_close`] fires
/// once on close. A mailbox holds one undelivered value; later values are
/// dropped until it is read.
///
/// [`notify_open`]: Self::notify_open
/// [`notify_error`]: Self::notify_error
/// [`notify_info`]: Self::notify_info
/// [`notify_close`]: Self::notify_close
pub struct Database<R: Reader = MaxMindReader> {
    shared: Arc<Shared<R>>,
}

impl<R: Reader> Database<R> {
    /// Open the database at `path` and watch it for changes.
    ///
    /// # Errors
    /// - [`Open`](ErrorKind::Open) if the file cannot be loaded. This is
    ///   fatal: the handle is closed before returning.
    /// - [`Watch`](ErrorKind::Watch) if the file watcher cannot be started.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub async fn open(path: impl AsRef<Path>, settings: &Settings) -> Result<Self> {
        let path = std::path::absolute(path.as_ref()).or_raise(|| ErrorKind::Open(path.as_ref().to_path_buf()))?;
        let db = Self::from_shared(Arc::new(Shared::new(path)));
        db.reload().await?;
        watch::spawn(Arc::clone(&db.shared), settings.watch_debounce())?;
        tracing::info!(path = %db.path().display(), "Opened database");
        Ok(db)
    }

    /// Open a database kept up to date from the archive at `url`.
    ///
    /// The database lives at [`Settings::database_path`], the last archive
    /// at [`Settings::archive_path`]. Whatever is already there is loaded
    /// first, but unlike [`open`](Self::open) that is optional: until the
    /// first download completes lookups return
    /// [`Unavailable`](ErrorKind::Unavailable).
    pub async fn open_url(url: &str, settings: &Settings) -> Result<Self> {
        let source = HttpSource::new(url, settings.request_timeout()).or_raise(|| ErrorKind::Fetch)?;
        Self::open_source(Arc::new(source), settings).await
    }

    /// Like [`open_url`](Self::open_url), with any archive [`Source`](geodb_fetch::Source).
    #[instrument(skip_all, fields(source = source.name()))]
    pub async fn open_source(source: SourceHandle, settings: &Settings) -> Result<Self> {
        settings.validate().or_raise(|| ErrorKind::Config)?;
        let path = std::path::absolute(settings.database_path())
            .or_raise(|| ErrorKind::Open(settings.database_path()))?;
        let archive = std::path::absolute(settings.archive_path())
            .or_raise(|| ErrorKind::Open(settings.archive_path()))?;
        let db = Self::from_shared(Arc::new(Shared::new(path)));

        if let Err(e) = db.restore(&archive).await {
            tracing::debug!(error = ?e, "No usable local copy yet");
        }
        watch::spawn(Arc::clone(&db.shared), settings.watch_debounce())?;
        update::spawn(Arc::clone(&db.shared), source, update::Schedule::new(archive, settings));
        tracing::info!(path = %db.path().display(), "Opened self-updating database");
        Ok(db)
    }

    fn from_shared(shared: Arc<Shared<R>>) -> Self {
        Self { shared }
    }

    /// Load whatever a previous run left behind, installing the cached
    /// archive first if the database itself is missing.
    async fn restore(&self, archive: &Path) -> Result<()> {
        if !self.path().exists() && archive.exists() {
            let (shared, archive) = (Arc::clone(&self.shared), archive.to_path_buf());
            return tokio::task::spawn_blocking(move || update::install(&shared, &archive))
                .await
                .or_raise(|| ErrorKind::Install)?;
        }
        self.reload().await
    }

    /// Look up `ip`, decoding the record into `T`.
    ///
    /// `Ok(None)` means the address is not in the database.
    ///
    /// # Errors
    /// - [`Unavailable`](ErrorKind::Unavailable) if nothing has been loaded.
    /// - [`Closed`](ErrorKind::Closed) after [`close`](Self::close).
    /// - [`Lookup`](ErrorKind::Lookup) if the reader fails.
    pub fn lookup<T: DeserializeOwned>(&self, ip: IpAddr) -> Result<Option<T>> {
        self.shared.lookup(ip)
    }

    /// Make `reader` the active snapshot, last modified at `modified`.
    pub fn swap(&self, reader: R, modified: OffsetDateTime) {
        self.shared.swap(reader, modified);
    }

    /// Re-read the database file now instead of waiting for the watcher.
    pub async fn reload(&self) -> Result<()> {
        let shared = Arc::clone(&self.shared);
        let path = self.path().to_path_buf();
        tokio::task::spawn_blocking(move || shared.reload()).await.or_raise(|| ErrorKind::Open(path))?
    }

    /// Modification time (UTC) of the active snapshot, `None` if nothing was
    /// ever loaded.
    pub fn date(&self) -> Option<OffsetDateTime> {
        self.shared.date()
    }

    pub fn path(&self) -> &Path {
        self.shared.path()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Stop background tasks, close the mailboxes and release the reader.
    /// Calling this more than once has no further effect.
    pub fn close(&self) {
        if self.shared.close() {
            tracing::info!(path = %self.path().display(), "Closed database");
        }
    }

    /// Report a failure on the error mailbox. Dropped if the handle is closed
    /// or an earlier error is still unread.
    pub fn send_error(&self, err: Error) {
        self.shared.send_error(err);
    }

    /// Report a message on the info mailbox, with the same drop rules as
    /// [`send_error`](Self::send_error).
    pub fn send_info(&self, message: impl Into<String>) {
        self.shared.send_info(message);
    }

    pub fn notify_open(&self) -> &Mailbox<PathBuf> {
        &self.shared.open
    }

    pub fn notify_error(&self) -> &Mailbox<Error> {
        &self.shared.error
    }

    pub fn notify_info(&self) -> &Mailbox<String> {
        &self.shared.info
    }

    /// Token cancelled when the handle closes.
    pub fn notify_close(&self) -> CancellationToken {
        self.shared.quit.child_token()
    }
}

impl<R: Reader> Drop for Database<R> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<R: Reader> std::fmt::Debug for Database<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.path())
            .field("last_updated", &self.date())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{self, LOCALHOST};
    use crate::reader::testing::TextReader;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;
    use time::macros::datetime;

    /// Replace `path` the way installers do, so watchers never see a
    /// half-written file.
    fn replace_file(path: &Path, text: &str) {
        let staged = path.with_extension("new");
        fs::write(&staged, text).unwrap();
        fs::rename(&staged, path).unwrap();
    }

    fn shared() -> Shared<TextReader> {
        Shared::new(PathBuf::from("/nonexistent/db.mmdb"))
    }

    #[test]
    fn test_lookup_before_load_is_unavailable() {
        let shared = shared();
        assert_eq!(*shared.lookup::<String>(LOCALHOST).unwrap_err(), ErrorKind::Unavailable);
        assert_eq!(shared.date(), None);
    }

    #[test]
    fn test_swap_releases_previous_reader() {
        let live = Arc::new(AtomicUsize::new(0));
        let shared = shared();

        shared.swap(TextReader::tracked("first", &live), datetime!(2024-01-01 00:00:00 UTC));
        shared.swap(TextReader::tracked("second", &live), datetime!(2024-02-01 00:00:00 UTC));

        assert_eq!(live.load(Ordering::SeqCst), 1);
        assert_eq!(shared.lookup::<String>(LOCALHOST).unwrap().as_deref(), Some("second"));
        assert_eq!(shared.date(), Some(datetime!(2024-02-01 00:00:00 UTC)));
    }

    #[test]
    fn test_date_is_normalised_to_utc() {
        let shared = shared();
        shared.swap(TextReader::tracked("x", &Arc::default()), datetime!(2024-03-05 14:00:00 +2));
        let date = shared.date().unwrap();
        assert_eq!(date.offset(), UtcOffset::UTC);
        assert_eq!(date, datetime!(2024-03-05 12:00:00 UTC));
    }

    #[test]
    fn test_empty_record_is_not_found() {
        let shared = shared();
        shared.swap(TextReader::tracked("", &Arc::default()), OffsetDateTime::now_utc());
        assert_eq!(shared.lookup::<String>(LOCALHOST).unwrap(), None);
    }

    #[test]
    fn test_swap_after_close_releases_reader() {
        let live = Arc::new(AtomicUsize::new(0));
        let shared = shared();
        shared.swap(TextReader::tracked("before", &live), OffsetDateTime::now_utc());
        assert!(shared.open.try_recv().is_some());

        assert!(shared.close());
        assert_eq!(live.load(Ordering::SeqCst), 0);

        shared.swap(TextReader::tracked("late", &live), OffsetDateTime::now_utc());
        assert_eq!(live.load(Ordering::SeqCst), 0);
        assert!(shared.open.try_recv().is_none());
        assert_eq!(*shared.lookup::<String>(LOCALHOST).unwrap_err(), ErrorKind::Closed);
    }

    #[test]
    fn test_close_is_idempotent() {
        let shared = shared();
        assert!(shared.close());
        assert!(!shared.close());
        assert!(!shared.close());
        assert!(shared.is_closed());
        assert!(shared.quit().is_cancelled());
        assert!(shared.open.is_closed() && shared.error.is_closed() && shared.info.is_closed());
    }

    #[test]
    fn test_notifications_keep_first_unread_value() {
        let shared = shared();
        shared.send_info("one");
        shared.send_info("two");
        shared.send_error(exn::Exn::from(ErrorKind::Fetch));
        shared.send_error(exn::Exn::from(ErrorKind::Install));

        assert_eq!(shared.info.try_recv().as_deref(), Some("one"));
        assert_eq!(shared.info.try_recv(), None);
        assert_eq!(*shared.error.try_recv().unwrap(), ErrorKind::Fetch);
        assert!(shared.error.try_recv().is_none());

        shared.close();
        shared.send_info("three");
        assert_eq!(shared.info.try_recv(), None);
    }

    #[test]
    fn test_swap_notifies_open_once_until_read() {
        let shared = shared();
        shared.swap(TextReader::tracked("a", &Arc::default()), OffsetDateTime::now_utc());
        shared.swap(TextReader::tracked("b", &Arc::default()), OffsetDateTime::now_utc());
        assert_eq!(shared.open.version(), 1);
        assert_eq!(shared.open.try_recv().as_deref(), Some(shared.path()));
        assert!(shared.open.try_recv().is_none());
    }

    #[test]
    fn test_concurrent_swaps_and_lookups() {
        let live = Arc::new(AtomicUsize::new(0));
        let shared = Arc::new(shared());
        shared.swap(TextReader::tracked("seed", &live), OffsetDateTime::now_utc());

        let mut handles = Vec::new();
        for writer in 0..4 {
            let (shared, live) = (Arc::clone(&shared), Arc::clone(&live));
            handles.push(thread::spawn(move || {
                for i in 0..250 {
                    shared.swap(TextReader::tracked(&format!("{writer}-{i}"), &live), OffsetDateTime::now_utc());
                }
            }));
        }
        for _ in 0..4 {
            let shared = Arc::clone(&shared);
            handles.push(thread::spawn(move || {
                for _ in 0..1000 {
                    let text = shared.lookup::<String>(LOCALHOST).unwrap().unwrap();
                    assert!(!text.is_empty());
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(live.load(Ordering::SeqCst), 1);
        shared.close();
        assert_eq!(live.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_open_missing_file_fails() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("missing.mmdb");
        let err = Database::<TextReader>::open(&path, &fixtures::settings(temp.path())).await.unwrap_err();
        assert_eq!(*err, ErrorKind::Open(path));
    }

    #[tokio::test]
    async fn test_open_loads_file_and_reports_mtime() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("db.mmdb");
        fs::write(&path, "lisbon").unwrap();

        let db = Database::<TextReader>::open(&path, &fixtures::settings(temp.path())).await.unwrap();

        assert_eq!(db.lookup::<String>(LOCALHOST).unwrap().as_deref(), Some("lisbon"));
        assert_eq!(db.notify_open().try_recv().as_deref(), Some(path.as_path()));
        let modified = fs::metadata(&path).unwrap().modified().unwrap();
        assert_eq!(db.date(), Some(OffsetDateTime::from(modified)));
    }

    #[tokio::test]
    async fn test_watcher_reloads_replaced_file() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("db.mmdb");
        fs::write(&path, "v1").unwrap();
        let db = Database::<TextReader>::open(&path, &fixtures::settings(temp.path())).await.unwrap();
        assert!(db.notify_open().try_recv().is_some());

        replace_file(&path, "v2");

        let opened = tokio::time::timeout(Duration::from_secs(10), db.notify_open().recv()).await.unwrap();
        assert_eq!(opened.as_deref(), Some(path.as_path()));
        assert_eq!(db.lookup::<String>(LOCALHOST).unwrap().as_deref(), Some("v2"));
    }

    #[tokio::test]
    async fn test_watcher_ignores_unloadable_file() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("db.mmdb");
        fs::write(&path, "v1").unwrap();
        let db = Database::<TextReader>::open(&path, &fixtures::settings(temp.path())).await.unwrap();
        db.notify_open().try_recv();

        replace_file(&path, "corrupt");
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(db.lookup::<String>(LOCALHOST).unwrap().as_deref(), Some("v1"));
        assert!(db.notify_error().try_recv().is_none());
        assert!(!db.is_closed());
    }

    #[tokio::test]
    async fn test_reload_on_demand() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("db.mmdb");
        fs::write(&path, "v1").unwrap();
        let db = Database::<TextReader>::open(&path, &fixtures::settings(temp.path())).await.unwrap();

        replace_file(&path, "v2");
        db.reload().await.unwrap();

        assert_eq!(db.lookup::<String>(LOCALHOST).unwrap().as_deref(), Some("v2"));
    }

    #[tokio::test]
    async fn test_drop_closes_handle() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("db.mmdb");
        fs::write(&path, "v1").unwrap();
        let db = Database::<TextReader>::open(&path, &fixtures::settings(temp.path())).await.unwrap();
        let closed = db.notify_close();
        assert!(!closed.is_cancelled());

        db.close();
        db.close();
        assert!(closed.is_cancelled());
        assert_eq!(*db.lookup::<String>(LOCALHOST).unwrap_err(), ErrorKind::Closed);

        let db = Database::<TextReader>::open(&path, &fixtures::settings(temp.path())).await.unwrap();
        let closed = db.notify_close();
        drop(db);
        assert!(closed.is_cancelled());
    }
}
