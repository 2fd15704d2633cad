//! File watcher reloading the database when it changes on disk.

use crate::db::Shared;
use crate::error::{ErrorKind, Result};
use crate::reader::Reader;
use exn::{OptionExt, ResultExt};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

type EventResult = notify::Result<Event>;

/// Start watching the handle's database file.
///
/// The parent directory is created if needed and watched non-recursively,
/// so the file itself may come and go (atomic renames replace the inode).
pub(crate) fn spawn<R: Reader>(shared: Arc<Shared<R>>, debounce: Duration) -> Result<JoinHandle<()>> {
    let path = shared.path().to_path_buf();
    let watch_error = || ErrorKind::Watch(path.clone());
    let name = path.file_name().ok_or_raise(watch_error)?;
    let dir = path.parent().ok_or_raise(watch_error)?;
    std::fs::create_dir_all(dir).or_raise(watch_error)?;
    // Events report resolved paths on some platforms (macOS `/private/var`).
    let dir = std::fs::canonicalize(dir).or_raise(watch_error)?;
    let target = dir.join(name);

    let (tx, rx) = mpsc::channel(100);
    let mut watcher = notify::recommended_watcher(move |res: EventResult| {
        let _ = tx.blocking_send(res);
    })
    .or_raise(watch_error)?;
    watcher.watch(&dir, RecursiveMode::NonRecursive).or_raise(watch_error)?;
    tracing::debug!(dir = %dir.display(), "Watching database directory");

    let file_watcher = FileWatcher { shared, target, debounce, events: rx, _watcher: watcher };
    Ok(tokio::spawn(file_watcher.run()))
}

struct FileWatcher<R> {
    shared: Arc<Shared<R>>,
    target: PathBuf,
    debounce: Duration,
    events: mpsc::Receiver<EventResult>,
    // Dropping the watcher ends the OS subscription.
    _watcher: RecommendedWatcher,
}

impl<R: Reader> FileWatcher<R> {
    async fn run(mut self) {
        loop {
            let received = tokio::select! {
                () = self.shared.quit().cancelled() => break,
                received = self.events.recv() => received,
            };
            let Some(first) = received else { break };
            let mut changed = self.is_target_change(first);
            // Coalesce whatever else is already queued into one reload.
            while let Ok(next) = self.events.try_recv() {
                changed |= self.is_target_change(next);
            }
            if changed {
                self.reload().await;
            }

            tokio::select! {
                () = self.shared.quit().cancelled() => break,
                () = tokio::time::sleep(self.debounce) => {},
            }
        }
        tracing::debug!(path = %self.target.display(), "File watcher stopped");
    }

    fn is_target_change(&self, event: EventResult) -> bool {
        match event {
            Ok(event) => {
                matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_))
                    && event.paths.iter().any(|path| *path == self.target)
            },
            Err(e) => {
                tracing::debug!(error = %e, "File watcher error");
                false
            },
        }
    }

    async fn reload(&self) {
        let shared = Arc::clone(&self.shared);
        match tokio::task::spawn_blocking(move || shared.reload()).await {
            Ok(Ok(())) => tracing::info!(path = %self.target.display(), "Reloaded database after file change"),
            Ok(Err(e)) => tracing::warn!(error = ?e, path = %self.target.display(), "Changed database could not be loaded"),
            Err(e) => tracing::warn!(error = %e, "Reload task failed"),
        }
    }
}
