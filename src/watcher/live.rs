//! Live watcher that keeps a [`DiskMirror`] in step with the disk.

use std::path::PathBuf;
use std::sync::Arc;

use notify::event::ModifyKind;
use notify::{Event, EventKind, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::time::{Duration, sleep};

use super::debouncer::Debouncer;
use super::error::WatchError;
use super::mirror::DiskMirror;

/// Forwards notify events into the mirror.
///
/// Structural changes (creations, removals, renames) are applied as soon
/// as they arrive so that multi-file groups show up together. Content
/// changes are debounced.
pub struct MirrorWatcher {
    mirror: Arc<DiskMirror>,
    debouncer: Debouncer,
    event_rx: mpsc::Receiver<notify::Result<Event>>,
    _watcher: notify::RecommendedWatcher,
}

impl MirrorWatcher {
    pub fn new(mirror: Arc<DiskMirror>, debounce_ms: u64) -> Result<Self, WatchError> {
        let (tx, rx) = mpsc::channel(100);
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let _ = tx.blocking_send(res);
        })?;
        watcher
            .watch(mirror.root(), RecursiveMode::Recursive)
            .map_err(|e| WatchError::PathWatchFailed {
                path: mirror.root().to_path_buf(),
                reason: e.to_string(),
            })?;
        crate::debug_event!("watcher", "watching", "{}", mirror.root().display());

        Ok(Self {
            mirror,
            debouncer: Debouncer::new(debounce_ms),
            event_rx: rx,
            _watcher: watcher,
        })
    }

    pub fn mirror(&self) -> &Arc<DiskMirror> {
        &self.mirror
    }

    /// Run until the notify channel closes.
    pub async fn watch(mut self) -> Result<(), WatchError> {
        crate::log_event!("watcher", "started", "{}", self.mirror.root().display());

        loop {
            let wait = self.debouncer.next_ready_in().unwrap_or(Duration::from_millis(100));
            let timeout = sleep(wait);
            tokio::pin!(timeout);

            tokio::select! {
                res = self.event_rx.recv() => {
                    match res {
                        Some(Ok(event)) => self.handle_event(event),
                        Some(Err(e)) => tracing::error!(target: "datapool::watcher", "file watch error: {e}"),
                        None => return Err(WatchError::ChannelClosed),
                    }
                }

                _ = &mut timeout => {
                    for path in self.debouncer.take_ready() {
                        if let Err(e) = self.mirror.apply_modified(&path) {
                            crate::warn_event!("watcher", "failed to mirror {}: {e}", path.display());
                        }
                    }
                }
            }
        }
    }

    fn handle_event(&mut self, event: Event) {
        for path in event.paths {
            if self.mirror.is_ignored(&path) {
                crate::debug_event!("watcher", "ignored", "{}", path.display());
                continue;
            }
            let result = match event.kind {
                EventKind::Create(_) => self.mirror.apply_created(&path),
                EventKind::Modify(ModifyKind::Name(_)) => self.apply_rename(path.clone()),
                EventKind::Modify(_) => {
                    self.debouncer.record(path);
                    continue;
                }
                EventKind::Remove(_) => {
                    self.debouncer.remove(&path);
                    self.mirror.apply_removed(&path)
                }
                _ => continue,
            };
            if let Err(e) = result {
                crate::warn_event!("watcher", "failed to mirror {}: {e}", path.display());
            }
        }
    }

    /// Renames arrive as one event per side; whichever side still exists
    /// is created, the other removed.
    fn apply_rename(&mut self, path: PathBuf) -> Result<usize, WatchError> {
        self.debouncer.remove(&path);
        if path.exists() {
            self.mirror.apply_created(&path)
        } else {
            self.mirror.apply_removed(&path)
        }
    }
}

impl std::fmt::Debug for MirrorWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MirrorWatcher")
            .field("mirror", &self.mirror)
            .field("pending", &self.debouncer.pending_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WatchConfig;
    use crate::fs::FileTree;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_watcher_applies_created_files() {
        let dir = TempDir::new().unwrap();
        let tree = Arc::new(FileTree::new());
        let mirror = Arc::new(DiskMirror::import(dir.path(), Arc::clone(&tree), &WatchConfig::default()).unwrap());
        let watcher = MirrorWatcher::new(Arc::clone(&mirror), 20).unwrap();
        let handle = tokio::spawn(watcher.watch());

        std::fs::write(mirror.root().join("notes.txt"), "hello").unwrap();

        let mut found = false;
        for _ in 0..100 {
            if tree.resolve_path("notes.txt").is_ok() {
                found = true;
                break;
            }
            sleep(Duration::from_millis(20)).await;
        }
        handle.abort();
        assert!(found, "created file was not mirrored");
    }
}
