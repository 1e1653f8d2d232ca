//! Debouncing of on-disk content changes.
//!
//! Editors often write a file several times in a row (auto-save,
//! formatting). Only the last write matters to the mirror, so content
//! changes wait until a path has been quiet for the configured duration.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Pending content changes keyed by path.
#[derive(Debug)]
pub struct Debouncer {
    /// path -> time of the most recent change
    pending: HashMap<PathBuf, Instant>,
    quiet: Duration,
}

impl Debouncer {
    pub fn new(debounce_ms: u64) -> Self {
        Self {
            pending: HashMap::new(),
            quiet: Duration::from_millis(debounce_ms),
        }
    }

    /// Record a change, restarting the quiet period for `path`.
    pub fn record(&mut self, path: PathBuf) {
        self.pending.insert(path, Instant::now());
    }

    /// Forget a path, e.g. because it was deleted.
    pub fn remove(&mut self, path: &Path) {
        self.pending.remove(path);
    }

    /// Drain the paths that have been quiet long enough, oldest first.
    pub fn take_ready(&mut self) -> Vec<PathBuf> {
        let now = Instant::now();
        let mut ready: Vec<(PathBuf, Instant)> = Vec::new();
        self.pending.retain(|path, changed| {
            if now.duration_since(*changed) >= self.quiet {
                ready.push((path.clone(), *changed));
                false
            } else {
                true
            }
        });
        ready.sort_by_key(|(_, changed)| *changed);
        ready.into_iter().map(|(path, _)| path).collect()
    }

    /// Time until the next path becomes ready, if any is pending.
    pub fn next_ready_in(&self) -> Option<Duration> {
        let now = Instant::now();
        self.pending
            .values()
            .map(|changed| (*changed + self.quiet).saturating_duration_since(now))
            .min()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn test_change_is_held_until_quiet() {
        let mut debouncer = Debouncer::new(50);
        let path = PathBuf::from("/mirror/notes.txt");
        debouncer.record(path.clone());

        assert!(debouncer.take_ready().is_empty());
        assert!(debouncer.next_ready_in().is_some());

        sleep(Duration::from_millis(60));
        assert_eq!(debouncer.take_ready(), vec![path]);
        assert!(!debouncer.has_pending());
        assert_eq!(debouncer.next_ready_in(), None);
    }

    #[test]
    fn test_repeated_writes_restart_the_quiet_period() {
        let mut debouncer = Debouncer::new(50);
        let path = PathBuf::from("/mirror/Main.form");

        debouncer.record(path.clone());
        sleep(Duration::from_millis(30));
        debouncer.record(path.clone());
        sleep(Duration::from_millis(30));

        assert!(debouncer.take_ready().is_empty());
        assert_eq!(debouncer.pending_count(), 1);

        sleep(Duration::from_millis(30));
        assert_eq!(debouncer.take_ready().len(), 1);
    }

    #[test]
    fn test_deleted_path_is_dropped() {
        let mut debouncer = Debouncer::new(50);
        let path = PathBuf::from("/mirror/gone.rs");
        debouncer.record(path.clone());

        debouncer.remove(&path);

        assert!(!debouncer.has_pending());
    }
}
