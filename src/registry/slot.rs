//! Per-key construction slots.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Condvar, Mutex};

use crate::types::{FileGroupKey, FileId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SlotState {
    Building,
    Done,
    Failed,
}

/// Token held while one thread runs a recognizer's `build` for a key.
///
/// Other callers for the same key park on the slot until the builder
/// finishes, then re-resolve from scratch.
#[derive(Debug)]
pub(crate) struct ConstructionSlot {
    key: FileGroupKey,
    files: BTreeSet<FileId>,
    state: Mutex<SlotState>,
    finished: Condvar,
    dirty: AtomicBool,
}

impl ConstructionSlot {
    pub(crate) fn new(key: FileGroupKey, files: impl IntoIterator<Item = FileId>) -> Self {
        Self {
            key,
            files: files.into_iter().collect(),
            state: Mutex::new(SlotState::Building),
            finished: Condvar::new(),
            dirty: AtomicBool::new(false),
        }
    }

    pub(crate) fn key(&self) -> FileGroupKey {
        self.key
    }

    pub(crate) fn covers(&self, file: FileId) -> bool {
        self.files.contains(&file)
    }

    pub(crate) fn files(&self) -> impl Iterator<Item = FileId> + '_ {
        self.files.iter().copied()
    }

    /// Block until the builder finishes.
    pub(crate) fn wait(&self) -> SlotState {
        let mut state = self.state.lock();
        while *state == SlotState::Building {
            self.finished.wait(&mut state);
        }
        *state
    }

    pub(crate) fn finish(&self, outcome: SlotState) {
        *self.state.lock() = outcome;
        self.finished.notify_all();
    }

    /// Files of the group changed while `build` was running.
    pub(crate) fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_waiters_wake_on_failure() {
        let key = FileGroupKey::of(FileId::new(2).unwrap());
        let slot = Arc::new(ConstructionSlot::new(key, [key.primary()]));

        let waiter = {
            let slot = Arc::clone(&slot);
            thread::spawn(move || slot.wait())
        };
        slot.finish(SlotState::Failed);

        assert_eq!(waiter.join().unwrap(), SlotState::Failed);
        assert!(slot.covers(key.primary()));
    }
}
