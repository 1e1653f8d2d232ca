//! Ordered, versioned list of recognizers.
//!
//! The chain is published as immutable [`ChainSnapshot`]s. A resolution that
//! started under one snapshot finishes under it even if the chain is edited
//! concurrently; the registry later compares the recorded version against
//! the current one and re-resolves stale objects.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use super::builtin::{DefaultRecognizer, FolderRecognizer, ShadowRecognizer};
use super::error::ChainError;
use super::recognizer::{Claim, ExamineContext, PrimaryFileGroup, Recognizer};
use crate::events::EventHub;
use crate::types::{FileId, RecognizerId};

/// Secondary claims may point at a primary that itself redirects; bound the
/// walk so a misbehaving recognizer cannot loop.
const MAX_REDIRECTS: usize = 4;

/// Published whenever the chain content changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainEvent {
    pub previous: u64,
    pub version: u64,
}

/// Outcome of resolving one file.
#[derive(Clone)]
pub struct Resolution {
    pub recognizer: Arc<dyn Recognizer>,
    pub group: PrimaryFileGroup,
    /// Chain version the resolution was computed under.
    pub version: u64,
}

impl Resolution {
    pub fn recognizer_id(&self) -> RecognizerId {
        self.recognizer.id()
    }
}

impl std::fmt::Debug for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolution")
            .field("recognizer", &self.recognizer.id())
            .field("group", &self.group)
            .field("version", &self.version)
            .finish()
    }
}

/// Immutable view of the chain at one version.
pub struct ChainSnapshot {
    version: u64,
    entries: Vec<Arc<dyn Recognizer>>,
}

impl ChainSnapshot {
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ids(&self) -> Vec<RecognizerId> {
        self.entries.iter().map(|r| r.id()).collect()
    }

    pub fn get(&self, id: &RecognizerId) -> Option<&Arc<dyn Recognizer>> {
        self.entries.iter().find(|r| &r.id() == id)
    }

    /// Resolve `file` to its owning recognizer and primary group.
    ///
    /// Preference pins are consulted first; otherwise the first recognizer
    /// in chain order whose claim holds wins. A secondary claim is followed
    /// to its primary, and only accepted if the primary's group actually
    /// contains the file.
    pub fn resolve(&self, cx: &ExamineContext<'_>, file: FileId) -> Option<Resolution> {
        self.resolve_depth(cx, file, 0)
    }

    fn resolve_depth(&self, cx: &ExamineContext<'_>, file: FileId, depth: usize) -> Option<Resolution> {
        if !cx.fs.is_valid(file) {
            return None;
        }

        if let Some(preferred) = cx.preferred(file) {
            match self.get(&preferred) {
                Some(recognizer) => {
                    if let Some(resolution) = self.try_recognizer(recognizer, cx, file, depth) {
                        return Some(resolution);
                    }
                }
                None => {
                    crate::debug_event!(
                        "chain",
                        "preferred recognizer missing",
                        "file={file} recognizer={preferred}"
                    );
                }
            }
        }

        self.entries
            .iter()
            .find_map(|recognizer| self.try_recognizer(recognizer, cx, file, depth))
    }

    fn try_recognizer(
        &self,
        recognizer: &Arc<dyn Recognizer>,
        cx: &ExamineContext<'_>,
        file: FileId,
        depth: usize,
    ) -> Option<Resolution> {
        match recognizer.examine(cx, file)? {
            Claim::Primary(group) => Some(Resolution {
                recognizer: Arc::clone(recognizer),
                group,
                version: self.version,
            }),
            Claim::Secondary { primary } => {
                if primary == file || depth >= MAX_REDIRECTS {
                    return None;
                }
                let resolution = self.resolve_depth(cx, primary, depth + 1)?;
                resolution.group.contains(file).then_some(resolution)
            }
        }
    }
}

impl std::fmt::Debug for ChainSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainSnapshot")
            .field("version", &self.version)
            .field("entries", &self.ids())
            .finish()
    }
}

impl std::fmt::Debug for RecognizerChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecognizerChain")
            .field("current", &*self.snapshot())
            .finish()
    }
}

/// The mutable chain. Folder and shadow recognition sit at the head and the
/// default recognizer at the tail; installed recognizers live in between.
pub struct RecognizerChain {
    head: Vec<Arc<dyn Recognizer>>,
    tail: Vec<Arc<dyn Recognizer>>,
    installed: Mutex<Vec<Arc<dyn Recognizer>>>,
    current: RwLock<Arc<ChainSnapshot>>,
    events: EventHub<ChainEvent>,
}

impl RecognizerChain {
    pub fn new() -> Self {
        let head: Vec<Arc<dyn Recognizer>> =
            vec![Arc::new(FolderRecognizer), Arc::new(ShadowRecognizer)];
        let tail: Vec<Arc<dyn Recognizer>> = vec![Arc::new(DefaultRecognizer)];
        let snapshot = Self::compose(1, &head, &[], &tail);
        Self {
            head,
            tail,
            installed: Mutex::new(Vec::new()),
            current: RwLock::new(Arc::new(snapshot)),
            events: EventHub::new("chain"),
        }
    }

    fn compose(
        version: u64,
        head: &[Arc<dyn Recognizer>],
        installed: &[Arc<dyn Recognizer>],
        tail: &[Arc<dyn Recognizer>],
    ) -> ChainSnapshot {
        let entries = head
            .iter()
            .chain(installed)
            .chain(tail)
            .cloned()
            .collect();
        ChainSnapshot { version, entries }
    }

    pub fn snapshot(&self) -> Arc<ChainSnapshot> {
        Arc::clone(&self.current.read())
    }

    pub fn version(&self) -> u64 {
        self.current.read().version
    }

    pub fn events(&self) -> &EventHub<ChainEvent> {
        &self.events
    }

    /// Ids of the installed (non built-in) recognizers in order.
    pub fn installed(&self) -> Vec<RecognizerId> {
        self.installed.lock().iter().map(|r| r.id()).collect()
    }

    pub fn resolve(&self, cx: &ExamineContext<'_>, file: FileId) -> Option<Resolution> {
        self.snapshot().resolve(cx, file)
    }

    /// Append a recognizer after the already installed ones.
    pub fn install(&self, recognizer: Arc<dyn Recognizer>) -> Result<u64, ChainError> {
        self.edit(|installed, builtins| {
            let id = recognizer.id();
            if builtins.contains(&id) {
                return Err(ChainError::BuiltIn(id));
            }
            if installed.iter().any(|r| r.id() == id) {
                return Err(ChainError::Duplicate(id));
            }
            installed.push(recognizer);
            Ok(())
        })
    }

    /// Insert a recognizer at `index` among the installed ones.
    pub fn install_at(&self, index: usize, recognizer: Arc<dyn Recognizer>) -> Result<u64, ChainError> {
        self.edit(|installed, builtins| {
            let id = recognizer.id();
            if builtins.contains(&id) {
                return Err(ChainError::BuiltIn(id));
            }
            if installed.iter().any(|r| r.id() == id) {
                return Err(ChainError::Duplicate(id));
            }
            let index = index.min(installed.len());
            installed.insert(index, recognizer);
            Ok(())
        })
    }

    pub fn remove(&self, id: &RecognizerId) -> Result<u64, ChainError> {
        self.edit(|installed, builtins| {
            if builtins.contains(id) {
                return Err(ChainError::BuiltIn(id.clone()));
            }
            let position = installed
                .iter()
                .position(|r| &r.id() == id)
                .ok_or_else(|| ChainError::Unknown(id.clone()))?;
            installed.remove(position);
            Ok(())
        })
    }

    /// Swap an installed recognizer for another one at the same position.
    pub fn replace(&self, id: &RecognizerId, recognizer: Arc<dyn Recognizer>) -> Result<u64, ChainError> {
        self.edit(|installed, builtins| {
            let new_id = recognizer.id();
            if builtins.contains(id) || builtins.contains(&new_id) {
                return Err(ChainError::BuiltIn(id.clone()));
            }
            let position = installed
                .iter()
                .position(|r| &r.id() == id)
                .ok_or_else(|| ChainError::Unknown(id.clone()))?;
            if &new_id != id && installed.iter().any(|r| r.id() == new_id) {
                return Err(ChainError::Duplicate(new_id));
            }
            installed[position] = recognizer;
            Ok(())
        })
    }

    /// Reorder the installed recognizers. `order` must be a permutation.
    pub fn reorder(&self, order: &[RecognizerId]) -> Result<u64, ChainError> {
        self.edit(|installed, _| {
            let unique: HashSet<&RecognizerId> = order.iter().collect();
            if order.len() != installed.len() || unique.len() != order.len() {
                return Err(ChainError::InvalidOrder);
            }
            let mut reordered = Vec::with_capacity(order.len());
            for id in order {
                let recognizer = installed
                    .iter()
                    .find(|r| &r.id() == id)
                    .ok_or(ChainError::InvalidOrder)?;
                reordered.push(Arc::clone(recognizer));
            }
            *installed = reordered;
            Ok(())
        })
    }

    /// Apply an edit, publish a new snapshot and notify once the chain
    /// locks are released.
    fn edit(
        &self,
        op: impl FnOnce(&mut Vec<Arc<dyn Recognizer>>, &HashSet<RecognizerId>) -> Result<(), ChainError>,
    ) -> Result<u64, ChainError> {
        let builtins: HashSet<RecognizerId> = self.head.iter().chain(&self.tail).map(|r| r.id()).collect();

        let event = {
            let mut installed = self.installed.lock();
            op(&mut installed, &builtins)?;

            let mut current = self.current.write();
            let previous = current.version;
            let version = previous + 1;
            *current = Arc::new(Self::compose(version, &self.head, &installed, &self.tail));
            ChainEvent { previous, version }
        };

        crate::log_event!(
            "chain",
            "updated",
            "version {} -> {}",
            event.previous,
            event.version
        );
        self.events.send(event);
        Ok(event.version)
    }
}

impl Default for RecognizerChain {
    fn default() -> Self {
        Self::new()
    }
}
