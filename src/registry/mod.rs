//! The identity registry: one live object per file group.
//!
//! ```text
//! find(file)
//!   |-- owner map hit, object valid, chain version current --> return it
//!   |
//!   |-- resolve through the chain (no registry lock held)
//!   |-- lock map
//!   |     live object for key?        --> return it
//!   |     construction slot present?  --> unlock, check wait graph, park,
//!   |                                     then start over
//!   |     else insert slot            --> unlock, build, lock, publish,
//!   |                                     unlock, wake waiters
//! ```
//!
//! The map lock is never held while recognizer code runs. Change batches
//! from the [`FileTree`] and chain edits from the [`RecognizerChain`] are
//! observed synchronously, so revalidation has happened by the time the
//! mutating call returns.

mod diagnostics;
mod error;
mod ops;
mod slot;
mod waits;

pub use diagnostics::{Diagnostics, DiagnosticsSnapshot};
pub use error::{RegistryError, RegistryResult};
pub use waits::{DeadlockRisk, Resource};

pub(crate) use waits::WaitGraph;

use std::collections::{BTreeSet, HashMap};
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::config::RecognitionConfig;
use crate::events::{EventHub, Observer};
use crate::fs::{FileTree, FsEventBatch, FsEventKind};
use crate::object::{ObjectShape, TypedObject};
use crate::recognize::{
    BuildContext, ChainEvent, ExamineContext, Recognizer, RecognizerChain, Resolution,
};
use crate::types::{FileGroupKey, FileId, ObjectId, RecognizerId};
use slot::{ConstructionSlot, SlotState};

/// Lifecycle notifications for objects.
#[derive(Debug, Clone)]
pub enum ObjectEvent {
    Created(Arc<TypedObject>),
    /// Sent after the object was removed and marked invalid.
    Invalidated(Arc<TypedObject>),
    /// Secondary files joined or left the group.
    FilesChanged(Arc<TypedObject>),
    ModifiedChanged {
        object: Arc<TypedObject>,
        modified: bool,
    },
}

impl ObjectEvent {
    pub fn object(&self) -> &Arc<TypedObject> {
        match self {
            ObjectEvent::Created(object)
            | ObjectEvent::Invalidated(object)
            | ObjectEvent::FilesChanged(object)
            | ObjectEvent::ModifiedChanged { object, .. } => object,
        }
    }
}

/// Result of one [`IdentityRegistry::sweep`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub demoted: usize,
    pub forgotten: usize,
}

enum Handle {
    Strong(Arc<TypedObject>),
    Weak(Weak<TypedObject>),
}

struct Entry {
    id: ObjectId,
    handle: Handle,
    recognizer: Arc<dyn Recognizer>,
    files: Vec<FileId>,
    chain_version: u64,
    idle: u32,
}

impl Entry {
    fn peek(&self) -> Option<Arc<TypedObject>> {
        match &self.handle {
            Handle::Strong(object) => Some(Arc::clone(object)),
            Handle::Weak(weak) => weak.upgrade(),
        }
    }

    /// Upgrade and pin strongly again; resets the idle counter.
    fn touch(&mut self) -> Option<Arc<TypedObject>> {
        let object = self.peek()?;
        self.handle = Handle::Strong(Arc::clone(&object));
        self.idle = 0;
        Some(object)
    }
}

#[derive(Default)]
struct RegistryState {
    objects: HashMap<FileGroupKey, Entry>,
    owners: HashMap<FileId, FileGroupKey>,
    slots: HashMap<FileGroupKey, Arc<ConstructionSlot>>,
}

impl RegistryState {
    /// Drop the entry for `key` and release its files.
    fn remove_entry(&mut self, key: FileGroupKey) -> Option<Entry> {
        let entry = self.objects.remove(&key)?;
        for file in &entry.files {
            if self.owners.get(file) == Some(&key) {
                self.owners.remove(file);
            }
        }
        Some(entry)
    }

    /// Remove `key` and mark its object invalid. Returns the object if this
    /// call retired it.
    fn retire(&mut self, key: FileGroupKey) -> Option<Arc<TypedObject>> {
        let object = self.remove_entry(key)?.peek()?;
        object.mark_invalid().then_some(object)
    }

    /// Make `key` the owner of exactly `files`, retiring any other object
    /// that owned one of them.
    fn claim(&mut self, key: FileGroupKey, files: &[FileId]) -> Vec<Arc<TypedObject>> {
        let mut displaced = Vec::new();
        for file in files {
            if let Some(&previous) = self.owners.get(file)
                && previous != key
            {
                displaced.extend(self.retire(previous));
            }
            self.owners.insert(*file, key);
        }
        if let Some(entry) = self.objects.get_mut(&key) {
            for file in &entry.files {
                if !files.contains(file) && self.owners.get(file) == Some(&key) {
                    self.owners.remove(file);
                }
            }
            entry.files = files.to_vec();
        }
        displaced
    }

    fn live(&mut self, key: FileGroupKey) -> Option<(Arc<TypedObject>, &mut Entry)> {
        let object = match self.objects.get_mut(&key)?.touch() {
            Some(object) if object.is_valid() => object,
            _ => {
                self.remove_entry(key);
                return None;
            }
        };
        let entry = self.objects.get_mut(&key)?;
        Some((object, entry))
    }
}

fn same_recognizer(a: &Arc<dyn Recognizer>, b: &Arc<dyn Recognizer>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

enum Next {
    Return(Arc<TypedObject>),
    /// Live and current, but its files no longer match the resolved group.
    Regroup(Arc<TypedObject>),
    Wait(Arc<ConstructionSlot>),
    Build(Arc<ConstructionSlot>),
}

/// Canonical cache from file groups to live [`TypedObject`]s.
pub struct IdentityRegistry {
    fs: Arc<FileTree>,
    chain: Arc<RecognizerChain>,
    state: Mutex<RegistryState>,
    preferences: DashMap<FileId, RecognizerId>,
    next_id: AtomicU64,
    idle_sweeps: u32,
    events: EventHub<ObjectEvent>,
    diagnostics: Diagnostics,
    waits: WaitGraph,
}

impl IdentityRegistry {
    pub fn new(fs: Arc<FileTree>, chain: Arc<RecognizerChain>) -> Arc<Self> {
        Self::with_config(fs, chain, &RecognitionConfig::default())
    }

    /// Create a registry and register it as an observer of `fs` and `chain`.
    pub fn with_config(
        fs: Arc<FileTree>,
        chain: Arc<RecognizerChain>,
        config: &RecognitionConfig,
    ) -> Arc<Self> {
        let registry = Arc::new(Self {
            fs: Arc::clone(&fs),
            chain: Arc::clone(&chain),
            state: Mutex::new(RegistryState::default()),
            preferences: DashMap::new(),
            next_id: AtomicU64::new(0),
            idle_sweeps: config.idle_sweeps.max(1),
            events: EventHub::new("registry"),
            diagnostics: Diagnostics::default(),
            waits: WaitGraph::new(),
        });
        fs.events().observe(&registry);
        chain.events().observe(&registry);
        registry
    }

    pub fn fs(&self) -> &Arc<FileTree> {
        &self.fs
    }

    pub fn chain(&self) -> &Arc<RecognizerChain> {
        &self.chain
    }

    pub fn events(&self) -> &EventHub<ObjectEvent> {
        &self.events
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub(crate) fn waits(&self) -> &WaitGraph {
        &self.waits
    }

    fn next_object_id(&self) -> ObjectId {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        ObjectId::from_non_zero(NonZeroU64::MIN.saturating_add(n))
    }

    /// Resolve `file` against the current chain snapshot.
    pub fn resolve(&self, file: FileId) -> RegistryResult<Resolution> {
        if !self.fs.is_valid(file) {
            return Err(crate::fs::FsError::InvalidFile { file }.into());
        }
        let cx = ExamineContext::with_registry(&self.fs, self);
        self.chain
            .resolve(&cx, file)
            .ok_or(RegistryError::Unrecognized { file })
    }

    /// Key of the live object owning `file`. Never blocks on construction.
    pub fn owner_of(&self, file: FileId) -> Option<FileGroupKey> {
        self.state.lock().owners.get(&file).copied()
    }

    /// The live object owning `file`, without resolving or constructing.
    pub fn try_find(&self, file: FileId) -> Option<Arc<TypedObject>> {
        let mut state = self.state.lock();
        let key = *state.owners.get(&file)?;
        state.live(key).map(|(object, _)| object)
    }

    pub fn find_by_path(&self, path: &str) -> RegistryResult<Arc<TypedObject>> {
        let file = self.fs.resolve_path(path)?;
        self.find(file)
    }

    /// The canonical object for `file`, constructing it if necessary.
    ///
    /// Concurrent callers for the same group park on one construction slot.
    /// A caller whose wait would close a cycle (for example a build that
    /// waits on a folder scan which in turn waits on this build) gets an
    /// invalidated placeholder instead and a warning is logged.
    pub fn find(&self, file: FileId) -> RegistryResult<Arc<TypedObject>> {
        loop {
            if let Some(object) = self.find_current(file) {
                return Ok(object);
            }

            let resolution = self.resolve(file)?;
            let key = resolution.group.key();

            let (next, displaced) = {
                let mut state = self.state.lock();
                let mut displaced = Vec::new();
                let live = state.live(key).map(|(object, entry)| {
                    let current = same_recognizer(&entry.recognizer, &resolution.recognizer);
                    let grouped = entry.files == resolution.group.files();
                    (object, current, grouped)
                });
                let next = match live {
                    Some((object, true, true)) => Next::Return(object),
                    Some((object, true, false)) => Next::Regroup(object),
                    stale => {
                        if stale.is_some() {
                            displaced.extend(state.retire(key));
                        }
                        if let Some(slot) = state.slots.get(&key).cloned() {
                            Next::Wait(slot)
                        } else {
                            let slot = Arc::new(ConstructionSlot::new(key, resolution.group.files()));
                            state.slots.insert(key, Arc::clone(&slot));
                            self.waits.acquire(Resource::Slot(key));
                            Next::Build(slot)
                        }
                    }
                };
                (next, displaced)
            };
            self.announce_invalidated(displaced);

            match next {
                Next::Return(object) => return Ok(object),
                Next::Regroup(object) => {
                    crate::debug_event!("registry", "regrouping", "{key} files differ from its group");
                    self.revalidate(&object);
                    if object.is_valid() {
                        return Ok(object);
                    }
                }
                Next::Build(slot) => return self.construct(resolution, slot),
                Next::Wait(slot) => {
                    let guard = match self.waits.begin_wait(Resource::Slot(key)) {
                        Ok(guard) => guard,
                        Err(risk) => {
                            self.report_deadlock(&risk);
                            return Ok(self.placeholder(key, resolution.recognizer_id()));
                        }
                    };
                    let outcome = slot.wait();
                    drop(guard);
                    crate::debug_event!("registry", "slot released", "{key} {outcome:?}, retrying");
                }
            }
        }
    }

    /// Fast path: owner map hit whose object is still current.
    fn find_current(&self, file: FileId) -> Option<Arc<TypedObject>> {
        let current_version = self.chain.version();
        let (object, stale) = {
            let mut state = self.state.lock();
            let key = *state.owners.get(&file)?;
            let (object, entry) = state.live(key)?;
            (object, entry.chain_version != current_version)
        };
        if stale {
            self.revalidate(&object);
            return object.is_valid().then_some(object);
        }
        Some(object)
    }

    fn construct(&self, resolution: Resolution, slot: Arc<ConstructionSlot>) -> RegistryResult<Arc<TypedObject>> {
        let key = slot.key();
        let mut guard = SlotGuard {
            registry: self,
            slot: Arc::clone(&slot),
            finished: false,
        };

        crate::debug_event!(
            "registry",
            "building",
            "{key} with '{}' (chain v{})",
            resolution.recognizer_id(),
            resolution.version
        );
        self.diagnostics.record_build();
        let cx = BuildContext {
            fs: &self.fs,
            registry: self,
        };
        let spec = match resolution.recognizer.build(&cx, &resolution.group) {
            Ok(spec) => spec,
            Err(e) => {
                self.diagnostics.record_build_failure();
                crate::warn_event!("registry", "build of {key} failed: {e}");
                return Err(e.into());
            }
        };

        let group = &resolution.group;
        let shape = spec
            .shape
            .clone()
            .unwrap_or_else(|| ObjectShape::for_group(group.primary, &group.secondaries));
        let files = shape.files();
        let object = Arc::new(TypedObject::new(
            self.next_object_id(),
            key,
            resolution.recognizer_id(),
            shape,
            spec,
        ));

        let displaced = {
            let mut state = self.state.lock();
            let mut displaced: Vec<Arc<TypedObject>> = state.retire(key).into_iter().collect();
            state.objects.insert(
                key,
                Entry {
                    id: object.id(),
                    handle: Handle::Strong(Arc::clone(&object)),
                    recognizer: Arc::clone(&resolution.recognizer),
                    files: Vec::new(),
                    chain_version: resolution.version,
                    idle: 0,
                },
            );
            displaced.extend(state.claim(key, &files));
            state.slots.remove(&key);
            displaced
        };
        guard.finish(SlotState::Done);

        self.announce_invalidated(displaced);
        crate::debug_event!("registry", "created", "{object:?}");
        self.events.send(ObjectEvent::Created(Arc::clone(&object)));

        if slot.is_dirty() || self.chain.version() != resolution.version {
            crate::debug_event!("registry", "revalidating", "{key} changed during build");
            self.revalidate(&object);
        }
        Ok(object)
    }

    fn placeholder(&self, key: FileGroupKey, recognizer: RecognizerId) -> Arc<TypedObject> {
        Arc::new(TypedObject::placeholder(self.next_object_id(), key, recognizer))
    }

    pub(crate) fn report_deadlock(&self, risk: &DeadlockRisk) {
        self.diagnostics.record_deadlock_warning();
        crate::warn_event!("registry", "deadlock risk, returning degraded result: {risk}");
    }

    /// Retire `object`. Listeners have been notified when this returns.
    ///
    /// Returns `false` if the object was already invalid.
    pub fn invalidate(&self, object: &Arc<TypedObject>) -> bool {
        let retired = {
            let mut state = self.state.lock();
            let key = object.key();
            if state.objects.get(&key).is_some_and(|entry| entry.id == object.id()) {
                state.remove_entry(key);
            }
            object.mark_invalid()
        };
        if retired {
            self.announce_invalidated(vec![Arc::clone(object)]);
        }
        retired
    }

    fn announce_invalidated(&self, objects: Vec<Arc<TypedObject>>) {
        for object in objects {
            object.set_modified(false);
            self.diagnostics.record_invalidation();
            crate::debug_event!("registry", "invalidated", "{} {}", object.id(), object.key());
            self.events.send(ObjectEvent::Invalidated(object));
        }
    }

    /// Re-resolve `object` and either keep it (updating its secondaries) or
    /// retire it when its recognizer or primary no longer match.
    pub fn revalidate(&self, object: &Arc<TypedObject>) {
        if !object.is_valid() {
            return;
        }
        let key = object.key();
        let resolution = match self.resolve(key.primary()) {
            Ok(resolution) => resolution,
            Err(e) => {
                crate::debug_event!("registry", "revalidation failed", "{key}: {e}");
                self.invalidate(object);
                return;
            }
        };

        let keeps_identity = resolution.group.primary == key.primary() && {
            let state = self.state.lock();
            state.objects.get(&key).is_some_and(|entry| {
                entry.id == object.id() && same_recognizer(&entry.recognizer, &resolution.recognizer)
            })
        };
        if !keeps_identity {
            self.invalidate(object);
            return;
        }

        let shape = match object.shape() {
            shape @ (ObjectShape::Shadow { .. } | ObjectShape::BrokenShadow { .. }) => shape,
            _ => ObjectShape::for_group(key.primary(), &resolution.group.secondaries),
        };

        let (changed, displaced) = {
            let mut state = self.state.lock();
            let Some(entry) = state.objects.get_mut(&key) else {
                return;
            };
            if entry.id != object.id() {
                return;
            }
            entry.chain_version = resolution.version;
            if shape == object.shape() {
                (false, Vec::new())
            } else {
                let displaced = state.claim(key, &shape.files());
                object.set_shape(shape);
                (true, displaced)
            }
        };

        self.announce_invalidated(displaced);
        if changed {
            crate::debug_event!("registry", "files changed", "{object:?}");
            self.events.send(ObjectEvent::FilesChanged(Arc::clone(object)));
        }
    }

    /// Pin `file` to a recognizer, or clear the pin with `None`.
    ///
    /// Any live object owning the file is invalidated.
    pub fn set_preferred_resolution(&self, file: FileId, recognizer: Option<RecognizerId>) {
        match recognizer {
            Some(id) => {
                self.preferences.insert(file, id);
            }
            None => {
                self.preferences.remove(&file);
            }
        }
        if let Some(object) = self.try_find(file) {
            self.invalidate(&object);
        }
    }

    pub fn preferred_resolution(&self, file: FileId) -> Option<RecognizerId> {
        self.preferences.get(&file).map(|entry| entry.value().clone())
    }

    /// Set the modified flag; notifies only on change.
    pub fn set_modified(&self, object: &Arc<TypedObject>, modified: bool) -> RegistryResult<()> {
        if !object.is_valid() {
            return Err(RegistryError::Invalidated { object: object.id() });
        }
        if object.set_modified(modified) != modified {
            self.events.send(ObjectEvent::ModifiedChanged {
                object: Arc::clone(object),
                modified,
            });
        }
        Ok(())
    }

    /// Live objects with unsaved modifications.
    pub fn modified(&self) -> Vec<Arc<TypedObject>> {
        let state = self.state.lock();
        let mut objects: Vec<Arc<TypedObject>> = state
            .objects
            .values()
            .filter_map(Entry::peek)
            .filter(|o| o.is_valid() && o.is_modified())
            .collect();
        objects.sort_by_key(|o| o.id());
        objects
    }

    /// All live objects, oldest first.
    pub fn live_objects(&self) -> Vec<Arc<TypedObject>> {
        let state = self.state.lock();
        let mut objects: Vec<Arc<TypedObject>> = state
            .objects
            .values()
            .filter_map(Entry::peek)
            .filter(|o| o.is_valid())
            .collect();
        objects.sort_by_key(|o| o.id());
        objects
    }

    pub fn len(&self) -> usize {
        self.state.lock().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Age entries; demote idle ones to weak references and forget weak
    /// entries whose object is gone. Modified objects stay pinned.
    pub fn sweep(&self) -> SweepStats {
        let mut stats = SweepStats::default();
        let mut state = self.state.lock();

        let mut dead = Vec::new();
        for (key, entry) in state.objects.iter_mut() {
            let demote = match &entry.handle {
                Handle::Strong(object) => {
                    entry.idle += 1;
                    (entry.idle >= self.idle_sweeps && !object.is_modified())
                        .then(|| Arc::downgrade(object))
                }
                Handle::Weak(weak) => {
                    if weak.strong_count() == 0 {
                        dead.push(*key);
                    }
                    None
                }
            };
            if let Some(weak) = demote {
                entry.handle = Handle::Weak(weak);
                stats.demoted += 1;
            }
        }
        for key in dead {
            state.remove_entry(key);
            stats.forgotten += 1;
        }
        drop(state);

        if stats != SweepStats::default() {
            crate::debug_event!(
                "registry",
                "swept",
                "{} demoted, {} forgotten",
                stats.demoted,
                stats.forgotten
            );
        }
        self.diagnostics
            .record_sweep(stats.demoted as u64, stats.forgotten as u64);
        stats
    }

    fn on_fs_batch(&self, batch: &FsEventBatch) {
        let deleted: BTreeSet<FileId> = batch.deleted().collect();
        let touched = batch.files();

        // Files that may have changed group membership: everything in a
        // folder whose listing changed.
        let membership = batch.membership_folders();
        let slots: Vec<Arc<ConstructionSlot>> = self.state.lock().slots.values().cloned().collect();
        let mut candidates: BTreeSet<FileId> = BTreeSet::new();
        {
            let tree = self.fs.read();
            for folder in &membership {
                if let Ok(children) = tree.children(*folder) {
                    candidates.extend(children.iter().copied());
                }
            }

            // A build in flight is stale if one of its files changed or a
            // sibling appeared or left next to one of them.
            for slot in &slots {
                let dirty = touched.iter().any(|file| slot.covers(*file))
                    || slot.files().any(|file| {
                        tree.parent(file)
                            .ok()
                            .flatten()
                            .is_some_and(|parent| membership.contains(&parent))
                    });
                if dirty {
                    slot.mark_dirty();
                }
            }
        }
        let changed_links: BTreeSet<FileId> = batch
            .events
            .iter()
            .filter(|e| e.kind == FsEventKind::Changed)
            .map(|e| e.file)
            .collect();

        let mut retire = Vec::new();
        let mut recheck = Vec::new();
        {
            let state = self.state.lock();

            let keys: BTreeSet<FileGroupKey> = deleted
                .iter()
                .chain(&candidates)
                .chain(&changed_links)
                .filter_map(|f| state.owners.get(f).copied())
                .collect();

            for key in keys {
                let Some(object) = state.objects.get(&key).and_then(Entry::peek) else {
                    continue;
                };
                let primary_gone = deleted.contains(&key.primary());
                let link_changed = changed_links.contains(&key.primary())
                    && matches!(
                        object.shape(),
                        ObjectShape::Shadow { .. } | ObjectShape::BrokenShadow { .. }
                    );
                if primary_gone || link_changed {
                    retire.push(object);
                } else {
                    recheck.push(object);
                }
            }

            // Shadows pointing at deleted groups break.
            for entry in state.objects.values() {
                if let Some(object) = entry.peek()
                    && let ObjectShape::Shadow { target, .. } = object.shape()
                    && deleted.contains(&target.primary())
                {
                    retire.push(object);
                }
            }
        }

        for object in retire {
            self.invalidate(&object);
        }
        for object in recheck {
            self.revalidate(&object);
        }
    }

    fn on_chain_change(&self, event: &ChainEvent) {
        let live = self.live_objects();
        crate::debug_event!(
            "registry",
            "chain changed",
            "v{} -> v{}, rechecking {} objects",
            event.previous,
            event.version,
            live.len()
        );
        for object in live {
            self.revalidate(&object);
        }
    }
}

impl Observer<FsEventBatch> for IdentityRegistry {
    fn notify(&self, batch: &FsEventBatch) {
        self.on_fs_batch(batch);
    }
}

impl Observer<ChainEvent> for IdentityRegistry {
    fn notify(&self, event: &ChainEvent) {
        self.on_chain_change(event);
    }
}

impl std::fmt::Debug for IdentityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityRegistry")
            .field("objects", &self.len())
            .field("preferences", &self.preferences.len())
            .field("diagnostics", &self.diagnostics.snapshot())
            .finish()
    }
}

/// Releases a construction slot even if `build` fails or panics.
struct SlotGuard<'a> {
    registry: &'a IdentityRegistry,
    slot: Arc<ConstructionSlot>,
    finished: bool,
}

impl SlotGuard<'_> {
    fn finish(&mut self, outcome: SlotState) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.registry.waits.release(Resource::Slot(self.slot.key()));
        self.slot.finish(outcome);
    }
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        self.registry.state.lock().slots.remove(&self.slot.key());
        self.finish(SlotState::Failed);
    }
}
