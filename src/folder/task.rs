//! Background recognition of one folder's children.
//!
//! ```text
//! Idle --schedule--> Queued --worker--> Scanning --publish--> Published
//!                      ^                   |                      |
//!                      |   trigger while   |     fs / chain       |
//!                      +---- scanning -----+------ change --------+
//! ```
//!
//! Triggers that arrive while a scan runs only set a flag, so a burst of
//! changes costs one extra scan. Publication swaps the child list under a
//! write lock and sends one [`FolderEvent`].

use std::collections::HashSet;
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

use indexmap::IndexMap;
use parking_lot::{Condvar, Mutex, RwLock};

use super::FolderPool;
use super::order::ChildOrder;
use crate::events::EventHub;
use crate::object::{Facet, FacetKind, TypedObject};
use crate::registry::{IdentityRegistry, Resource};
use crate::types::{FileGroupKey, FileId, ObjectId};
use crate::worker::WorkerPool;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskPhase {
    Idle,
    Queued,
    Scanning,
    Published,
}

/// One published, ordered child list.
#[derive(Debug, Clone)]
pub struct FolderChildren {
    folder: FileId,
    generation: u64,
    chain_version: u64,
    entries: IndexMap<FileGroupKey, Arc<TypedObject>>,
}

impl FolderChildren {
    fn empty(folder: FileId) -> Self {
        Self {
            folder,
            generation: 0,
            chain_version: 0,
            entries: IndexMap::new(),
        }
    }

    pub fn folder(&self) -> FileId {
        self.folder
    }

    /// Number of publications so far; 0 before the first scan finished.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Chain version the scan resolved against.
    pub fn chain_version(&self) -> u64 {
        self.chain_version
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &FileGroupKey) -> Option<&Arc<TypedObject>> {
        self.entries.get(key)
    }

    pub fn position(&self, key: &FileGroupKey) -> Option<usize> {
        self.entries.get_index_of(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &FileGroupKey> + '_ {
        self.entries.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<TypedObject>> + '_ {
        self.entries.values()
    }

    pub fn objects(&self) -> Vec<Arc<TypedObject>> {
        self.entries.values().cloned().collect()
    }

    pub fn contains_object(&self, id: ObjectId) -> bool {
        self.entries.values().any(|o| o.id() == id)
    }

    /// Same keys in the same order, backed by the same instances.
    fn same_entries(&self, other: &IndexMap<FileGroupKey, Arc<TypedObject>>) -> bool {
        self.entries.len() == other.len()
            && self
                .entries
                .iter()
                .zip(other)
                .all(|((ka, a), (kb, b))| ka == kb && Arc::ptr_eq(a, b))
    }
}

/// One publication of a folder's children.
#[derive(Debug, Clone)]
pub struct FolderEvent {
    pub folder: FileId,
    pub previous: Arc<FolderChildren>,
    pub current: Arc<FolderChildren>,
}

impl FolderEvent {
    /// Objects present now but not before.
    pub fn added(&self) -> Vec<Arc<TypedObject>> {
        self.current
            .iter()
            .filter(|o| !self.previous.contains_object(o.id()))
            .cloned()
            .collect()
    }

    /// Objects present before but not now.
    pub fn removed(&self) -> Vec<Arc<TypedObject>> {
        self.previous
            .iter()
            .filter(|o| !self.current.contains_object(o.id()))
            .cloned()
            .collect()
    }
}

#[derive(Debug)]
struct TaskState {
    phase: TaskPhase,
    rescan: bool,
    retries: u32,
    scans: u64,
}

struct ScanOutcome {
    entries: IndexMap<FileGroupKey, Arc<TypedObject>>,
    failures: usize,
    chain_version: u64,
}

pub struct FolderRecognitionTask {
    folder: FileId,
    registry: Arc<IdentityRegistry>,
    workers: Arc<WorkerPool>,
    pool: Weak<FolderPool>,
    me: Weak<FolderRecognitionTask>,
    state: Mutex<TaskState>,
    settled: Condvar,
    children: RwLock<Arc<FolderChildren>>,
    events: EventHub<FolderEvent>,
    coalesce: Duration,
    max_retries: u32,
}

impl FolderRecognitionTask {
    pub(crate) fn new(
        folder: FileId,
        registry: Arc<IdentityRegistry>,
        workers: Arc<WorkerPool>,
        pool: Weak<FolderPool>,
        coalesce: Duration,
        max_retries: u32,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            folder,
            registry,
            workers,
            pool,
            me: me.clone(),
            state: Mutex::new(TaskState {
                phase: TaskPhase::Idle,
                rescan: false,
                retries: 0,
                scans: 0,
            }),
            settled: Condvar::new(),
            children: RwLock::new(Arc::new(FolderChildren::empty(folder))),
            events: EventHub::new("folder"),
            coalesce,
            max_retries,
        })
    }

    pub fn folder(&self) -> FileId {
        self.folder
    }

    pub fn phase(&self) -> TaskPhase {
        self.state.lock().phase
    }

    /// Scans started so far, including coalesced re-scans.
    pub fn scans(&self) -> u64 {
        self.state.lock().scans
    }

    pub fn events(&self) -> &EventHub<FolderEvent> {
        &self.events
    }

    /// Last published children. Never blocks.
    pub fn children(&self) -> Arc<FolderChildren> {
        Arc::clone(&self.children.read())
    }

    /// Request a re-scan. Coalesces with a queued or running scan.
    pub fn schedule(&self) {
        let submit = {
            let mut state = self.state.lock();
            match state.phase {
                TaskPhase::Queued => false,
                TaskPhase::Scanning => {
                    state.rescan = true;
                    false
                }
                TaskPhase::Idle | TaskPhase::Published => {
                    state.phase = TaskPhase::Queued;
                    true
                }
            }
        };
        if submit {
            self.submit();
        }
    }

    fn submit(&self) {
        let Some(task) = self.me.upgrade() else {
            return;
        };
        let delay = self.coalesce;
        self.workers.execute(move || {
            if !delay.is_zero() {
                thread::sleep(delay);
            }
            if task.try_begin_scan() {
                task.scan();
            }
        });
    }

    fn try_begin_scan(&self) -> bool {
        let mut state = self.state.lock();
        if state.phase != TaskPhase::Queued {
            return false;
        }
        state.phase = TaskPhase::Scanning;
        state.rescan = false;
        state.scans += 1;
        self.registry.waits().acquire(Resource::Folder(self.folder));
        true
    }

    /// Block until a scan covering every trigger seen so far has published,
    /// then return the children. Scans inline when nothing is running.
    ///
    /// A wait that would close a cycle with the thread doing the scan
    /// returns the last published list instead and logs a warning.
    pub fn wait(&self) -> Arc<FolderChildren> {
        loop {
            let phase = {
                let mut state = self.state.lock();
                if state.phase == TaskPhase::Idle {
                    state.phase = TaskPhase::Queued;
                }
                state.phase
            };

            match phase {
                TaskPhase::Published => return self.children(),
                TaskPhase::Idle | TaskPhase::Queued => {
                    if self.try_begin_scan() {
                        self.scan();
                    }
                }
                TaskPhase::Scanning => {
                    let guard = match self.registry.waits().begin_wait(Resource::Folder(self.folder)) {
                        Ok(guard) => guard,
                        Err(risk) => {
                            self.registry.report_deadlock(&risk);
                            return self.children();
                        }
                    };
                    let mut state = self.state.lock();
                    while state.phase == TaskPhase::Scanning {
                        self.settled.wait(&mut state);
                    }
                    drop(state);
                    drop(guard);
                }
            }
        }
    }

    /// Every object below this folder, depth first, in published order.
    pub fn children_recursive(&self) -> Vec<Arc<TypedObject>> {
        let mut out = Vec::new();
        let mut visited = HashSet::from([self.folder]);
        let pool = self.pool.upgrade();
        walk(pool.as_deref(), &self.wait(), &mut visited, &mut out);
        out
    }

    fn scan(&self) {
        let outcome = self.collect();
        self.publish(outcome);
    }

    fn collect(&self) -> ScanOutcome {
        let chain_version = self.registry.chain().version();
        let fs = self.registry.fs();

        let listing = match fs.children(self.folder) {
            Ok(listing) => listing,
            Err(e) => {
                crate::debug_event!("folder", "gone", "{}: {e}", self.folder);
                return ScanOutcome {
                    entries: IndexMap::new(),
                    failures: 0,
                    chain_version,
                };
            }
        };
        let members: HashSet<FileId> = listing.iter().copied().collect();

        let mut claimed: HashSet<FileId> = HashSet::new();
        let mut seen: HashSet<FileGroupKey> = HashSet::new();
        let mut objects = Vec::new();
        let mut failures = 0;

        for &file in &listing {
            if claimed.contains(&file) {
                continue;
            }
            match self.registry.find(file) {
                Ok(object) if object.is_placeholder() => {
                    failures += 1;
                    crate::debug_event!("folder", "child deferred", "{file} in {}", self.folder);
                }
                Ok(object) => {
                    claimed.extend(object.files());
                    if members.contains(&object.primary()) && seen.insert(object.key()) {
                        objects.push(object);
                    }
                }
                Err(e) => {
                    if e.is_transient() {
                        failures += 1;
                    }
                    crate::warn_event!("folder", "child {file} of {} not recognized: {e}", self.folder);
                }
            }
        }

        {
            let view = fs.read();
            let order = ChildOrder::of_folder(&view, self.folder).unwrap_or_default();
            order.sort(&view, &listing, &mut objects);
        }

        ScanOutcome {
            entries: objects.into_iter().map(|o| (o.key(), o)).collect(),
            failures,
            chain_version,
        }
    }

    fn publish(&self, outcome: ScanOutcome) {
        let ScanOutcome {
            entries,
            failures,
            chain_version,
        } = outcome;

        let swapped = {
            let mut children = self.children.write();
            if children.generation > 0 && children.same_entries(&entries) {
                None
            } else {
                let previous = Arc::clone(&children);
                let current = Arc::new(FolderChildren {
                    folder: self.folder,
                    generation: previous.generation + 1,
                    chain_version,
                    entries,
                });
                *children = Arc::clone(&current);
                Some((previous, current))
            }
        };

        if let Some((previous, current)) = swapped {
            crate::debug_event!(
                "folder",
                "published",
                "{} gen {} with {} children",
                self.folder,
                current.generation,
                current.len()
            );
            self.events.send(FolderEvent {
                folder: self.folder,
                previous,
                current,
            });
        }

        let again = {
            let mut state = self.state.lock();
            let retry = failures > 0 && state.retries < self.max_retries;
            state.retries = if retry { state.retries + 1 } else { 0 };
            let chain_moved = self.registry.chain().version() != chain_version;
            let again = state.rescan || retry || chain_moved;
            state.rescan = false;
            state.phase = if again {
                TaskPhase::Queued
            } else {
                TaskPhase::Published
            };
            self.registry.waits().release(Resource::Folder(self.folder));
            self.settled.notify_all();
            again
        };

        if failures > 0 {
            crate::warn_event!(
                "folder",
                "{} published without {failures} children{}",
                self.folder,
                if again { ", retrying" } else { "" }
            );
        }
        if again {
            self.submit();
        }
    }
}

fn walk(
    pool: Option<&FolderPool>,
    children: &FolderChildren,
    visited: &mut HashSet<FileId>,
    out: &mut Vec<Arc<TypedObject>>,
) {
    for object in children.iter() {
        out.push(Arc::clone(object));
        let Some(pool) = pool else {
            continue;
        };
        if let Some(Facet::Container { folder }) = object.facet(FacetKind::Container)
            && visited.insert(*folder)
        {
            match pool.task(*folder) {
                Ok(task) => walk(Some(pool), &task.wait(), visited, out),
                Err(e) => crate::debug_event!("folder", "skip subfolder", "{folder}: {e}"),
            }
        }
    }
}

impl std::fmt::Debug for FolderRecognitionTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FolderRecognitionTask")
            .field("folder", &self.folder)
            .field("phase", &self.phase())
            .field("generation", &self.children().generation)
            .finish()
    }
}
