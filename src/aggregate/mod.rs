//! Derived views over a folder's recognized children.
//!
//! An [`AggregateView`] folds an extraction function over the children a
//! [`FolderRecognitionTask`] published. Nothing happens until the first
//! query; from then on the view follows every publication, recomputing on
//! the worker pool and coalescing bursts into one recompute.
//!
//! A child carrying a `Link` facet to a folder (a shadow of another folder)
//! is not extracted itself: the view delegates to the live view of the
//! target folder and re-folds whenever that view changes.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use parking_lot::{Condvar, Mutex};

use crate::events::{EventHub, Observer};
use crate::folder::{FolderEvent, FolderPool, FolderRecognitionTask, TaskPhase};
use crate::fs::FsResult;
use crate::object::{Facet, FacetKind, TypedObject};
use crate::types::FileId;
use crate::worker::WorkerPool;

type Extractor<T> = Arc<dyn Fn(&Arc<TypedObject>) -> Option<T> + Send + Sync>;

/// Sent whenever a view's result changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregateEvent {
    pub folder: FileId,
    pub generation: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Pending,
    Computing,
}

struct ViewState<T> {
    activated: bool,
    phase: Phase,
    dirty: bool,
    revision: u64,
    result: Arc<Vec<T>>,
    generation: u64,
    children_generation: u64,
    delegates: HashMap<FileId, AggregateView<T>>,
}

struct Inner<T> {
    folder: FileId,
    task: Arc<FolderRecognitionTask>,
    pool: Weak<FolderPool>,
    workers: Arc<WorkerPool>,
    extract: Extractor<T>,
    /// Folders whose views delegate to this one; never delegated back to.
    upstream: Vec<FileId>,
    state: Mutex<ViewState<T>>,
    idle: Condvar,
    events: EventHub<AggregateEvent>,
    me: Weak<Inner<T>>,
}

/// A lazily activated, incrementally maintained projection of one folder.
pub struct AggregateView<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for AggregateView<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> AggregateView<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    pub fn new(
        pool: &Arc<FolderPool>,
        folder: FileId,
        extract: impl Fn(&Arc<TypedObject>) -> Option<T> + Send + Sync + 'static,
    ) -> FsResult<Self> {
        Self::build(pool, folder, Arc::new(extract), Vec::new())
    }

    fn build(pool: &Arc<FolderPool>, folder: FileId, extract: Extractor<T>, upstream: Vec<FileId>) -> FsResult<Self> {
        let task = pool.task(folder)?;
        let inner = Arc::new_cyclic(|me| Inner {
            folder,
            task,
            pool: Arc::downgrade(pool),
            workers: Arc::clone(pool.workers()),
            extract,
            upstream,
            state: Mutex::new(ViewState {
                activated: false,
                phase: Phase::Idle,
                dirty: false,
                revision: 0,
                result: Arc::new(Vec::new()),
                generation: 0,
                children_generation: 0,
                delegates: HashMap::new(),
            }),
            idle: Condvar::new(),
            events: EventHub::new("aggregate"),
            me: me.clone(),
        });
        Ok(Self { inner })
    }

    pub fn folder(&self) -> FileId {
        self.inner.folder
    }

    pub fn is_active(&self) -> bool {
        self.inner.state.lock().activated
    }

    /// Results changed notifications. Subscribing does not activate the view.
    pub fn events(&self) -> &EventHub<AggregateEvent> {
        &self.inner.events
    }

    /// Number of distinct results computed so far.
    pub fn generation(&self) -> u64 {
        self.inner.state.lock().generation
    }

    /// Folders currently delegated to.
    pub fn delegates(&self) -> Vec<FileId> {
        let mut folders: Vec<FileId> = self.inner.state.lock().delegates.keys().copied().collect();
        folders.sort();
        folders
    }

    /// Last computed result, without activating or waiting.
    pub fn current(&self) -> Arc<Vec<T>> {
        Arc::clone(&self.inner.state.lock().result)
    }

    /// Current result. The first call activates the view and computes it
    /// from a settled child list.
    pub fn results(&self) -> Arc<Vec<T>> {
        self.inner.activate();
        let mut state = self.inner.state.lock();
        while state.generation == 0 && state.phase != Phase::Idle {
            self.inner.idle.wait(&mut state);
        }
        Arc::clone(&state.result)
    }

    /// Wait until this view, its folder and every delegate are quiescent,
    /// then return the result.
    pub fn settle(&self) -> Arc<Vec<T>> {
        let mut visited = HashSet::from([self.inner.folder]);
        self.inner.settle(&mut visited)
    }
}

impl<T> Inner<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn activate(&self) {
        {
            let mut state = self.state.lock();
            if state.activated {
                return;
            }
            state.activated = true;
            state.phase = Phase::Pending;
        }
        let Some(me) = self.me.upgrade() else {
            return;
        };
        self.task.events().observe::<Self>(&me);
        self.task.wait();
        self.run();
    }

    /// Activation for delegates: never blocks the caller.
    fn activate_async(&self) {
        {
            let mut state = self.state.lock();
            if state.activated {
                return;
            }
            state.activated = true;
            state.phase = Phase::Pending;
        }
        let Some(me) = self.me.upgrade() else {
            return;
        };
        self.task.events().observe::<Self>(&me);
        self.submit();
    }

    fn submit(&self) {
        let Some(me) = self.me.upgrade() else {
            return;
        };
        self.workers.execute(move || me.run());
    }

    fn mark_dirty(&self) {
        let submit = {
            let mut state = self.state.lock();
            if !state.activated {
                return;
            }
            state.revision += 1;
            match state.phase {
                Phase::Idle => {
                    state.phase = Phase::Pending;
                    true
                }
                Phase::Pending => false,
                Phase::Computing => {
                    state.dirty = true;
                    false
                }
            }
        };
        if submit {
            self.submit();
        }
    }

    fn run(&self) {
        {
            let mut state = self.state.lock();
            if state.phase != Phase::Pending {
                return;
            }
            state.phase = Phase::Computing;
            state.dirty = false;
        }

        loop {
            self.recompute();
            let mut state = self.state.lock();
            if state.dirty {
                state.dirty = false;
                continue;
            }
            state.phase = Phase::Idle;
            self.idle.notify_all();
            return;
        }
    }

    fn recompute(&self) {
        let children = self.task.children();
        let pool = self.pool.upgrade();
        let known = self.state.lock().delegates.clone();

        let mut result = Vec::new();
        let mut delegates = HashMap::new();

        for object in children.iter() {
            if !object.is_valid() {
                continue;
            }
            if let Some(pool) = &pool
                && let Some(folder) = linked_folder(pool, object)
            {
                if folder == self.folder || self.upstream.contains(&folder) {
                    continue;
                }
                let delegate = match known.get(&folder) {
                    Some(view) => Some(view.clone()),
                    None => self.delegate_to(pool, folder),
                };
                if let Some(view) = delegate {
                    result.extend(view.current().iter().cloned());
                    delegates.insert(folder, view);
                }
                continue;
            }
            if let Some(value) = (self.extract)(object) {
                result.push(value);
            }
        }

        let changed = {
            let mut state = self.state.lock();
            state.children_generation = children.generation();
            state.delegates = delegates;
            if *state.result == result && state.generation > 0 {
                None
            } else {
                state.result = Arc::new(result);
                state.generation += 1;
                Some(state.generation)
            }
        };

        if let Some(generation) = changed {
            crate::debug_event!(
                "aggregate",
                "recomputed",
                "{} gen {generation} from folder gen {}",
                self.folder,
                children.generation()
            );
            self.events.send(AggregateEvent {
                folder: self.folder,
                generation,
            });
        }
    }

    fn delegate_to(&self, pool: &Arc<FolderPool>, folder: FileId) -> Option<AggregateView<T>> {
        let mut upstream = self.upstream.clone();
        upstream.push(self.folder);
        let view = match AggregateView::build(pool, folder, Arc::clone(&self.extract), upstream) {
            Ok(view) => view,
            Err(e) => {
                crate::debug_event!("aggregate", "no delegate", "{folder}: {e}");
                return None;
            }
        };
        let me = self.me.upgrade()?;
        view.inner.events.observe::<Self>(&me);
        view.inner.activate_async();
        crate::debug_event!("aggregate", "delegating", "{} -> {folder}", self.folder);
        Some(view)
    }

    fn settle(&self, visited: &mut HashSet<FileId>) -> Arc<Vec<T>> {
        self.activate();
        loop {
            let children = self.task.wait();

            let (revision, delegates) = {
                let mut state = self.state.lock();
                while state.phase != Phase::Idle {
                    self.idle.wait(&mut state);
                }
                let delegates: Vec<AggregateView<T>> = state.delegates.values().cloned().collect();
                (state.revision, delegates)
            };

            for view in delegates {
                if visited.insert(view.inner.folder) {
                    view.inner.settle(visited);
                }
            }

            let state = self.state.lock();
            let quiet = state.phase == Phase::Idle
                && state.revision == revision
                && state.children_generation == children.generation()
                && self.task.phase() == TaskPhase::Published
                && self.task.children().generation() == children.generation();
            if quiet {
                return Arc::clone(&state.result);
            }
        }
    }
}

/// Folder a shadow child points at, if any.
fn linked_folder(pool: &FolderPool, object: &TypedObject) -> Option<FileId> {
    let Some(Facet::Link { target }) = object.facet(FacetKind::Link) else {
        return None;
    };
    let folder = target.primary();
    pool.registry()
        .fs()
        .is_folder(folder)
        .unwrap_or(false)
        .then_some(folder)
}

impl<T> Observer<FolderEvent> for Inner<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn notify(&self, _event: &FolderEvent) {
        self.mark_dirty();
    }
}

impl<T> Observer<AggregateEvent> for Inner<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn notify(&self, _event: &AggregateEvent) {
        self.mark_dirty();
    }
}

impl<T> std::fmt::Debug for AggregateView<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("AggregateView")
            .field("folder", &self.inner.folder)
            .field("activated", &state.activated)
            .field("generation", &state.generation)
            .field("results", &state.result.len())
            .finish()
    }
}

/// View of the children of `folder` that carry a facet of `kind`.
pub fn objects_with(
    pool: &Arc<FolderPool>,
    folder: FileId,
    kind: FacetKind,
) -> FsResult<AggregateView<Arc<TypedObject>>> {
    AggregateView::new(pool, folder, move |object| {
        object.facets().has(kind).then(|| Arc::clone(object))
    })
}

/// View of the `Instance` type names provided by the children of `folder`.
pub fn instance_types(pool: &Arc<FolderPool>, folder: FileId) -> FsResult<AggregateView<String>> {
    AggregateView::new(pool, folder, |object| match object.facet(FacetKind::Instance) {
        Some(Facet::Instance { type_name }) => Some(type_name.clone()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RecognitionConfig;
    use crate::fs::FileTree;
    use crate::recognize::{PatternRecognizer, RecognizerChain};
    use crate::registry::IdentityRegistry;
    use std::time::Duration;

    fn setup() -> (Arc<FileTree>, Arc<IdentityRegistry>, Arc<FolderPool>) {
        let fs = Arc::new(FileTree::new());
        let chain = Arc::new(RecognizerChain::new());
        chain
            .install(Arc::new(
                PatternRecognizer::new("rust", "rust-source", &["*.rs"], &[])
                    .unwrap()
                    .with_facets([FacetKind::Open, FacetKind::Instance]),
            ))
            .unwrap();
        let registry = IdentityRegistry::new(Arc::clone(&fs), chain);
        let config = RecognitionConfig {
            coalesce_ms: 0,
            ..RecognitionConfig::default()
        };
        let pool = FolderPool::new(Arc::clone(&registry), Arc::new(WorkerPool::new(2)), &config);
        (fs, registry, pool)
    }

    #[test]
    fn test_view_is_lazy_until_first_query() {
        let (fs, _registry, pool) = setup();
        let dir = fs.create_folder(fs.root(), "src").unwrap();
        fs.create_file(dir, "lib.rs", b"").unwrap();

        let view = instance_types(&pool, dir).unwrap();
        assert!(!view.is_active());
        assert!(view.current().is_empty());

        assert_eq!(*view.results(), vec!["rust-source".to_string()]);
        assert!(view.is_active());
    }

    #[test]
    fn test_view_follows_publications() {
        let (fs, _registry, pool) = setup();
        let dir = fs.create_folder(fs.root(), "src").unwrap();
        fs.create_file(dir, "lib.rs", b"").unwrap();
        fs.create_file(dir, "notes.txt", b"").unwrap();
        let view = instance_types(&pool, dir).unwrap();
        assert_eq!(view.results().len(), 1);
        let rx = view.events().subscribe();

        fs.create_file(dir, "main.rs", b"").unwrap();

        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(view.settle().len(), 2);
    }

    #[test]
    fn test_shadowed_folder_is_delegated_live() {
        let (fs, registry, pool) = setup();
        let root = fs.root();
        let a = fs.create_folder(root, "a").unwrap();
        let b = fs.create_folder(root, "b").unwrap();
        fs.create_file(a, "one.rs", b"").unwrap();
        fs.create_file(b, "two.rs", b"").unwrap();
        let folder_b = registry.find(b).unwrap();
        registry.create_shadow(&folder_b, a).unwrap();

        let view = objects_with(&pool, a, FacetKind::Instance).unwrap();
        let names = |objects: &[Arc<TypedObject>]| -> Vec<String> {
            let mut names: Vec<String> = objects.iter().map(|o| fs.name(o.primary()).unwrap()).collect();
            names.sort();
            names
        };
        view.results();
        assert_eq!(names(&view.settle()), vec!["one.rs", "two.rs"]);
        assert_eq!(view.delegates(), vec![b]);

        fs.create_file(b, "three.rs", b"").unwrap();
        assert_eq!(names(&view.settle()), vec!["one.rs", "three.rs", "two.rs"]);
    }

    #[test]
    fn test_shadow_cycle_terminates() {
        let (fs, registry, pool) = setup();
        let root = fs.root();
        let a = fs.create_folder(root, "a").unwrap();
        let b = fs.create_folder(root, "b").unwrap();
        fs.create_file(a, "x.rs", b"").unwrap();
        let folder_a = registry.find(a).unwrap();
        let folder_b = registry.find(b).unwrap();
        registry.create_shadow(&folder_b, a).unwrap();
        registry.create_shadow(&folder_a, b).unwrap();

        let view = instance_types(&pool, a).unwrap();
        assert_eq!(view.settle().len(), 1);
    }
}
