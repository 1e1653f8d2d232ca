use std::collections::BTreeSet;
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;

use super::order::is_ordering_attribute;
use super::task::FolderRecognitionTask;
use crate::config::RecognitionConfig;
use crate::events::Observer;
use crate::fs::{FsError, FsEventBatch, FsEventKind, FsResult};
use crate::recognize::ChainEvent;
use crate::registry::{IdentityRegistry, ObjectEvent};
use crate::types::FileId;
use crate::worker::WorkerPool;

/// Owns one [`FolderRecognitionTask`] per folder and routes change
/// notifications to the tasks they affect.
pub struct FolderPool {
    registry: Arc<IdentityRegistry>,
    workers: Arc<WorkerPool>,
    tasks: DashMap<FileId, Arc<FolderRecognitionTask>>,
    coalesce: Duration,
    max_retries: u32,
    me: Weak<FolderPool>,
}

impl FolderPool {
    /// Create a pool and register it with the file tree, the chain and the
    /// registry. Must be created after the registry so that objects are
    /// revalidated before folders rescan.
    pub fn new(
        registry: Arc<IdentityRegistry>,
        workers: Arc<WorkerPool>,
        config: &RecognitionConfig,
    ) -> Arc<Self> {
        let pool = Arc::new_cyclic(|me| Self {
            registry: Arc::clone(&registry),
            workers,
            tasks: DashMap::new(),
            coalesce: Duration::from_millis(config.coalesce_ms),
            max_retries: config.max_auto_retries,
            me: me.clone(),
        });
        registry.fs().events().observe::<Self>(&pool);
        registry.chain().events().observe::<Self>(&pool);
        registry.events().observe::<Self>(&pool);
        pool
    }

    pub fn registry(&self) -> &Arc<IdentityRegistry> {
        &self.registry
    }

    pub fn workers(&self) -> &Arc<WorkerPool> {
        &self.workers
    }

    /// Task for `folder`, created and scheduled on first request.
    pub fn task(&self, folder: FileId) -> FsResult<Arc<FolderRecognitionTask>> {
        if let Some(task) = self.tasks.get(&folder) {
            return Ok(Arc::clone(task.value()));
        }
        if !self.registry.fs().is_folder(folder)? {
            return Err(FsError::NotAFolder { file: folder });
        }

        let mut created = false;
        let task = Arc::clone(
            self.tasks
                .entry(folder)
                .or_insert_with(|| {
                    created = true;
                    FolderRecognitionTask::new(
                        folder,
                        Arc::clone(&self.registry),
                        Arc::clone(&self.workers),
                        self.me.clone(),
                        self.coalesce,
                        self.max_retries,
                    )
                })
                .value(),
        );
        if created {
            crate::debug_event!("folder", "task created", "{folder}");
            task.schedule();
        }
        Ok(task)
    }

    /// Task for `folder` if one exists.
    pub fn existing(&self, folder: FileId) -> Option<Arc<FolderRecognitionTask>> {
        self.tasks.get(&folder).map(|task| Arc::clone(task.value()))
    }

    pub fn tasks(&self) -> Vec<Arc<FolderRecognitionTask>> {
        self.tasks.iter().map(|task| Arc::clone(task.value())).collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    fn schedule(&self, folders: &BTreeSet<FileId>) {
        for folder in folders {
            if let Some(task) = self.existing(*folder) {
                task.schedule();
            }
        }
    }

    fn on_fs_batch(&self, batch: &FsEventBatch) {
        let mut folders = batch.membership_folders();
        let mut gone = Vec::new();
        for event in batch.events.iter() {
            match &event.kind {
                FsEventKind::AttributeChanged { name } if is_ordering_attribute(name) => {
                    folders.insert(event.file);
                }
                FsEventKind::Deleted if self.tasks.contains_key(&event.file) => {
                    folders.insert(event.file);
                    gone.push(event.file);
                }
                _ => {}
            }
        }
        self.schedule(&folders);

        // The task publishes its empty list before it is dropped here.
        for folder in gone {
            self.tasks.remove(&folder);
        }
    }

    fn on_object_event(&self, event: &ObjectEvent) {
        let object = match event {
            ObjectEvent::Invalidated(object) | ObjectEvent::FilesChanged(object) => object,
            ObjectEvent::Created(_) | ObjectEvent::ModifiedChanged { .. } => return,
        };
        for task in self.tasks() {
            if task.children().contains_object(object.id()) {
                task.schedule();
            }
        }
    }
}

impl Observer<FsEventBatch> for FolderPool {
    fn notify(&self, batch: &FsEventBatch) {
        self.on_fs_batch(batch);
    }
}

impl Observer<ChainEvent> for FolderPool {
    fn notify(&self, event: &ChainEvent) {
        crate::debug_event!(
            "folder",
            "chain changed",
            "v{}, rescanning {} folders",
            event.version,
            self.len()
        );
        for task in self.tasks() {
            task.schedule();
        }
    }
}

impl Observer<ObjectEvent> for FolderPool {
    fn notify(&self, event: &ObjectEvent) {
        self.on_object_event(event);
    }
}

impl std::fmt::Debug for FolderPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FolderPool")
            .field("tasks", &self.tasks.len())
            .field("workers", &self.workers.size())
            .finish()
    }
}
