//! Explicit wiring of the recognition subsystem.
//!
//! Every component takes its collaborators as constructor arguments; a
//! [`DataSystem`] is just the usual assembly of them. Observers are
//! registered in dependency order (registry before folder pool) so that
//! objects are revalidated before any folder rescans.

use std::sync::{Arc, OnceLock};

use crate::aggregate::AggregateView;
use crate::config::{RecognitionConfig, Settings};
use crate::folder::{FolderPool, FolderRecognitionTask};
use crate::fs::{FileTree, FsResult};
use crate::object::TypedObject;
use crate::recognize::{PatternRecognizer, RecognitionError, RecognizerChain};
use crate::registry::{IdentityRegistry, RegistryResult};
use crate::types::FileId;
use crate::worker::WorkerPool;

static DEFAULT: OnceLock<DataSystem> = OnceLock::new();

#[derive(Debug)]
pub struct DataSystem {
    fs: Arc<FileTree>,
    chain: Arc<RecognizerChain>,
    registry: Arc<IdentityRegistry>,
    workers: Arc<WorkerPool>,
    folders: Arc<FolderPool>,
}

impl DataSystem {
    /// Built-in recognizers only, default tuning, empty tree.
    pub fn new() -> Self {
        Self::assemble(Arc::new(FileTree::new()), &RecognitionConfig::default())
    }

    /// Empty tree with the recognizers and tuning from `settings`.
    pub fn from_settings(settings: &Settings) -> Result<Self, RecognitionError> {
        Self::with_tree(Arc::new(FileTree::new()), settings)
    }

    /// Recognize an existing tree with the recognizers from `settings`.
    pub fn with_tree(fs: Arc<FileTree>, settings: &Settings) -> Result<Self, RecognitionError> {
        let system = Self::assemble(fs, &settings.recognition);
        for (name, config) in settings.enabled_recognizers() {
            let recognizer = PatternRecognizer::from_config(name, config)?;
            system
                .chain
                .install(Arc::new(recognizer))
                .map_err(|e| RecognitionError::InvalidDefinition {
                    name: name.to_string(),
                    reason: e.to_string(),
                })?;
        }
        crate::log_event!(
            "system",
            "ready",
            "{} recognizers, {} workers",
            system.chain.snapshot().len(),
            system.workers.size()
        );
        Ok(system)
    }

    fn assemble(fs: Arc<FileTree>, config: &RecognitionConfig) -> Self {
        let chain = Arc::new(RecognizerChain::new());
        let registry = IdentityRegistry::with_config(Arc::clone(&fs), Arc::clone(&chain), config);
        let workers = Arc::new(WorkerPool::new(config.worker_threads));
        let folders = FolderPool::new(Arc::clone(&registry), Arc::clone(&workers), config);
        Self {
            fs,
            chain,
            registry,
            workers,
            folders,
        }
    }

    /// Process-wide instance with built-in recognizers, created on first use.
    ///
    /// Components never reach for it themselves; it only exists for callers
    /// that do not want to thread a system through.
    pub fn default_instance() -> &'static DataSystem {
        DEFAULT.get_or_init(DataSystem::new)
    }

    pub fn fs(&self) -> &Arc<FileTree> {
        &self.fs
    }

    pub fn chain(&self) -> &Arc<RecognizerChain> {
        &self.chain
    }

    pub fn registry(&self) -> &Arc<IdentityRegistry> {
        &self.registry
    }

    pub fn workers(&self) -> &Arc<WorkerPool> {
        &self.workers
    }

    pub fn folders(&self) -> &Arc<FolderPool> {
        &self.folders
    }

    pub fn find(&self, file: FileId) -> RegistryResult<Arc<TypedObject>> {
        self.registry.find(file)
    }

    pub fn folder(&self, folder: FileId) -> FsResult<Arc<FolderRecognitionTask>> {
        self.folders.task(folder)
    }

    pub fn aggregate<T>(
        &self,
        folder: FileId,
        extract: impl Fn(&Arc<TypedObject>) -> Option<T> + Send + Sync + 'static,
    ) -> FsResult<AggregateView<T>>
    where
        T: Clone + PartialEq + Send + Sync + 'static,
    {
        AggregateView::new(&self.folders, folder, extract)
    }
}

impl Default for DataSystem {
    fn default() -> Self {
        Self::new()
    }
}
