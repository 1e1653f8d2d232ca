pub mod aggregate;
pub mod cli;
pub mod config;
pub mod events;
pub mod folder;
pub mod fs;
pub mod logging;
pub mod object;
pub mod recognize;
pub mod registry;
pub mod system;
pub mod types;
pub mod watcher;
pub mod worker;

pub use aggregate::{AggregateEvent, AggregateView};
pub use config::Settings;
pub use events::{EventHub, Observer};
pub use folder::{FolderChildren, FolderEvent, FolderPool, FolderRecognitionTask};
pub use fs::{FileTree, FsError, FsEventBatch, FsResult};
pub use object::{Facet, FacetKind, Facets, ObjectOps, TypedObject};
pub use recognize::{PatternRecognizer, Recognizer, RecognizerChain};
pub use registry::{IdentityRegistry, ObjectEvent, RegistryError, RegistryResult};
pub use system::DataSystem;
pub use types::*;
pub use watcher::{DiskMirror, MirrorWatcher, WatchError};
pub use worker::WorkerPool;
