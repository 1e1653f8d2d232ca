//! Disk mirroring for the in-memory tree.
//!
//! # Architecture
//!
//! ```text
//! disk ──notify──> MirrorWatcher ──> DiskMirror ──atomic batches──> FileTree
//!                    (Debouncer)      (PathIndex)
//! ```
//!
//! [`DiskMirror::import`] copies a directory into the tree once; a
//! [`MirrorWatcher`] then applies every later change as it happens.

mod debouncer;
mod error;
mod live;
mod mirror;
mod path_index;

pub use debouncer::Debouncer;
pub use error::WatchError;
pub use live::MirrorWatcher;
pub use mirror::DiskMirror;
pub use path_index::PathIndex;
