//! Raw file source consumed by the recognition core.
//!
//! A [`FileTree`] is a hierarchical namespace of folders and data files
//! addressed by stable [`FileId`](crate::types::FileId)s. It provides the
//! three things recognition needs from storage:
//!
//! - change notifications, grouped per atomic operation ([`FsEventBatch`])
//! - atomic multi-file operations ([`FileTree::atomic`])
//! - an exclusive content lock ([`FileLock`])
//!
//! ```text
//! FileTree::atomic(|batch| ...)
//!   - write lock held for the whole closure
//!   - events buffered in the Batch
//!   - on Err: touched nodes restored, events dropped
//!         |
//!   lock released
//!         |
//!   EventHub<FsEventBatch>
//!     - observers (registry, folder pool) on the mutating thread
//!     - channel subscribers
//! ```

mod error;
mod event;
mod tree;

pub use error::{FsError, FsResult};
pub use event::{FsEvent, FsEventBatch, FsEventKind};
pub use tree::{AttrValue, Batch, FileLock, FileTree, TreeState, split_name};
