//! Folder recognition: asynchronously recognized, ordered child lists.
//!
//! A [`FolderPool`] hands out one [`FolderRecognitionTask`] per folder and
//! routes file, chain and object events to the tasks they affect. Scans run
//! on the [`WorkerPool`](crate::worker::WorkerPool); callers that need a
//! settled list call [`FolderRecognitionTask::wait`].

mod order;
mod pool;
mod task;

pub use order::{
    ChildOrder, ORDER_ATTR, SORT_MODE_ATTR, SortMode, is_ordering_attribute, order_value,
};
pub use pool::FolderPool;
pub use task::{FolderChildren, FolderEvent, FolderRecognitionTask, TaskPhase};
