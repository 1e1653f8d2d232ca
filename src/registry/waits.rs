//! Wait-for graph used to refuse blocking waits that could never end.
//!
//! Threads own resources (a construction slot they are building, a folder
//! they are scanning) and wait on at most one resource at a time. Before a
//! thread parks, the chain `resource -> owner -> resource owner waits on ->
//! ...` is followed; reaching the current thread means parking would
//! deadlock.

use std::collections::HashMap;
use std::fmt;
use std::thread::{self, ThreadId};

use parking_lot::Mutex;

use crate::types::{FileGroupKey, FileId};

const MAX_CHAIN: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    /// Construction of the object for a key.
    Slot(FileGroupKey),
    /// An in-flight folder scan.
    Folder(FileId),
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Slot(key) => write!(f, "slot {key}"),
            Resource::Folder(folder) => write!(f, "folder {folder}"),
        }
    }
}

/// A wait that was refused because it closes a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadlockRisk {
    pub thread: ThreadId,
    /// Resources from the requested one back to one the thread owns.
    pub chain: Vec<Resource>,
}

impl fmt::Display for DeadlockRisk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} would wait on ", self.thread)?;
        for (i, resource) in self.chain.iter().enumerate() {
            if i > 0 {
                write!(f, " -> ")?;
            }
            write!(f, "{resource}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Graph {
    owners: HashMap<Resource, ThreadId>,
    waits: HashMap<ThreadId, Resource>,
}

#[derive(Debug, Default)]
pub(crate) struct WaitGraph {
    inner: Mutex<Graph>,
}

impl WaitGraph {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Record the current thread as owner of `resource`.
    pub(crate) fn acquire(&self, resource: Resource) {
        self.inner.lock().owners.insert(resource, thread::current().id());
    }

    /// Drop ownership of `resource` if the current thread still holds it.
    ///
    /// A later owner that acquired the resource in between keeps it.
    pub(crate) fn release(&self, resource: Resource) {
        let me = thread::current().id();
        let mut graph = self.inner.lock();
        if graph.owners.get(&resource) == Some(&me) {
            graph.owners.remove(&resource);
        }
    }

    /// Register that the current thread is about to park on `resource`.
    ///
    /// The returned guard clears the wait when dropped.
    pub(crate) fn begin_wait(&self, resource: Resource) -> Result<WaitGuard<'_>, DeadlockRisk> {
        let me = thread::current().id();
        let mut graph = self.inner.lock();

        let mut chain = vec![resource];
        let mut current = resource;
        for _ in 0..MAX_CHAIN {
            let Some(&owner) = graph.owners.get(&current) else {
                break;
            };
            if owner == me {
                return Err(DeadlockRisk { thread: me, chain });
            }
            let Some(&next) = graph.waits.get(&owner) else {
                break;
            };
            chain.push(next);
            current = next;
        }

        graph.waits.insert(me, resource);
        Ok(WaitGuard { graph: self, thread: me })
    }
}

pub(crate) struct WaitGuard<'a> {
    graph: &'a WaitGraph,
    thread: ThreadId,
}

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        self.graph.inner.lock().waits.remove(&self.thread);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::mpsc;

    fn slot(v: u32) -> Resource {
        Resource::Slot(FileGroupKey::of(FileId::new(v).unwrap()))
    }

    #[test]
    fn test_waiting_on_own_resource_is_refused() {
        let graph = WaitGraph::new();
        graph.acquire(slot(2));

        let risk = graph.begin_wait(slot(2)).err().unwrap();
        assert_eq!(risk.chain, vec![slot(2)]);
    }

    #[test]
    fn test_unowned_resource_is_fine() {
        let graph = WaitGraph::new();
        assert!(graph.begin_wait(slot(2)).is_ok());
    }

    #[test]
    fn test_stale_release_keeps_new_owner() {
        let graph = Arc::new(WaitGraph::new());
        graph.acquire(slot(2));

        let (owned_tx, owned_rx) = mpsc::channel();
        let (released_tx, released_rx) = mpsc::channel::<()>();
        let next_builder = {
            let graph = Arc::clone(&graph);
            thread::spawn(move || {
                graph.acquire(slot(2));
                owned_tx.send(()).unwrap();
                released_rx.recv().unwrap();
                graph.begin_wait(slot(2)).is_err()
            })
        };
        owned_rx.recv().unwrap();
        graph.release(slot(2));
        released_tx.send(()).unwrap();

        assert!(next_builder.join().unwrap());
    }

    #[test]
    fn test_two_thread_cycle_detected() {
        let graph = Arc::new(WaitGraph::new());
        let folder = Resource::Folder(FileId::new(7).unwrap());
        graph.acquire(folder);

        // Another thread owns the slot and is parked on our folder.
        let (ready_tx, ready_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel::<()>();
        let other = {
            let graph = Arc::clone(&graph);
            thread::spawn(move || {
                graph.acquire(slot(3));
                let _guard = graph.begin_wait(folder).unwrap();
                ready_tx.send(()).unwrap();
                done_rx.recv().unwrap();
            })
        };
        ready_rx.recv().unwrap();

        let risk = graph.begin_wait(slot(3)).err().unwrap();
        assert_eq!(risk.chain, vec![slot(3), folder]);

        done_tx.send(()).unwrap();
        other.join().unwrap();
    }
}
