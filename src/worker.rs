//! Background recognizer threads.
//!
//! Folder scans and aggregate recomputes are queued as jobs on a crossbeam
//! channel and drained by a fixed set of named threads. A panicking job is
//! logged and counted; the worker keeps running.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Sender, unbounded};
use parking_lot::Mutex;

type Job = Box<dyn FnOnce() + Send + 'static>;

pub struct WorkerPool {
    sender: Mutex<Option<Sender<Job>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    size: usize,
    completed: Arc<AtomicUsize>,
    panicked: Arc<AtomicUsize>,
}

impl WorkerPool {
    /// Spawn `size` worker threads (at least one).
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        let (sender, receiver) = unbounded::<Job>();
        let completed = Arc::new(AtomicUsize::new(0));
        let panicked = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::with_capacity(size);
        for i in 0..size {
            let receiver = receiver.clone();
            let completed = Arc::clone(&completed);
            let panicked = Arc::clone(&panicked);
            let spawned = thread::Builder::new()
                .name(format!("datapool-worker-{i}"))
                .spawn(move || {
                    for job in receiver.iter() {
                        if catch_unwind(AssertUnwindSafe(job)).is_err() {
                            panicked.fetch_add(1, Ordering::Relaxed);
                            crate::warn_event!("worker", "job panicked on worker {i}");
                        }
                        completed.fetch_add(1, Ordering::Relaxed);
                    }
                });
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => crate::warn_event!("worker", "failed to spawn worker {i}: {e}"),
            }
        }

        crate::debug_event!("worker", "started", "{} threads", handles.len());

        Self {
            sender: Mutex::new(Some(sender)),
            handles: Mutex::new(handles),
            size,
            completed,
            panicked,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Queue a job. Runs it inline when no worker is available (pool shut
    /// down or no thread could be spawned).
    pub fn execute(&self, job: impl FnOnce() + Send + 'static) {
        let job: Job = Box::new(job);
        let rejected = {
            let sender = self.sender.lock();
            let running = !self.handles.lock().is_empty();
            match sender.as_ref() {
                Some(tx) if running => tx.send(job).err().map(|e| e.into_inner()),
                _ => Some(job),
            }
        };
        if let Some(job) = rejected {
            crate::debug_event!("worker", "inline", "no worker available");
            job();
        }
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn panicked(&self) -> usize {
        self.panicked.load(Ordering::Relaxed)
    }

    /// Stop accepting jobs, drain the queue and join the threads.
    pub fn shutdown(&self) {
        self.sender.lock().take();
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.handles.lock());
        let current = thread::current().id();
        for handle in handles {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                crate::warn_event!("worker", "worker thread panicked during shutdown");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("size", &self.size)
            .field("completed", &self.completed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;
    use std::time::Duration;

    #[test]
    fn test_jobs_run_on_workers() {
        let pool = WorkerPool::new(2);
        let (tx, rx) = bounded(4);
        for i in 0..4 {
            let tx = tx.clone();
            pool.execute(move || {
                let name = thread::current().name().map(str::to_string);
                tx.send((i, name)).unwrap();
            });
        }

        let mut seen: Vec<usize> = (0..4)
            .map(|_| {
                let (i, name) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
                assert!(name.unwrap().starts_with("datapool-worker-"));
                i
            })
            .collect();
        seen.sort();
        assert_eq!(seen, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_panicking_job_does_not_kill_worker() {
        let pool = WorkerPool::new(1);
        pool.execute(|| panic!("boom"));

        let (tx, rx) = bounded(1);
        pool.execute(move || tx.send(()).unwrap());
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(pool.panicked(), 1);
    }

    #[test]
    fn test_execute_after_shutdown_runs_inline() {
        let pool = WorkerPool::new(1);
        pool.shutdown();

        let (tx, rx) = bounded(1);
        pool.execute(move || tx.send(thread::current().id()).unwrap());
        assert_eq!(rx.try_recv().unwrap(), thread::current().id());
    }
}
