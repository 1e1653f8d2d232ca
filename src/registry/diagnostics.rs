use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters exposed for tests and the CLI.
#[derive(Debug, Default)]
pub struct Diagnostics {
    builds: AtomicU64,
    build_failures: AtomicU64,
    invalidations: AtomicU64,
    deadlock_warnings: AtomicU64,
    demoted: AtomicU64,
    forgotten: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DiagnosticsSnapshot {
    pub builds: u64,
    pub build_failures: u64,
    pub invalidations: u64,
    pub deadlock_warnings: u64,
    pub demoted: u64,
    pub forgotten: u64,
}

impl Diagnostics {
    pub fn builds(&self) -> u64 {
        self.builds.load(Ordering::Relaxed)
    }

    pub fn build_failures(&self) -> u64 {
        self.build_failures.load(Ordering::Relaxed)
    }

    pub fn invalidations(&self) -> u64 {
        self.invalidations.load(Ordering::Relaxed)
    }

    pub fn deadlock_warnings(&self) -> u64 {
        self.deadlock_warnings.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            builds: self.builds(),
            build_failures: self.build_failures(),
            invalidations: self.invalidations(),
            deadlock_warnings: self.deadlock_warnings(),
            demoted: self.demoted.load(Ordering::Relaxed),
            forgotten: self.forgotten.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn record_build(&self) {
        self.builds.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_build_failure(&self) {
        self.build_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_invalidation(&self) {
        self.invalidations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_deadlock_warning(&self) {
        self.deadlock_warnings.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_sweep(&self, demoted: u64, forgotten: u64) {
        self.demoted.fetch_add(demoted, Ordering::Relaxed);
        self.forgotten.fetch_add(forgotten, Ordering::Relaxed);
    }
}
