//! Thread-local counters (TLC): per-worker scanning/pulling state.
//!
//! The source keeps these in actual thread-local storage, allocated by a
//! per-tag `dss_module_key` callback the first time a worker thread
//! touches the module and freed at thread exit. A cooperative `tokio`
//! runtime doesn't expose "thread-local storage keyed by worker" the same
//! way, so this is re-expressed as a process-wide registry keyed by a
//! logical worker id, lazily populated on first touch and retired
//! explicitly — the same lifecycle, addressed by id instead of by actual
//! OS thread.

use std::collections::HashMap;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::model::RankList;

/// Identifies a logical worker (a scanning/pulling task) within this
/// process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(pub usize);

/// Per-worker counters, created lazily on first access and destroyed at
/// worker exit.
#[derive(Debug, Clone, Default)]
pub struct ThreadLocalCounters {
    /// Whether this worker is currently scanning.
    pub scanning: bool,
    /// Last error status observed by this worker, 0 if none.
    pub status: i32,
    /// Records pulled so far by this worker.
    pub rec_count: u64,
    /// Objects pulled so far by this worker.
    pub obj_count: u64,
    /// Rebuild container handle opened by this worker, if any.
    pub cont_handle_id: Option<Uuid>,
    /// Rebuild pool handle opened by this worker, if any.
    pub pool_handle_id: Option<Uuid>,
    /// Service list in use for the current rebuild, if any.
    pub svc_list: Option<RankList>,
    /// Set while a local-root scan is in progress; must be cleared before
    /// this worker's counters are retired (mirrors the source's assertion
    /// that `rebuild_local_root_init` is false at TLS teardown).
    pub local_root_init: bool,
}

/// Process-wide registry of [`ThreadLocalCounters`], indexed by
/// [`WorkerId`].
pub struct WorkerRegistry {
    workers: Mutex<HashMap<WorkerId, ThreadLocalCounters>>,
}

impl Default for WorkerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerRegistry {
    /// Builds a fresh, independent registry. Production code should go
    /// through [`WorkerRegistry::instance`]; this is exposed so tests can
    /// avoid sharing worker state across unrelated test cases.
    pub fn new() -> Self {
        WorkerRegistry {
            workers: Mutex::new(HashMap::new()),
        }
    }

    /// The single process-wide instance.
    pub fn instance() -> &'static WorkerRegistry {
        static INSTANCE: OnceCell<WorkerRegistry> = OnceCell::new();
        INSTANCE.get_or_init(WorkerRegistry::new)
    }

    /// Returns a clone of the counters for `worker`, creating them
    /// (zeroed) on first access.
    pub fn counters(&self, worker: WorkerId) -> ThreadLocalCounters {
        self.workers.lock().entry(worker).or_default().clone()
    }

    /// Mutates the counters for `worker` via `f`, creating them on first
    /// access.
    pub fn with_counters_mut<R>(
        &self,
        worker: WorkerId,
        f: impl FnOnce(&mut ThreadLocalCounters) -> R,
    ) -> R {
        let mut workers = self.workers.lock();
        f(workers.entry(worker).or_default())
    }

    /// Snapshot of every worker currently registered.
    pub fn all(&self) -> Vec<(WorkerId, ThreadLocalCounters)> {
        self.workers
            .lock()
            .iter()
            .map(|(id, c)| (*id, c.clone()))
            .collect()
    }

    /// Retires a worker's counters (the source's TLS destructor). Panics
    /// in debug builds if `local_root_init` is still set, matching the
    /// source's `D_ASSERT(tls->rebuild_local_root_init == 0)`.
    pub fn retire(&self, worker: WorkerId) {
        if let Some(counters) = self.workers.lock().remove(&worker) {
            debug_assert!(
                !counters.local_root_init,
                "worker {worker:?} retired with local_root_init still set"
            );
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn counters_are_created_lazily_and_default_to_zero() {
        let registry = WorkerRegistry::instance();
        let fresh = WorkerId(usize::MAX - 1);
        let counters = registry.counters(fresh);
        assert!(!counters.scanning);
        assert_eq!(counters.obj_count, 0);
        registry.retire(fresh);
    }

    #[test]
    fn with_counters_mut_updates_in_place() {
        let registry = WorkerRegistry::instance();
        let worker = WorkerId(usize::MAX - 2);
        registry.with_counters_mut(worker, |c| {
            c.scanning = true;
            c.obj_count = 42;
        });
        let counters = registry.counters(worker);
        assert!(counters.scanning);
        assert_eq!(counters.obj_count, 42);
        registry.retire(worker);
    }

    #[test]
    #[should_panic(expected = "local_root_init")]
    fn retiring_with_local_root_init_set_panics_in_debug() {
        let registry = WorkerRegistry::instance();
        let worker = WorkerId(usize::MAX - 3);
        registry.with_counters_mut(worker, |c| c.local_root_init = true);
        registry.retire(worker);
    }
}
