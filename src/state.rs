//! Global rebuild state (GRS): the process-wide singleton describing the
//! single in-flight rebuild, its task queue, and the active rebuild's
//! lifecycle phase (§3, §4.5).

use std::{collections::VecDeque, sync::atomic::AtomicU32};

use once_cell::sync::OnceCell;
use uuid::Uuid;

use crate::{model::RebuildStatus, pool::PoolHandle};

/// Named states of the active-rebuild lifecycle (§4.5). Tracked explicitly
/// (rather than derived from the other fields on every read) so that
/// transitions can be logged and asserted on in tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildPhase {
    Idle,
    Queued,
    Starting,
    Scanning,
    Pulling,
    Aborting,
    Finalizing,
}

impl std::fmt::Display for RebuildPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Queued => "queued",
            Self::Starting => "starting",
            Self::Scanning => "scanning",
            Self::Pulling => "pulling",
            Self::Aborting => "aborting",
            Self::Finalizing => "finalizing",
        };
        write!(f, "{s}")
    }
}

/// A queued rebuild request kept inside the lock, see [`crate::model::RebuildTask`].
pub(crate) type TaskQueue = VecDeque<crate::model::RebuildTask>;

/// Process-wide state for the single in-flight rebuild.
///
/// There is exactly one of these per process, guarded by
/// [`GlobalRebuild::lock`]. `rebuild_ver != 0` iff a driver exists iff
/// `pool_id` is non-zero (invariant 1 of §3).
pub struct GlobalRebuildState {
    pub(crate) task_list: TaskQueue,
    pub(crate) pool: Option<std::sync::Arc<dyn PoolHandle>>,
    pub(crate) pool_id: Uuid,
    pub(crate) rebuild_ver: u32,
    pub(crate) bcast_ver: u32,
    pub(crate) last_ver: u32,
    pub(crate) leader: bool,
    pub(crate) leader_barrier: bool,
    pub(crate) abort: bool,
    pub(crate) cached_status: RebuildStatus,
    pub(crate) pullers: Option<Vec<AtomicU32>>,
    pub(crate) puller_nxs: usize,
    pub(crate) phase: RebuildPhase,
    pub(crate) draining: bool,
}

impl Default for GlobalRebuildState {
    fn default() -> Self {
        Self {
            task_list: VecDeque::new(),
            pool: None,
            pool_id: Uuid::nil(),
            rebuild_ver: 0,
            bcast_ver: 0,
            last_ver: 0,
            leader: false,
            leader_barrier: false,
            abort: false,
            cached_status: RebuildStatus::idle(),
            pullers: None,
            puller_nxs: 0,
            phase: RebuildPhase::Idle,
            draining: false,
        }
    }
}

impl GlobalRebuildState {
    /// True when no rebuild is in flight.
    pub fn is_idle(&self) -> bool {
        self.rebuild_ver == 0
    }

    /// Moves to `phase`, logging the transition when it actually changes.
    pub(crate) fn set_phase(&mut self, phase: RebuildPhase) {
        if self.phase != phase {
            tracing::debug!(from = %self.phase, to = %phase, "rebuild phase transition");
            self.phase = phase;
        }
    }

    /// Current phase of the active-rebuild lifecycle.
    pub fn phase(&self) -> RebuildPhase {
        self.phase
    }

    /// Resets every field to its idle value. Called when the task queue
    /// drains (§4.1) and, per the resolved Open Question (c) of
    /// `SPEC_FULL.md` §9, also resets `last_ver` so a later rebuild that
    /// reuses a map version is never silently dropped by TFH idempotence.
    pub(crate) fn reset_to_idle(&mut self) {
        self.rebuild_ver = 0;
        self.bcast_ver = 0;
        self.leader_barrier = false;
        self.leader = false;
        self.last_ver = 0;
        self.set_phase(RebuildPhase::Idle);
    }

    /// Lazily grows the per-worker puller-count vector to at least
    /// `worker_count` slots (§3: "lazily allocated on first worker touch").
    pub(crate) fn ensure_puller_slots(&mut self, worker_count: usize) {
        let pullers = self.pullers.get_or_insert_with(Vec::new);
        if pullers.len() < worker_count {
            pullers.resize_with(worker_count, || AtomicU32::new(0));
        }
        self.puller_nxs = self.puller_nxs.max(worker_count);
    }

    /// Records the current pending-pull key count for `worker_id`.
    pub(crate) fn set_puller_count(&mut self, worker_id: usize, count: u32) {
        self.ensure_puller_slots(worker_id + 1);
        if let Some(pullers) = &self.pullers {
            pullers[worker_id]
                .store(count, std::sync::atomic::Ordering::Relaxed);
        }
    }

    /// True if any worker has a non-zero pending-pull count.
    pub(crate) fn any_puller_active(&self) -> bool {
        match &self.pullers {
            None => false,
            Some(pullers) => pullers
                .iter()
                .any(|c| c.load(std::sync::atomic::Ordering::Relaxed) != 0),
        }
    }

    /// Elects the caller as the sole drainer of `task_list` if nobody
    /// already owns it. Only one task ever drives the queue at a time;
    /// every other `schedule` call just enqueues and returns (§4.1).
    pub(crate) fn try_begin_draining(&mut self) -> bool {
        if self.draining {
            false
        } else {
            self.draining = true;
            true
        }
    }

    /// Releases drain ownership.
    pub(crate) fn finish_draining(&mut self) {
        self.draining = false;
    }
}

/// The process singleton: the lock-protected state plus the one-shot
/// notify handle guarding `leader_barrier` (the source's `ABT_cond`).
pub struct GlobalRebuild {
    state: tokio::sync::Mutex<GlobalRebuildState>,
    barrier_notify: tokio::sync::Notify,
}

impl Default for GlobalRebuild {
    fn default() -> Self {
        Self::new()
    }
}

impl GlobalRebuild {
    /// Builds a fresh, independent instance. Production code should go
    /// through [`GlobalRebuild::instance`]; this is exposed so tests can
    /// exercise the driver/scheduler without sharing the process
    /// singleton across unrelated test cases.
    pub fn new() -> Self {
        GlobalRebuild {
            state: tokio::sync::Mutex::new(GlobalRebuildState::default()),
            barrier_notify: tokio::sync::Notify::new(),
        }
    }

    /// The single process-wide instance, grounded on the
    /// `once_cell`-backed singleton pattern used for rebuild job
    /// instances elsewhere in this codebase.
    pub fn instance() -> &'static GlobalRebuild {
        static INSTANCE: OnceCell<GlobalRebuild> = OnceCell::new();
        INSTANCE.get_or_init(GlobalRebuild::new)
    }

    /// Acquires the lock protecting the global rebuild state.
    pub async fn lock(&self) -> tokio::sync::MutexGuard<'_, GlobalRebuildState> {
        self.state.lock().await
    }

    /// Wakes every task waiting for the leader barrier to clear.
    pub(crate) fn clear_barrier(&self) {
        self.barrier_notify.notify_waiters();
    }

    /// Blocks until `leader_barrier` is false for the given pool/version,
    /// or until the rebuild has already moved on. This is the helper
    /// flagged as missing by Open Question (b) of `SPEC_FULL.md` §9: any
    /// caller (e.g. a follower-side handler) that must not proceed until
    /// the leader has finished broadcasting the new pool map can await it
    /// directly instead of re-deriving the barrier logic.
    pub async fn wait_until_started(&self, pool_id: Uuid, map_version: u32) {
        loop {
            {
                let state = self.lock().await;
                let matches = state.pool_id == pool_id
                    && state.rebuild_ver == map_version;
                if !matches || !state.leader_barrier {
                    return;
                }
            }
            self.barrier_notify.notified().await;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn idle_state_has_zero_version() {
        let state = GlobalRebuildState::default();
        assert!(state.is_idle());
        assert_eq!(state.phase(), RebuildPhase::Idle);
    }

    #[test]
    fn reset_to_idle_clears_last_ver() {
        let mut state = GlobalRebuildState::default();
        state.rebuild_ver = 7;
        state.last_ver = 7;
        state.leader = true;
        state.leader_barrier = true;
        state.bcast_ver = 7;
        state.reset_to_idle();
        assert_eq!(state.rebuild_ver, 0);
        assert_eq!(state.bcast_ver, 0);
        assert_eq!(state.last_ver, 0);
        assert!(!state.leader);
        assert!(!state.leader_barrier);
    }

    #[test]
    fn puller_slots_grow_lazily_and_report_activity() {
        let mut state = GlobalRebuildState::default();
        assert!(!state.any_puller_active());
        state.set_puller_count(3, 5);
        assert!(state.any_puller_active());
        state.set_puller_count(3, 0);
        assert!(!state.any_puller_active());
    }
}
