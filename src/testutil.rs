//! An in-memory [`PoolService`] fake, kept in the main crate the way
//! `io-engine-tests` keeps fakes available to every crate that needs them,
//! collapsed here into one module since this crate has no workspace to
//! split it into.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::{
    error::RebuildError,
    model::RankList,
    pool::{
        FiniRequest, PoolHandle, PoolService, QueryRequest, ScanRequest, StatusReply,
        TgtQueryReply,
    },
};

#[derive(Debug)]
pub struct FakePoolHandle {
    pool_id: Uuid,
    map_version: AtomicU32,
}

impl PoolHandle for FakePoolHandle {
    fn pool_id(&self) -> Uuid {
        self.pool_id
    }

    fn current_map_version(&self) -> u32 {
        self.map_version.load(Ordering::Relaxed)
    }
}

/// Scripted per-target progress: each call to `query` advances one step.
#[derive(Debug, Clone)]
pub struct FakeTargetProgress {
    pub steps: Vec<TgtQueryReply>,
}

struct FakePoolState {
    handle: Arc<FakePoolHandle>,
    progress: FakeTargetProgress,
    cursor: usize,
    scan_calls: u32,
    fini_calls: u32,
    query_calls: u32,
    pmap_bcast_calls: u32,
    fail_scan: bool,
    fail_fini_times: u32,
    fail_query_always: bool,
    excluded: Vec<u32>,
}

/// In-memory fake of the whole pool-membership/broadcast surface (§6),
/// driven entirely by scripted responses so tests don't need a transport.
#[derive(Default)]
pub struct FakePoolService {
    pools: Mutex<HashMap<Uuid, FakePoolState>>,
    fini_order: Mutex<Vec<Uuid>>,
}

impl FakePoolService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a pool with a fixed sequence of `TGT_QUERY` replies; the
    /// last step should have `rebuilding == 0` so the check loop observes
    /// completion.
    pub fn add_pool(&self, pool_id: Uuid, steps: Vec<TgtQueryReply>) {
        self.pools.lock().insert(
            pool_id,
            FakePoolState {
                handle: Arc::new(FakePoolHandle {
                    pool_id,
                    map_version: AtomicU32::new(1),
                }),
                progress: FakeTargetProgress { steps },
                cursor: 0,
                scan_calls: 0,
                fini_calls: 0,
                query_calls: 0,
                pmap_bcast_calls: 0,
                fail_scan: false,
                fail_fini_times: 0,
                fail_query_always: false,
                excluded: Vec::new(),
            },
        );
    }

    pub fn set_fail_scan(&self, pool_id: Uuid, fail: bool) {
        if let Some(state) = self.pools.lock().get_mut(&pool_id) {
            state.fail_scan = fail;
        }
    }

    pub fn set_fail_fini_times(&self, pool_id: Uuid, times: u32) {
        if let Some(state) = self.pools.lock().get_mut(&pool_id) {
            state.fail_fini_times = times;
        }
    }

    /// Every `TGT_QUERY` call fails at the transport level (an RPC that
    /// never got a reply), distinct from a reply carrying a non-zero
    /// status.
    pub fn set_fail_query_always(&self, pool_id: Uuid, fail: bool) {
        if let Some(state) = self.pools.lock().get_mut(&pool_id) {
            state.fail_query_always = fail;
        }
    }

    pub fn query_calls(&self, pool_id: Uuid) -> u32 {
        self.pools.lock().get(&pool_id).map_or(0, |s| s.query_calls)
    }

    pub fn bump_map_version(&self, pool_id: Uuid) {
        if let Some(state) = self.pools.lock().get(&pool_id) {
            state.handle.map_version.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn set_map_version(&self, pool_id: Uuid, version: u32) {
        if let Some(state) = self.pools.lock().get(&pool_id) {
            state.handle.map_version.store(version, Ordering::Relaxed);
        }
    }

    pub fn scan_calls(&self, pool_id: Uuid) -> u32 {
        self.pools.lock().get(&pool_id).map_or(0, |s| s.scan_calls)
    }

    pub fn fini_calls(&self, pool_id: Uuid) -> u32 {
        self.pools.lock().get(&pool_id).map_or(0, |s| s.fini_calls)
    }

    pub fn pmap_bcast_calls(&self, pool_id: Uuid) -> u32 {
        self.pools
            .lock()
            .get(&pool_id)
            .map_or(0, |s| s.pmap_bcast_calls)
    }

    /// Order in which `fini` was called across every pool, for asserting
    /// FIFO drain order end to end.
    pub fn fini_order(&self) -> Vec<Uuid> {
        self.fini_order.lock().clone()
    }

    pub fn excluded(&self, pool_id: Uuid) -> Vec<u32> {
        self.pools
            .lock()
            .get(&pool_id)
            .map(|s| s.excluded.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl PoolService for FakePoolService {
    async fn lookup(&self, pool_id: Uuid) -> Option<Arc<dyn PoolHandle>> {
        self.pools
            .lock()
            .get(&pool_id)
            .map(|s| s.handle.clone() as Arc<dyn PoolHandle>)
    }

    async fn scan(
        &self,
        _pool: &dyn PoolHandle,
        req: ScanRequest,
        _exclude: &RankList,
    ) -> Result<StatusReply, RebuildError> {
        let mut pools = self.pools.lock();
        let state = pools.get_mut(&req.pool_id).ok_or(RebuildError::NotLeader {})?;
        state.scan_calls += 1;
        if state.fail_scan {
            return Err(RebuildError::TransportFailure {
                operation: "OBJECTS_SCAN".into(),
                reason: "scripted failure".into(),
            });
        }
        Ok(StatusReply { status: 0 })
    }

    async fn query(
        &self,
        _pool: &dyn PoolHandle,
        req: QueryRequest,
        _exclude: &RankList,
    ) -> Result<TgtQueryReply, RebuildError> {
        let mut pools = self.pools.lock();
        let state = pools.get_mut(&req.pool_id).ok_or(RebuildError::NotLeader {})?;
        state.query_calls += 1;
        if state.fail_query_always {
            return Err(RebuildError::TransportFailure {
                operation: "TGT_QUERY".into(),
                reason: "scripted failure".into(),
            });
        }
        let step = state
            .progress
            .steps
            .get(state.cursor)
            .copied()
            .unwrap_or_default();
        if state.cursor + 1 < state.progress.steps.len() {
            state.cursor += 1;
        }
        Ok(step)
    }

    async fn fini(
        &self,
        _pool: &dyn PoolHandle,
        req: FiniRequest,
        _exclude: &RankList,
    ) -> Result<StatusReply, RebuildError> {
        let succeeded = {
            let mut pools = self.pools.lock();
            let state = pools.get_mut(&req.pool_id).ok_or(RebuildError::NotLeader {})?;
            state.fini_calls += 1;
            state.fini_calls > state.fail_fini_times
        };
        if !succeeded {
            return Ok(StatusReply { status: -1 });
        }
        self.fini_order.lock().push(req.pool_id);
        Ok(StatusReply { status: 0 })
    }

    async fn pmap_broadcast(
        &self,
        pool_id: Uuid,
        _exclude: &RankList,
    ) -> Result<(), RebuildError> {
        let mut pools = self.pools.lock();
        let state = pools.get_mut(&pool_id).ok_or(RebuildError::NotLeader {})?;
        state.pmap_bcast_calls += 1;
        Ok(())
    }

    async fn tgt_exclude_out(
        &self,
        pool_id: Uuid,
        targets: &RankList,
    ) -> Result<(), RebuildError> {
        let mut pools = self.pools.lock();
        let state = pools.get_mut(&pool_id).ok_or(RebuildError::NotLeader {})?;
        state.excluded.extend(targets.as_slice().iter().copied());
        Ok(())
    }
}
