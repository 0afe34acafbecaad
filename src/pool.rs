//! The external collaborators this service consumes: pool membership
//! lookup, the group-broadcast primitive, and the per-opcode RPC surface
//! (§6). These are modeled as an `async_trait` so that tests can supply an
//! in-memory fake without a real transport, the same way `io-engine`'s
//! `BlockDeviceHandle`/`BlockDeviceDescriptor` traits let rebuild code run
//! against fakes instead of real bdevs.

use async_trait::async_trait;
use uuid::Uuid;

use crate::{error::RebuildError, model::RankList};

/// Opaque handle to a looked-up pool. Dropping the last strong reference is
/// this crate's equivalent of the source's `ds_pool_put`.
pub trait PoolHandle: std::fmt::Debug + Send + Sync {
    /// Identifier of the pool this handle refers to.
    fn pool_id(&self) -> Uuid;

    /// Current pool map version as seen by the membership service. Used by
    /// the check loop to detect cascading failures (§4.2.2).
    fn current_map_version(&self) -> u32;
}

/// Payload of the `OBJECTS_SCAN` broadcast: tells every live target to
/// start enumerating objects that need rebuilding.
#[derive(Debug, Clone)]
pub struct ScanRequest {
    pub pool_id: Uuid,
    pub map_version: u32,
    pub cont_handle_id: Uuid,
    pub pool_handle_id: Uuid,
    pub failed: RankList,
    pub service_list: RankList,
}

/// Reply to `OBJECTS_SCAN` / `TGT_FINI`: a bare status code, 0 on success.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusReply {
    pub status: i32,
}

/// Payload of the `TGT_FINI` broadcast.
#[derive(Debug, Clone, Copy)]
pub struct FiniRequest {
    pub pool_id: Uuid,
    pub map_version: u32,
}

/// Payload of the `TGT_QUERY` collective broadcast.
#[derive(Debug, Clone, Copy)]
pub struct QueryRequest {
    pub pool_id: Uuid,
}

/// Reply to `TGT_QUERY`, already folded across every target that answered
/// (the collective's associative reduction, see [`crate::aggregator`]).
#[derive(Debug, Clone, Copy, Default)]
pub struct TgtQueryReply {
    /// Count of descendants (targets) still actively rebuilding.
    pub rebuilding: u32,
    /// First non-zero status seen across the collective, 0 otherwise.
    pub status: i32,
    pub obj_count: u64,
    pub rec_count: u64,
}

/// The pool membership service consumed by the leader driver and the
/// scheduler. Every method here is an opaque external call per §6; this
/// crate implements none of the logic behind it.
#[async_trait]
pub trait PoolService: Send + Sync {
    /// Looks up a pool by id, returning a strong reference or `None` if
    /// this process doesn't know about it.
    async fn lookup(&self, pool_id: Uuid) -> Option<std::sync::Arc<dyn PoolHandle>>;

    /// Broadcasts `OBJECTS_SCAN` to every live member except `failed`.
    async fn scan(
        &self,
        pool: &dyn PoolHandle,
        req: ScanRequest,
        exclude: &RankList,
    ) -> Result<StatusReply, RebuildError>;

    /// Broadcasts `TGT_QUERY` (collective) to every live member except
    /// `failed`, returning the already-aggregated reply.
    async fn query(
        &self,
        pool: &dyn PoolHandle,
        req: QueryRequest,
        exclude: &RankList,
    ) -> Result<TgtQueryReply, RebuildError>;

    /// Broadcasts `TGT_FINI` to every live member except `failed`.
    async fn fini(
        &self,
        pool: &dyn PoolHandle,
        req: FiniRequest,
        exclude: &RankList,
    ) -> Result<StatusReply, RebuildError>;

    /// Fans the current pool map out to every live member except `exclude`.
    async fn pmap_broadcast(
        &self,
        pool_id: Uuid,
        exclude: &RankList,
    ) -> Result<(), RebuildError>;

    /// Moves `targets` to the terminal DOWNOUT state. `NotLeader` is
    /// recoverable by the caller (§4.2.3).
    async fn tgt_exclude_out(
        &self,
        pool_id: Uuid,
        targets: &RankList,
    ) -> Result<(), RebuildError>;
}
