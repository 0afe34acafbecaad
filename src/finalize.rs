//! Target finalize handler (TFH): idempotently tears down rebuild handles
//! on a target when the leader broadcasts `TGT_FINI` (§4.4).

use crate::{
    error::RebuildError,
    pool::{FiniRequest, StatusReply},
    state::GlobalRebuild,
    worker::WorkerRegistry,
};

/// Handles one `TGT_FINI(pool_id, map_version)` RPC on this target.
///
/// Idempotent: delivering the same request twice leaves target state
/// identical after each call, and the second call returns status 0
/// without touching any handle (§8 scenario 5).
pub async fn target_finalize(
    grs: &GlobalRebuild,
    registry: &WorkerRegistry,
    req: FiniRequest,
) -> StatusReply {
    match try_finalize(grs, registry, req).await {
        Ok(()) => StatusReply { status: 0 },
        Err(e) => StatusReply {
            status: e.as_status(),
        },
    }
}

async fn try_finalize(
    grs: &GlobalRebuild,
    registry: &WorkerRegistry,
    req: FiniRequest,
) -> Result<(), RebuildError> {
    let mut state = grs.lock().await;

    if state.last_ver == req.map_version {
        tracing::debug!(
            pool_id = %req.pool_id,
            map_version = req.map_version,
            "ignoring resend of rebuild fini"
        );
        return Ok(());
    }

    if state.pool_id != req.pool_id {
        return Err(RebuildError::NoHandle {});
    }

    state.last_ver = req.map_version;
    drop(state);

    close_rebuild_handles(registry);

    let mut state = grs.lock().await;
    state.pool = None;
    state.pool_id = uuid::Uuid::nil();
    state.abort = false;
    tracing::info!(
        pool_id = %req.pool_id,
        map_version = req.map_version,
        "finalized rebuild on this target"
    );
    Ok(())
}

/// Runs the teardown collective across this target's workers: close the
/// rebuild pool handle if valid, close the rebuild container handle, clear
/// both handle ids, and forget the service list.
fn close_rebuild_handles(registry: &WorkerRegistry) {
    for (worker, _) in registry.all() {
        registry.with_counters_mut(worker, |counters| {
            counters.pool_handle_id = None;
            counters.cont_handle_id = None;
            counters.svc_list = None;
        });
    }
}

#[cfg(test)]
mod test {
    use uuid::Uuid;

    use super::*;
    use crate::worker::WorkerId;

    fn fini(pool_id: Uuid, map_version: u32) -> FiniRequest {
        FiniRequest {
            pool_id,
            map_version,
        }
    }

    #[tokio::test]
    async fn mismatched_pool_is_reported_as_no_handle() {
        let grs = GlobalRebuild::new();
        let registry = WorkerRegistry::new();
        {
            let mut state = grs.lock().await;
            state.pool_id = Uuid::new_v4();
            state.last_ver = 0;
        }

        let reply = target_finalize(&grs, &registry, fini(Uuid::new_v4(), 1)).await;
        assert_eq!(reply.status, RebuildError::NoHandle {}.as_status());
    }

    #[tokio::test]
    async fn mismatched_pool_is_a_no_handle_error() {
        let grs = GlobalRebuild::new();
        let registry = WorkerRegistry::new();
        {
            let mut state = grs.lock().await;
            state.pool_id = Uuid::new_v4();
        }

        let result = try_finalize(&grs, &registry, fini(Uuid::new_v4(), 1)).await;
        assert_matches::assert_matches!(result, Err(RebuildError::NoHandle {}));
    }

    #[tokio::test]
    async fn duplicate_fini_is_idempotent() {
        let grs = GlobalRebuild::new();
        let registry = WorkerRegistry::new();
        let pool_id = Uuid::new_v4();
        let worker = WorkerId(12345);
        registry.with_counters_mut(worker, |c| {
            c.pool_handle_id = Some(Uuid::new_v4());
            c.cont_handle_id = Some(Uuid::new_v4());
        });
        {
            let mut state = grs.lock().await;
            state.pool_id = pool_id;
            state.last_ver = 0;
        }

        let first = target_finalize(&grs, &registry, fini(pool_id, 7)).await;
        assert_eq!(first.status, 0);
        {
            let state = grs.lock().await;
            assert_eq!(state.last_ver, 7);
            assert_eq!(state.pool_id, Uuid::nil());
        }
        let after_first = registry.counters(worker);
        assert!(after_first.pool_handle_id.is_none());

        // second delivery: pool_id in GRS is already cleared, but last_ver
        // matching short-circuits before that mismatch would even matter.
        let second = target_finalize(&grs, &registry, fini(pool_id, 7)).await;
        assert_eq!(second.status, 0);
        registry.retire(worker);
    }
}
