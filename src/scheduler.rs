//! Task queue & scheduler (TQS): enqueues rebuild requests and drives the
//! queue to empty, one task at a time and strictly in FIFO order (§4.1).
//!
//! Grounded on `rebuild_job_backend`'s channel-driven `run`/`manage_tasks`
//! loop: here the "channel" is the `GlobalRebuildState::task_list` queue
//! itself, and whichever caller to `schedule` finds the queue un-owned
//! becomes the loop that drains it, rather than a dedicated background
//! task spawned once at startup.

use uuid::Uuid;

use crate::{
    config::RebuildConfig,
    driver,
    error::RebuildError,
    model::{RankList, RebuildStatus, RebuildTask},
    pool::PoolService,
    state::{GlobalRebuild, RebuildPhase},
};

/// Queues a rebuild of `pool_id` at `map_version`, then, if no other caller
/// is already draining the queue, drives it (this call and every other
/// task until the queue is empty) to completion before returning.
pub async fn schedule(
    grs: &GlobalRebuild,
    pool_service: &dyn PoolService,
    config: &RebuildConfig,
    pool_id: Uuid,
    map_version: u32,
    failed: &RankList,
    svc: &RankList,
) -> Result<(), RebuildError> {
    let task = RebuildTask::new(pool_id, map_version, failed, svc);

    let became_drainer = {
        let mut state = grs.lock().await;
        state.task_list.push_back(task);
        if state.phase() == RebuildPhase::Idle {
            state.set_phase(RebuildPhase::Queued);
        }
        state.try_begin_draining()
    };

    tracing::info!("Rebuild [queued] (ver={map_version})");

    if became_drainer {
        drain_loop(grs, pool_service, config).await;
    }
    Ok(())
}

/// Pops tasks off the queue one at a time and runs each to completion via
/// [`driver::run_one`], until the queue is empty, then resets to idle and
/// releases drain ownership.
async fn drain_loop(grs: &GlobalRebuild, pool_service: &dyn PoolService, config: &RebuildConfig) {
    loop {
        let task = {
            let mut state = grs.lock().await;
            match state.task_list.pop_front() {
                Some(task) => task,
                None => {
                    state.reset_to_idle();
                    state.finish_draining();
                    return;
                }
            }
        };

        {
            let mut state = grs.lock().await;
            state.rebuild_ver = task.map_version;
            state.pool_id = task.pool_id;
            state.leader = true;
            state.cached_status = RebuildStatus {
                version: task.map_version,
                ..Default::default()
            };
            state.set_phase(RebuildPhase::Starting);
        }

        if let Err(e) = driver::run_one(
            grs,
            pool_service,
            config,
            task.pool_id,
            task.map_version,
            &task.failed_targets,
            &task.service_list,
        )
        .await
        {
            tracing::error!(
                pool_id = %task.pool_id, map_version = task.map_version, error = %e,
                "rebuild task failed"
            );
        }
    }
}

#[cfg(test)]
mod test {
    use uuid::Uuid;

    use super::*;
    use crate::{pool::TgtQueryReply, testutil::FakePoolService};

    fn done(obj: u64, rec: u64) -> TgtQueryReply {
        TgtQueryReply {
            rebuilding: 0,
            status: 0,
            obj_count: obj,
            rec_count: rec,
        }
    }

    #[tokio::test]
    async fn single_task_runs_to_completion_and_returns_to_idle() {
        let grs = GlobalRebuild::new();
        let pool_service = FakePoolService::new();
        let config = RebuildConfig::for_test();
        let pool_id = Uuid::new_v4();
        pool_service.add_pool(pool_id, vec![done(10, 100)]);

        schedule(
            &grs,
            &pool_service,
            &config,
            pool_id,
            1,
            &RankList::empty(),
            &RankList::empty(),
        )
        .await
        .unwrap();

        let state = grs.lock().await;
        assert!(state.is_idle());
        assert_eq!(state.phase(), RebuildPhase::Idle);
        assert!(state.task_list.is_empty());
        drop(state);
        assert_eq!(pool_service.fini_calls(pool_id), 1);
    }

    #[tokio::test]
    async fn two_scheduled_pools_are_drained_in_fifo_order() {
        let grs = GlobalRebuild::new();
        let pool_service = FakePoolService::new();
        let config = RebuildConfig::for_test();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        pool_service.add_pool(first, vec![done(1, 1)]);
        pool_service.add_pool(second, vec![done(2, 2)]);

        // The first call becomes the drainer; queue the second before it
        // returns by racing both futures. Since schedule takes the lock
        // immediately to push, order of pushes equals order we call them.
        let grs_ref = &grs;
        let pool_ref = &pool_service;
        let config_ref = &config;
        let (r1, r2) = tokio::join!(
            schedule(grs_ref, pool_ref, config_ref, first, 1, &RankList::empty(), &RankList::empty()),
            schedule(grs_ref, pool_ref, config_ref, second, 1, &RankList::empty(), &RankList::empty()),
        );
        r1.unwrap();
        r2.unwrap();

        assert_eq!(pool_service.fini_calls(first), 1);
        assert_eq!(pool_service.fini_calls(second), 1);
        let state = grs.lock().await;
        assert!(state.is_idle());
    }
}
