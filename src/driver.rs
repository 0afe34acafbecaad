//! Leader driver (LD): drives one queued rebuild task from start through
//! the check loop to finalize (§4.2).

use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::{
    config::RebuildConfig,
    error::RebuildError,
    model::RankList,
    pool::{FiniRequest, PoolService, ScanRequest},
    state::{GlobalRebuild, RebuildPhase},
};

/// Runs one rebuild task end to end: `start → check → finalize`, with
/// finalize always executed even when start fails (§4.2).
pub async fn run_one(
    grs: &GlobalRebuild,
    pool_service: &dyn PoolService,
    config: &RebuildConfig,
    pool_id: Uuid,
    map_version: u32,
    failed: &RankList,
    svc: &RankList,
) -> Result<(), RebuildError> {
    let start_result =
        initiate_rebuild(grs, pool_service, config, pool_id, map_version, failed, svc)
            .await;

    if let Err(e) = &start_result {
        tracing::warn!(
            pool_id = %pool_id, map_version, error = %e,
            "rebuild start failed, skipping check loop"
        );
    } else {
        check_loop(grs, pool_service, config, pool_id, map_version, failed).await;
    }

    let fini_result = fini(grs, pool_service, config, pool_id, map_version, failed).await;

    match start_result {
        Err(e) => Err(e),
        Ok(()) => fini_result,
    }
}

/// §4.2.1 Start: broadcasts `OBJECTS_SCAN`, then the pool map, under the
/// leader barrier.
async fn initiate_rebuild(
    grs: &GlobalRebuild,
    pool_service: &dyn PoolService,
    config: &RebuildConfig,
    pool_id: Uuid,
    map_version: u32,
    failed: &RankList,
    svc: &RankList,
) -> Result<(), RebuildError> {
    let pool = pool_service
        .lookup(pool_id)
        .await
        .ok_or(RebuildError::NotLeader {})?;

    {
        let mut state = grs.lock().await;
        debug_assert!(
            !state.leader_barrier,
            "leader barrier already held at rebuild start"
        );
        state.leader_barrier = true;
        state.set_phase(RebuildPhase::Starting);
    }

    let scan_req = ScanRequest {
        pool_id,
        map_version,
        cont_handle_id: Uuid::new_v4(),
        pool_handle_id: Uuid::new_v4(),
        failed: failed.clone(),
        service_list: svc.clone(),
    };

    let scan_reply = match pool_service.scan(pool.as_ref(), scan_req, failed).await {
        Ok(reply) => reply,
        Err(e) => {
            // Broadcast create failed: absorbed, finalize still runs.
            tracing::warn!(
                pool_id = %pool_id, map_version, error = %e,
                "scan broadcast could not be created, treating start as ignored"
            );
            let mut state = grs.lock().await;
            state.leader_barrier = false;
            grs.clear_barrier();
            return Ok(());
        }
    };

    if scan_reply.status != 0 {
        let mut state = grs.lock().await;
        state.leader_barrier = false;
        grs.clear_barrier();
        return Err(RebuildError::TransportFailure {
            operation: "OBJECTS_SCAN".to_string(),
            reason: format!("target replied with status {}", scan_reply.status),
        });
    }

    pool_service.pmap_broadcast(pool_id, failed).await?;

    {
        let mut state = grs.lock().await;
        state.leader_barrier = false;
        if state.bcast_ver < map_version {
            state.bcast_ver = map_version;
        }
        state.set_phase(RebuildPhase::Scanning);
    }
    grs.clear_barrier();

    tracing::info!("Rebuild [started] (ver={map_version})");
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BcastPhase {
    Map,
    Query,
}

/// §4.2.2 Check loop: polls progress, detects cascading failures, and
/// retries broadcasts up to `config.bcast_retry_max` times.
async fn check_loop(
    grs: &GlobalRebuild,
    pool_service: &dyn PoolService,
    config: &RebuildConfig,
    pool_id: Uuid,
    map_version: u32,
    failed: &RankList,
) {
    let Some(pool) = pool_service.lookup(pool_id).await else {
        tracing::error!("No leader anymore?");
        return;
    };

    let begin = Instant::now();
    let mut last_bcast = Instant::now() - config.bcast_interval;
    let mut last_print = Instant::now();
    let mut cycle: u64 = 2;
    let mut failures: u32 = 0;
    let mut bcast_phase = BcastPhase::Query;

    loop {
        let elapsed = last_bcast.elapsed();
        if elapsed < config.bcast_interval {
            tokio::time::sleep(config.bcast_interval - elapsed).await;
            continue;
        }

        if pool.current_map_version() > grs.lock().await.bcast_ver {
            bcast_phase = BcastPhase::Map;
        }

        let mut status = crate::model::RebuildStatus {
            version: map_version,
            ..Default::default()
        };

        match bcast_phase {
            BcastPhase::Map => {
                tracing::warn!("cascading failure, bcast pool map");
                match pool_service.pmap_broadcast(pool_id, failed).await {
                    Ok(()) => {
                        let mut state = grs.lock().await;
                        state.bcast_ver = pool.current_map_version();
                        failures = 0;
                        bcast_phase = BcastPhase::Query;
                        last_bcast = Instant::now();
                        continue;
                    }
                    Err(_) => failures += 1,
                }
            }
            BcastPhase::Query => {
                match crate::aggregator::query(grs, pool_service, pool_id, true, failed).await {
                    Ok(s) => {
                        status = s;
                        if status.errno != 0 {
                            // Non-zero aggregated target status (§4.3) is
                            // terminal on its own, unlike a transport
                            // failure: abort right away instead of
                            // counting it toward the retry budget.
                            let mut state = grs.lock().await;
                            state.abort = true;
                            state.set_phase(RebuildPhase::Aborting);
                        } else {
                            failures = 0;
                        }
                    }
                    Err(_) => failures += 1,
                }
            }
        }
        last_bcast = Instant::now();

        if failures > 0 && failures < config.bcast_retry_max {
            tracing::debug!(
                phase = ?bcast_phase,
                failures,
                "retrying broadcast after failure"
            );
            continue;
        }

        if failures >= config.bcast_retry_max {
            let mut state = grs.lock().await;
            state.abort = true;
            state.set_phase(RebuildPhase::Aborting);
        }

        let state_for_phase = {
            let state = grs.lock().await;
            (state.abort, state.phase())
        };
        if status.done && state_for_phase.1 != RebuildPhase::Aborting {
            let mut state = grs.lock().await;
            state.set_phase(RebuildPhase::Finalizing);
        } else if status.obj_nr > 0 || status.rec_nr > 0 {
            let mut state = grs.lock().await;
            if state.phase() != RebuildPhase::Aborting {
                state.set_phase(RebuildPhase::Pulling);
            }
        }

        let aborted = grs.lock().await.abort;
        let terminal = status.done || aborted;
        let label = if aborted {
            "failed"
        } else if status.done {
            "completed"
        } else if status.obj_nr == 0 && status.rec_nr == 0 {
            "scanning"
        } else {
            "pulling"
        };

        let duration = begin.elapsed().as_secs();
        let line = format!(
            "Rebuild [{label}] (ver={map_version}, obj={}, rec={}, duration={duration} secs)",
            status.obj_nr, status.rec_nr,
        );

        if terminal {
            tracing::info!("{line}");
            break;
        }

        cycle += 1;
        if is_power_of_two(cycle) || last_print.elapsed() > Duration::from_secs(10) {
            last_print = Instant::now();
            tracing::info!("{line}");
        } else {
            tracing::debug!("{line}");
        }
    }
}

fn is_power_of_two(n: u64) -> bool {
    n != 0 && (n & (n - 1)) == 0
}

/// §4.2.3 Finalize: excludes failed targets, then retries `TGT_FINI` until
/// it succeeds or the retry budget is exhausted.
async fn fini(
    grs: &GlobalRebuild,
    pool_service: &dyn PoolService,
    config: &RebuildConfig,
    pool_id: Uuid,
    map_version: u32,
    failed: &RankList,
) -> Result<(), RebuildError> {
    {
        let state = grs.lock().await;
        if state.pool_id != pool_id {
            return Ok(());
        }
    }

    {
        let mut state = grs.lock().await;
        state.set_phase(RebuildPhase::Finalizing);
    }

    match pool_service.tgt_exclude_out(pool_id, failed).await {
        Ok(()) | Err(RebuildError::NotLeader {}) => {}
        Err(e) => return Err(e),
    }

    if pool_service.lookup(pool_id).await.is_none() {
        let mut state = grs.lock().await;
        state.pool_id = Uuid::nil();
        state.abort = false;
        return Ok(());
    }

    let mut failures: u32 = 0;
    let mut last_attempt = Instant::now() - config.bcast_interval;
    let result = loop {
        let elapsed = last_attempt.elapsed();
        if elapsed < config.bcast_interval {
            tokio::time::sleep(config.bcast_interval - elapsed).await;
            continue;
        }
        last_attempt = Instant::now();

        tracing::debug!("notifying surviving targets to finalize rebuild");
        let req = FiniRequest {
            pool_id,
            map_version,
        };
        let pool_ref = match pool_service.lookup(pool_id).await {
            Some(p) => p,
            None => break Ok(()),
        };
        match pool_service.fini(pool_ref.as_ref(), req, failed).await {
            Ok(reply) if reply.status == 0 => break Ok(()),
            Ok(reply) => {
                failures += 1;
                tracing::error!(
                    pool_id = %pool_id, failures, status = reply.status,
                    "failed to fini rebuild"
                );
            }
            Err(e) => {
                failures += 1;
                tracing::error!(pool_id = %pool_id, failures, error = %e, "failed to fini rebuild");
            }
        }

        if failures >= config.bcast_retry_max {
            break Err(RebuildError::TransportFailure {
                operation: "TGT_FINI".to_string(),
                reason: format!("exceeded {} consecutive failures", config.bcast_retry_max),
            });
        }
    };

    {
        let mut state = grs.lock().await;
        state.pool_id = Uuid::nil();
        state.abort = false;
        state.set_phase(RebuildPhase::Idle);
    }

    if result.is_ok() {
        tracing::info!("Rebuild [completed] (ver={map_version})");
    }
    result
}
