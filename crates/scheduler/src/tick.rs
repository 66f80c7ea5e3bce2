//! The Scheduler's tick loop (§4.5): promote delay wakeups, fire due cron
//! schedules, reap expired webhook waits, reap timed-out map batches, and
//! reap stale runs — in that strict order, so a run that goes stale in
//! the same tick it would have woken up still gets one fair chance to
//! resume before the reaper looks at it.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use db::repository::{scheduled_events, suspensions, workflows};
use db::DbPool;
use engine::orchestrator::{self, CreateRunRequest};
use engine::{mapengine, EngineError};
use nodes::{ErrorKind, Outcome};
use queue::DispatchQueue;

use crate::cron;
use crate::error::SchedulerError;

const DELAY_WAKEUP: &str = "DELAY_WAKEUP";
const CLAIM_BATCH_SIZE: i64 = 100;

/// Everything the tick loop needs that isn't already reachable through
/// `pool`/`queue` — kept small and explicit rather than threading a
/// config struct through every function.
pub struct TickConfig {
    /// A `running` run older than this is considered stale (§7: "a run
    /// stuck past its max wall time fails with `STALE`, it is never
    /// silently retried forever").
    pub max_run_wall_time: ChronoDuration,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self { max_run_wall_time: ChronoDuration::hours(24) }
    }
}

/// Run one full scheduler tick. Idempotent and safe to call concurrently
/// from multiple scheduler processes: every claim in here uses
/// `FOR UPDATE SKIP LOCKED` or an atomic consume, so two schedulers racing
/// the same tick split the work instead of double-firing it.
pub async fn run_tick(pool: &DbPool, queue: &dyn DispatchQueue, config: &TickConfig) -> Result<(), SchedulerError> {
    let now = Utc::now();

    let promoted = promote_delay_wakeups(pool, queue, now).await?;
    let fired = promote_cron_fires(pool, queue, now).await?;
    let webhook_timeouts = reap_webhook_timeouts(pool, queue, now).await?;
    let map_timeouts = reap_map_timeouts(pool, queue, now).await?;
    let reaped = reap_stale_runs(pool, queue, now, config.max_run_wall_time).await?;

    if promoted + fired + webhook_timeouts + map_timeouts + reaped > 0 {
        info!(promoted, fired, webhook_timeouts, map_timeouts, reaped, "scheduler tick");
    }

    Ok(())
}

/// Resume every node whose `DELAY_WAKEUP` has come due.
async fn promote_delay_wakeups(pool: &DbPool, queue: &dyn DispatchQueue, now: DateTime<Utc>) -> Result<usize, SchedulerError> {
    let due = scheduled_events::claim_due(pool, DELAY_WAKEUP, now, CLAIM_BATCH_SIZE).await?;
    let count = due.len();

    for event in due {
        let (Some(run_id), Some(node_id)) = (event.target_run_id, event.target_node_id) else {
            warn!(event_id = %event.id, "DELAY_WAKEUP event missing run/node target");
            continue;
        };

        if let Err(err) = orchestrator::resume(pool, queue, run_id, &node_id, Outcome::Completed { output: serde_json::Value::Null }).await {
            warn!(%run_id, node_id, error = %err, "failed to promote delay wakeup");
        }
    }

    Ok(count)
}

/// Fire every cron schedule whose `schedule_next_run` has come due,
/// honoring each workflow's `overlap_mode`, and always reschedule
/// `schedule_next_run` regardless of whether a run was actually started
/// — otherwise a `skip`-mode workflow with a busy run in flight would be
/// reclaimed forever by `claim_due_cron`.
async fn promote_cron_fires(pool: &DbPool, queue: &dyn DispatchQueue, now: DateTime<Utc>) -> Result<usize, SchedulerError> {
    let due = workflows::claim_due_cron(pool, now, CLAIM_BATCH_SIZE).await?;
    let count = due.len();

    for workflow in due {
        let (Some(cron_expr), Some(timezone)) = (workflow.schedule_cron.as_deref(), workflow.schedule_timezone.as_deref()) else {
            warn!(workflow_id = workflow.id, "cron-enabled workflow missing expression or timezone");
            continue;
        };

        let should_start = match workflow.overlap_mode.as_str() {
            "parallel" => true,
            "skip" | "queue_one" => workflows::count_active_cron_runs(pool, workflow.id).await? == 0,
            other => {
                warn!(workflow_id = workflow.id, overlap_mode = other, "unknown overlap_mode, defaulting to skip");
                workflows::count_active_cron_runs(pool, workflow.id).await? == 0
            }
        };

        if should_start {
            let req = CreateRunRequest {
                workflow_id: workflow.id,
                version_id: None,
                input: serde_json::Value::Null,
                trigger: "cron".to_owned(),
                parent_link: None,
            };

            if let Err(err) = orchestrator::create_run(pool, queue, req).await {
                warn!(workflow_id = workflow.id, error = %err, "failed to start cron-triggered run");
            }
        }

        match cron::next_fire(cron_expr, timezone, now) {
            Ok(next) => workflows::update_schedule_next_run(pool, workflow.id, next).await?,
            Err(err) => warn!(workflow_id = workflow.id, error = %err, "failed to compute next cron fire; schedule frozen until corrected"),
        }
    }

    Ok(count)
}

/// Expire webhook-wait suspensions whose `expires_at` has passed, failing
/// the node with a non-retryable timeout.
async fn reap_webhook_timeouts(pool: &DbPool, queue: &dyn DispatchQueue, now: DateTime<Utc>) -> Result<usize, SchedulerError> {
    let expired = suspensions::find_expired(pool, now, CLAIM_BATCH_SIZE).await?;
    let mut reaped = 0;

    for token in expired {
        let Some(consumed) = suspensions::consume(pool, &token.token).await? else {
            continue;
        };

        let outcome = Outcome::Failed {
            error_kind: ErrorKind::Timeout,
            message: "webhook wait timed out".to_owned(),
            retryable: false,
        };

        if let Err(err) = orchestrator::resume(pool, queue, consumed.run_id, &consumed.node_id, outcome).await {
            warn!(run_id = %consumed.run_id, node_id = %consumed.node_id, error = %err, "failed to reap expired webhook wait");
        } else {
            reaped += 1;
        }
    }

    Ok(reaped)
}

/// Abort map/batch operations that have outrun their configured timeout.
async fn reap_map_timeouts(pool: &DbPool, queue: &dyn DispatchQueue, now: DateTime<Utc>) -> Result<usize, SchedulerError> {
    let timed_out = mapengine::list_timed_out(pool, now, CLAIM_BATCH_SIZE).await?;
    let mut reaped = 0;

    for batch in timed_out {
        match mapengine::handle_timeout(pool, queue, batch.id).await {
            Ok(()) => reaped += 1,
            Err(EngineError::Conflict) => {
                // Already finalized by a racing child completion; not an error.
            }
            Err(err) => warn!(batch_id = %batch.id, error = %err, "failed to reap timed-out map batch"),
        }
    }

    Ok(reaped)
}

/// Fail any run that has been `running` longer than `max_run_wall_time`
/// with no forward progress. This is the backstop for nodes and
/// dispatch-queue messages that are lost rather than explicitly failed.
async fn reap_stale_runs(
    pool: &DbPool,
    queue: &dyn DispatchQueue,
    now: DateTime<Utc>,
    max_run_wall_time: ChronoDuration,
) -> Result<usize, SchedulerError> {
    let cutoff = now - max_run_wall_time;
    let stale = db::repository::runs::find_stale_running(pool, cutoff, CLAIM_BATCH_SIZE).await?;
    let mut reaped = 0;

    for run in stale {
        let run_id: Uuid = run.id;
        if let Err(err) = orchestrator::fail_run(pool, queue, run_id, "stale: exceeded max wall time").await {
            warn!(%run_id, error = %err, "failed to reap stale run");
        } else {
            reaped += 1;
        }
    }

    Ok(reaped)
}
