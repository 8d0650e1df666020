//! Startup restore.
//!
//! Timers are pure in-memory state, so a restart loses every armed delay
//! while the relational rows live on. Before the service accepts traffic,
//! the restore coordinator reads every row with a future fire time and
//! re-arms a timer identical in shape to the one scheduling would have
//! created. A row whose fire time slipped into the past while the process
//! was down is dropped, not fired late.
//!
//! A relational read failure here is fatal: the service must not accept
//! traffic with an unknown set of pending obligations.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sqlx::PgPool;

use herald_common::error::AppError;

use crate::job_store::JobStore;
use crate::pipeline::{DeliveryMode, DeliveryPipeline};
use crate::repo::QueueRepository;
use crate::timer::TimerRegistry;

pub struct RestoreCoordinator;

impl RestoreCoordinator {
    /// Re-create job-store entries and timers for every still-future row.
    /// Returns the number of timers armed. Runs exactly once, at startup.
    pub async fn restore(
        pool: &PgPool,
        store: &JobStore,
        timers: &Arc<TimerRegistry>,
        pipeline: &Arc<DeliveryPipeline>,
    ) -> Result<u32, AppError> {
        let jobs = QueueRepository::find_future(pool, Utc::now()).await?;

        let mut armed = 0u32;
        let mut dropped = 0u32;

        for job in jobs {
            let delay_ms = (job.run_at - Utc::now()).num_milliseconds();
            if delay_ms < 0 {
                // Became due between the query and now; its timer context is
                // gone, so it is dropped rather than fired immediately.
                tracing::warn!(job_id = %job.id, run_at = %job.run_at, "Job already due; dropping");
                dropped += 1;
                continue;
            }

            // Redis may have outlived the restart even though timers did
            // not; replace any stale entry.
            store.delete(&job.id).await?;
            store.create(&job).await?;

            let pipeline = Arc::clone(pipeline);
            let fired = job.clone();
            timers.arm(&job.id, Duration::from_millis(delay_ms as u64), async move {
                pipeline.deliver(fired, DeliveryMode::Scheduled).await;
            });

            armed += 1;
        }

        tracing::info!(armed, dropped, "Restored scheduled notifications");
        Ok(armed)
    }
}
