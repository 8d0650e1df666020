//! Scheduling orchestration.
//!
//! Coordinates the relational queue row, the job store, and the timer
//! registry for schedule, bulk-schedule, cancel, and correlation-based
//! reschedule operations. Write order on the schedule path is fixed:
//! relational row, then job-store entry, then armed timer, so a failed
//! durable write can never leave an armed timer behind.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use herald_common::error::AppError;
use herald_common::types::{
    NotificationCategory, NotificationJob, NotificationPriority, RelatedResourceType,
};

use crate::job_store::JobStore;
use crate::pipeline::{DeliveryMode, DeliveryPipeline};
use crate::repo::QueueRepository;
use crate::timer::TimerRegistry;

/// A request to deliver one notification, now or at `run_at`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleRequest {
    /// Generated when absent.
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    pub is_broadcast: bool,
    pub is_pop_up: bool,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    pub category: NotificationCategory,
    pub priority: NotificationPriority,
    #[serde(default)]
    pub related_resource_id: Option<String>,
    #[serde(default)]
    pub related_resource_type: Option<RelatedResourceType>,
    #[serde(default)]
    pub action_url: Option<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    /// Absent means "send now" (no durable state, delivered immediately).
    #[serde(default)]
    pub run_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub whats_app: Option<String>,
    #[serde(default)]
    pub retry_count: i32,
    pub max_retries: i32,
}

/// One recipient of a bulk schedule.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRecipient {
    pub user_id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub whats_app: Option<String>,
}

/// One message body fanned out to many recipients with generated ids.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleBatchRequest {
    pub users: Vec<BatchRecipient>,
    pub is_pop_up: bool,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    pub category: NotificationCategory,
    pub priority: NotificationPriority,
    #[serde(default)]
    pub related_resource_id: Option<String>,
    #[serde(default)]
    pub related_resource_type: Option<RelatedResourceType>,
    #[serde(default)]
    pub action_url: Option<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    #[serde(default)]
    pub run_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub retry_count: i32,
    pub max_retries: i32,
}

/// Move every job correlated with a resource to a new fire time.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RescheduleRequest {
    pub related_resource_id: String,
    pub related_resource_type: RelatedResourceType,
    pub run_at: DateTime<Utc>,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleStatus {
    Scheduled,
    Sent,
}

/// The accepted job plus the delay it was armed with.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledJob {
    #[serde(flatten)]
    pub job: NotificationJob,
    pub scheduled_in_ms: i64,
    pub status: ScheduleStatus,
}

/// Orchestrates schedule/cancel/reschedule across the three stores.
pub struct Scheduler {
    pool: PgPool,
    store: JobStore,
    timers: Arc<TimerRegistry>,
    pipeline: Arc<DeliveryPipeline>,
}

impl Scheduler {
    pub fn new(
        pool: PgPool,
        store: JobStore,
        timers: Arc<TimerRegistry>,
        pipeline: Arc<DeliveryPipeline>,
    ) -> Self {
        Self {
            pool,
            store,
            timers,
            pipeline,
        }
    }

    /// Schedule one notification, or deliver it immediately when `run_at`
    /// is absent.
    pub async fn schedule(&self, request: ScheduleRequest) -> Result<ScheduledJob, AppError> {
        let user_id = normalize(request.user_id.as_deref());
        validate_addressing(user_id.as_deref(), request.is_broadcast)?;
        validate_retry_bounds(request.retry_count, request.max_retries)?;
        if request.kind.trim().is_empty() {
            return Err(AppError::Validation("type must not be empty".to_string()));
        }

        let now = Utc::now();
        let run_at = request.run_at;
        let job = build_job(&request, user_id, run_at.unwrap_or(now));

        let Some(run_at) = run_at else {
            // Send-now: bypass persistence entirely.
            tracing::info!(job_id = %job.id, "Immediate delivery requested");
            self.pipeline
                .deliver(job.clone(), DeliveryMode::Immediate)
                .await;
            return Ok(ScheduledJob {
                job,
                scheduled_in_ms: 0,
                status: ScheduleStatus::Sent,
            });
        };

        let delay_ms = (run_at - now).num_milliseconds();
        if delay_ms < 0 {
            return Err(AppError::PastDeadline(format!(
                "runAt {} is already past",
                run_at.to_rfc3339()
            )));
        }

        if self.store.exists(&job.id).await? {
            return Err(AppError::Conflict(format!(
                "notification '{}' is already scheduled",
                job.id
            )));
        }

        QueueRepository::insert(&self.pool, &job).await?;
        if let Err(error) = self.store.create(&job).await {
            // Roll the relational row back so a half-written job is not
            // restored after a restart.
            if let Err(db_error) = QueueRepository::delete(&self.pool, &job.id).await {
                tracing::error!(
                    job_id = %job.id,
                    %db_error,
                    "Failed to roll back queue row; stores are inconsistent"
                );
            }
            return Err(error);
        }

        self.arm(&job, Duration::from_millis(delay_ms as u64));

        tracing::info!(job_id = %job.id, delay_ms, run_at = %run_at, "Notification scheduled");
        Ok(ScheduledJob {
            job,
            scheduled_in_ms: delay_ms,
            status: ScheduleStatus::Scheduled,
        })
    }

    /// Fan one message body out to many recipients, each with a generated id
    /// and its own addresses. Returns the number of accepted jobs.
    ///
    /// On the timed path, the relational batch is written first and aborts
    /// the whole request on failure, before any timer is armed. A recipient
    /// whose generated id collides with an existing job-store entry silently
    /// replaces it; the batch path tolerates overwrite where the single path
    /// conflicts.
    pub async fn schedule_many(&self, request: ScheduleBatchRequest) -> Result<u32, AppError> {
        if request.users.is_empty() {
            return Err(AppError::Validation(
                "users must not be empty".to_string(),
            ));
        }
        validate_retry_bounds(request.retry_count, request.max_retries)?;
        if request.kind.trim().is_empty() {
            return Err(AppError::Validation("type must not be empty".to_string()));
        }

        let now = Utc::now();
        let run_at = request.run_at;
        let effective_run_at = run_at.unwrap_or(now);

        if let Some(run_at) = run_at {
            let delay_ms = (run_at - now).num_milliseconds();
            if delay_ms < 0 {
                return Err(AppError::PastDeadline(format!(
                    "runAt {} is already past",
                    run_at.to_rfc3339()
                )));
            }
        }

        let jobs: Vec<NotificationJob> = request
            .users
            .iter()
            .map(|recipient| batch_job(&request, recipient, effective_run_at))
            .collect();

        let mut accepted = 0u32;

        match run_at {
            Some(run_at) => {
                QueueRepository::insert_many(&self.pool, &jobs).await?;

                for job in jobs {
                    if self.store.exists(&job.id).await? {
                        self.store.delete(&job.id).await?;
                    }
                    self.store.create(&job).await?;

                    let delay_ms = (run_at - Utc::now()).num_milliseconds().max(0);
                    self.arm(&job, Duration::from_millis(delay_ms as u64));
                    accepted += 1;
                }

                tracing::info!(accepted, run_at = %run_at, "Notification batch scheduled");
            }
            None => {
                for job in jobs {
                    self.pipeline.deliver(job, DeliveryMode::Immediate).await;
                    accepted += 1;
                }

                tracing::info!(accepted, "Notification batch delivered immediately");
            }
        }

        Ok(accepted)
    }

    /// Cancel a scheduled notification: timer, then job-store entry, then
    /// the relational row (best-effort, so a missing audit row never blocks
    /// cancellation of the durable/timer state).
    pub async fn cancel(&self, id: &str) -> Result<(), AppError> {
        if !self.store.exists(id).await? {
            return Err(AppError::NotFound(format!(
                "notification '{id}' not found"
            )));
        }

        self.timers.cancel(id);
        self.store.delete(id).await?;

        if let Err(error) = QueueRepository::delete(&self.pool, id).await {
            tracing::warn!(job_id = id, %error, "Relational delete failed during cancellation");
        }

        tracing::info!(job_id = id, "Notification cancelled");
        Ok(())
    }

    /// Move every currently scheduled job correlated with a resource to a
    /// new fire time, updating metadata in place. Returns the number of jobs
    /// rescheduled.
    ///
    /// Eligibility and deadline checks run before anything is written; the
    /// relational updates then commit in one transaction spanning all
    /// matched rows, and only after commit are job-store entries and timers
    /// re-created. A validation failure therefore leaves every store
    /// untouched.
    pub async fn reschedule_by_correlation(
        &self,
        request: RescheduleRequest,
    ) -> Result<u32, AppError> {
        let rows = QueueRepository::find_by_correlation(
            &self.pool,
            &request.related_resource_id,
            request.related_resource_type,
        )
        .await?;

        if rows.is_empty() {
            return Ok(0);
        }

        let mut eligible = Vec::new();
        for job in rows {
            // Only items still armed in the job store are rescheduled;
            // anything already fired or cancelled is skipped.
            if !self.store.exists(&job.id).await? {
                continue;
            }

            let delay_ms = (request.run_at - Utc::now()).num_milliseconds();
            if delay_ms < 0 {
                return Err(AppError::PastDeadline(format!(
                    "runAt {} is already past",
                    request.run_at.to_rfc3339()
                )));
            }

            eligible.push((job, delay_ms));
        }

        if eligible.is_empty() {
            return Ok(0);
        }

        let ids: Vec<String> = eligible.iter().map(|(job, _)| job.id.clone()).collect();
        QueueRepository::update_schedules(&self.pool, &ids, request.run_at, &request.metadata)
            .await?;

        let mut updated = 0u32;
        for (mut job, delay_ms) in eligible {
            job.run_at = request.run_at;
            job.metadata = Some(request.metadata.clone());

            self.timers.cancel(&job.id);
            self.store.delete(&job.id).await?;
            self.store.create(&job).await?;
            self.arm(&job, Duration::from_millis(delay_ms as u64));

            updated += 1;
        }

        tracing::info!(
            updated,
            related_resource_id = %request.related_resource_id,
            "Correlated notifications rescheduled"
        );
        Ok(updated)
    }

    fn arm(&self, job: &NotificationJob, delay: Duration) {
        let pipeline = Arc::clone(&self.pipeline);
        let fired = job.clone();
        self.timers.arm(&job.id, delay, async move {
            pipeline.deliver(fired, DeliveryMode::Scheduled).await;
        });
    }
}

fn normalize(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

/// Exactly one of recipient or broadcast must be set.
fn validate_addressing(user_id: Option<&str>, is_broadcast: bool) -> Result<(), AppError> {
    match (user_id, is_broadcast) {
        (Some(_), true) => Err(AppError::Validation(
            "userId must be empty for a broadcast notification".to_string(),
        )),
        (None, false) => Err(AppError::Validation(
            "userId is required for a non-broadcast notification".to_string(),
        )),
        _ => Ok(()),
    }
}

fn validate_retry_bounds(retry_count: i32, max_retries: i32) -> Result<(), AppError> {
    if retry_count < 0 || max_retries < 0 {
        return Err(AppError::Validation(
            "retryCount and maxRetries must not be negative".to_string(),
        ));
    }
    Ok(())
}

fn build_job(
    request: &ScheduleRequest,
    user_id: Option<String>,
    run_at: DateTime<Utc>,
) -> NotificationJob {
    NotificationJob {
        id: request
            .id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(String::from)
            .unwrap_or_else(|| Uuid::new_v4().to_string()),
        user_id,
        is_broadcast: request.is_broadcast,
        is_pop_up: request.is_pop_up,
        title: request.title.clone(),
        content: request.content.clone(),
        description: request.description.clone(),
        kind: request.kind.clone(),
        category: request.category,
        priority: request.priority,
        related_resource_id: request.related_resource_id.clone(),
        related_resource_type: request.related_resource_type,
        action_url: request.action_url.clone(),
        metadata: request.metadata.clone(),
        email: normalize(request.email.as_deref()),
        whats_app: normalize(request.whats_app.as_deref()),
        retry_count: request.retry_count,
        max_retries: request.max_retries,
        run_at,
        sent_at: None,
        failed_at: None,
        failure_reason: None,
    }
}

fn batch_job(
    request: &ScheduleBatchRequest,
    recipient: &BatchRecipient,
    run_at: DateTime<Utc>,
) -> NotificationJob {
    NotificationJob {
        id: Uuid::new_v4().to_string(),
        user_id: Some(recipient.user_id.clone()),
        is_broadcast: false,
        is_pop_up: request.is_pop_up,
        title: request.title.clone(),
        content: request.content.clone(),
        description: request.description.clone(),
        kind: request.kind.clone(),
        category: request.category,
        priority: request.priority,
        related_resource_id: request.related_resource_id.clone(),
        related_resource_type: request.related_resource_type,
        action_url: request.action_url.clone(),
        metadata: request.metadata.clone(),
        email: normalize(recipient.email.as_deref()),
        whats_app: normalize(recipient.whats_app.as_deref()),
        retry_count: request.retry_count,
        max_retries: request.max_retries,
        run_at,
        sent_at: None,
        failed_at: None,
        failure_reason: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recipient_without_broadcast_is_valid() {
        assert!(validate_addressing(Some("u-1"), false).is_ok());
    }

    #[test]
    fn test_broadcast_without_recipient_is_valid() {
        assert!(validate_addressing(None, true).is_ok());
    }

    #[test]
    fn test_both_recipient_and_broadcast_is_rejected() {
        assert!(validate_addressing(Some("u-1"), true).is_err());
    }

    #[test]
    fn test_neither_recipient_nor_broadcast_is_rejected() {
        assert!(validate_addressing(None, false).is_err());
    }

    #[test]
    fn test_negative_retry_bounds_are_rejected() {
        assert!(validate_retry_bounds(-1, 3).is_err());
        assert!(validate_retry_bounds(0, -1).is_err());
        assert!(validate_retry_bounds(0, 0).is_ok());
    }

    #[test]
    fn test_blank_user_id_normalizes_to_none() {
        assert_eq!(normalize(Some("  ")), None);
        assert_eq!(normalize(Some("")), None);
        assert_eq!(normalize(Some(" u-1 ")), Some("u-1".to_string()));
        assert_eq!(normalize(None), None);
    }
}
