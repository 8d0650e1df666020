//! Relational queue repository.
//!
//! The `notification_queue` table is the listing/audit source of truth for
//! scheduled jobs and the only store the restore coordinator trusts after a
//! restart. Rows exist exactly as long as a job is pending: delivery and
//! cancellation both delete them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use herald_common::error::AppError;
use herald_common::types::{
    NotificationCategory, NotificationJob, NotificationPriority, RelatedResourceType,
};

/// Filters and pagination for the pending listing.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingFilter {
    pub user_id: Option<String>,
    pub category: Option<NotificationCategory>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Compact row shape for the pending listing.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub id: String,
    pub user_id: Option<String>,
    pub is_broadcast: bool,
    pub title: String,
    #[serde(rename = "type")]
    #[sqlx(rename = "type")]
    pub kind: String,
    pub category: NotificationCategory,
    pub priority: NotificationPriority,
    pub run_at: DateTime<Utc>,
}

/// One page of pending job summaries.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingPage {
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
    pub items: Vec<JobSummary>,
}

/// Service layer for notification queue rows.
pub struct QueueRepository;

impl QueueRepository {
    /// Insert a single queue row.
    pub async fn insert(pool: &PgPool, job: &NotificationJob) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO notification_queue
                (id, user_id, is_broadcast, is_pop_up, title, content, description,
                 "type", category, priority, related_resource_id, related_resource_type,
                 action_url, metadata, email, whats_app, retry_count, max_retries,
                 run_at, sent_at, failed_at, failure_reason)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12,
                    $13, $14, $15, $16, $17, $18, $19, $20, $21, $22)
            "#,
        )
        .bind(&job.id)
        .bind(&job.user_id)
        .bind(job.is_broadcast)
        .bind(job.is_pop_up)
        .bind(&job.title)
        .bind(&job.content)
        .bind(&job.description)
        .bind(&job.kind)
        .bind(job.category)
        .bind(job.priority)
        .bind(&job.related_resource_id)
        .bind(job.related_resource_type)
        .bind(&job.action_url)
        .bind(&job.metadata)
        .bind(&job.email)
        .bind(&job.whats_app)
        .bind(job.retry_count)
        .bind(job.max_retries)
        .bind(job.run_at)
        .bind(job.sent_at)
        .bind(job.failed_at)
        .bind(&job.failure_reason)
        .execute(pool)
        .await?;

        tracing::debug!(job_id = %job.id, "Queue row inserted");
        Ok(())
    }

    /// Insert a batch of queue rows in one transaction. All-or-nothing: a
    /// failure on any row aborts the whole batch.
    pub async fn insert_many(pool: &PgPool, jobs: &[NotificationJob]) -> Result<(), AppError> {
        let mut tx = pool.begin().await?;

        for job in jobs {
            sqlx::query(
                r#"
                INSERT INTO notification_queue
                    (id, user_id, is_broadcast, is_pop_up, title, content, description,
                     "type", category, priority, related_resource_id, related_resource_type,
                     action_url, metadata, email, whats_app, retry_count, max_retries,
                     run_at, sent_at, failed_at, failure_reason)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12,
                        $13, $14, $15, $16, $17, $18, $19, $20, $21, $22)
                "#,
            )
            .bind(&job.id)
            .bind(&job.user_id)
            .bind(job.is_broadcast)
            .bind(job.is_pop_up)
            .bind(&job.title)
            .bind(&job.content)
            .bind(&job.description)
            .bind(&job.kind)
            .bind(job.category)
            .bind(job.priority)
            .bind(&job.related_resource_id)
            .bind(job.related_resource_type)
            .bind(&job.action_url)
            .bind(&job.metadata)
            .bind(&job.email)
            .bind(&job.whats_app)
            .bind(job.retry_count)
            .bind(job.max_retries)
            .bind(job.run_at)
            .bind(job.sent_at)
            .bind(job.failed_at)
            .bind(&job.failure_reason)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        tracing::debug!(count = jobs.len(), "Queue batch inserted");
        Ok(())
    }

    /// Fetch a single queue row.
    pub async fn get(pool: &PgPool, id: &str) -> Result<Option<NotificationJob>, AppError> {
        let job: Option<NotificationJob> =
            sqlx::query_as("SELECT * FROM notification_queue WHERE id = $1")
                .bind(id)
                .fetch_optional(pool)
                .await?;

        Ok(job)
    }

    /// Delete a queue row. Returns true if it was deleted.
    pub async fn delete(pool: &PgPool, id: &str) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM notification_queue WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;

        let deleted = result.rows_affected() > 0;
        if deleted {
            tracing::debug!(job_id = id, "Queue row deleted");
        }

        Ok(deleted)
    }

    /// All rows whose fire time is strictly after `after`, ascending.
    /// The restore coordinator's read path.
    pub async fn find_future(
        pool: &PgPool,
        after: DateTime<Utc>,
    ) -> Result<Vec<NotificationJob>, AppError> {
        let jobs: Vec<NotificationJob> = sqlx::query_as(
            "SELECT * FROM notification_queue WHERE run_at > $1 ORDER BY run_at ASC",
        )
        .bind(after)
        .fetch_all(pool)
        .await?;

        Ok(jobs)
    }

    /// All rows correlated with an upstream resource.
    pub async fn find_by_correlation(
        pool: &PgPool,
        related_resource_id: &str,
        related_resource_type: RelatedResourceType,
    ) -> Result<Vec<NotificationJob>, AppError> {
        let jobs: Vec<NotificationJob> = sqlx::query_as(
            r#"
            SELECT *
            FROM notification_queue
            WHERE related_resource_id = $1
              AND related_resource_type = $2
            ORDER BY run_at ASC
            "#,
        )
        .bind(related_resource_id)
        .bind(related_resource_type)
        .fetch_all(pool)
        .await?;

        Ok(jobs)
    }

    /// Move a set of rows to a new fire time with new metadata, in a single
    /// transaction spanning all of them.
    pub async fn update_schedules(
        pool: &PgPool,
        ids: &[String],
        run_at: DateTime<Utc>,
        metadata: &serde_json::Value,
    ) -> Result<(), AppError> {
        let mut tx = pool.begin().await?;

        for id in ids {
            sqlx::query(
                r#"
                UPDATE notification_queue
                SET run_at = $1, metadata = $2, updated_at = now()
                WHERE id = $3
                "#,
            )
            .bind(run_at)
            .bind(metadata)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        tracing::info!(count = ids.len(), run_at = %run_at, "Queue rows rescheduled");
        Ok(())
    }

    /// One page of pending jobs, optionally filtered by recipient and
    /// category.
    pub async fn list_pending(
        pool: &PgPool,
        filter: &PendingFilter,
    ) -> Result<PendingPage, AppError> {
        let limit = filter.limit.unwrap_or(50).clamp(1, 200);
        let offset = filter.offset.unwrap_or(0).max(0);
        let category = filter.category.map(|c| c.to_string());

        let items: Vec<JobSummary> = sqlx::query_as(
            r#"
            SELECT id, user_id, is_broadcast, title, "type", category, priority, run_at
            FROM notification_queue
            WHERE ($1::text IS NULL OR user_id = $1)
              AND ($2::text IS NULL OR category = $2)
            ORDER BY run_at ASC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(filter.user_id.as_deref())
        .bind(category.as_deref())
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await?;

        let (total,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*)
            FROM notification_queue
            WHERE ($1::text IS NULL OR user_id = $1)
              AND ($2::text IS NULL OR category = $2)
            "#,
        )
        .bind(filter.user_id.as_deref())
        .bind(category.as_deref())
        .fetch_one(pool)
        .await?;

        Ok(PendingPage {
            total,
            limit,
            offset,
            items,
        })
    }
}
