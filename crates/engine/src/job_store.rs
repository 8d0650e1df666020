//! Redis-backed job store.
//!
//! Each job lives in a hash at `notifications:job:{id}`, with its id also
//! held in the `notifications:jobs` sorted set scored by the fire time in
//! epoch milliseconds, so jobs can be ranged by time. The store answers
//! "is this still pending / cancellable" fast; the relational queue row
//! remains the listing/audit source of truth.
//!
//! Operations on different ids are safe to run concurrently; operations on
//! the same id are serialized by the scheduler.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

use herald_common::error::AppError;
use herald_common::types::NotificationJob;

/// Sorted set of job ids scored by fire time (epoch millis).
const JOBS_INDEX_KEY: &str = "notifications:jobs";

/// Hash key prefix for individual job records.
const JOB_KEY_PREFIX: &str = "notifications:job:";

fn job_key(id: &str) -> String {
    format!("{JOB_KEY_PREFIX}{id}")
}

/// Durable key/value + time-index store for scheduled notification jobs.
#[derive(Clone)]
pub struct JobStore {
    redis: ConnectionManager,
}

impl JobStore {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }

    /// Persist a job and index it by fire time.
    ///
    /// Fails with a conflict if a job with the same id already exists.
    pub async fn create(&self, job: &NotificationJob) -> Result<(), AppError> {
        let mut conn = self.redis.clone();

        let exists: bool = conn.exists(job_key(&job.id)).await?;
        if exists {
            return Err(AppError::Conflict(format!(
                "job '{}' already exists in the job store",
                job.id
            )));
        }

        let fields = to_field_pairs(job);
        conn.hset_multiple::<_, _, _, ()>(job_key(&job.id), &fields)
            .await?;
        conn.zadd::<_, _, _, ()>(JOBS_INDEX_KEY, &job.id, job.run_at.timestamp_millis())
            .await?;

        tracing::debug!(job_id = %job.id, "Job stored");
        Ok(())
    }

    /// Fetch a job by id. Returns `None` when absent; errors only on
    /// storage failure or a corrupt record.
    pub async fn get(&self, id: &str) -> Result<Option<NotificationJob>, AppError> {
        let mut conn = self.redis.clone();
        let fields: HashMap<String, String> = conn.hgetall(job_key(id)).await?;

        if fields.is_empty() {
            return Ok(None);
        }

        job_from_fields(&fields).map(Some)
    }

    /// Remove a job record and its time-index entry. Idempotent.
    pub async fn delete(&self, id: &str) -> Result<(), AppError> {
        let mut conn = self.redis.clone();

        conn.zrem::<_, _, ()>(JOBS_INDEX_KEY, id).await?;
        conn.del::<_, ()>(job_key(id)).await?;

        tracing::debug!(job_id = id, "Job deleted");
        Ok(())
    }

    /// Cheap existence check, independent of `get`.
    pub async fn exists(&self, id: &str) -> Result<bool, AppError> {
        let mut conn = self.redis.clone();
        let exists: bool = conn.exists(job_key(id)).await?;
        Ok(exists)
    }

    /// All jobs whose fire time is at or before `before`, ascending.
    ///
    /// Diagnostic/bulk listing only; the restore path reads the relational
    /// store instead, since this store does not survive between a crash and
    /// the next successful write.
    pub async fn list_due(&self, before: DateTime<Utc>) -> Result<Vec<NotificationJob>, AppError> {
        let mut conn = self.redis.clone();
        let ids: Vec<String> = conn
            .zrangebyscore(JOBS_INDEX_KEY, "-inf", before.timestamp_millis())
            .await?;

        let mut jobs = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(job) = self.get(&id).await? {
                jobs.push(job);
            }
        }
        Ok(jobs)
    }

    /// The full in-flight job set, ascending by fire time.
    pub async fn all_jobs(&self) -> Result<Vec<NotificationJob>, AppError> {
        let mut conn = self.redis.clone();
        let ids: Vec<String> = conn.zrange(JOBS_INDEX_KEY, 0, -1).await?;

        let mut jobs = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(job) = self.get(&id).await? {
                jobs.push(job);
            }
        }
        Ok(jobs)
    }

    /// Cardinality of the time index.
    pub async fn count(&self) -> Result<u64, AppError> {
        let mut conn = self.redis.clone();
        let count: u64 = conn.zcard(JOBS_INDEX_KEY).await?;
        Ok(count)
    }

    /// Health signal: can the store be reached right now?
    pub async fn ping(&self) -> bool {
        let mut conn = self.redis.clone();
        let reply: Result<String, _> = redis::cmd("PING").query_async(&mut conn).await;
        reply.is_ok()
    }
}

/// Encode a job into hash fields. Absent optionals are not written, so the
/// decoder can distinguish them from empty values.
fn to_field_pairs(job: &NotificationJob) -> Vec<(&'static str, String)> {
    let mut fields = vec![
        ("id", job.id.clone()),
        ("isBroadcast", job.is_broadcast.to_string()),
        ("isPopUp", job.is_pop_up.to_string()),
        ("title", job.title.clone()),
        ("content", job.content.clone()),
        ("type", job.kind.clone()),
        ("category", job.category.to_string()),
        ("priority", job.priority.to_string()),
        ("retryCount", job.retry_count.to_string()),
        ("maxRetries", job.max_retries.to_string()),
        ("runAt", job.run_at.to_rfc3339()),
    ];

    if let Some(user_id) = &job.user_id {
        fields.push(("userId", user_id.clone()));
    }
    if let Some(description) = &job.description {
        fields.push(("description", description.clone()));
    }
    if let Some(related_resource_id) = &job.related_resource_id {
        fields.push(("relatedResourceId", related_resource_id.clone()));
    }
    if let Some(related_resource_type) = &job.related_resource_type {
        fields.push(("relatedResourceType", related_resource_type.to_string()));
    }
    if let Some(action_url) = &job.action_url {
        fields.push(("actionUrl", action_url.clone()));
    }
    if let Some(metadata) = &job.metadata {
        fields.push(("metadata", metadata.to_string()));
    }
    if let Some(email) = &job.email {
        fields.push(("email", email.clone()));
    }
    if let Some(whats_app) = &job.whats_app {
        fields.push(("whatsApp", whats_app.clone()));
    }
    if let Some(sent_at) = &job.sent_at {
        fields.push(("sentAt", sent_at.to_rfc3339()));
    }
    if let Some(failed_at) = &job.failed_at {
        fields.push(("failedAt", failed_at.to_rfc3339()));
    }
    if let Some(failure_reason) = &job.failure_reason {
        fields.push(("failureReason", failure_reason.clone()));
    }

    fields
}

/// Decode a job from hash fields.
fn job_from_fields(fields: &HashMap<String, String>) -> Result<NotificationJob, AppError> {
    let required = |name: &str| -> Result<String, AppError> {
        fields
            .get(name)
            .cloned()
            .ok_or_else(|| AppError::Internal(format!("job record is missing field '{name}'")))
    };
    let optional = |name: &str| fields.get(name).filter(|v| !v.is_empty()).cloned();
    let flag = |name: &str| fields.get(name).map(|v| v == "true").unwrap_or(false);
    let int = |name: &str| -> Result<i32, AppError> {
        required(name)?.parse::<i32>().map_err(|e| {
            AppError::Internal(format!("job field '{name}' holds an invalid integer: {e}"))
        })
    };
    let date = |name: &str, value: String| -> Result<DateTime<Utc>, AppError> {
        DateTime::parse_from_rfc3339(&value)
            .map(|d| d.with_timezone(&Utc))
            .map_err(|e| {
                AppError::Internal(format!("job field '{name}' holds an invalid timestamp: {e}"))
            })
    };

    // A metadata blob that fails to parse is dropped rather than poisoning
    // the whole record.
    let metadata = fields
        .get("metadata")
        .and_then(|raw| match serde_json::from_str(raw) {
            Ok(value) => Some(value),
            Err(error) => {
                tracing::warn!(%error, "Discarding unparseable job metadata");
                None
            }
        });

    Ok(NotificationJob {
        id: required("id")?,
        user_id: optional("userId"),
        is_broadcast: flag("isBroadcast"),
        is_pop_up: flag("isPopUp"),
        title: required("title")?,
        content: required("content")?,
        description: optional("description"),
        kind: required("type")?,
        category: required("category")?.parse()?,
        priority: required("priority")?.parse()?,
        related_resource_id: optional("relatedResourceId"),
        related_resource_type: optional("relatedResourceType")
            .map(|v| v.parse())
            .transpose()?,
        action_url: optional("actionUrl"),
        metadata,
        email: optional("email"),
        whats_app: optional("whatsApp"),
        retry_count: int("retryCount")?,
        max_retries: int("maxRetries")?,
        run_at: date("runAt", required("runAt")?)?,
        sent_at: optional("sentAt").map(|v| date("sentAt", v)).transpose()?,
        failed_at: optional("failedAt").map(|v| date("failedAt", v)).transpose()?,
        failure_reason: optional("failureReason"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use herald_common::types::{NotificationCategory, NotificationPriority, RelatedResourceType};

    fn make_job(metadata: Option<serde_json::Value>) -> NotificationJob {
        NotificationJob {
            id: "job-1".to_string(),
            user_id: Some("user-1".to_string()),
            is_broadcast: false,
            is_pop_up: true,
            title: "Reminder".to_string(),
            content: "Class starts soon".to_string(),
            description: Some("Bring your notes".to_string()),
            kind: "liveclass_reminder".to_string(),
            category: NotificationCategory::LiveClass,
            priority: NotificationPriority::High,
            related_resource_id: Some("class-9".to_string()),
            related_resource_type: Some(RelatedResourceType::LiveClass),
            action_url: Some("/classes/9".to_string()),
            metadata,
            email: Some("a@b.c".to_string()),
            whats_app: Some("+628123".to_string()),
            retry_count: 1,
            max_retries: 5,
            run_at: "2026-08-07T10:00:00Z".parse().unwrap(),
            sent_at: None,
            failed_at: None,
            failure_reason: None,
        }
    }

    fn round_trip(job: &NotificationJob) -> NotificationJob {
        let map: HashMap<String, String> = to_field_pairs(job)
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        job_from_fields(&map).unwrap()
    }

    #[test]
    fn test_field_round_trip_preserves_all_fields() {
        let job = make_job(Some(serde_json::json!({"seat": 12})));
        let decoded = round_trip(&job);

        assert_eq!(decoded.id, job.id);
        assert_eq!(decoded.user_id, job.user_id);
        assert_eq!(decoded.is_pop_up, job.is_pop_up);
        assert_eq!(decoded.kind, job.kind);
        assert_eq!(decoded.category, job.category);
        assert_eq!(decoded.priority, job.priority);
        assert_eq!(decoded.related_resource_type, job.related_resource_type);
        assert_eq!(decoded.retry_count, 1);
        assert_eq!(decoded.max_retries, 5);
        assert_eq!(decoded.run_at, job.run_at);
        assert_eq!(decoded.whats_app, job.whats_app);
    }

    #[test]
    fn test_object_metadata_stays_an_object() {
        let decoded = round_trip(&make_job(Some(serde_json::json!({"seat": 12}))));
        assert!(decoded.metadata.unwrap().is_object());
    }

    #[test]
    fn test_array_metadata_stays_an_array() {
        let decoded = round_trip(&make_job(Some(serde_json::json!(["a", "b", 3]))));
        let metadata = decoded.metadata.unwrap();
        assert!(metadata.is_array());
        assert_eq!(metadata.as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_absent_optionals_decode_to_none() {
        let mut job = make_job(None);
        job.user_id = None;
        job.is_broadcast = true;
        job.description = None;
        job.related_resource_id = None;
        job.related_resource_type = None;
        job.action_url = None;
        job.email = None;
        job.whats_app = None;

        let decoded = round_trip(&job);
        assert!(decoded.is_broadcast);
        assert!(decoded.user_id.is_none());
        assert!(decoded.metadata.is_none());
        assert!(decoded.related_resource_type.is_none());
        assert!(decoded.whats_app.is_none());
    }

    #[test]
    fn test_corrupt_metadata_is_dropped() {
        let job = make_job(None);
        let mut map: HashMap<String, String> = to_field_pairs(&job)
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        map.insert("metadata".to_string(), "{not json".to_string());

        let decoded = job_from_fields(&map).unwrap();
        assert!(decoded.metadata.is_none());
    }

    #[test]
    fn test_missing_required_field_is_an_error() {
        let job = make_job(None);
        let mut map: HashMap<String, String> = to_field_pairs(&job)
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        map.remove("title");

        assert!(job_from_fields(&map).is_err());
    }
}
