use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Broad grouping a notification belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum NotificationCategory {
    Promotion,
    Order,
    Subscription,
    Course,
    LiveClass,
    Tryout,
    Message,
    Payment,
    System,
    Account,
    Other,
}

/// Delivery urgency tag. Opaque to the scheduling core; forwarded to channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum NotificationPriority {
    Low,
    Normal,
    High,
    Urgent,
}

/// Kind of upstream resource a notification can be correlated with.
///
/// The `(related_resource_id, related_resource_type)` pair batches jobs tied
/// to the same resource for bulk rescheduling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum RelatedResourceType {
    Course,
    LiveClass,
}

/// A notification scheduled for future delivery.
///
/// The same shape lives in two stores: a relational row (listing/audit source
/// of truth) and a job-store hash (existence/cancellation source of truth).
/// The armed timer itself is process-local state and is never serialized.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct NotificationJob {
    pub id: String,
    /// Recipient; `None` iff `is_broadcast` is set.
    pub user_id: Option<String>,
    pub is_broadcast: bool,
    pub is_pop_up: bool,
    pub title: String,
    pub content: String,
    pub description: Option<String>,
    /// Open-vocabulary classification tag, e.g. "payment_reminder".
    #[serde(rename = "type")]
    #[sqlx(rename = "type")]
    pub kind: String,
    pub category: NotificationCategory,
    pub priority: NotificationPriority,
    pub related_resource_id: Option<String>,
    pub related_resource_type: Option<RelatedResourceType>,
    pub action_url: Option<String>,
    /// Arbitrary structured payload; round-trips losslessly (an array stays
    /// an array, an object stays an object).
    pub metadata: Option<serde_json::Value>,
    /// Secondary-channel addresses. Only `whats_app` drives the retried
    /// secondary send; `email` is forwarded to the push API as a flag.
    pub email: Option<String>,
    pub whats_app: Option<String>,
    /// Attempt counter the delivery loop starts from (typically 0).
    pub retry_count: i32,
    /// Attempt ceiling, inclusive.
    pub max_retries: i32,
    /// Absolute fire time.
    pub run_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
}

/// Wire shape of a delivered notification as emitted on the realtime fanout.
///
/// Extends the job payload with the read/archive state a fresh notification
/// starts with, so connected clients can insert it directly into their lists.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveredNotification {
    pub id: String,
    pub user_id: Option<String>,
    pub is_broadcast: bool,
    pub is_pop_up: bool,
    pub title: String,
    pub content: String,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    pub category: NotificationCategory,
    pub priority: NotificationPriority,
    pub related_resource_id: Option<String>,
    pub related_resource_type: Option<RelatedResourceType>,
    pub action_url: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub is_archived: bool,
    pub archived_at: Option<DateTime<Utc>>,
}

impl DeliveredNotification {
    pub fn from_job(job: &NotificationJob) -> Self {
        Self {
            id: job.id.clone(),
            user_id: job.user_id.clone(),
            is_broadcast: job.is_broadcast,
            is_pop_up: job.is_pop_up,
            title: job.title.clone(),
            content: job.content.clone(),
            description: job.description.clone(),
            kind: job.kind.clone(),
            category: job.category,
            priority: job.priority,
            related_resource_id: job.related_resource_id.clone(),
            related_resource_type: job.related_resource_type,
            action_url: job.action_url.clone(),
            metadata: job.metadata.clone(),
            is_read: false,
            read_at: None,
            is_archived: false,
            archived_at: None,
        }
    }
}

impl std::fmt::Display for NotificationCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotificationCategory::Promotion => write!(f, "promotion"),
            NotificationCategory::Order => write!(f, "order"),
            NotificationCategory::Subscription => write!(f, "subscription"),
            NotificationCategory::Course => write!(f, "course"),
            NotificationCategory::LiveClass => write!(f, "live_class"),
            NotificationCategory::Tryout => write!(f, "tryout"),
            NotificationCategory::Message => write!(f, "message"),
            NotificationCategory::Payment => write!(f, "payment"),
            NotificationCategory::System => write!(f, "system"),
            NotificationCategory::Account => write!(f, "account"),
            NotificationCategory::Other => write!(f, "other"),
        }
    }
}

impl FromStr for NotificationCategory {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "promotion" => Ok(NotificationCategory::Promotion),
            "order" => Ok(NotificationCategory::Order),
            "subscription" => Ok(NotificationCategory::Subscription),
            "course" => Ok(NotificationCategory::Course),
            "live_class" => Ok(NotificationCategory::LiveClass),
            "tryout" => Ok(NotificationCategory::Tryout),
            "message" => Ok(NotificationCategory::Message),
            "payment" => Ok(NotificationCategory::Payment),
            "system" => Ok(NotificationCategory::System),
            "account" => Ok(NotificationCategory::Account),
            "other" => Ok(NotificationCategory::Other),
            _ => Err(AppError::Validation(format!("unknown category '{s}'"))),
        }
    }
}

impl std::fmt::Display for NotificationPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotificationPriority::Low => write!(f, "low"),
            NotificationPriority::Normal => write!(f, "normal"),
            NotificationPriority::High => write!(f, "high"),
            NotificationPriority::Urgent => write!(f, "urgent"),
        }
    }
}

impl FromStr for NotificationPriority {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(NotificationPriority::Low),
            "normal" => Ok(NotificationPriority::Normal),
            "high" => Ok(NotificationPriority::High),
            "urgent" => Ok(NotificationPriority::Urgent),
            _ => Err(AppError::Validation(format!("unknown priority '{s}'"))),
        }
    }
}

impl std::fmt::Display for RelatedResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RelatedResourceType::Course => write!(f, "course"),
            RelatedResourceType::LiveClass => write!(f, "live_class"),
        }
    }
}

impl FromStr for RelatedResourceType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "course" => Ok(RelatedResourceType::Course),
            "live_class" => Ok(RelatedResourceType::LiveClass),
            _ => Err(AppError::Validation(format!(
                "unknown related resource type '{s}'"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_job() -> NotificationJob {
        NotificationJob {
            id: "job-1".to_string(),
            user_id: Some("user-1".to_string()),
            is_broadcast: false,
            is_pop_up: true,
            title: "Payment due".to_string(),
            content: "Your installment is due tomorrow".to_string(),
            description: None,
            kind: "payment_reminder".to_string(),
            category: NotificationCategory::Payment,
            priority: NotificationPriority::High,
            related_resource_id: None,
            related_resource_type: None,
            action_url: Some("/billing".to_string()),
            metadata: Some(serde_json::json!(["a", "b"])),
            email: None,
            whats_app: None,
            retry_count: 0,
            max_retries: 3,
            run_at: Utc::now(),
            sent_at: None,
            failed_at: None,
            failure_reason: None,
        }
    }

    #[test]
    fn test_job_serializes_camel_case() {
        let value = serde_json::to_value(sample_job()).unwrap();
        assert!(value.get("userId").is_some());
        assert!(value.get("isBroadcast").is_some());
        assert!(value.get("runAt").is_some());
        assert_eq!(value.get("type").unwrap(), "payment_reminder");
        assert!(value.get("kind").is_none());
    }

    #[test]
    fn test_category_display_round_trip() {
        for category in [
            NotificationCategory::Promotion,
            NotificationCategory::LiveClass,
            NotificationCategory::Other,
        ] {
            let parsed: NotificationCategory = category.to_string().parse().unwrap();
            assert_eq!(parsed, category);
        }
    }

    #[test]
    fn test_priority_rejects_unknown() {
        assert!("critical".parse::<NotificationPriority>().is_err());
    }

    #[test]
    fn test_delivered_notification_starts_unread() {
        let delivered = DeliveredNotification::from_job(&sample_job());
        assert!(!delivered.is_read);
        assert!(delivered.read_at.is_none());
        assert!(!delivered.is_archived);
        assert!(delivered.archived_at.is_none());
        assert!(delivered.metadata.unwrap().is_array());
    }
}
