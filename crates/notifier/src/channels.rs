//! Primary and secondary delivery channels.
//!
//! The primary channel hands the notification to the upstream push API,
//! which persists it for in-app display (and handles e-mail itself when the
//! `is_sending_email` flag is set). The secondary channel delivers a
//! formatted text message through the chat gateway.

use async_trait::async_trait;
use serde::Serialize;

use herald_common::error::AppError;
use herald_common::types::{
    NotificationCategory, NotificationJob, NotificationPriority, RelatedResourceType,
};

/// Payload accepted by the upstream push API.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushRequest {
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
    pub is_sending_email: bool,
    pub is_sending_whats_app: bool,
}

impl PushRequest {
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
            is_sending_email: job.email.is_some(),
            is_sending_whats_app: job.whats_app.is_some(),
        }
    }
}

/// In-app push delivery capability. Always attempted for every notification.
#[async_trait]
pub trait PrimaryChannel: Send + Sync {
    async fn push(&self, request: &PushRequest) -> Result<(), AppError>;
}

/// Address-based external messaging capability. Attempted only when the job
/// carries a secondary address.
#[async_trait]
pub trait SecondaryChannel: Send + Sync {
    async fn send_text(&self, address: &str, text: &str) -> Result<(), AppError>;
}

/// `PrimaryChannel` backed by the upstream push API over HTTP.
#[derive(Clone)]
pub struct HttpPushSender {
    client: reqwest::Client,
    base_url: String,
}

impl HttpPushSender {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl PrimaryChannel for HttpPushSender {
    async fn push(&self, request: &PushRequest) -> Result<(), AppError> {
        let url = format!("{}/notification/addNotification", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| AppError::Channel(format!("push request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Channel(format!(
                "push API returned {status}: {body}"
            )));
        }

        tracing::debug!(notification_id = %request.id, "Notification accepted by push API");
        Ok(())
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChatSendPayload<'a> {
    phone_number: &'a str,
    text: &'a str,
    use_queue: bool,
    use_human_behavior: bool,
}

/// `SecondaryChannel` backed by the chat gateway's send-rich endpoint.
#[derive(Clone)]
pub struct HttpChatSender {
    client: reqwest::Client,
    base_url: String,
    access_code: String,
}

impl HttpChatSender {
    pub fn new(base_url: impl Into<String>, access_code: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            access_code: access_code.into(),
        }
    }
}

#[async_trait]
impl SecondaryChannel for HttpChatSender {
    async fn send_text(&self, address: &str, text: &str) -> Result<(), AppError> {
        let url = format!("{}/web/send-rich?code={}", self.base_url, self.access_code);
        let payload = ChatSendPayload {
            phone_number: address,
            text,
            use_queue: true,
            use_human_behavior: true,
        };

        let response = self
            .client
            .post(&url)
            .header("code1", &self.access_code)
            .header("code2", &self.access_code)
            .json(&payload)
            .send()
            .await
            .map_err(|e| AppError::Channel(format!("chat request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Channel(format!(
                "chat gateway returned {status}: {body}"
            )));
        }

        tracing::debug!(address, "Chat message accepted by gateway");
        Ok(())
    }
}
