//! Secondary-channel message formatting.

use herald_common::types::NotificationJob;

/// Render the text message sent over the secondary channel.
///
/// An `action_url` starting with `/` is treated as a frontend-relative deep
/// link and prefixed with the configured base URL; one starting with `http`
/// is used verbatim; anything else is omitted.
pub fn chat_message(job: &NotificationJob, frontend_base_url: &str) -> String {
    let mut text = format!("*{}*\n", job.title);
    text.push_str(&format!("\n{}", job.content));

    if let Some(description) = &job.description {
        text.push_str(&format!("\n\n_{}_", description));
    }

    text.push_str("\n\n━━━━━━━━━━━━━━━");
    text.push_str(&format!("\n📌 Category: *{}*", job.category));
    text.push_str(&format!("\n📋 Type: {}", job.kind));

    if let Some(action_url) = job.action_url.as_deref().filter(|u| !u.is_empty()) {
        if action_url.starts_with('/') {
            text.push_str(&format!("\n🔗 Open: {frontend_base_url}{action_url}"));
        } else if action_url.starts_with("http") {
            text.push_str(&format!("\n🔗 Open: {action_url}"));
        }
    }

    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use herald_common::types::{NotificationCategory, NotificationPriority};

    fn make_job(action_url: Option<&str>, description: Option<&str>) -> NotificationJob {
        NotificationJob {
            id: "n-1".to_string(),
            user_id: Some("u-1".to_string()),
            is_broadcast: false,
            is_pop_up: false,
            title: "Class starting".to_string(),
            content: "Your live class starts in 30 minutes".to_string(),
            description: description.map(String::from),
            kind: "liveclass_reminder".to_string(),
            category: NotificationCategory::LiveClass,
            priority: NotificationPriority::High,
            related_resource_id: None,
            related_resource_type: None,
            action_url: action_url.map(String::from),
            metadata: None,
            email: None,
            whats_app: Some("+628123".to_string()),
            retry_count: 0,
            max_retries: 3,
            run_at: Utc::now(),
            sent_at: None,
            failed_at: None,
            failure_reason: None,
        }
    }

    #[test]
    fn test_message_contains_title_content_and_tags() {
        let text = chat_message(&make_job(None, None), "https://app.example.com");
        assert!(text.starts_with("*Class starting*"));
        assert!(text.contains("Your live class starts in 30 minutes"));
        assert!(text.contains("📌 Category: *live_class*"));
        assert!(text.contains("📋 Type: liveclass_reminder"));
        assert!(!text.contains("🔗"));
    }

    #[test]
    fn test_description_is_italicized() {
        let text = chat_message(&make_job(None, Some("Room B")), "https://app.example.com");
        assert!(text.contains("_Room B_"));
    }

    #[test]
    fn test_relative_action_url_gets_base_prefix() {
        let text = chat_message(
            &make_job(Some("/classes/42"), None),
            "https://app.example.com",
        );
        assert!(text.contains("🔗 Open: https://app.example.com/classes/42"));
    }

    #[test]
    fn test_absolute_action_url_is_verbatim() {
        let text = chat_message(
            &make_job(Some("https://other.example.com/x"), None),
            "https://app.example.com",
        );
        assert!(text.contains("🔗 Open: https://other.example.com/x"));
    }

    #[test]
    fn test_unrecognized_action_url_is_omitted() {
        let text = chat_message(&make_job(Some("classes/42"), None), "https://app.example.com");
        assert!(!text.contains("🔗"));
    }
}
