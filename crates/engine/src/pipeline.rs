//! Multi-channel delivery pipeline.
//!
//! Delivers one notification through its channels with bounded retry, then
//! cleans up. Each channel is an independent state machine
//! (`Pending → Sent`, stamped `Exhausted` when attempts run out); a channel
//! that succeeded is never re-attempted on later retries. The loop ends when
//! every required channel has been sent or the attempt counter passes
//! `max_retries`.
//!
//! Cleanup is deliberately asymmetric: the relational delete is best-effort
//! (a stale audit row is tolerable), while job-store and timer cleanup
//! always run, so an already-fired delivery can never leave behind an armed
//! timer or a cancellable job-store entry. Running the same cleanup from a
//! concurrent cancel is therefore harmless.
//!
//! Scaled-out deployments restore timers per instance, so the same job can
//! fire on more than one node; a per-job fire-owner token would be the
//! natural extension point here.

use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;

use herald_common::types::{DeliveredNotification, NotificationJob};
use herald_notifier::channels::{PrimaryChannel, PushRequest, SecondaryChannel};
use herald_notifier::fanout::RealtimeFanout;
use herald_notifier::format::chat_message;
use herald_notifier::presence::PresenceRegistry;

use crate::job_store::JobStore;
use crate::repo::QueueRepository;
use crate::timer::TimerRegistry;

/// Whether a delivery owns durable state that must be cleaned up afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Fired from an armed timer; queue row and job-store entry exist.
    Scheduled,
    /// Send-now path: nothing was persisted, so nothing is cleaned up.
    Immediate,
}

/// Per-channel delivery progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Pending,
    Sent,
    Exhausted,
}

/// What the retry loop ended with.
#[derive(Debug, Clone)]
pub struct DeliveryReport {
    pub primary: ChannelState,
    /// `None` when the job carries no secondary address.
    pub secondary: Option<ChannelState>,
    /// Attempts performed by this invocation.
    pub attempts: i32,
}

impl DeliveryReport {
    pub fn delivered(&self) -> bool {
        self.primary == ChannelState::Sent
            && self.secondary.is_none_or(|s| s == ChannelState::Sent)
    }

    pub fn failure_reason(&self) -> Option<String> {
        let mut unsent = Vec::new();
        if self.primary != ChannelState::Sent {
            unsent.push("primary");
        }
        if self.secondary.is_some_and(|s| s != ChannelState::Sent) {
            unsent.push("secondary");
        }
        if unsent.is_empty() {
            None
        } else {
            Some(format!(
                "retries exhausted with channels still unsent: {}",
                unsent.join(", ")
            ))
        }
    }
}

/// Executes the send-with-retry protocol for one notification and performs
/// post-delivery cleanup.
pub struct DeliveryPipeline {
    pool: PgPool,
    store: JobStore,
    timers: Arc<TimerRegistry>,
    primary: Arc<dyn PrimaryChannel>,
    secondary: Arc<dyn SecondaryChannel>,
    fanout: Arc<dyn RealtimeFanout>,
    presence: Arc<PresenceRegistry>,
    frontend_base_url: String,
    retry_base_delay: Duration,
}

impl DeliveryPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: PgPool,
        store: JobStore,
        timers: Arc<TimerRegistry>,
        primary: Arc<dyn PrimaryChannel>,
        secondary: Arc<dyn SecondaryChannel>,
        fanout: Arc<dyn RealtimeFanout>,
        presence: Arc<PresenceRegistry>,
        frontend_base_url: String,
        retry_base_delay: Duration,
    ) -> Self {
        Self {
            pool,
            store,
            timers,
            primary,
            secondary,
            fanout,
            presence,
            frontend_base_url,
            retry_base_delay,
        }
    }

    /// Deliver one notification, then clean up its durable state.
    ///
    /// Exhausting retries is not an error: the notification is dropped, not
    /// requeued, and cleanup proceeds the same way as after success.
    pub async fn deliver(&self, job: NotificationJob, mode: DeliveryMode) {
        tracing::info!(job_id = %job.id, ?mode, "Delivery started");

        let report = run_channels(
            self.primary.as_ref(),
            self.secondary.as_ref(),
            self.fanout.as_ref(),
            &self.presence,
            &job,
            &self.frontend_base_url,
            self.retry_base_delay,
        )
        .await;

        if report.delivered() {
            tracing::info!(job_id = %job.id, attempts = report.attempts, "Notification delivered");
        } else {
            tracing::warn!(
                job_id = %job.id,
                attempts = report.attempts,
                reason = report.failure_reason().unwrap_or_default(),
                "Notification dropped"
            );
        }

        if mode == DeliveryMode::Scheduled {
            if let Err(error) = QueueRepository::delete(&self.pool, &job.id).await {
                tracing::warn!(
                    job_id = %job.id,
                    %error,
                    "Relational cleanup failed; stale audit row left for reconciliation"
                );
            }

            // Job-store and timer cleanup must run even when the relational
            // delete failed.
            if let Err(error) = self.store.delete(&job.id).await {
                tracing::warn!(job_id = %job.id, %error, "Job store cleanup failed");
            }
            self.timers.cancel(&job.id);

            tracing::debug!(job_id = %job.id, "Delivery cleanup finished");
        }
    }
}

/// The retry loop, separated from cleanup so the protocol is testable with
/// fake channels and a paused clock.
///
/// Attempts count from the job's current `retry_count` through `max_retries`
/// inclusive. Between failed attempts the task suspends for
/// `base × 2^(attempt − 1)`; the backoff sleep is not cancellable once
/// entered. Primary success emits the fanout event immediately, without
/// waiting for the secondary channel.
pub async fn run_channels(
    primary: &dyn PrimaryChannel,
    secondary: &dyn SecondaryChannel,
    fanout: &dyn RealtimeFanout,
    presence: &PresenceRegistry,
    job: &NotificationJob,
    frontend_base_url: &str,
    retry_base_delay: Duration,
) -> DeliveryReport {
    let start = job.retry_count.max(0);
    let max_retries = job.max_retries.max(0);

    let mut attempt = start;
    let mut primary_state = ChannelState::Pending;
    let mut secondary_state = job.whats_app.as_ref().map(|_| ChannelState::Pending);

    while attempt <= max_retries {
        if primary_state == ChannelState::Pending {
            let request = PushRequest::from_job(job);
            match primary.push(&request).await {
                Ok(()) => {
                    primary_state = ChannelState::Sent;
                    emit_fanout(fanout, presence, job).await;
                }
                Err(error) => {
                    tracing::warn!(job_id = %job.id, attempt, %error, "Primary channel send failed");
                }
            }
        }

        if secondary_state == Some(ChannelState::Pending) {
            let address = job.whats_app.as_deref().unwrap_or_default();
            let text = chat_message(job, frontend_base_url);
            match secondary.send_text(address, &text).await {
                Ok(()) => secondary_state = Some(ChannelState::Sent),
                Err(error) => {
                    tracing::warn!(job_id = %job.id, attempt, %error, "Secondary channel send failed");
                }
            }
        }

        let done = primary_state == ChannelState::Sent
            && secondary_state.is_none_or(|s| s == ChannelState::Sent);
        attempt += 1;
        if done {
            break;
        }

        if attempt <= max_retries {
            let factor = 2u32.saturating_pow((attempt - 1) as u32);
            let backoff = retry_base_delay * factor;
            tracing::info!(
                job_id = %job.id,
                attempt,
                backoff_ms = backoff.as_millis() as u64,
                "Waiting before retry"
            );
            tokio::time::sleep(backoff).await;
        }
    }

    if primary_state == ChannelState::Pending {
        primary_state = ChannelState::Exhausted;
    }
    if secondary_state == Some(ChannelState::Pending) {
        secondary_state = Some(ChannelState::Exhausted);
    }

    DeliveryReport {
        primary: primary_state,
        secondary: secondary_state,
        attempts: attempt - start,
    }
}

/// Fan the accepted notification out to live connections: everyone for a
/// broadcast, the recipient's subscribers otherwise. A fanout failure does
/// not undo the primary send.
async fn emit_fanout(fanout: &dyn RealtimeFanout, presence: &PresenceRegistry, job: &NotificationJob) {
    let event = DeliveredNotification::from_job(job);

    let result = match job.user_id.as_deref() {
        Some(user_id) if !job.is_broadcast => {
            tracing::debug!(
                job_id = %job.id,
                user_id,
                live_here = presence.is_active(user_id),
                "Emitting user fanout"
            );
            fanout.emit_to_user(user_id, &event).await
        }
        _ => fanout.emit_broadcast(&event).await,
    };

    if let Err(error) = result {
        tracing::warn!(job_id = %job.id, %error, "Realtime fanout emit failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use chrono::Utc;

    use herald_common::error::AppError;
    use herald_common::types::{NotificationCategory, NotificationPriority};

    #[derive(Default)]
    struct FakePrimary {
        calls: AtomicU32,
        fail_first: AtomicU32,
    }

    #[async_trait]
    impl PrimaryChannel for FakePrimary {
        async fn push(&self, _request: &PushRequest) -> Result<(), AppError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_first.load(Ordering::SeqCst) > 0 {
                self.fail_first.fetch_sub(1, Ordering::SeqCst);
                return Err(AppError::Channel("push rejected".to_string()));
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeSecondary {
        calls: AtomicU32,
        always_fail: bool,
    }

    #[async_trait]
    impl SecondaryChannel for FakeSecondary {
        async fn send_text(&self, _address: &str, _text: &str) -> Result<(), AppError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.always_fail {
                return Err(AppError::Channel("gateway down".to_string()));
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeFanout {
        broadcasts: AtomicU32,
        user_emits: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl RealtimeFanout for FakeFanout {
        async fn emit_broadcast(&self, _event: &DeliveredNotification) -> Result<(), AppError> {
            self.broadcasts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn emit_to_user(
            &self,
            user_id: &str,
            _event: &DeliveredNotification,
        ) -> Result<(), AppError> {
            self.user_emits.lock().unwrap().push(user_id.to_string());
            Ok(())
        }
    }

    fn make_job(whats_app: Option<&str>, max_retries: i32) -> NotificationJob {
        NotificationJob {
            id: "job-1".to_string(),
            user_id: Some("user-1".to_string()),
            is_broadcast: false,
            is_pop_up: false,
            title: "t".to_string(),
            content: "c".to_string(),
            description: None,
            kind: "generic".to_string(),
            category: NotificationCategory::System,
            priority: NotificationPriority::Normal,
            related_resource_id: None,
            related_resource_type: None,
            action_url: None,
            metadata: None,
            email: None,
            whats_app: whats_app.map(String::from),
            retry_count: 0,
            max_retries,
            run_at: Utc::now(),
            sent_at: None,
            failed_at: None,
            failure_reason: None,
        }
    }

    const BASE: Duration = Duration::from_secs(10);

    #[tokio::test(start_paused = true)]
    async fn test_single_attempt_when_both_channels_succeed() {
        let primary = FakePrimary::default();
        let secondary = FakeSecondary::default();
        let fanout = FakeFanout::default();
        let presence = PresenceRegistry::new();
        let job = make_job(Some("+628123"), 3);

        let started = tokio::time::Instant::now();
        let report = run_channels(&primary, &secondary, &fanout, &presence, &job, "https://fe", BASE).await;

        assert!(report.delivered());
        assert_eq!(report.attempts, 1);
        assert_eq!(primary.calls.load(Ordering::SeqCst), 1);
        assert_eq!(secondary.calls.load(Ordering::SeqCst), 1);
        // No backoff taken on a first-attempt success
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_secondary_retries_with_exponential_backoff() {
        let primary = FakePrimary::default();
        let secondary = FakeSecondary {
            always_fail: true,
            ..Default::default()
        };
        let fanout = FakeFanout::default();
        let presence = PresenceRegistry::new();
        let job = make_job(Some("+628123"), 3);

        let started = tokio::time::Instant::now();
        let report = run_channels(&primary, &secondary, &fanout, &presence, &job, "https://fe", BASE).await;

        // One primary send, initial + 3 retries on the secondary
        assert_eq!(primary.calls.load(Ordering::SeqCst), 1);
        assert_eq!(secondary.calls.load(Ordering::SeqCst), 4);
        assert_eq!(report.primary, ChannelState::Sent);
        assert_eq!(report.secondary, Some(ChannelState::Exhausted));
        assert!(!report.delivered());
        assert!(report.failure_reason().unwrap().contains("secondary"));
        // Backoffs of base, 2·base, 4·base between the four attempts
        assert_eq!(started.elapsed(), BASE * 7);
        // The already-sent primary produced exactly one fanout emit
        assert_eq!(fanout.user_emits.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_primary_recovers_mid_retry() {
        let primary = FakePrimary {
            fail_first: AtomicU32::new(2),
            ..Default::default()
        };
        let secondary = FakeSecondary::default();
        let fanout = FakeFanout::default();
        let presence = PresenceRegistry::new();
        let job = make_job(None, 3);

        let started = tokio::time::Instant::now();
        let report = run_channels(&primary, &secondary, &fanout, &presence, &job, "https://fe", BASE).await;

        assert!(report.delivered());
        assert_eq!(report.attempts, 3);
        assert_eq!(primary.calls.load(Ordering::SeqCst), 3);
        // No secondary address: the channel was never required
        assert_eq!(secondary.calls.load(Ordering::SeqCst), 0);
        assert_eq!(report.secondary, None);
        assert_eq!(started.elapsed(), BASE * 3);
        assert_eq!(fanout.user_emits.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_broadcast_emits_broadcast_fanout() {
        let primary = FakePrimary::default();
        let secondary = FakeSecondary::default();
        let fanout = FakeFanout::default();
        let presence = PresenceRegistry::new();
        let mut job = make_job(None, 0);
        job.user_id = None;
        job.is_broadcast = true;

        let report = run_channels(&primary, &secondary, &fanout, &presence, &job, "https://fe", BASE).await;

        assert!(report.delivered());
        assert_eq!(fanout.broadcasts.load(Ordering::SeqCst), 1);
        assert!(fanout.user_emits.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_everything_failing_exhausts_both_channels() {
        let primary = FakePrimary {
            fail_first: AtomicU32::new(u32::MAX),
            ..Default::default()
        };
        let secondary = FakeSecondary {
            always_fail: true,
            ..Default::default()
        };
        let fanout = FakeFanout::default();
        let presence = PresenceRegistry::new();
        let job = make_job(Some("+628123"), 2);

        let report = run_channels(&primary, &secondary, &fanout, &presence, &job, "https://fe", BASE).await;

        assert_eq!(report.primary, ChannelState::Exhausted);
        assert_eq!(report.secondary, Some(ChannelState::Exhausted));
        assert_eq!(report.attempts, 3);
        assert_eq!(primary.calls.load(Ordering::SeqCst), 3);
        assert_eq!(secondary.calls.load(Ordering::SeqCst), 3);
        let reason = report.failure_reason().unwrap();
        assert!(reason.contains("primary") && reason.contains("secondary"));
        assert_eq!(fanout.broadcasts.load(Ordering::SeqCst), 0);
        assert!(fanout.user_emits.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempts_resume_from_caller_supplied_retry_count() {
        let primary = FakePrimary::default();
        let secondary = FakeSecondary {
            always_fail: true,
            ..Default::default()
        };
        let fanout = FakeFanout::default();
        let presence = PresenceRegistry::new();
        let mut job = make_job(Some("+628123"), 3);
        job.retry_count = 2;

        let report = run_channels(&primary, &secondary, &fanout, &presence, &job, "https://fe", BASE).await;

        // Attempts 2 and 3 only, with one backoff of 4·base between them
        assert_eq!(secondary.calls.load(Ordering::SeqCst), 2);
        assert_eq!(report.attempts, 2);
    }
}
