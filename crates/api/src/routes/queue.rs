//! Notification queue routes.

use axum::extract::{Path, Query, State};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde_json::json;

use herald_common::error::AppError;
use herald_engine::repo::{PendingFilter, PendingPage, QueueRepository};
use herald_engine::scheduler::{
    RescheduleRequest, ScheduleBatchRequest, ScheduleRequest, ScheduledJob,
};

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/queue", post(schedule))
        .route("/api/queue", get(all_jobs))
        .route("/api/queue/{id}", delete(cancel))
        .route("/api/queue/batch", post(schedule_batch))
        .route("/api/queue/reschedule", post(reschedule))
        .route("/api/queue/pending", get(list_pending))
        .route("/api/queue/count", get(job_count))
}

/// POST /api/queue — Schedule one notification (or send it now when `runAt`
/// is absent).
async fn schedule(
    State(state): State<AppState>,
    Json(request): Json<ScheduleRequest>,
) -> Result<Json<ScheduledJob>, AppError> {
    let scheduled = state.scheduler.schedule(request).await?;
    Ok(Json(scheduled))
}

/// POST /api/queue/batch — Schedule one message body for many recipients.
async fn schedule_batch(
    State(state): State<AppState>,
    Json(request): Json<ScheduleBatchRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let accepted = state.scheduler.schedule_many(request).await?;
    Ok(Json(json!({ "accepted": accepted })))
}

/// POST /api/queue/reschedule — Move every job correlated with a resource to
/// a new fire time.
async fn reschedule(
    State(state): State<AppState>,
    Json(request): Json<RescheduleRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let updated = state.scheduler.reschedule_by_correlation(request).await?;
    Ok(Json(json!({ "updated": updated })))
}

/// DELETE /api/queue/:id — Cancel a scheduled notification.
async fn cancel(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.scheduler.cancel(&id).await?;
    Ok(Json(json!({ "id": id, "cancelled": true })))
}

/// GET /api/queue — Diagnostic dump of the full in-flight job set.
async fn all_jobs(State(state): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    let jobs = state.store.all_jobs().await?;
    Ok(Json(json!({
        "totalScheduled": jobs.len(),
        "scheduledNotifications": jobs,
        "timestamp": Utc::now(),
    })))
}

/// GET /api/queue/pending — Page of pending job summaries from the
/// relational store.
async fn list_pending(
    State(state): State<AppState>,
    Query(filter): Query<PendingFilter>,
) -> Result<Json<PendingPage>, AppError> {
    let page = QueueRepository::list_pending(&state.pool, &filter).await?;
    Ok(Json(page))
}

/// GET /api/queue/count — Cardinality of the job-store time index.
async fn job_count(State(state): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    let count = state.store.count().await?;
    Ok(Json(json!({ "count": count })))
}
