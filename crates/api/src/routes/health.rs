//! Health check endpoint.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}

/// GET /health — service liveness plus reachability of both stores.
async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    let database = sqlx::query("SELECT 1").execute(&state.pool).await.is_ok();
    let job_store = state.store.ping().await;

    let status = if database && job_store { "ok" } else { "degraded" };

    Json(json!({
        "status": status,
        "service": "herald-api",
        "version": env!("CARGO_PKG_VERSION"),
        "database": database,
        "jobStore": job_store,
    }))
}
