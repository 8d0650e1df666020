//! Connection presence routes. The realtime gateway reports connects and
//! disconnects here so deliveries can observe who is live on this instance.

use axum::extract::{Path, State};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use herald_notifier::presence::PresenceEntry;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/presence", post(connect))
        .route("/api/presence", get(list))
        .route("/api/presence/{connection_id}", delete(disconnect))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectRequest {
    user_id: String,
    connection_id: String,
}

/// POST /api/presence — Register a live connection for a user.
async fn connect(
    State(state): State<AppState>,
    Json(request): Json<ConnectRequest>,
) -> Json<PresenceEntry> {
    let entry = state
        .presence
        .connect(&request.user_id, &request.connection_id);
    Json(entry)
}

/// DELETE /api/presence/:connection_id — Drop a connection.
async fn disconnect(
    State(state): State<AppState>,
    Path(connection_id): Path<String>,
) -> Json<serde_json::Value> {
    let user_id = state.presence.disconnect_connection(&connection_id);
    Json(json!({
        "connectionId": connection_id,
        "userId": user_id,
        "disconnected": true,
    }))
}

/// GET /api/presence — All live connections on this instance.
async fn list(State(state): State<AppState>) -> Json<serde_json::Value> {
    let connections = state.presence.all();
    Json(json!({
        "total": connections.len(),
        "connections": connections,
    }))
}
