//! Shared application state for the Axum API server.

use std::sync::Arc;

use redis::aio::ConnectionManager;
use sqlx::PgPool;

use herald_common::config::AppConfig;
use herald_engine::job_store::JobStore;
use herald_engine::scheduler::Scheduler;
use herald_notifier::presence::PresenceRegistry;

/// Application state shared across all route handlers via Axum `State`.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub redis: ConnectionManager,
    pub config: AppConfig,
    pub scheduler: Arc<Scheduler>,
    pub store: JobStore,
    pub presence: Arc<PresenceRegistry>,
}

impl AppState {
    pub fn new(
        pool: PgPool,
        redis: ConnectionManager,
        config: AppConfig,
        scheduler: Arc<Scheduler>,
        store: JobStore,
        presence: Arc<PresenceRegistry>,
    ) -> Self {
        Self {
            pool,
            redis,
            config,
            scheduler,
            store,
            presence,
        }
    }
}
