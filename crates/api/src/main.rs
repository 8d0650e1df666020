//! Herald API server binary entrypoint.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use herald_common::config::AppConfig;
use herald_common::db::create_pool;
use herald_common::redis_pool::create_redis_pool;

use herald_engine::job_store::JobStore;
use herald_engine::pipeline::DeliveryPipeline;
use herald_engine::restore::RestoreCoordinator;
use herald_engine::scheduler::Scheduler;
use herald_engine::timer::TimerRegistry;

use herald_notifier::channels::{HttpChatSender, HttpPushSender, PrimaryChannel, SecondaryChannel};
use herald_notifier::fanout::{RealtimeFanout, RedisFanout};
use herald_notifier::presence::PresenceRegistry;

use herald_api::routes::create_router;
use herald_api::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("herald_api=debug,herald_engine=debug,herald_notifier=debug,tower_http=debug")
        }))
        .init();

    tracing::info!("Starting Herald API server...");

    // Load configuration
    let config = AppConfig::from_env()?;

    // Create database connection pool
    let pool = create_pool(&config.database_url, config.db_max_connections).await?;

    // Run migrations
    sqlx::migrate!("../../migrations").run(&pool).await?;
    tracing::info!("Database migrations applied");

    // Create Redis connection
    let redis = create_redis_pool(&config.redis_url).await?;

    // Core components
    let store = JobStore::new(redis.clone());
    let timers = TimerRegistry::new();
    let presence = PresenceRegistry::new();

    let primary: Arc<dyn PrimaryChannel> = Arc::new(HttpPushSender::new(&config.push_api_url));
    let secondary: Arc<dyn SecondaryChannel> = Arc::new(HttpChatSender::new(
        &config.chat_api_url,
        &config.chat_access_code,
    ));
    let fanout: Arc<dyn RealtimeFanout> = Arc::new(RedisFanout::new(redis.clone()));

    let pipeline = Arc::new(DeliveryPipeline::new(
        pool.clone(),
        store.clone(),
        Arc::clone(&timers),
        primary,
        secondary,
        fanout,
        Arc::clone(&presence),
        config.frontend_base_url.clone(),
        Duration::from_millis(config.retry_base_delay_ms),
    ));

    // Re-arm timers for every still-future job before accepting traffic.
    // A relational failure here aborts startup.
    let restored = RestoreCoordinator::restore(&pool, &store, &timers, &pipeline).await?;
    tracing::info!(restored, "Restore complete");

    let scheduler = Arc::new(Scheduler::new(
        pool.clone(),
        store.clone(),
        Arc::clone(&timers),
        Arc::clone(&pipeline),
    ));

    // Build application state
    let state = AppState::new(pool, redis, config.clone(), scheduler, store, presence);

    // Build router
    let app = create_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.api_port));
    tracing::info!("API server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let cancelled = timers.cancel_all();
    tracing::info!(cancelled, "Shutdown complete");

    Ok(())
}

/// Resolve on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, draining...");
}
