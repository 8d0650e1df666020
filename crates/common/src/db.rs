use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// How long a request may wait for a free connection before failing.
/// Scheduling paths surface this as a storage error rather than hanging.
const ACQUIRE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

/// Create the PostgreSQL pool backing the notification queue.
///
/// `max_connections` comes from `AppConfig::db_max_connections` (default 20);
/// timer callbacks and request handlers share this pool, so it must be sized
/// for both.
pub async fn create_pool(database_url: &str, max_connections: u32) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect(database_url)
        .await?;

    tracing::info!(max_connections, "Connected to PostgreSQL");
    Ok(pool)
}
