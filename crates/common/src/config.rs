use serde::Deserialize;

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// PostgreSQL connection string
    pub database_url: String,

    /// Redis connection string
    pub redis_url: String,

    /// Port the HTTP API binds to (default: 4001)
    pub api_port: u16,

    /// Base URL of the upstream push API that persists in-app notifications
    pub push_api_url: String,

    /// Base URL of the frontend, used to absolutize relative deep links
    pub frontend_base_url: String,

    /// Base URL of the chat gateway used for the secondary channel
    pub chat_api_url: String,

    /// Access code expected by the chat gateway
    pub chat_access_code: String,

    /// Base delay for delivery retry backoff in milliseconds (default: 10000)
    pub retry_base_delay_ms: u64,

    /// Maximum number of PostgreSQL connections in the pool (default: 20)
    pub db_max_connections: u32,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            database_url: std::env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL environment variable is required"))?,
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "4001".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("API_PORT must be a valid u16"))?,
            push_api_url: std::env::var("PUSH_API_URL")
                .map_err(|_| anyhow::anyhow!("PUSH_API_URL environment variable is required"))?,
            frontend_base_url: std::env::var("FRONTEND_BASE_URL").map_err(|_| {
                anyhow::anyhow!("FRONTEND_BASE_URL environment variable is required")
            })?,
            chat_api_url: std::env::var("CHAT_API_URL")
                .map_err(|_| anyhow::anyhow!("CHAT_API_URL environment variable is required"))?,
            chat_access_code: std::env::var("CHAT_ACCESS_CODE")
                .unwrap_or_else(|_| "123".to_string()),
            retry_base_delay_ms: std::env::var("RETRY_BASE_DELAY_MS")
                .unwrap_or_else(|_| "10000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("RETRY_BASE_DELAY_MS must be a valid u64"))?,
            db_max_connections: std::env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("DB_MAX_CONNECTIONS must be a valid u32"))?,
        })
    }
}
