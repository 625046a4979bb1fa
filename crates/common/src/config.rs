use serde::Deserialize;

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// PostgreSQL connection string
    pub database_url: String,

    /// Redis connection string (queue transport and in-app publish)
    pub redis_url: String,

    /// Maximum number of PostgreSQL connections in the pool (default: 20)
    pub db_max_connections: u32,

    /// Address the API server binds to (default: 0.0.0.0:3000)
    pub api_bind_addr: String,

    /// Name of the notification request queue
    pub queue_name: String,

    /// Messages received per batch (default and maximum: 10)
    pub queue_batch_size: usize,

    /// Seconds a received message stays invisible before it is redelivered
    pub queue_visibility_timeout_secs: u64,

    /// Receives after which a message is moved to the dead-letter list
    pub queue_max_receives: u32,

    /// Sleep between empty polls in milliseconds
    pub queue_poll_interval_ms: u64,

    /// Per-item processing timeout in seconds
    pub processing_timeout_secs: u64,

    /// Cron ticker interval in seconds
    pub scheduler_tick_secs: u64,

    /// Lifetime of delivery records in hours
    pub ledger_ttl_hours: i64,

    /// Seconds between purges of expired delivery records (default: 3600)
    pub ledger_purge_interval_secs: u64,

    /// Resend API key for email delivery
    pub resend_api_key: Option<String>,

    /// Fallback email sender address when the global config has none
    pub email_from: Option<String>,

    /// Timeout for outbound channel HTTP calls in seconds
    pub http_timeout_secs: u64,
}

/// Hard upper bound on the queue batch size.
pub const MAX_QUEUE_BATCH_SIZE: usize = 10;

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let queue_batch_size: usize = std::env::var("QUEUE_BATCH_SIZE")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .map_err(|_| anyhow::anyhow!("QUEUE_BATCH_SIZE must be a valid usize"))?;
        if queue_batch_size == 0 || queue_batch_size > MAX_QUEUE_BATCH_SIZE {
            anyhow::bail!("QUEUE_BATCH_SIZE must be between 1 and {MAX_QUEUE_BATCH_SIZE}");
        }

        Ok(Self {
            database_url: std::env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL environment variable is required"))?,
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            db_max_connections: std::env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("DB_MAX_CONNECTIONS must be a valid u32"))?,
            api_bind_addr: std::env::var("API_BIND_ADDR")
                .unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            queue_name: std::env::var("QUEUE_NAME")
                .unwrap_or_else(|_| "notification-requests".to_string()),
            queue_batch_size,
            queue_visibility_timeout_secs: std::env::var("QUEUE_VISIBILITY_TIMEOUT_SECS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("QUEUE_VISIBILITY_TIMEOUT_SECS must be a valid u64"))?,
            queue_max_receives: std::env::var("QUEUE_MAX_RECEIVES")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("QUEUE_MAX_RECEIVES must be a valid u32"))?,
            queue_poll_interval_ms: std::env::var("QUEUE_POLL_INTERVAL_MS")
                .unwrap_or_else(|_| "1000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("QUEUE_POLL_INTERVAL_MS must be a valid u64"))?,
            processing_timeout_secs: std::env::var("PROCESSING_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PROCESSING_TIMEOUT_SECS must be a valid u64"))?,
            scheduler_tick_secs: std::env::var("SCHEDULER_TICK_SECS")
                .unwrap_or_else(|_| "15".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("SCHEDULER_TICK_SECS must be a valid u64"))?,
            ledger_ttl_hours: std::env::var("LEDGER_TTL_HOURS")
                .unwrap_or_else(|_| "24".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("LEDGER_TTL_HOURS must be a valid i64"))?,
            ledger_purge_interval_secs: std::env::var("LEDGER_PURGE_INTERVAL_SECS")
                .unwrap_or_else(|_| "3600".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("LEDGER_PURGE_INTERVAL_SECS must be a valid u64"))?,
            resend_api_key: std::env::var("RESEND_API_KEY").ok(),
            email_from: std::env::var("EMAIL_FROM").ok(),
            http_timeout_secs: std::env::var("HTTP_TIMEOUT_SECS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("HTTP_TIMEOUT_SECS must be a valid u64"))?,
        })
    }
}
