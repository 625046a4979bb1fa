//! Herald scheduler binary entrypoint.

use std::sync::Arc;
use std::time::Duration;

use herald_common::config::AppConfig;
use herald_common::db::{create_pool, run_migrations};
use herald_common::redis_pool::create_redis_pool;
use herald_engine::schedule::{ScheduleService, StoreTriggerSource};
use herald_notifier::queue::RedisQueue;
use herald_scheduler::ticker::CronTicker;
use herald_store::Store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "herald_scheduler=info,herald_engine=info".into()),
        )
        .json()
        .init();

    tracing::info!("Herald scheduler starting...");

    let config = AppConfig::from_env()?;

    let pool = create_pool(&config.database_url, config.db_max_connections).await?;
    run_migrations(&pool).await?;
    let store = Store::postgres(pool);
    let redis = create_redis_pool(&config.redis_url).await?;

    let schedules = ScheduleService::new(
        store.clone(),
        Arc::new(StoreTriggerSource::new(store.clone())),
    );
    let queue = RedisQueue::new(
        redis,
        &config.queue_name,
        Duration::from_secs(config.queue_visibility_timeout_secs),
        config.queue_max_receives,
    );
    let ticker = CronTicker::new(
        store,
        schedules,
        Arc::new(queue),
        Duration::from_secs(config.scheduler_tick_secs),
    );

    tokio::select! {
        result = ticker.run() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Cron ticker exited with error");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal, stopping gracefully...");
        }
    }

    tracing::info!("Herald scheduler stopped.");
    Ok(())
}
