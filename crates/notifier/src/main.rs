//! Herald notification worker binary entrypoint.

use std::sync::Arc;
use std::time::Duration;

use herald_common::config::AppConfig;
use herald_common::db::{create_pool, run_migrations};
use herald_common::redis_pool::create_redis_pool;
use herald_engine::processor::FanOutProcessor;
use herald_notifier::channels::ChannelRouter;
use herald_notifier::channels::email::EmailSender;
use herald_notifier::channels::in_app::InAppPublisher;
use herald_notifier::channels::slack::SlackSender;
use herald_notifier::janitor::LedgerJanitor;
use herald_notifier::queue::RedisQueue;
use herald_notifier::worker::{BatchWorker, WorkerConfig};
use herald_store::Store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "herald_notifier=info,herald_engine=info".into()),
        )
        .json()
        .init();

    tracing::info!("Herald notifier starting...");

    let config = AppConfig::from_env()?;

    let pool = create_pool(&config.database_url, config.db_max_connections).await?;
    run_migrations(&pool).await?;
    let store = Store::postgres(pool);
    let redis = create_redis_pool(&config.redis_url).await?;

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.http_timeout_secs))
        .build()?;
    let mut router = ChannelRouter::new()
        .with_slack(SlackSender::new(http.clone()))
        .with_in_app(InAppPublisher::new(redis.clone()));
    match &config.resend_api_key {
        Some(key) => router = router.with_email(EmailSender::new(http, key.clone())),
        None => tracing::warn!("RESEND_API_KEY not set, email deliveries will fail"),
    }

    let janitor = LedgerJanitor::new(
        store.clone(),
        Duration::from_secs(config.ledger_purge_interval_secs),
    );
    let processor = FanOutProcessor::new(
        store,
        Arc::new(router),
        chrono::Duration::hours(config.ledger_ttl_hours),
    )
    .with_default_email_from(config.email_from.clone());

    let queue = RedisQueue::new(
        redis,
        &config.queue_name,
        Duration::from_secs(config.queue_visibility_timeout_secs),
        config.queue_max_receives,
    );
    let worker = BatchWorker::new(
        Arc::new(queue),
        Arc::new(processor),
        WorkerConfig {
            batch_size: config.queue_batch_size,
            poll_interval: Duration::from_millis(config.queue_poll_interval_ms),
            item_timeout: Duration::from_secs(config.processing_timeout_secs),
        },
    );

    tokio::select! {
        result = worker.run() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Batch worker exited with error");
                return Err(e);
            }
        }
        result = janitor.run() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Ledger janitor exited with error");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal, stopping gracefully...");
        }
    }

    tracing::info!("Herald notifier stopped.");
    Ok(())
}
