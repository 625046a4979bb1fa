//! Periodic purge of expired delivery records.

use std::time::Duration;

use chrono::{DateTime, Utc};

use herald_common::error::AppError;
use herald_store::Store;

pub struct LedgerJanitor {
    store: Store,
    interval: Duration,
}

impl LedgerJanitor {
    pub fn new(store: Store, interval: Duration) -> Self {
        Self {
            store,
            interval: interval.max(Duration::from_secs(1)),
        }
    }

    /// Purge until the task is cancelled. Failures are logged and retried on
    /// the next interval.
    pub async fn run(&self) -> anyhow::Result<()> {
        tracing::info!(interval_secs = self.interval.as_secs(), "Ledger janitor started");

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            if let Err(e) = self.purge_once(Utc::now()).await {
                tracing::error!(error = %e, "Failed to purge expired delivery records");
            }
        }
    }

    pub async fn purge_once(&self, now: DateTime<Utc>) -> Result<u64, AppError> {
        let purged = self.store.purge_expired_deliveries(now).await?;
        if purged > 0 {
            tracing::info!(purged, "Expired delivery records purged");
        }
        Ok(purged)
    }
}
