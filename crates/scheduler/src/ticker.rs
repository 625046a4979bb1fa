//! Cron ticker: the in-process trigger source behind scheduled notifications.
//!
//! Every tick walks the enabled triggers and fires the latest occurrence
//! that fell after the later of `armedAt` and `lastFiredAt`. Missed
//! occurrences collapse into one. A failed submit leaves `lastFiredAt`
//! untouched, so the next tick retries with the same request id.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use herald_common::error::AppError;
use herald_common::types::Trigger;
use herald_engine::cron_expr::CronExpression;
use herald_engine::schedule::{FireOutcome, NotificationSink, ScheduleService};
use herald_store::{PageRequest, Store};

/// Counts of one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub checked: usize,
    pub emitted: usize,
    pub suppressed: usize,
    pub orphaned: usize,
    pub failed: usize,
}

pub struct CronTicker {
    store: Store,
    schedules: ScheduleService,
    sink: Arc<dyn NotificationSink>,
    interval: Duration,
}

impl CronTicker {
    pub fn new(
        store: Store,
        schedules: ScheduleService,
        sink: Arc<dyn NotificationSink>,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            schedules,
            sink,
            interval: interval.max(Duration::from_secs(1)),
        }
    }

    /// Tick until the task is cancelled. Store errors are logged and the
    /// tick is retried on the next interval.
    pub async fn run(&self) -> anyhow::Result<()> {
        tracing::info!(interval_secs = self.interval.as_secs(), "Cron ticker started");

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            match self.tick_once(Utc::now()).await {
                Ok(summary) if summary.emitted + summary.orphaned + summary.failed > 0 => {
                    tracing::info!(
                        checked = summary.checked,
                        emitted = summary.emitted,
                        suppressed = summary.suppressed,
                        orphaned = summary.orphaned,
                        failed = summary.failed,
                        "Tick processed"
                    );
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "Failed to load triggers"),
            }
        }
    }

    /// Fire every trigger that is due at `now`. Only loading the trigger
    /// list fails the tick; per-trigger errors are counted in `failed`.
    pub async fn tick_once(&self, now: DateTime<Utc>) -> Result<TickSummary, AppError> {
        let triggers = self.store.list_triggers(&PageRequest::all()).await?.items;
        let mut summary = TickSummary::default();

        for trigger in triggers.into_iter().filter(|t| t.enabled) {
            summary.checked += 1;

            let expression = match CronExpression::parse(&trigger.expression) {
                Ok(expression) => expression,
                Err(e) => {
                    tracing::warn!(
                        schedule_id = %trigger.schedule_id,
                        expression = %trigger.expression,
                        error = %e,
                        "Trigger has an invalid expression"
                    );
                    summary.failed += 1;
                    continue;
                }
            };

            let Some(occurrence) = expression.latest_between(fired_since(&trigger), now) else {
                continue;
            };

            match self
                .schedules
                .fire(&trigger.schedule_id, occurrence, self.sink.as_ref())
                .await
            {
                Ok(FireOutcome::Orphaned) => summary.orphaned += 1,
                Ok(outcome) => {
                    match outcome {
                        FireOutcome::Emitted(_) => summary.emitted += 1,
                        _ => summary.suppressed += 1,
                    }
                    tracing::debug!(
                        schedule_id = %trigger.schedule_id,
                        occurrence = %occurrence,
                        next = ?expression.next_after(now),
                        "Trigger fired"
                    );
                    // Unmarked, the occurrence is fired again under the same request id.
                    if let Err(e) = self.mark_fired(&trigger.schedule_id, occurrence).await {
                        tracing::error!(
                            schedule_id = %trigger.schedule_id,
                            occurrence = %occurrence,
                            error = %e,
                            "Failed to record trigger fire"
                        );
                        summary.failed += 1;
                    }
                }
                Err(e) => {
                    tracing::error!(
                        schedule_id = %trigger.schedule_id,
                        occurrence = %occurrence,
                        error = %e,
                        "Failed to fire trigger"
                    );
                    summary.failed += 1;
                }
            }
        }

        Ok(summary)
    }

    /// Re-read before writing so a concurrent reschedule or disarm is kept.
    async fn mark_fired(&self, schedule_id: &str, occurrence: DateTime<Utc>) -> Result<(), AppError> {
        let Some(mut trigger) = self.store.get_trigger(schedule_id).await? else {
            return Ok(());
        };
        trigger.last_fired_at = Some(occurrence);
        self.store.put_trigger(&trigger).await
    }
}

/// Occurrences at or before this instant are not due.
fn fired_since(trigger: &Trigger) -> DateTime<Utc> {
    match trigger.last_fired_at {
        Some(last) => last.max(trigger.armed_at),
        None => trigger.armed_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn trigger(armed_at: DateTime<Utc>, last_fired_at: Option<DateTime<Utc>>) -> Trigger {
        Trigger {
            schedule_id: "s1".to_string(),
            expression: "0 9 ? * * *".to_string(),
            enabled: true,
            armed_at,
            last_fired_at,
        }
    }

    #[test]
    fn test_fired_since_takes_later_instant() {
        let armed = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let fired = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();

        assert_eq!(fired_since(&trigger(armed, None)), armed);
        assert_eq!(fired_since(&trigger(armed, Some(fired))), fired);

        // Re-armed after the last fire.
        let rearmed = Utc.with_ymd_and_hms(2026, 3, 5, 8, 0, 0).unwrap();
        assert_eq!(fired_since(&trigger(rearmed, Some(fired))), rearmed);
    }
}
