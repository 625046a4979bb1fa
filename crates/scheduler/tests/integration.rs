//! Ticker tests against the in-memory store and queue.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;

use herald_common::error::AppError;
use herald_common::types::{NotificationRequest, Role, Trigger};
use herald_engine::authz::RequestContext;
use herald_engine::cron_expr::CronExpression;
use herald_engine::schedule::{
    CreateSchedulePayload, NotificationSink, ScheduleService, StoreTriggerSource, request_id,
};
use herald_notifier::queue::{MemoryQueue, NotificationQueue};
use herald_scheduler::ticker::{CronTicker, TickSummary};
use herald_store::{Item, ItemKey, KvStore, MemoryStore, Page, PageRequest, Store, Table};

const HOURLY: &str = "0 * ? * * *";

// ============================================================
// Helpers
// ============================================================

struct FailingSink;

#[async_trait]
impl NotificationSink for FailingSink {
    async fn submit(&self, _: &NotificationRequest) -> Result<(), AppError> {
        Err(AppError::Internal("queue unavailable".into()))
    }
}

/// In-memory store whose trigger writes fail once `fail_trigger_writes` is set.
#[derive(Default)]
struct TriggerWriteFailingStore {
    inner: MemoryStore,
    fail_trigger_writes: AtomicBool,
}

impl TriggerWriteFailingStore {
    fn check(&self, table: Table) -> Result<(), AppError> {
        if table == Table::Triggers && self.fail_trigger_writes.load(Ordering::SeqCst) {
            return Err(AppError::Internal("trigger table unavailable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl KvStore for TriggerWriteFailingStore {
    async fn get(&self, table: Table, key: &ItemKey) -> Result<Option<Item>, AppError> {
        self.inner.get(table, key).await
    }
    async fn put(&self, table: Table, item: Item) -> Result<(), AppError> {
        self.check(table)?;
        self.inner.put(table, item).await
    }
    async fn put_if_absent(&self, table: Table, item: Item) -> Result<bool, AppError> {
        self.check(table)?;
        self.inner.put_if_absent(table, item).await
    }
    async fn put_if_present(&self, table: Table, item: Item) -> Result<bool, AppError> {
        self.check(table)?;
        self.inner.put_if_present(table, item).await
    }
    async fn delete(&self, table: Table, key: &ItemKey) -> Result<bool, AppError> {
        self.check(table)?;
        self.inner.delete(table, key).await
    }
    async fn query_partition(
        &self,
        table: Table,
        partition: &str,
        page: &PageRequest,
    ) -> Result<Page<Item>, AppError> {
        self.inner.query_partition(table, partition, page).await
    }
    async fn query_secondary(
        &self,
        table: Table,
        secondary: &str,
        page: &PageRequest,
    ) -> Result<Page<Item>, AppError> {
        self.inner.query_secondary(table, secondary, page).await
    }
    async fn scan(&self, table: Table, page: &PageRequest) -> Result<Page<Item>, AppError> {
        self.inner.scan(table, page).await
    }
    async fn delete_before(
        &self,
        table: Table,
        field: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, AppError> {
        self.inner.delete_before(table, field, cutoff).await
    }
}

fn alice() -> RequestContext {
    RequestContext::new("alice", Role::User)
}

fn service(store: &Store) -> ScheduleService {
    ScheduleService::new(
        store.clone(),
        Arc::new(StoreTriggerSource::new(store.clone())),
    )
}

fn ticker(store: &Store, sink: Arc<dyn NotificationSink>) -> CronTicker {
    CronTicker::new(store.clone(), service(store), sink, Duration::from_secs(15))
}

fn hourly_report() -> CreateSchedulePayload {
    serde_json::from_value(json!({
        "type": "report",
        "variables": {"reportType": "usage", "period": 1},
        "schedule": {"type": "cron", "expression": HOURLY}
    }))
    .unwrap()
}

async fn trigger(store: &Store, schedule_id: &str) -> Trigger {
    store.get_trigger(schedule_id).await.unwrap().unwrap()
}

fn latest(since: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    CronExpression::parse(HOURLY)
        .unwrap()
        .latest_between(since, now)
        .unwrap()
}

async fn drain(queue: &MemoryQueue) -> Vec<NotificationRequest> {
    let messages = queue.receive(10).await.unwrap();
    for message in &messages {
        queue.ack(&message.id).await.unwrap();
    }
    messages
        .iter()
        .map(|m| serde_json::from_str(&m.body).unwrap())
        .collect()
}

// ============================================================
// Firing
// ============================================================

#[tokio::test]
async fn test_due_trigger_emits_one_request_per_occurrence() {
    let store = Store::in_memory();
    let queue = Arc::new(MemoryQueue::new(Duration::from_secs(30), 3));
    let ticker = ticker(&store, queue.clone());

    let created = service(&store).create(&alice(), hourly_report()).await.unwrap();
    let armed_at = trigger(&store, &created.schedule_id).await.armed_at;

    // Nothing due yet.
    assert_eq!(ticker.tick_once(armed_at).await.unwrap().emitted, 0);

    // Three missed hours collapse into the latest one.
    let now = armed_at + chrono::Duration::minutes(185);
    let summary = ticker.tick_once(now).await.unwrap();
    assert_eq!(
        summary,
        TickSummary {
            checked: 1,
            emitted: 1,
            ..Default::default()
        }
    );

    let occurrence = latest(armed_at, now);
    let requests = drain(&queue).await;
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].id, request_id(&created.schedule_id, occurrence));
    assert_eq!(requests[0].recipients, vec!["alice".to_string()]);
    assert_eq!(requests[0].variables["period"], "1");
    assert_eq!(
        trigger(&store, &created.schedule_id).await.last_fired_at,
        Some(occurrence)
    );

    // Same instant again: already fired.
    assert_eq!(ticker.tick_once(now).await.unwrap().emitted, 0);
    assert!(drain(&queue).await.is_empty());
}

#[tokio::test]
async fn test_paused_schedule_is_skipped_and_resume_rearms() {
    let store = Store::in_memory();
    let queue = Arc::new(MemoryQueue::new(Duration::from_secs(30), 3));
    let ticker = ticker(&store, queue.clone());
    let service = service(&store);

    let created = service.create(&alice(), hourly_report()).await.unwrap();
    let armed_at = trigger(&store, &created.schedule_id).await.armed_at;
    service.pause(&alice(), &created.schedule_id).await.unwrap();

    let summary = ticker
        .tick_once(armed_at + chrono::Duration::hours(3))
        .await
        .unwrap();
    assert_eq!(summary.checked, 0);
    assert!(drain(&queue).await.is_empty());

    service.resume(&alice(), &created.schedule_id).await.unwrap();
    let rearmed_at = trigger(&store, &created.schedule_id).await.armed_at;
    assert!(rearmed_at >= armed_at);

    let now = rearmed_at + chrono::Duration::minutes(61);
    assert_eq!(ticker.tick_once(now).await.unwrap().emitted, 1);
    let requests = drain(&queue).await;
    assert_eq!(
        requests[0].id,
        request_id(&created.schedule_id, latest(rearmed_at, now))
    );
}

#[tokio::test]
async fn test_orphaned_trigger_is_removed() {
    let store = Store::in_memory();
    let queue = Arc::new(MemoryQueue::new(Duration::from_secs(30), 3));
    let ticker = ticker(&store, queue.clone());

    let created = service(&store).create(&alice(), hourly_report()).await.unwrap();
    let armed_at = trigger(&store, &created.schedule_id).await.armed_at;
    store.delete_schedule(&created.schedule_id).await.unwrap();

    let summary = ticker
        .tick_once(armed_at + chrono::Duration::hours(2))
        .await
        .unwrap();
    assert_eq!(summary.orphaned, 1);
    assert!(store.get_trigger(&created.schedule_id).await.unwrap().is_none());
    assert!(queue.is_empty().await);
}

#[tokio::test]
async fn test_failed_submit_is_retried_with_same_request_id() {
    let store = Store::in_memory();
    let created = service(&store).create(&alice(), hourly_report()).await.unwrap();
    let armed_at = trigger(&store, &created.schedule_id).await.armed_at;
    let now = armed_at + chrono::Duration::minutes(90);

    let failing = ticker(&store, Arc::new(FailingSink));
    assert_eq!(failing.tick_once(now).await.unwrap().failed, 1);
    assert_eq!(trigger(&store, &created.schedule_id).await.last_fired_at, None);

    let queue = Arc::new(MemoryQueue::new(Duration::from_secs(30), 3));
    let working = ticker(&store, queue.clone());
    assert_eq!(working.tick_once(now).await.unwrap().emitted, 1);
    let requests = drain(&queue).await;
    assert_eq!(
        requests[0].id,
        request_id(&created.schedule_id, latest(armed_at, now))
    );
}

#[tokio::test]
async fn test_invalid_trigger_expression_does_not_stop_tick() {
    let store = Store::in_memory();
    let queue = Arc::new(MemoryQueue::new(Duration::from_secs(30), 3));
    let ticker = ticker(&store, queue.clone());

    let created = service(&store).create(&alice(), hourly_report()).await.unwrap();
    let armed_at = trigger(&store, &created.schedule_id).await.armed_at;
    store
        .put_trigger(&Trigger {
            schedule_id: "broken".into(),
            expression: "not a cron".into(),
            enabled: true,
            armed_at,
            last_fired_at: None,
        })
        .await
        .unwrap();

    let summary = ticker
        .tick_once(armed_at + chrono::Duration::hours(1))
        .await
        .unwrap();
    assert_eq!(summary.checked, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.emitted, 1);
    assert_eq!(drain(&queue).await.len(), 1);
}

#[tokio::test]
async fn test_failed_fire_record_does_not_stop_tick() {
    let kv = Arc::new(TriggerWriteFailingStore::default());
    let store = Store::new(kv.clone());
    let queue = Arc::new(MemoryQueue::new(Duration::from_secs(30), 3));
    let ticker = ticker(&store, queue.clone());
    let service = service(&store);

    let first = service.create(&alice(), hourly_report()).await.unwrap();
    let second = service.create(&alice(), hourly_report()).await.unwrap();
    let armed_at = trigger(&store, &second.schedule_id).await.armed_at;
    kv.fail_trigger_writes.store(true, Ordering::SeqCst);

    let now = armed_at + chrono::Duration::minutes(61);
    let summary = ticker.tick_once(now).await.unwrap();
    assert_eq!(summary.checked, 2);
    assert_eq!(summary.emitted, 2);
    assert_eq!(summary.failed, 2);
    assert_eq!(drain(&queue).await.len(), 2);

    // Unrecorded fires are emitted again under the same request id.
    assert_eq!(trigger(&store, &first.schedule_id).await.last_fired_at, None);
    kv.fail_trigger_writes.store(false, Ordering::SeqCst);
    assert_eq!(ticker.tick_once(now).await.unwrap().emitted, 2);
    let ids: Vec<String> = drain(&queue).await.into_iter().map(|r| r.id).collect();
    assert!(ids.contains(&request_id(&second.schedule_id, latest(armed_at, now))));
    assert_eq!(ticker.tick_once(now).await.unwrap().emitted, 0);
}
