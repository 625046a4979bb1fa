//! Typed access to the notification collections.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::PgPool;

use herald_common::error::AppError;
use herald_common::types::{
    DeliveryRecord, PreferenceRecord, ScheduledNotification, SystemConfigRecord, Template,
    Trigger, TypeChannel, User,
};

use crate::kv::{Item, ItemKey, KvStore, Page, PageRequest, Table};
use crate::memory::MemoryStore;
use crate::postgres::PgStore;

/// Store adapter shared by the API, the worker and the scheduler.
#[derive(Clone)]
pub struct Store {
    kv: Arc<dyn KvStore>,
}

impl Store {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    pub fn postgres(pool: PgPool) -> Self {
        Self::new(Arc::new(PgStore::new(pool)))
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    // ---- users ----

    pub async fn get_user(&self, user_id: &str) -> Result<Option<User>, AppError> {
        self.get_as(Table::Users, &ItemKey::partition(user_id)).await
    }

    pub async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        let page = self
            .kv
            .query_secondary(
                Table::Users,
                &email.to_lowercase(),
                &PageRequest {
                    limit: 1,
                    after: None,
                },
            )
            .await?;
        page.items.into_iter().next().map(decode).transpose()
    }

    /// Provision a user. Returns `false` when the user id is taken; a taken
    /// email is a conflict.
    pub async fn create_user(&self, user: &User) -> Result<bool, AppError> {
        if let Some(existing) = self.find_user_by_email(&user.email).await? {
            if existing.user_id != user.user_id {
                return Err(AppError::Conflict(format!(
                    "Email {} is already registered",
                    user.email
                )));
            }
        }
        let item = encode(
            ItemKey::partition(&user.user_id),
            Some(user.email.to_lowercase()),
            user,
        )?;
        if self.kv.put_if_absent(Table::Users, item).await? {
            return Ok(true);
        }
        // Lost a race: either the id or the email was taken meanwhile.
        if self.get_user(&user.user_id).await?.is_some() {
            return Ok(false);
        }
        Err(AppError::Conflict(format!(
            "Email {} is already registered",
            user.email
        )))
    }

    pub async fn list_users(&self, page: &PageRequest) -> Result<Page<User>, AppError> {
        self.kv.scan(Table::Users, page).await?.try_map(decode)
    }

    // ---- templates ----

    pub async fn get_template(
        &self,
        context: &str,
        type_channel: TypeChannel,
    ) -> Result<Option<Template>, AppError> {
        self.get_as(Table::Templates, &template_key(context, type_channel))
            .await
    }

    pub async fn create_template(&self, template: &Template) -> Result<bool, AppError> {
        let item = encode(
            template_key(&template.context, template.type_channel),
            None,
            template,
        )?;
        self.kv.put_if_absent(Table::Templates, item).await
    }

    pub async fn replace_template(&self, template: &Template) -> Result<bool, AppError> {
        let item = encode(
            template_key(&template.context, template.type_channel),
            None,
            template,
        )?;
        self.kv.put_if_present(Table::Templates, item).await
    }

    pub async fn delete_template(
        &self,
        context: &str,
        type_channel: TypeChannel,
    ) -> Result<bool, AppError> {
        self.kv
            .delete(Table::Templates, &template_key(context, type_channel))
            .await
    }

    pub async fn list_templates(
        &self,
        context: &str,
        page: &PageRequest,
    ) -> Result<Page<Template>, AppError> {
        self.kv
            .query_partition(Table::Templates, context, page)
            .await?
            .try_map(decode)
    }

    // ---- preferences ----

    pub async fn get_preferences(&self, context: &str) -> Result<Option<PreferenceRecord>, AppError> {
        self.get_as(Table::Preferences, &ItemKey::partition(context))
            .await
    }

    pub async fn create_preferences(&self, record: &PreferenceRecord) -> Result<bool, AppError> {
        let item = encode(ItemKey::partition(&record.context), None, record)?;
        self.kv.put_if_absent(Table::Preferences, item).await
    }

    pub async fn replace_preferences(&self, record: &PreferenceRecord) -> Result<bool, AppError> {
        let item = encode(ItemKey::partition(&record.context), None, record)?;
        self.kv.put_if_present(Table::Preferences, item).await
    }

    pub async fn delete_preferences(&self, context: &str) -> Result<bool, AppError> {
        self.kv
            .delete(Table::Preferences, &ItemKey::partition(context))
            .await
    }

    pub async fn list_preferences(
        &self,
        page: &PageRequest,
    ) -> Result<Page<PreferenceRecord>, AppError> {
        self.kv.scan(Table::Preferences, page).await?.try_map(decode)
    }

    // ---- system config ----

    pub async fn get_config(&self, context: &str) -> Result<Option<SystemConfigRecord>, AppError> {
        self.get_as(Table::SystemConfig, &ItemKey::partition(context))
            .await
    }

    pub async fn create_config(&self, record: &SystemConfigRecord) -> Result<bool, AppError> {
        let item = encode(ItemKey::partition(&record.context), None, record)?;
        self.kv.put_if_absent(Table::SystemConfig, item).await
    }

    pub async fn replace_config(&self, record: &SystemConfigRecord) -> Result<bool, AppError> {
        let item = encode(ItemKey::partition(&record.context), None, record)?;
        self.kv.put_if_present(Table::SystemConfig, item).await
    }

    pub async fn delete_config(&self, context: &str) -> Result<bool, AppError> {
        self.kv
            .delete(Table::SystemConfig, &ItemKey::partition(context))
            .await
    }

    pub async fn list_configs(
        &self,
        page: &PageRequest,
    ) -> Result<Page<SystemConfigRecord>, AppError> {
        self.kv.scan(Table::SystemConfig, page).await?.try_map(decode)
    }

    // ---- scheduled notifications ----

    pub async fn get_schedule(
        &self,
        schedule_id: &str,
    ) -> Result<Option<ScheduledNotification>, AppError> {
        self.get_as(Table::ScheduledNotifications, &ItemKey::partition(schedule_id))
            .await
    }

    pub async fn create_schedule(&self, schedule: &ScheduledNotification) -> Result<bool, AppError> {
        let item = schedule_item(schedule)?;
        self.kv
            .put_if_absent(Table::ScheduledNotifications, item)
            .await
    }

    pub async fn replace_schedule(
        &self,
        schedule: &ScheduledNotification,
    ) -> Result<bool, AppError> {
        let item = schedule_item(schedule)?;
        self.kv
            .put_if_present(Table::ScheduledNotifications, item)
            .await
    }

    pub async fn delete_schedule(&self, schedule_id: &str) -> Result<bool, AppError> {
        self.kv
            .delete(Table::ScheduledNotifications, &ItemKey::partition(schedule_id))
            .await
    }

    pub async fn list_schedules_for_user(
        &self,
        user_id: &str,
        page: &PageRequest,
    ) -> Result<Page<ScheduledNotification>, AppError> {
        self.kv
            .query_secondary(Table::ScheduledNotifications, user_id, page)
            .await?
            .try_map(decode)
    }

    // ---- delivery ledger ----

    /// Upsert keyed by `id#userId#type#channel`.
    pub async fn put_delivery(&self, record: &DeliveryRecord) -> Result<(), AppError> {
        let item = encode(ItemKey::partition(&record.key), None, record)?;
        self.kv.put(Table::DeliveryRecords, item).await
    }

    /// Ledger lookup. Expired records read as absent.
    pub async fn get_delivery(
        &self,
        key: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<DeliveryRecord>, AppError> {
        let record: Option<DeliveryRecord> = self
            .get_as(Table::DeliveryRecords, &ItemKey::partition(key))
            .await?;
        Ok(record.filter(|r| !r.is_expired(now)))
    }

    /// Delete ledger records that expired before `now`.
    pub async fn purge_expired_deliveries(&self, now: DateTime<Utc>) -> Result<u64, AppError> {
        self.kv
            .delete_before(Table::DeliveryRecords, "expiresAt", now)
            .await
    }

    // ---- triggers ----

    pub async fn get_trigger(&self, schedule_id: &str) -> Result<Option<Trigger>, AppError> {
        self.get_as(Table::Triggers, &ItemKey::partition(schedule_id))
            .await
    }

    pub async fn put_trigger(&self, trigger: &Trigger) -> Result<(), AppError> {
        let item = encode(ItemKey::partition(&trigger.schedule_id), None, trigger)?;
        self.kv.put(Table::Triggers, item).await
    }

    pub async fn delete_trigger(&self, schedule_id: &str) -> Result<bool, AppError> {
        self.kv
            .delete(Table::Triggers, &ItemKey::partition(schedule_id))
            .await
    }

    pub async fn list_triggers(&self, page: &PageRequest) -> Result<Page<Trigger>, AppError> {
        self.kv.scan(Table::Triggers, page).await?.try_map(decode)
    }

    async fn get_as<T: DeserializeOwned>(
        &self,
        table: Table,
        key: &ItemKey,
    ) -> Result<Option<T>, AppError> {
        self.kv.get(table, key).await?.map(decode).transpose()
    }
}

fn template_key(context: &str, type_channel: TypeChannel) -> ItemKey {
    ItemKey::new(context, type_channel.to_string())
}

fn schedule_item(schedule: &ScheduledNotification) -> Result<Item, AppError> {
    encode(
        ItemKey::partition(&schedule.schedule_id),
        Some(schedule.user_id.clone()),
        schedule,
    )
}

fn encode<T: Serialize>(
    key: ItemKey,
    secondary: Option<String>,
    value: &T,
) -> Result<Item, AppError> {
    Ok(Item {
        key,
        secondary,
        body: serde_json::to_value(value)?,
    })
}

fn decode<T: DeserializeOwned>(item: Item) -> Result<T, AppError> {
    Ok(serde_json::from_value(item.body)?)
}
