//! In-process backend used by tests and local runs.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use herald_common::error::AppError;

use crate::kv::{Item, ItemKey, KvStore, Page, PageRequest, Table};

#[derive(Default)]
pub struct MemoryStore {
    items: RwLock<BTreeMap<(Table, ItemKey), Item>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn select(
        &self,
        table: Table,
        page: &PageRequest,
        filter: impl Fn(&Item) -> bool,
    ) -> Page<Item> {
        let items = self.items.read().await;
        let selected: Vec<Item> = items
            .iter()
            .filter(|((t, key), item)| {
                *t == table && page.after.as_ref().is_none_or(|after| key > after) && filter(item)
            })
            .take(page.limit.saturating_add(1))
            .map(|(_, item)| item.clone())
            .collect();
        Page::from_overfetch(selected, page.limit, |item| item.key.clone())
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, table: Table, key: &ItemKey) -> Result<Option<Item>, AppError> {
        Ok(self.items.read().await.get(&(table, key.clone())).cloned())
    }

    async fn put(&self, table: Table, item: Item) -> Result<(), AppError> {
        self.items
            .write()
            .await
            .insert((table, item.key.clone()), item);
        Ok(())
    }

    async fn put_if_absent(&self, table: Table, item: Item) -> Result<bool, AppError> {
        let mut items = self.items.write().await;
        let slot = (table, item.key.clone());
        if items.contains_key(&slot) {
            return Ok(false);
        }
        if table.unique_secondary()
            && let Some(secondary) = &item.secondary
            && items
                .iter()
                .any(|((t, _), other)| *t == table && other.secondary.as_ref() == Some(secondary))
        {
            return Ok(false);
        }
        items.insert(slot, item);
        Ok(true)
    }

    async fn put_if_present(&self, table: Table, item: Item) -> Result<bool, AppError> {
        let mut items = self.items.write().await;
        match items.get_mut(&(table, item.key.clone())) {
            Some(existing) => {
                *existing = item;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, table: Table, key: &ItemKey) -> Result<bool, AppError> {
        Ok(self
            .items
            .write()
            .await
            .remove(&(table, key.clone()))
            .is_some())
    }

    async fn query_partition(
        &self,
        table: Table,
        partition: &str,
        page: &PageRequest,
    ) -> Result<Page<Item>, AppError> {
        Ok(self
            .select(table, page, |item| item.key.partition == partition)
            .await)
    }

    async fn query_secondary(
        &self,
        table: Table,
        secondary: &str,
        page: &PageRequest,
    ) -> Result<Page<Item>, AppError> {
        Ok(self
            .select(table, page, |item| item.secondary.as_deref() == Some(secondary))
            .await)
    }

    async fn scan(&self, table: Table, page: &PageRequest) -> Result<Page<Item>, AppError> {
        Ok(self.select(table, page, |_| true).await)
    }

    async fn delete_before(
        &self,
        table: Table,
        field: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, AppError> {
        let mut items = self.items.write().await;
        let before = items.len();
        items.retain(|(t, _), item| {
            let expired = *t == table
                && item
                    .body
                    .get(field)
                    .and_then(|v| v.as_str())
                    .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
                    .is_some_and(|at| at < cutoff);
            !expired
        });
        Ok((before - items.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item(partition: &str, sort: &str, secondary: Option<&str>) -> Item {
        Item {
            key: ItemKey::new(partition, sort),
            secondary: secondary.map(str::to_string),
            body: json!({ "p": partition, "s": sort }),
        }
    }

    #[tokio::test]
    async fn test_conditional_writes() {
        let store = MemoryStore::new();

        assert!(store.put_if_absent(Table::Users, item("u1", "", None)).await.unwrap());
        assert!(!store.put_if_absent(Table::Users, item("u1", "", None)).await.unwrap());

        assert!(!store.put_if_present(Table::Users, item("u2", "", None)).await.unwrap());
        assert!(store.put_if_present(Table::Users, item("u1", "", Some("x"))).await.unwrap());

        let stored = store
            .get(Table::Users, &ItemKey::partition("u1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.secondary.as_deref(), Some("x"));
    }

    #[tokio::test]
    async fn test_user_secondary_key_is_unique() {
        let store = MemoryStore::new();

        assert!(store.put_if_absent(Table::Users, item("u1", "", Some("a@x.dev"))).await.unwrap());
        assert!(!store.put_if_absent(Table::Users, item("u2", "", Some("a@x.dev"))).await.unwrap());
        assert!(store.get(Table::Users, &ItemKey::partition("u2")).await.unwrap().is_none());

        // Other tables share secondary keys freely.
        for id in ["s1", "s2"] {
            assert!(store
                .put_if_absent(Table::ScheduledNotifications, item(id, "", Some("u1")))
                .await
                .unwrap());
        }
    }

    #[tokio::test]
    async fn test_delete_before_only_removes_older_items() {
        let store = MemoryStore::new();
        let stamped = |id: &str, at: &str| Item {
            key: ItemKey::partition(id),
            secondary: None,
            body: json!({ "expiresAt": at }),
        };
        store.put(Table::DeliveryRecords, stamped("old", "2026-03-01T00:00:00Z")).await.unwrap();
        store.put(Table::DeliveryRecords, stamped("new", "2026-03-03T00:00:00Z")).await.unwrap();
        store.put(Table::Triggers, stamped("other", "2026-03-01T00:00:00Z")).await.unwrap();

        let cutoff = DateTime::parse_from_rfc3339("2026-03-02T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let deleted = store
            .delete_before(Table::DeliveryRecords, "expiresAt", cutoff)
            .await
            .unwrap();

        assert_eq!(deleted, 1);
        let remaining = store.scan(Table::DeliveryRecords, &PageRequest::all()).await.unwrap();
        assert_eq!(remaining.items.len(), 1);
        assert_eq!(remaining.items[0].key.partition, "new");
        assert!(store.get(Table::Triggers, &ItemKey::partition("other")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_tables_are_disjoint() {
        let store = MemoryStore::new();
        store.put(Table::Preferences, item("*", "", None)).await.unwrap();

        assert!(store
            .get(Table::SystemConfig, &ItemKey::partition("*"))
            .await
            .unwrap()
            .is_none());
        assert!(!store.delete(Table::SystemConfig, &ItemKey::partition("*")).await.unwrap());
        assert!(store.delete(Table::Preferences, &ItemKey::partition("*")).await.unwrap());
    }

    #[tokio::test]
    async fn test_partition_query_paginates() {
        let store = MemoryStore::new();
        for sort in ["a", "b", "c"] {
            store.put(Table::Templates, item("u1", sort, None)).await.unwrap();
        }
        store.put(Table::Templates, item("u2", "a", None)).await.unwrap();

        let first = store
            .query_partition(Table::Templates, "u1", &PageRequest { limit: 2, after: None })
            .await
            .unwrap();
        assert_eq!(first.items.len(), 2);
        assert_eq!(first.next, Some(ItemKey::new("u1", "b")));

        let second = store
            .query_partition(
                Table::Templates,
                "u1",
                &PageRequest {
                    limit: 2,
                    after: first.next,
                },
            )
            .await
            .unwrap();
        assert_eq!(second.items.len(), 1);
        assert_eq!(second.items[0].key.sort, "c");
        assert!(second.next.is_none());
    }

    #[tokio::test]
    async fn test_secondary_query() {
        let store = MemoryStore::new();
        store
            .put(Table::ScheduledNotifications, item("s1", "", Some("u1")))
            .await
            .unwrap();
        store
            .put(Table::ScheduledNotifications, item("s2", "", Some("u2")))
            .await
            .unwrap();
        store
            .put(Table::ScheduledNotifications, item("s3", "", Some("u1")))
            .await
            .unwrap();

        let page = store
            .query_secondary(Table::ScheduledNotifications, "u1", &PageRequest::all())
            .await
            .unwrap();
        let ids: Vec<_> = page.items.iter().map(|i| i.key.partition.as_str()).collect();
        assert_eq!(ids, vec!["s1", "s3"]);
    }
}
