//! Key/value contract shared by every backend.
//!
//! Items live in a [`Table`], addressed by a partition key and an optional
//! sort key, and may carry one secondary key for alternate lookups. Reads are
//! strongly consistent; writes are single-key with optional create-if-absent
//! or replace-if-present conditions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use herald_common::error::AppError;

/// Default and maximum number of items returned by one page.
pub const DEFAULT_PAGE_LIMIT: usize = 50;
pub const MAX_PAGE_LIMIT: usize = 100;

/// Entity collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Table {
    Users,
    Templates,
    Preferences,
    SystemConfig,
    ScheduledNotifications,
    DeliveryRecords,
    Triggers,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Users => "users",
            Table::Templates => "templates",
            Table::Preferences => "preferences",
            Table::SystemConfig => "system_config",
            Table::ScheduledNotifications => "scheduled_notifications",
            Table::DeliveryRecords => "delivery_records",
            Table::Triggers => "triggers",
        }
    }

    /// Tables whose secondary key is unique across items.
    pub fn unique_secondary(&self) -> bool {
        matches!(self, Table::Users)
    }
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Primary key of an item. Single-key tables use an empty sort key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ItemKey {
    pub partition: String,
    pub sort: String,
}

impl ItemKey {
    pub fn new(partition: impl Into<String>, sort: impl Into<String>) -> Self {
        Self {
            partition: partition.into(),
            sort: sort.into(),
        }
    }

    pub fn partition(partition: impl Into<String>) -> Self {
        Self::new(partition, "")
    }
}

/// A stored item.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub key: ItemKey,
    pub secondary: Option<String>,
    pub body: Value,
}

/// Page cursor: items strictly after `after` in `(partition, sort)` order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub limit: usize,
    pub after: Option<ItemKey>,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            limit: DEFAULT_PAGE_LIMIT,
            after: None,
        }
    }
}

impl PageRequest {
    /// Build a page request from the optional `limit` and `nextToken` of a
    /// list call. The limit is clamped to `1..=MAX_PAGE_LIMIT`.
    pub fn from_params(limit: Option<usize>, token: Option<&str>) -> Result<Self, AppError> {
        let after = token.filter(|t| !t.is_empty()).map(decode_token).transpose()?;
        Ok(Self {
            limit: limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT),
            after,
        })
    }

    /// Request every item. Used by background loops that walk a whole table.
    pub fn all() -> Self {
        Self {
            limit: usize::MAX,
            after: None,
        }
    }
}

/// One page of results.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next: Option<ItemKey>,
}

impl<T> Page<T> {
    pub fn next_token(&self) -> Option<String> {
        self.next.as_ref().map(encode_token)
    }

    pub fn try_map<U, E>(self, f: impl FnMut(T) -> Result<U, E>) -> Result<Page<U>, E> {
        Ok(Page {
            items: self.items.into_iter().map(f).collect::<Result<_, _>>()?,
            next: self.next,
        })
    }

    /// Split an over-fetched result (`limit + 1` rows) into a page and its cursor.
    pub fn from_overfetch(mut items: Vec<T>, limit: usize, key_of: impl Fn(&T) -> ItemKey) -> Self {
        let next = if items.len() > limit {
            items.truncate(limit);
            items.last().map(key_of)
        } else {
            None
        };
        Self { items, next }
    }
}

/// Opaque pagination token for a key.
pub fn encode_token(key: &ItemKey) -> String {
    serde_json::json!([key.partition, key.sort]).to_string()
}

pub fn decode_token(token: &str) -> Result<ItemKey, AppError> {
    let (partition, sort): (String, String) = serde_json::from_str(token)
        .map_err(|_| AppError::Validation("Invalid nextToken".to_string()))?;
    Ok(ItemKey { partition, sort })
}

/// Generic key/value backend.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Strongly consistent point lookup.
    async fn get(&self, table: Table, key: &ItemKey) -> Result<Option<Item>, AppError>;

    /// Unconditional upsert.
    async fn put(&self, table: Table, item: Item) -> Result<(), AppError>;

    /// Create the item only if no item exists under its key, and, for tables
    /// with a unique secondary key, no other item holds its secondary key.
    /// Returns `false` when either was already taken.
    async fn put_if_absent(&self, table: Table, item: Item) -> Result<bool, AppError>;

    /// Replace the item only if an item exists under its key.
    /// Returns `false` when nothing was stored.
    async fn put_if_present(&self, table: Table, item: Item) -> Result<bool, AppError>;

    /// Returns `true` when an item was removed.
    async fn delete(&self, table: Table, key: &ItemKey) -> Result<bool, AppError>;

    /// Items sharing a partition key, ordered by sort key.
    async fn query_partition(
        &self,
        table: Table,
        partition: &str,
        page: &PageRequest,
    ) -> Result<Page<Item>, AppError>;

    /// Items whose secondary key equals `secondary`, ordered by primary key.
    async fn query_secondary(
        &self,
        table: Table,
        secondary: &str,
        page: &PageRequest,
    ) -> Result<Page<Item>, AppError>;

    /// Every item of a table, ordered by primary key.
    async fn scan(&self, table: Table, page: &PageRequest) -> Result<Page<Item>, AppError>;

    /// Delete the items whose RFC 3339 timestamp at body field `field` is
    /// before `cutoff`. Returns the number of deleted items.
    async fn delete_before(
        &self,
        table: Table,
        field: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, AppError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_round_trip() {
        let key = ItemKey::new("user-1", "alert#email");
        let token = encode_token(&key);
        assert_eq!(decode_token(&token).unwrap(), key);
    }

    #[test]
    fn test_invalid_token_is_validation_error() {
        let err = PageRequest::from_params(None, Some("not-a-token")).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn test_limit_is_clamped() {
        assert_eq!(PageRequest::from_params(Some(0), None).unwrap().limit, 1);
        assert_eq!(
            PageRequest::from_params(Some(10_000), None).unwrap().limit,
            MAX_PAGE_LIMIT
        );
        assert_eq!(
            PageRequest::from_params(None, Some("")).unwrap(),
            PageRequest::default()
        );
    }

    #[test]
    fn test_from_overfetch_sets_cursor() {
        let page = Page::from_overfetch(vec![1, 2, 3], 2, |n| ItemKey::partition(n.to_string()));
        assert_eq!(page.items, vec![1, 2]);
        assert_eq!(page.next, Some(ItemKey::partition("2")));

        let last = Page::from_overfetch(vec![1, 2], 2, |n| ItemKey::partition(n.to_string()));
        assert!(last.next.is_none());
    }
}
