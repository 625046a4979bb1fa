//! PostgreSQL backend over the `kv_items` table.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use herald_common::error::AppError;

use crate::kv::{Item, ItemKey, KvStore, Page, PageRequest, Table};

#[derive(Debug, sqlx::FromRow)]
struct KvRow {
    partition_key: String,
    sort_key: String,
    secondary_key: Option<String>,
    body: serde_json::Value,
}

impl From<KvRow> for Item {
    fn from(row: KvRow) -> Self {
        Item {
            key: ItemKey::new(row.partition_key, row.sort_key),
            secondary: row.secondary_key,
            body: row.body,
        }
    }
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn page(rows: Vec<KvRow>, page: &PageRequest) -> Page<Item> {
        let items = rows.into_iter().map(Item::from).collect();
        Page::from_overfetch(items, page.limit, |item: &Item| item.key.clone())
    }
}

fn fetch_limit(page: &PageRequest) -> i64 {
    i64::try_from(page.limit.saturating_add(1)).unwrap_or(i64::MAX)
}

fn cursor(page: &PageRequest) -> (Option<&str>, &str) {
    match &page.after {
        Some(key) => (Some(key.partition.as_str()), key.sort.as_str()),
        None => (None, ""),
    }
}

#[async_trait]
impl KvStore for PgStore {
    async fn get(&self, table: Table, key: &ItemKey) -> Result<Option<Item>, AppError> {
        let row: Option<KvRow> = sqlx::query_as(
            r#"
            SELECT partition_key, sort_key, secondary_key, body
            FROM kv_items
            WHERE collection = $1 AND partition_key = $2 AND sort_key = $3
            "#,
        )
        .bind(table.as_str())
        .bind(&key.partition)
        .bind(&key.sort)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Item::from))
    }

    async fn put(&self, table: Table, item: Item) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO kv_items (collection, partition_key, sort_key, secondary_key, body)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (collection, partition_key, sort_key)
            DO UPDATE SET secondary_key = EXCLUDED.secondary_key,
                          body = EXCLUDED.body,
                          updated_at = NOW()
            "#,
        )
        .bind(table.as_str())
        .bind(&item.key.partition)
        .bind(&item.key.sort)
        .bind(&item.secondary)
        .bind(&item.body)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn put_if_absent(&self, table: Table, item: Item) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            INSERT INTO kv_items (collection, partition_key, sort_key, secondary_key, body)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(table.as_str())
        .bind(&item.key.partition)
        .bind(&item.key.sort)
        .bind(&item.secondary)
        .bind(&item.body)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn put_if_present(&self, table: Table, item: Item) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE kv_items
            SET secondary_key = $4, body = $5, updated_at = NOW()
            WHERE collection = $1 AND partition_key = $2 AND sort_key = $3
            "#,
        )
        .bind(table.as_str())
        .bind(&item.key.partition)
        .bind(&item.key.sort)
        .bind(&item.secondary)
        .bind(&item.body)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn delete(&self, table: Table, key: &ItemKey) -> Result<bool, AppError> {
        let result = sqlx::query(
            "DELETE FROM kv_items WHERE collection = $1 AND partition_key = $2 AND sort_key = $3",
        )
        .bind(table.as_str())
        .bind(&key.partition)
        .bind(&key.sort)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn query_partition(
        &self,
        table: Table,
        partition: &str,
        page: &PageRequest,
    ) -> Result<Page<Item>, AppError> {
        let after_sort = page.after.as_ref().map(|key| key.sort.as_str());
        let rows: Vec<KvRow> = sqlx::query_as(
            r#"
            SELECT partition_key, sort_key, secondary_key, body
            FROM kv_items
            WHERE collection = $1
              AND partition_key = $2
              AND ($3::TEXT IS NULL OR sort_key > $3)
            ORDER BY sort_key
            LIMIT $4
            "#,
        )
        .bind(table.as_str())
        .bind(partition)
        .bind(after_sort)
        .bind(fetch_limit(page))
        .fetch_all(&self.pool)
        .await?;

        Ok(Self::page(rows, page))
    }

    async fn query_secondary(
        &self,
        table: Table,
        secondary: &str,
        page: &PageRequest,
    ) -> Result<Page<Item>, AppError> {
        let (after_partition, after_sort) = cursor(page);
        let rows: Vec<KvRow> = sqlx::query_as(
            r#"
            SELECT partition_key, sort_key, secondary_key, body
            FROM kv_items
            WHERE collection = $1
              AND secondary_key = $2
              AND ($3::TEXT IS NULL OR (partition_key, sort_key) > ($3, $4))
            ORDER BY partition_key, sort_key
            LIMIT $5
            "#,
        )
        .bind(table.as_str())
        .bind(secondary)
        .bind(after_partition)
        .bind(after_sort)
        .bind(fetch_limit(page))
        .fetch_all(&self.pool)
        .await?;

        Ok(Self::page(rows, page))
    }

    async fn scan(&self, table: Table, page: &PageRequest) -> Result<Page<Item>, AppError> {
        let (after_partition, after_sort) = cursor(page);
        let rows: Vec<KvRow> = sqlx::query_as(
            r#"
            SELECT partition_key, sort_key, secondary_key, body
            FROM kv_items
            WHERE collection = $1
              AND ($2::TEXT IS NULL OR (partition_key, sort_key) > ($2, $3))
            ORDER BY partition_key, sort_key
            LIMIT $4
            "#,
        )
        .bind(table.as_str())
        .bind(after_partition)
        .bind(after_sort)
        .bind(fetch_limit(page))
        .fetch_all(&self.pool)
        .await?;

        Ok(Self::page(rows, page))
    }

    async fn delete_before(
        &self,
        table: Table,
        field: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            DELETE FROM kv_items
            WHERE collection = $1 AND (body->>$2)::timestamptz < $3
            "#,
        )
        .bind(table.as_str())
        .bind(field)
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
