//! Relational inventory of observed objects, one table per bucket.
//!
//! Tables are created lazily the first time a bucket is seen; a
//! process-local registry avoids repeating the DDL. Writes are idempotent
//! upserts keyed on `path`, deletes are soft, and `is_backed_up` flips to
//! true only after a mirror write succeeds for the current generation. The
//! whole store degrades to no-ops when no database is configured.

use crate::models::object_record::ObjectRecord;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum InventoryError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type InventoryResult<T> = Result<T, InventoryError>;

/// Inventory store over a shared Postgres pool.
///
/// Cloning is cheap; all clones share the pool and the table registry.
#[derive(Clone)]
pub struct InventoryService {
    pool: Option<PgPool>,
    registered_tables: Arc<RwLock<HashSet<String>>>,
}

impl InventoryService {
    /// Connect to the inventory database. Fails fast so a bad connection
    /// string is caught at startup, not on the first async write.
    pub async fn connect(postgres_url: &str) -> InventoryResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(postgres_url)
            .await?;
        Ok(Self {
            pool: Some(pool),
            registered_tables: Arc::new(RwLock::new(HashSet::new())),
        })
    }

    /// An inventory that records nothing. Mirror behavior is unaffected.
    pub fn disabled() -> Self {
        Self {
            pool: None,
            registered_tables: Arc::new(RwLock::new(HashSet::new())),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.pool.is_some()
    }

    /// Derive the table name for a bucket: runs of non-alphanumeric
    /// characters collapse to `_`, prefixed with `bucket_`.
    pub fn table_name(bucket: &str) -> String {
        let mut name = String::with_capacity(bucket.len() + 7);
        name.push_str("bucket_");
        let mut in_run = false;
        for c in bucket.chars() {
            if c.is_ascii_alphanumeric() {
                name.push(c);
                in_run = false;
            } else if !in_run {
                name.push('_');
                in_run = true;
            }
        }
        name
    }

    /// Record a successful PUT/POST: insert or update the row for `key`,
    /// resetting `is_backed_up` and `deleted` for the new write generation.
    /// Returns the stored row, or `None` when the inventory is disabled.
    pub async fn record_put(
        &self,
        bucket: &str,
        key: &str,
        size: i64,
        content_type: &str,
        now: DateTime<Utc>,
    ) -> InventoryResult<Option<ObjectRecord>> {
        let Some(pool) = &self.pool else {
            return Ok(None);
        };
        let table = self.ensure_bucket_table(pool, bucket).await?;

        let sql = format!(
            "INSERT INTO {table} (path, size, content_type, is_backed_up, last_modified, deleted) \
             VALUES ($1, $2, $3, FALSE, $4, FALSE) \
             ON CONFLICT (path) DO UPDATE SET \
                 size = EXCLUDED.size, \
                 content_type = EXCLUDED.content_type, \
                 is_backed_up = FALSE, \
                 last_modified = EXCLUDED.last_modified, \
                 deleted = FALSE, \
                 updated_at = NOW() \
             RETURNING id, path, size, content_type, is_backed_up, last_modified, deleted, \
                       created_at, updated_at"
        );
        let record = sqlx::query_as::<_, ObjectRecord>(&sql)
            .bind(key)
            .bind(size)
            .bind(content_type)
            .bind(now)
            .fetch_one(pool)
            .await?;
        Ok(Some(record))
    }

    /// Flip `is_backed_up` after a successful mirror write. A missing row is
    /// a benign race with a concurrent delete or a disabled-then-enabled
    /// inventory, not an error.
    pub async fn mark_backed_up(&self, bucket: &str, key: &str) -> InventoryResult<()> {
        let Some(pool) = &self.pool else {
            return Ok(());
        };
        let table = self.ensure_bucket_table(pool, bucket).await?;

        let sql = format!("UPDATE {table} SET is_backed_up = TRUE, updated_at = NOW() WHERE path = $1");
        let result = sqlx::query(&sql).bind(key).execute(pool).await?;
        if result.rows_affected() == 0 {
            debug!("no inventory row to mark backed up for {bucket}/{key}");
        }
        Ok(())
    }

    /// Record a successful DELETE as a soft delete. Deleting a key the
    /// inventory never saw affects zero rows and is tolerated.
    pub async fn record_delete(
        &self,
        bucket: &str,
        key: &str,
        now: DateTime<Utc>,
    ) -> InventoryResult<()> {
        let Some(pool) = &self.pool else {
            return Ok(());
        };
        let table = self.ensure_bucket_table(pool, bucket).await?;

        let sql = format!(
            "UPDATE {table} SET deleted = TRUE, last_modified = $1, updated_at = NOW() WHERE path = $2"
        );
        sqlx::query(&sql).bind(now).bind(key).execute(pool).await?;
        Ok(())
    }

    /// Issue `CREATE TABLE IF NOT EXISTS` (plus indexes) once per bucket.
    ///
    /// Fast path takes the read lock only; the write lock is held just for
    /// the first use of a bucket, with a re-check after upgrading.
    async fn ensure_bucket_table(&self, pool: &PgPool, bucket: &str) -> InventoryResult<String> {
        let table = Self::table_name(bucket);

        if self.registered_tables.read().await.contains(&table) {
            return Ok(table);
        }

        let mut registered = self.registered_tables.write().await;
        if registered.contains(&table) {
            return Ok(table);
        }

        let create = format!(
            "CREATE TABLE IF NOT EXISTS {table} (\
                 id SERIAL PRIMARY KEY, \
                 path TEXT UNIQUE NOT NULL, \
                 size BIGINT NOT NULL, \
                 content_type TEXT NOT NULL, \
                 is_backed_up BOOLEAN DEFAULT FALSE, \
                 last_modified TIMESTAMPTZ NOT NULL, \
                 deleted BOOLEAN DEFAULT FALSE, \
                 created_at TIMESTAMPTZ DEFAULT NOW(), \
                 updated_at TIMESTAMPTZ DEFAULT NOW()\
             )"
        );
        sqlx::query(&create).execute(pool).await?;

        let indexes = [
            format!("CREATE INDEX IF NOT EXISTS idx_{table}_path ON {table}(path)"),
            format!("CREATE INDEX IF NOT EXISTS idx_{table}_backup ON {table}(is_backed_up)"),
            format!("CREATE INDEX IF NOT EXISTS idx_{table}_deleted ON {table}(deleted)"),
        ];
        for index in &indexes {
            if let Err(err) = sqlx::query(index).execute(pool).await {
                warn!("failed to create index: {err}");
            }
        }

        registered.insert(table.clone());
        debug!("created/verified table {table} for bucket {bucket}");
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_names_are_sanitized() {
        assert_eq!(InventoryService::table_name("my-data"), "bucket_my_data");
        assert_eq!(InventoryService::table_name("plain"), "bucket_plain");
        assert_eq!(
            InventoryService::table_name("a.b-c.d"),
            "bucket_a_b_c_d"
        );
        // Runs of specials collapse to a single underscore.
        assert_eq!(InventoryService::table_name("a--..b"), "bucket_a_b");
        assert_eq!(InventoryService::table_name("-edge-"), "bucket__edge_");
        assert_eq!(InventoryService::table_name(""), "bucket_");
    }

    #[tokio::test]
    async fn disabled_inventory_is_a_no_op() {
        let inventory = InventoryService::disabled();
        assert!(!inventory.is_enabled());

        let record = inventory
            .record_put("b", "k", 2, "text/plain", Utc::now())
            .await
            .unwrap();
        assert!(record.is_none());

        inventory.mark_backed_up("b", "k").await.unwrap();
        inventory.record_delete("b", "k", Utc::now()).await.unwrap();
    }
}
