//! Item repository.

use async_trait::async_trait;

use crate::database::models::{ItemDbModel, ItemStatus};
use crate::database::time::now_ms;
use crate::database::{DbPool, WritePool};
use crate::{Error, Result};

/// Item repository trait.
#[async_trait]
pub trait ItemRepository: Send + Sync {
    /// Insert or update an item by id.
    ///
    /// Updates never regress the status along the success path: an
    /// upsert carrying an earlier status quietly keeps the stored one.
    /// `failed` can always be recorded. Inserting a second row for an
    /// already-tracked `source_item_id` surfaces as
    /// [`Error::DuplicateMapping`].
    async fn upsert_item(&self, item: &ItemDbModel) -> Result<()>;
    async fn get_item_by_id(&self, id: &str) -> Result<Option<ItemDbModel>>;
    /// The dedup primitive: look an item up by its source-side id.
    async fn get_item_by_source(&self, source_item_id: &str) -> Result<Option<ItemDbModel>>;
    /// Pending items, oldest first, up to `limit`.
    async fn list_pending(&self, limit: u32) -> Result<Vec<ItemDbModel>>;
    async fn count_pending(&self) -> Result<u64>;
    async fn update_item_status(
        &self,
        id: &str,
        status: ItemStatus,
        error_message: Option<&str>,
    ) -> Result<()>;
    async fn update_item_file(&self, id: &str, path: &str) -> Result<()>;
    async fn update_item_sink_id(&self, id: &str, sink_item_id: &str) -> Result<()>;
    /// Reset items stuck in `fetching`/`publishing` back to `pending`.
    ///
    /// Used by the optional startup sweep; returns the number of items
    /// reset.
    async fn reset_in_flight(&self) -> Result<u64>;
}

/// SQLx implementation of [`ItemRepository`].
pub struct SqlxItemRepository {
    read_pool: DbPool,
    write_pool: WritePool,
}

impl SqlxItemRepository {
    pub fn new(read_pool: DbPool, write_pool: WritePool) -> Self {
        Self {
            read_pool,
            write_pool,
        }
    }

    /// Resolve the status to persist for an upsert: keep the stored
    /// status when the incoming one would move backwards on the
    /// success path.
    async fn resolve_status(&self, item: &ItemDbModel) -> Result<String> {
        let Some(incoming) = ItemStatus::parse(&item.status) else {
            return Err(Error::validation(format!(
                "unknown item status '{}'",
                item.status
            )));
        };

        let existing: Option<(String,)> = sqlx::query_as("SELECT status FROM items WHERE id = ?")
            .bind(&item.id)
            .fetch_optional(&self.read_pool)
            .await?;

        if let Some((stored,)) = existing {
            if let Some(stored) = ItemStatus::parse(&stored) {
                if incoming != ItemStatus::Failed && incoming.rank() < stored.rank() {
                    return Ok(stored.as_str().to_string());
                }
            }
        }

        Ok(incoming.as_str().to_string())
    }
}

#[async_trait]
impl ItemRepository for SqlxItemRepository {
    async fn upsert_item(&self, item: &ItemDbModel) -> Result<()> {
        let status = self.resolve_status(item).await?;

        sqlx::query(
            r#"
            INSERT INTO items (
                id, source_item_id, job_id, title, description, thumbnail_url,
                local_file_path, status, error_message, sink_item_id,
                created_at, updated_at, published_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                source_item_id = excluded.source_item_id,
                job_id = excluded.job_id,
                title = excluded.title,
                description = excluded.description,
                thumbnail_url = excluded.thumbnail_url,
                local_file_path = excluded.local_file_path,
                status = excluded.status,
                error_message = excluded.error_message,
                sink_item_id = excluded.sink_item_id,
                updated_at = excluded.updated_at,
                published_at = excluded.published_at
            "#,
        )
        .bind(&item.id)
        .bind(&item.source_item_id)
        .bind(&item.job_id)
        .bind(&item.title)
        .bind(&item.description)
        .bind(&item.thumbnail_url)
        .bind(&item.local_file_path)
        .bind(&status)
        .bind(&item.error_message)
        .bind(&item.sink_item_id)
        .bind(item.created_at)
        .bind(now_ms())
        .bind(item.published_at)
        .execute(&self.write_pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(db_err) = &e {
                if db_err.is_unique_violation() {
                    return Error::duplicate_mapping(format!(
                        "item {} already tracked",
                        item.source_item_id
                    ));
                }
            }
            Error::DatabaseSqlx(e)
        })?;
        Ok(())
    }

    async fn get_item_by_id(&self, id: &str) -> Result<Option<ItemDbModel>> {
        let item = sqlx::query_as::<_, ItemDbModel>("SELECT * FROM items WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.read_pool)
            .await?;
        Ok(item)
    }

    async fn get_item_by_source(&self, source_item_id: &str) -> Result<Option<ItemDbModel>> {
        let item = sqlx::query_as::<_, ItemDbModel>("SELECT * FROM items WHERE source_item_id = ?")
            .bind(source_item_id)
            .fetch_optional(&self.read_pool)
            .await?;
        Ok(item)
    }

    async fn list_pending(&self, limit: u32) -> Result<Vec<ItemDbModel>> {
        let items = sqlx::query_as::<_, ItemDbModel>(
            "SELECT * FROM items WHERE status = ? ORDER BY created_at ASC LIMIT ?",
        )
        .bind(ItemStatus::Pending.as_str())
        .bind(limit)
        .fetch_all(&self.read_pool)
        .await?;
        Ok(items)
    }

    async fn count_pending(&self) -> Result<u64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM items WHERE status = ?")
            .bind(ItemStatus::Pending.as_str())
            .fetch_one(&self.read_pool)
            .await?;
        Ok(count as u64)
    }

    async fn update_item_status(
        &self,
        id: &str,
        status: ItemStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        sqlx::query("UPDATE items SET status = ?, error_message = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(error_message)
            .bind(now_ms())
            .bind(id)
            .execute(&self.write_pool)
            .await?;
        Ok(())
    }

    async fn update_item_file(&self, id: &str, path: &str) -> Result<()> {
        sqlx::query("UPDATE items SET local_file_path = ?, updated_at = ? WHERE id = ?")
            .bind(path)
            .bind(now_ms())
            .bind(id)
            .execute(&self.write_pool)
            .await?;
        Ok(())
    }

    async fn update_item_sink_id(&self, id: &str, sink_item_id: &str) -> Result<()> {
        sqlx::query("UPDATE items SET sink_item_id = ?, updated_at = ? WHERE id = ?")
            .bind(sink_item_id)
            .bind(now_ms())
            .bind(id)
            .execute(&self.write_pool)
            .await?;
        Ok(())
    }

    async fn reset_in_flight(&self) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE items SET status = ?, updated_at = ? WHERE status IN (?, ?)",
        )
        .bind(ItemStatus::Pending.as_str())
        .bind(now_ms())
        .bind(ItemStatus::Fetching.as_str())
        .bind(ItemStatus::Publishing.as_str())
        .execute(&self.write_pool)
        .await?;
        Ok(result.rows_affected())
    }
}
