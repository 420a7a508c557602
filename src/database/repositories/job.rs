//! Job repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::database::models::JobDbModel;
use crate::database::time::{datetime_to_ms, now_ms};
use crate::database::{DbPool, WritePool};
use crate::{Error, Result};

/// Job repository trait.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Insert or update a job by id.
    ///
    /// Uniqueness of `source_channel_id` and `sink_account_id` is
    /// enforced; conflicts surface as [`Error::DuplicateMapping`].
    async fn upsert_job(&self, job: &JobDbModel) -> Result<()>;
    async fn get_job_by_id(&self, id: &str) -> Result<Option<JobDbModel>>;
    async fn get_job_by_source(&self, source_channel_id: &str) -> Result<Option<JobDbModel>>;
    async fn get_job_by_sink(&self, sink_account_id: &str) -> Result<Option<JobDbModel>>;
    async fn get_job_by_pair(
        &self,
        source_channel_id: &str,
        sink_account_id: &str,
    ) -> Result<Option<JobDbModel>>;
    /// List jobs ordered by creation time ascending.
    async fn list_jobs(&self, active_only: bool) -> Result<Vec<JobDbModel>>;
    /// Advance the discovery bookmark. Idempotent; a `None`
    /// `last_item_id` leaves the stored value unchanged.
    async fn update_last_checked(
        &self,
        job_id: &str,
        last_item_id: Option<&str>,
        checked_at: DateTime<Utc>,
    ) -> Result<()>;
    /// Delete a job; owned items are removed by the cascade.
    async fn delete_job(&self, job_id: &str) -> Result<()>;
}

/// Map a unique-index violation to the typed duplicate error.
fn map_unique_violation(err: sqlx::Error, what: &str) -> Error {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            return Error::duplicate_mapping(format!("{what}: {db_err}"));
        }
    }
    Error::DatabaseSqlx(err)
}

/// SQLx implementation of [`JobRepository`].
pub struct SqlxJobRepository {
    read_pool: DbPool,
    write_pool: WritePool,
}

impl SqlxJobRepository {
    pub fn new(read_pool: DbPool, write_pool: WritePool) -> Self {
        Self {
            read_pool,
            write_pool,
        }
    }
}

#[async_trait]
impl JobRepository for SqlxJobRepository {
    async fn upsert_job(&self, job: &JobDbModel) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO jobs (
                id, source_channel_id, sink_account_id, sink_access_token,
                sink_refresh_token, sink_token_expires_at, last_checked_at,
                last_item_id, is_active, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                source_channel_id = excluded.source_channel_id,
                sink_account_id = excluded.sink_account_id,
                sink_access_token = excluded.sink_access_token,
                sink_refresh_token = excluded.sink_refresh_token,
                sink_token_expires_at = excluded.sink_token_expires_at,
                last_checked_at = excluded.last_checked_at,
                last_item_id = excluded.last_item_id,
                is_active = excluded.is_active,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&job.id)
        .bind(&job.source_channel_id)
        .bind(&job.sink_account_id)
        .bind(&job.sink_access_token)
        .bind(&job.sink_refresh_token)
        .bind(job.sink_token_expires_at)
        .bind(job.last_checked_at)
        .bind(&job.last_item_id)
        .bind(job.is_active)
        .bind(job.created_at)
        .bind(now_ms())
        .execute(&self.write_pool)
        .await
        .map_err(|e| {
            map_unique_violation(
                e,
                &format!(
                    "job mapping {} -> {}",
                    job.source_channel_id, job.sink_account_id
                ),
            )
        })?;
        Ok(())
    }

    async fn get_job_by_id(&self, id: &str) -> Result<Option<JobDbModel>> {
        let job = sqlx::query_as::<_, JobDbModel>("SELECT * FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.read_pool)
            .await?;
        Ok(job)
    }

    async fn get_job_by_source(&self, source_channel_id: &str) -> Result<Option<JobDbModel>> {
        let job = sqlx::query_as::<_, JobDbModel>("SELECT * FROM jobs WHERE source_channel_id = ?")
            .bind(source_channel_id)
            .fetch_optional(&self.read_pool)
            .await?;
        Ok(job)
    }

    async fn get_job_by_sink(&self, sink_account_id: &str) -> Result<Option<JobDbModel>> {
        let job = sqlx::query_as::<_, JobDbModel>("SELECT * FROM jobs WHERE sink_account_id = ?")
            .bind(sink_account_id)
            .fetch_optional(&self.read_pool)
            .await?;
        Ok(job)
    }

    async fn get_job_by_pair(
        &self,
        source_channel_id: &str,
        sink_account_id: &str,
    ) -> Result<Option<JobDbModel>> {
        let job = sqlx::query_as::<_, JobDbModel>(
            "SELECT * FROM jobs WHERE source_channel_id = ? AND sink_account_id = ?",
        )
        .bind(source_channel_id)
        .bind(sink_account_id)
        .fetch_optional(&self.read_pool)
        .await?;
        Ok(job)
    }

    async fn list_jobs(&self, active_only: bool) -> Result<Vec<JobDbModel>> {
        let query = if active_only {
            "SELECT * FROM jobs WHERE is_active = 1 ORDER BY created_at ASC"
        } else {
            "SELECT * FROM jobs ORDER BY created_at ASC"
        };
        let jobs = sqlx::query_as::<_, JobDbModel>(query)
            .fetch_all(&self.read_pool)
            .await?;
        Ok(jobs)
    }

    async fn update_last_checked(
        &self,
        job_id: &str,
        last_item_id: Option<&str>,
        checked_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET last_checked_at = ?,
                last_item_id = COALESCE(?, last_item_id),
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(datetime_to_ms(checked_at))
        .bind(last_item_id)
        .bind(now_ms())
        .bind(job_id)
        .execute(&self.write_pool)
        .await?;
        Ok(())
    }

    async fn delete_job(&self, job_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM jobs WHERE id = ?")
            .bind(job_id)
            .execute(&self.write_pool)
            .await?;
        Ok(())
    }
}
