//! Job mapping use-cases shared by the bootstrapper and the API.

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};

use crate::database::models::JobDbModel;
use crate::database::repositories::JobRepository;
use crate::database::time::{datetime_to_ms, now_ms};
use crate::{Error, Result};

/// CRUD over source-channel to sink-account mappings.
pub struct JobManager {
    jobs: Arc<dyn JobRepository>,
}

impl JobManager {
    pub fn new(jobs: Arc<dyn JobRepository>) -> Self {
        Self { jobs }
    }

    /// Create a new mapping, enforcing uniqueness on both sides.
    pub async fn create_mapping(
        &self,
        source_channel_id: &str,
        sink_account_id: &str,
        sink_access_token: &str,
    ) -> Result<JobDbModel> {
        if source_channel_id.is_empty() {
            return Err(Error::validation("source channel id is required"));
        }
        if sink_account_id.is_empty() {
            return Err(Error::validation("sink account id is required"));
        }
        if sink_access_token.is_empty() {
            return Err(Error::validation("sink access token is required"));
        }

        if self
            .jobs
            .get_job_by_pair(source_channel_id, sink_account_id)
            .await?
            .is_some()
        {
            return Err(Error::duplicate_mapping(format!(
                "mapping already exists for channel {source_channel_id} and account {sink_account_id}"
            )));
        }

        if let Some(existing) = self.jobs.get_job_by_source(source_channel_id).await? {
            return Err(Error::duplicate_mapping(format!(
                "channel {source_channel_id} is already mapped to account {}",
                existing.sink_account_id
            )));
        }

        if let Some(existing) = self.jobs.get_job_by_sink(sink_account_id).await? {
            return Err(Error::duplicate_mapping(format!(
                "account {sink_account_id} is already mapped to channel {}",
                existing.source_channel_id
            )));
        }

        let job = JobDbModel::new(source_channel_id, sink_account_id, sink_access_token);
        self.jobs.upsert_job(&job).await?;
        Ok(job)
    }

    /// Update an existing mapping; empty strings leave fields unchanged.
    pub async fn update_mapping(
        &self,
        job_id: &str,
        source_channel_id: &str,
        sink_account_id: &str,
        sink_access_token: &str,
        is_active: Option<bool>,
    ) -> Result<JobDbModel> {
        let mut job = self.require_job(job_id).await?;

        if !source_channel_id.is_empty() {
            job.source_channel_id = source_channel_id.to_string();
        }
        if !sink_account_id.is_empty() {
            job.sink_account_id = sink_account_id.to_string();
        }
        if !sink_access_token.is_empty() {
            job.sink_access_token = sink_access_token.to_string();
        }
        if let Some(active) = is_active {
            job.set_active(active);
        }
        job.updated_at = now_ms();

        self.jobs.upsert_job(&job).await?;
        Ok(job)
    }

    pub async fn get_mapping(&self, job_id: &str) -> Result<Option<JobDbModel>> {
        self.jobs.get_job_by_id(job_id).await
    }

    pub async fn list_mappings(&self) -> Result<Vec<JobDbModel>> {
        self.jobs.list_jobs(false).await
    }

    pub async fn delete_mapping(&self, job_id: &str) -> Result<()> {
        self.require_job(job_id).await?;
        self.jobs.delete_job(job_id).await
    }

    pub async fn set_active(&self, job_id: &str, active: bool) -> Result<JobDbModel> {
        let mut job = self.require_job(job_id).await?;
        job.set_active(active);
        job.updated_at = now_ms();
        self.jobs.upsert_job(&job).await?;
        Ok(job)
    }

    /// Store new sink tokens for a job.
    ///
    /// Empty strings leave the corresponding stored token unchanged; a
    /// positive `expires_in` sets the expiry to now + `expires_in`.
    pub async fn update_tokens(
        &self,
        job_id: &str,
        access_token: &str,
        refresh_token: &str,
        expires_in: i64,
    ) -> Result<JobDbModel> {
        let mut job = self.require_job(job_id).await?;

        if !access_token.is_empty() {
            job.sink_access_token = access_token.to_string();
        }
        if !refresh_token.is_empty() {
            job.sink_refresh_token = Some(refresh_token.to_string());
        }
        if expires_in > 0 {
            let expires_at = Utc::now() + ChronoDuration::seconds(expires_in);
            job.sink_token_expires_at = Some(datetime_to_ms(expires_at));
        }
        job.updated_at = now_ms();

        self.jobs.upsert_job(&job).await?;
        Ok(job)
    }

    async fn require_job(&self, job_id: &str) -> Result<JobDbModel> {
        self.jobs
            .get_job_by_id(job_id)
            .await?
            .ok_or_else(|| Error::not_found("Job", job_id))
    }
}
