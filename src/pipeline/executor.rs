use std::sync::Arc;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use leaky_bucket::RateLimiter;
use tracing::{info, trace};

use super::scheduler::JobExecutor;
use super::transfer::TransferEngine;
use crate::storage::StorageSet;
use crate::types::error::S3bulkError;
use crate::types::token::PipelineCancellationToken;
use crate::types::{Job, JobOutcome, RemoveJob, StorageSide, TransferJob};

/// Runs a single attempt of a Job against the storages of the operation.
pub struct ObjectExecutor {
    storages: StorageSet,
    cancellation_token: PipelineCancellationToken,
    rate_limiter: Option<Arc<RateLimiter>>,
}

impl ObjectExecutor {
    pub fn new(
        storages: StorageSet,
        cancellation_token: PipelineCancellationToken,
        rate_limiter: Option<Arc<RateLimiter>>,
    ) -> Self {
        Self {
            storages,
            cancellation_token,
            rate_limiter,
        }
    }

    async fn copy(&self, job: &TransferJob) -> Result<JobOutcome> {
        let source = self
            .storages
            .get(StorageSide::Source, &job.source_location)?;
        let target = self.storages.get(StorageSide::Target, &job.target)?;

        TransferEngine::new(source, target, self.cancellation_token.clone())
            .transfer(job)
            .await
    }

    /// The source is deleted only after the copy has landed.
    async fn move_object(&self, job: &TransferJob) -> Result<JobOutcome> {
        let outcome = self.copy(job).await?;
        if !matches!(outcome, JobOutcome::Done { .. }) {
            return Ok(outcome);
        }

        let source_key = job.source.key.as_str();
        if job.options.dry_run {
            info!(source_key = source_key, "[dry-run] source object deleted.");
            return Ok(outcome);
        }

        let source = self
            .storages
            .get(StorageSide::Source, &job.source_location)?;
        source
            .delete_object(source_key, job.source.version_id.clone())
            .await?;

        trace!(source_key = source_key, "source object deleted.");

        Ok(outcome)
    }

    async fn remove(&self, job: &RemoveJob) -> Result<JobOutcome> {
        let key = job.target.key.as_str();
        if job.options.dry_run {
            info!(key = key, "[dry-run] object deleted.");
            return Ok(JobOutcome::Done { bytes: 0 });
        }

        let storage = self.storages.get(job.side, &job.location)?;
        storage
            .delete_object(key, job.target.version_id.clone())
            .await?;

        trace!(key = key, "object deleted.");

        Ok(JobOutcome::Done { bytes: 0 })
    }
}

#[async_trait]
impl JobExecutor for ObjectExecutor {
    async fn execute(&self, job: &Job) -> Result<JobOutcome> {
        if let Some(rate_limiter) = &self.rate_limiter {
            tokio::select! {
                biased;
                _ = self.cancellation_token.cancelled() => {
                    return Err(anyhow!(S3bulkError::Cancelled));
                }
                _ = rate_limiter.acquire_one() => {}
            }
        }

        if self.cancellation_token.is_cancelled() {
            return Err(anyhow!(S3bulkError::Cancelled));
        }

        match job {
            Job::Copy(job) => self.copy(job).await,
            Job::Move(job) => self.move_object(job).await,
            Job::Remove(job) => self.remove(job).await,
        }
    }
}
