use std::sync::Arc;

use anyhow::{Context, Error, Result, anyhow};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, trace, warn};

use crate::config::JobRetryConfig;
use crate::storage::{
    CopySource, FileRange, PutOptions, Storage, UploadedPart, split_into_ranges,
};
use crate::types::error::{S3bulkError, is_cancelled_error, is_transient_error};
use crate::types::token::{PipelineCancellationToken, create_transfer_cancellation_token};
use crate::types::{JobOutcome, TransferJob};

pub mod overwrite;

use overwrite::OverwriteDecision;

/// Moves the body of one object from a source storage to a target storage.
/// Objects above the multipart threshold move in parts, with up to
/// `concurrency` parts in flight. Between two remote storages the body is
/// copied server-side when enabled.
pub struct TransferEngine {
    source: Storage,
    target: Storage,
    cancellation_token: PipelineCancellationToken,
}

impl TransferEngine {
    pub fn new(
        source: Storage,
        target: Storage,
        cancellation_token: PipelineCancellationToken,
    ) -> Self {
        Self {
            source,
            target,
            cancellation_token,
        }
    }

    pub async fn transfer(&self, job: &TransferJob) -> Result<JobOutcome> {
        let source_key = job.source.key.as_str();
        let target_key = job.target.path();
        let size = job.source.size;

        if job.options.overwrite_policy.is_set() {
            let existing = self.target.head_object(target_key, None).await?;
            if let OverwriteDecision::Reject(reason) =
                overwrite::evaluate(&job.options.overwrite_policy, &job.source, existing.as_ref())
            {
                debug!(
                    source_key = source_key,
                    target_key = target_key,
                    reason = reason,
                    "overwrite rejected."
                );
                return Ok(JobOutcome::Skipped { reason });
            }
        }

        if job.options.dry_run {
            let target = job.target.to_string();
            info!(
                source_key = source_key,
                target = target,
                size = size,
                "[dry-run] object copied."
            );
            return Ok(JobOutcome::Done { bytes: size });
        }

        let put_options = self.build_put_options(job);
        let copy_source = self.copy_source(job);

        if !job
            .options
            .transfer_config
            .is_multipart_upload_required(size)
        {
            return self
                .transfer_single(job, &put_options, copy_source.as_ref())
                .await;
        }

        self.transfer_multipart(job, &put_options, copy_source).await
    }

    /// `None` unless both storages are remote and server-side copy is enabled.
    fn copy_source(&self, job: &TransferJob) -> Option<CopySource> {
        if !job.options.transfer_config.server_side_copy
            || self.source.is_local_storage()
            || self.target.is_local_storage()
        {
            return None;
        }

        Some(CopySource {
            bucket: job.source_location.bucket()?.to_string(),
            key: job.source.key.clone(),
            version_id: job.source.version_id.clone(),
        })
    }

    async fn transfer_single(
        &self,
        job: &TransferJob,
        put_options: &PutOptions,
        copy_source: Option<&CopySource>,
    ) -> Result<JobOutcome> {
        if let Some(copy_source) = copy_source {
            let target_key = job.target.path();
            self.target
                .copy_object(target_key, copy_source, put_options)
                .await?;

            let size = job.source.size;
            trace!(target_key = target_key, size = size, "object copied server-side.");
            return Ok(JobOutcome::Done { bytes: size });
        }

        let body = self
            .source
            .get_object(&job.source.key, job.source.version_id.clone(), None)
            .await?;
        let bytes = body.len() as u64;

        self.target
            .put_object(job.target.path(), body, put_options)
            .await?;

        let target_key = job.target.path();
        trace!(target_key = target_key, size = bytes, "object copied.");

        Ok(JobOutcome::Done { bytes })
    }

    async fn transfer_multipart(
        &self,
        job: &TransferJob,
        put_options: &PutOptions,
        copy_source: Option<CopySource>,
    ) -> Result<JobOutcome> {
        let target_key = job.target.path();
        let size = job.source.size;
        let ranges = split_into_ranges(size, job.options.transfer_config.part_size);
        let total_parts = ranges.len();

        let upload_id = self
            .target
            .create_multipart_upload(target_key, size, put_options)
            .await?;
        debug!(
            target_key = target_key,
            upload_id = upload_id,
            total_parts = total_parts,
            "multipart upload has started."
        );

        let (mut parts, failure) = self
            .transfer_parts(job, &upload_id, ranges, copy_source)
            .await;

        if let Some(e) = failure {
            let completed_parts = parts.len();
            self.abort(target_key, &upload_id).await;

            if is_cancelled_error(&e) {
                return Err(e);
            }
            return Err(anyhow!(S3bulkError::PartialTransferError {
                completed_parts,
                total_parts,
                cause: format!("{e:#}"),
            }));
        }

        parts.sort_by_key(|part| part.part_number);
        if let Err(e) = self
            .target
            .complete_multipart_upload(target_key, &upload_id, parts, put_options)
            .await
        {
            self.abort(target_key, &upload_id).await;
            return Err(anyhow!(S3bulkError::PartialTransferError {
                completed_parts: total_parts,
                total_parts,
                cause: format!("{e:#}"),
            }));
        }

        trace!(target_key = target_key, size = size, "multipart object copied.");

        Ok(JobOutcome::Done { bytes: size })
    }

    /// Returns the parts that completed and the error that stopped the
    /// transfer, if any. After the first failure no new part is started.
    async fn transfer_parts(
        &self,
        job: &TransferJob,
        upload_id: &str,
        ranges: Vec<FileRange>,
        copy_source: Option<CopySource>,
    ) -> (Vec<UploadedPart>, Option<Error>) {
        let part_token = create_transfer_cancellation_token(&self.cancellation_token);
        let concurrency = job.options.transfer_config.concurrency.max(1) as usize;
        let semaphore = Arc::new(Semaphore::new(concurrency));
        let mut tasks = JoinSet::new();
        let mut failure = None;

        for (index, range) in ranges.into_iter().enumerate() {
            let permit = tokio::select! {
                biased;
                _ = part_token.cancelled() => break,
                permit = semaphore.clone().acquire_owned() => permit,
            };
            let permit = match permit.context("tokio::sync::Semaphore::acquire_owned() failed.") {
                Ok(permit) => permit,
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            };

            let part = PartTransfer {
                source: self.source.clone(),
                target: self.target.clone(),
                source_key: job.source.key.clone(),
                version_id: job.source.version_id.clone(),
                target_key: job.target.path().to_string(),
                upload_id: upload_id.to_string(),
                part_number: index as i32 + 1,
                range,
                copy_source: copy_source.clone(),
                retry_config: job.options.retry_config,
                cancellation_token: part_token.clone(),
            };

            tasks.spawn(async move {
                let _permit = permit;
                let result = part.run().await;
                if result.is_err() {
                    part.cancellation_token.cancel();
                }
                result
            });
        }

        let mut parts = vec![];
        while let Some(result) = tasks.join_next().await {
            let result = result
                .context("tokio::task::JoinSet::join_next() failed.")
                .and_then(|result| result);

            match result {
                Ok(part) => parts.push(part),
                Err(e) => {
                    part_token.cancel();
                    // A sibling stopped by the failure reports a cancellation;
                    // keep the error that caused it.
                    let replace = failure
                        .as_ref()
                        .is_none_or(|failure| is_cancelled_error(failure) && !is_cancelled_error(&e));
                    if replace {
                        failure = Some(e);
                    }
                }
            }
        }

        if failure.is_none() && self.cancellation_token.is_cancelled() {
            failure = Some(anyhow!(S3bulkError::Cancelled));
        }

        (parts, failure)
    }

    async fn abort(&self, target_key: &str, upload_id: &str) {
        if let Err(e) = self
            .target
            .abort_multipart_upload(target_key, upload_id)
            .await
        {
            let error = format!("{e:#}");
            warn!(
                target_key = target_key,
                upload_id = upload_id,
                error = error,
                "abort_multipart_upload() failed."
            );
            return;
        }

        debug!(
            target_key = target_key,
            upload_id = upload_id,
            "multipart upload has been aborted."
        );
    }

    fn build_put_options(&self, job: &TransferJob) -> PutOptions {
        let upload_config = &job.options.upload_config;

        let content_type = upload_config.content_type.clone().or_else(|| {
            if self.source.is_local_storage() && !upload_config.no_guess_mime_type {
                mime_guess::from_path(&job.source.key)
                    .first()
                    .map(|mime| mime.to_string())
            } else {
                None
            }
        });

        PutOptions {
            last_modified: Some(job.source.last_modified),
            content_type,
            upload_config: upload_config.clone(),
        }
    }
}

struct PartTransfer {
    source: Storage,
    target: Storage,
    source_key: String,
    version_id: Option<String>,
    target_key: String,
    upload_id: String,
    part_number: i32,
    range: FileRange,
    copy_source: Option<CopySource>,
    retry_config: JobRetryConfig,
    cancellation_token: PipelineCancellationToken,
}

impl PartTransfer {
    /// Retries this part alone. Parts that already completed are never sent again.
    async fn run(&self) -> Result<UploadedPart> {
        let max_attempts = self.retry_config.retry_count.max(1);
        let mut attempt = 0;

        loop {
            if self.cancellation_token.is_cancelled() {
                return Err(anyhow!(S3bulkError::Cancelled));
            }

            attempt += 1;
            let e = match self.transfer_once().await {
                Ok(part) => return Ok(part),
                Err(e) => e,
            };

            if !is_transient_error(&e) || max_attempts <= attempt {
                return Err(e);
            }

            let backoff = self.retry_config.backoff(attempt);
            let error = format!("{e:#}");
            warn!(
                key = self.target_key.as_str(),
                part_number = self.part_number,
                attempt = attempt,
                error = error,
                "transient error, retrying part."
            );

            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = self.cancellation_token.cancelled() => {
                    return Err(anyhow!(S3bulkError::Cancelled));
                }
            }
        }
    }

    async fn transfer_once(&self) -> Result<UploadedPart> {
        if let Some(copy_source) = &self.copy_source {
            return self
                .target
                .upload_part_copy(
                    &self.target_key,
                    &self.upload_id,
                    self.part_number,
                    copy_source,
                    self.range,
                )
                .await;
        }

        let body = self
            .source
            .get_object(&self.source_key, self.version_id.clone(), Some(self.range))
            .await?;

        if body.len() as u64 != self.range.size {
            return Err(anyhow!(S3bulkError::PermanentApiError {
                operation: "get_object".to_string(),
                code: "IncompleteBody".to_string(),
                message: format!(
                    "expected {} bytes, got {} bytes for part {}",
                    self.range.size,
                    body.len(),
                    self.part_number
                ),
            }));
        }

        self.target
            .upload_part(
                &self.target_key,
                &self.upload_id,
                self.part_number,
                self.range.offset,
                body,
            )
            .await
    }
}
