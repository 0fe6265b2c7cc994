use std::sync::Arc;

use anyhow::Result;
use async_channel::{Receiver, Sender};
use async_trait::async_trait;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::types::error::{is_cancelled_error, is_transient_error};
use crate::types::token::PipelineCancellationToken;
use crate::types::{Job, JobOutcome, JobResult, JobStatus};

const RESULT_CHANNEL_CAPACITY: usize = 1000;

/// Executes one Job attempt. Retry is the scheduler's business.
#[async_trait]
pub trait JobExecutor {
    async fn execute(&self, job: &Job) -> Result<JobOutcome>;
}

pub type Executor = Arc<dyn JobExecutor + Send + Sync>;

/// A fixed set of workers pulling Jobs from one bounded queue. Every Job
/// taken from the queue yields exactly one JobResult, cancelled or not.
pub struct Scheduler {
    executor: Executor,
    cancellation_token: PipelineCancellationToken,
}

impl Scheduler {
    pub fn new(executor: Executor, cancellation_token: PipelineCancellationToken) -> Self {
        Self {
            executor,
            cancellation_token,
        }
    }

    /// Starts `worker_count` workers on `jobs`. The returned stream closes
    /// once `jobs` is closed and drained and every worker has finished.
    pub fn run(&self, jobs: Receiver<Job>, worker_count: u16) -> Receiver<JobResult> {
        let (result_sender, result_receiver) = async_channel::bounded(RESULT_CHANNEL_CAPACITY);

        let mut workers = JoinSet::new();
        for worker_index in 0..worker_count.max(1) {
            workers.spawn(run_worker(
                worker_index,
                self.executor.clone(),
                jobs.clone(),
                result_sender.clone(),
                self.cancellation_token.clone(),
            ));
        }

        let cancellation_token = self.cancellation_token.clone();
        tokio::spawn(async move {
            while let Some(result) = workers.join_next().await {
                if let Err(e) = result {
                    let error = e.to_string();
                    warn!(error = error, "worker has terminated abnormally.");
                }
            }

            if cancellation_token.is_cancelled() {
                drain_cancelled_jobs(&jobs, &result_sender).await;
            }

            info!("workers idle, finishing up.");
            result_sender.close();
        });

        result_receiver
    }
}

async fn run_worker(
    worker_index: u16,
    executor: Executor,
    jobs: Receiver<Job>,
    results: Sender<JobResult>,
    cancellation_token: PipelineCancellationToken,
) {
    trace!(worker_index = worker_index, "worker has started.");

    loop {
        let job = tokio::select! {
            biased;
            _ = cancellation_token.cancelled() => {
                debug!(worker_index = worker_index, "worker has been cancelled.");
                break;
            }
            job = jobs.recv() => match job {
                Ok(job) => job,
                Err(_) => break,
            },
        };

        let result = execute_with_retry(&executor, job, &cancellation_token).await;
        if results.send(result).await.is_err() {
            debug!(worker_index = worker_index, "result channel has been closed.");
            break;
        }
    }

    trace!(worker_index = worker_index, "worker has been completed.");
}

async fn execute_with_retry(
    executor: &Executor,
    job: Job,
    cancellation_token: &PipelineCancellationToken,
) -> JobResult {
    let started = Instant::now();
    let retry_config = job.options().retry_config;
    let max_attempts = retry_config.retry_count.max(1);
    let job_id = job.id();

    let mut attempt = 0;
    loop {
        attempt += 1;

        let e = match executor.execute(&job).await {
            Ok(JobOutcome::Done { bytes }) => {
                return JobResult::new(&job, JobStatus::Succeeded, bytes, attempt, started.elapsed());
            }
            Ok(JobOutcome::Skipped { reason }) => {
                return JobResult::new(
                    &job,
                    JobStatus::Skipped { reason },
                    0,
                    attempt,
                    started.elapsed(),
                );
            }
            Err(e) => e,
        };

        if is_cancelled_error(&e) {
            return JobResult::new(&job, JobStatus::Cancelled(e), 0, attempt, started.elapsed());
        }

        if !is_transient_error(&e) || max_attempts <= attempt {
            return JobResult::new(&job, JobStatus::Failed(e), 0, attempt, started.elapsed());
        }

        let backoff = retry_config.backoff(attempt);
        let error = format!("{e:#}");
        let backoff_milliseconds = backoff.as_millis() as u64;
        warn!(
            job_id = job_id,
            attempt = attempt,
            backoff_milliseconds = backoff_milliseconds,
            error = error,
            "transient error, retrying."
        );

        tokio::select! {
            _ = tokio::time::sleep(backoff) => {}
            _ = cancellation_token.cancelled() => {
                return JobResult::new(&job, JobStatus::cancelled(), 0, attempt, started.elapsed());
            }
        }
    }
}

/// Queued Jobs no worker will pick up any more still get their Result.
async fn drain_cancelled_jobs(jobs: &Receiver<Job>, results: &Sender<JobResult>) {
    jobs.close();

    while let Ok(job) = jobs.recv().await {
        let result = JobResult::new(
            &job,
            JobStatus::cancelled(),
            0,
            0,
            std::time::Duration::ZERO,
        );
        if results.send(result).await.is_err() {
            break;
        }
    }
}
