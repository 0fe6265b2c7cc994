use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Error;
use async_channel::Receiver;
use tracing::{debug, error, info, trace, warn};

use crate::types::{JobResult, JobStatus, OperationReport};

/// The single consumer of the Result stream. Logs every Result once and
/// folds it into an OperationReport.
pub struct ResultAggregator {
    receiver: Receiver<JobResult>,
    has_error: Arc<AtomicBool>,
    errors: Arc<Mutex<VecDeque<Error>>>,
}

impl ResultAggregator {
    pub fn new(
        receiver: Receiver<JobResult>,
        has_error: Arc<AtomicBool>,
        errors: Arc<Mutex<VecDeque<Error>>>,
    ) -> Self {
        Self {
            receiver,
            has_error,
            errors,
        }
    }

    pub async fn aggregate(&self) -> OperationReport {
        trace!("aggregator has started.");

        let mut report = OperationReport::default();
        while let Ok(result) = self.receiver.recv().await {
            self.record(&mut report, result);
        }

        trace!("aggregator has been completed.");

        report
    }

    fn record(&self, report: &mut OperationReport, result: JobResult) {
        let JobResult {
            job_id,
            kind,
            origin,
            source,
            target,
            status,
            bytes,
            attempts,
            elapsed,
        } = result;
        let operation = kind.to_string();
        let target = target.unwrap_or_default();
        let elapsed_milliseconds = elapsed.as_millis() as u64;

        match status {
            JobStatus::Succeeded => {
                report.succeeded += 1;
                report.bytes += bytes;
                info!(
                    job_id = job_id,
                    operation = operation,
                    source = source,
                    target = target,
                    size = bytes,
                    attempts = attempts,
                    elapsed_milliseconds = elapsed_milliseconds,
                    "{operation} completed."
                );
            }
            JobStatus::Skipped { reason } => {
                report.skipped += 1;
                warn!(
                    job_id = job_id,
                    operation = operation,
                    source = source,
                    target = target,
                    reason = reason,
                    "{operation} skipped."
                );
            }
            JobStatus::Cancelled(_) => {
                report.cancelled += 1;
                debug!(
                    job_id = job_id,
                    operation = operation,
                    source = source,
                    "{operation} cancelled."
                );
            }
            JobStatus::Failed(e) => {
                report.failed += 1;
                self.has_error.store(true, Ordering::SeqCst);

                let error = format!("{e:#}");
                error!(
                    job_id = job_id,
                    operation = operation,
                    origin = origin,
                    source = source,
                    target = target,
                    attempts = attempts,
                    error = error,
                    "{operation} failed."
                );

                let e = e.context(format!("{operation} {source} failed. ({origin})"));
                if let Ok(mut errors) = self.errors.lock() {
                    errors.push_back(e);
                }
            }
        }
    }
}
