use anyhow::{Result, anyhow};
use tokio::time::Instant;
use tracing::{error, info, trace, warn};

use s3bulk::Config;
use s3bulk::pipeline::Pipeline;
use s3bulk::types::OperationReport;
use s3bulk::types::token::create_pipeline_cancellation_token;

mod ctrl_c_handler;

#[allow(dead_code)]
const EXIT_CODE_SUCCESS: i32 = 0;
#[allow(dead_code)]
const EXIT_CODE_ERROR: i32 = 1;
#[allow(dead_code)]
const EXIT_CODE_INVALID_ARGS: i32 = 2;
const EXIT_CODE_WARNING: i32 = 3;

const REPORT_SUMMARY_NAME: &str = "REPORT_SUMMARY";

pub async fn run(config: Config) -> Result<()> {
    #[allow(unused_assignments)]
    let mut has_warning = false;

    {
        let cancellation_token = create_pipeline_cancellation_token();

        ctrl_c_handler::spawn_ctrl_c_handler(cancellation_token.clone());

        let start_time = Instant::now();
        trace!("pipeline start.");

        let mut pipeline = Pipeline::new(config.clone(), cancellation_token.clone()).await?;
        pipeline.run().await;

        let duration_sec = format!("{:.3}", start_time.elapsed().as_secs_f32());
        let report = pipeline.report();
        show_report_summary(&report, &duration_sec);

        if pipeline.has_error() {
            error!(duration_sec = duration_sec, "s3bulk failed.");

            return Err(anyhow!("s3bulk failed."));
        }

        has_warning = pipeline.has_warning();
        if cancellation_token.is_cancelled() {
            warn!(
                cancelled = report.cancelled,
                "operation has been cancelled."
            );
            has_warning = true;
        }

        trace!(duration_sec = duration_sec, "s3bulk has been completed.");
    }

    if has_warning {
        std::process::exit(EXIT_CODE_WARNING);
    }

    Ok(())
}

fn show_report_summary(report: &OperationReport, duration_sec: &str) {
    info!(
        name = REPORT_SUMMARY_NAME,
        total = report.total(),
        succeeded = report.succeeded,
        skipped = report.skipped,
        failed = report.failed,
        cancelled = report.cancelled,
        bytes = report.bytes,
        duration_sec = duration_sec,
    );
}
