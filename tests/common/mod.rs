#![allow(dead_code)]

use std::path::Path;

use s3bulk::config::args::build_config_from_args;
use s3bulk::pipeline::Pipeline;
use s3bulk::types::token::{PipelineCancellationToken, create_pipeline_cancellation_token};

/// Credentials and an unreachable endpoint for the remote target. Pipelines
/// built with these must not touch the network (dry run, local sources).
pub const DUMMY_TARGET_ARGS: &[&str] = &[
    "--target-endpoint-url",
    "http://127.0.0.1:1",
    "--target-access-key",
    "dummy_access_key",
    "--target-secret-access-key",
    "dummy_secret_access_key",
    "--target-region",
    "us-east-1",
];

pub fn init_dummy_tracing_subscriber() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("dummy=trace")
        .try_init();
}

pub fn create_files(root: &Path, files: &[(&str, &[u8])]) {
    for (relative_path, data) in files {
        let path = root.join(relative_path);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, data).unwrap();
    }
}

pub fn exists(root: &Path, relative_path: &str) -> bool {
    root.join(relative_path).exists()
}

/// `root` as a local directory location with `/` separators.
pub fn dir_location(root: &Path) -> String {
    format!("{}/", root.to_string_lossy().replace('\\', "/"))
}

pub async fn run_pipeline(args: Vec<&str>) -> Pipeline {
    run_pipeline_with_token(args, create_pipeline_cancellation_token()).await
}

pub async fn run_pipeline_with_token(
    args: Vec<&str>,
    cancellation_token: PipelineCancellationToken,
) -> Pipeline {
    let config = build_config_from_args(args).unwrap();
    let mut pipeline = Pipeline::new(config, cancellation_token).await.unwrap();

    pipeline.run().await;

    pipeline
}
