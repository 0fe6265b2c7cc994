/*!
# Overview
s3bulk copies, moves, removes, synchronizes and lists objects between S3 (or S3-compatible storage)
and local directories, many objects at a time.

## Features
- Wildcards
  A location such as `s3://bucket/logs/2024-*` is expanded client-side into the objects it
  matches. `*` and `?` also match `/`, `[...]` is a character class and `\` escapes a
  metacharacter. `--raw` disables wildcard interpretation.

- Bounded concurrency
  Objects are transferred by a fixed set of workers pulling from one bounded queue, so a
  wildcard that expands to millions of keys does not exhaust memory.
  Large objects are moved in parts, with their own concurrency bound.

- Retry
  Transient errors (throttling, server errors, connection resets) are retried with exponential
  backoff, per job and per part. Permanent errors fail the job at once. One failing job never
  stops its siblings.

- Sync
  `sync` compares two trees by relative path and copies what is new or changed, optionally
  deleting what exists only in the destination.

- Server-side copy
  S3-to-S3 transfers on one endpoint are copied by the storage itself, whole or per part.

- Listing
  `ls` and `du` share the lister and filters of the other commands and write their output as
  tracing lines.

## As a library
The CLI is a thin wrapper of this library. Arguments are converted into a [`Config`], and a
[`pipeline::Pipeline`] runs the operation.

Example usage
=============

```Toml
[dependencies]
s3bulk = "0.1"
tokio = { version = "1", features = ["full"] }
```

```no_run
use s3bulk::config::args::build_config_from_args;
use s3bulk::pipeline::Pipeline;
use s3bulk::types::token::create_pipeline_cancellation_token;

#[tokio::main]
async fn main() {
    // You can use all the arguments of the s3bulk CLI.
    let args = vec![
        "program_name",
        "cp",
        "--include",
        "*.log",
        "s3://source-bucket/logs/2024-*",
        "./download/",
    ];

    let config = build_config_from_args(args).unwrap();

    // Cancelling this token stops new jobs. Jobs in flight finish.
    let cancellation_token = create_pipeline_cancellation_token();
    let mut pipeline = Pipeline::new(config, cancellation_token).await.unwrap();

    pipeline.run().await;

    let report = pipeline.report();
    println!(
        "succeeded: {}, skipped: {}, failed: {}, bytes: {}",
        report.succeeded, report.skipped, report.failed, report.bytes
    );

    if pipeline.has_error() {
        for e in pipeline.get_errors_and_consume().unwrap() {
            println!("{e:#}");
        }
    }

    // A wildcard that matched nothing or a skipped glacier object is a warning.
    if pipeline.has_warning() {
        println!("A warning has occurred.");
    }
}
```
*/

pub use config::Config;
pub use config::args::CLIArgs;

pub mod config;
pub mod location;
pub mod pipeline;
pub mod storage;
pub mod types;
