mod common;

use s3bulk::types::error::S3bulkError;
use s3bulk::types::token::create_pipeline_cancellation_token;

use common::*;

const FILES: &[(&str, &[u8])] = &[
    ("logs/2024-01/app.log", b"app"),
    ("logs/2024-01/db.log", b"db"),
    ("logs/2024-02/app.log", b"app2"),
    ("logs/2024-02/notes.txt", b"notes"),
    ("keep/app.log", b"keep"),
];

#[tokio::test]
async fn remove_with_wildcard() {
    init_dummy_tracing_subscriber();

    let dir = tempfile::tempdir().unwrap();
    create_files(dir.path(), FILES);
    let location = format!("{}logs/*.log", dir_location(dir.path()));

    let pipeline = run_pipeline(vec!["s3bulk", "rm", location.as_str()]).await;

    assert!(!pipeline.has_error());
    assert!(!pipeline.has_warning());
    assert_eq!(pipeline.report().succeeded, 3);
    assert_eq!(pipeline.report().bytes, 0);

    assert!(!exists(dir.path(), "logs/2024-01/app.log"));
    assert!(!exists(dir.path(), "logs/2024-01/db.log"));
    assert!(!exists(dir.path(), "logs/2024-02/app.log"));
    assert!(exists(dir.path(), "logs/2024-02/notes.txt"));
    assert!(exists(dir.path(), "keep/app.log"));
}

#[tokio::test]
async fn remove_directory_with_exclude() {
    init_dummy_tracing_subscriber();

    let dir = tempfile::tempdir().unwrap();
    create_files(dir.path(), FILES);
    let location = format!("{}logs/", dir_location(dir.path()));

    let pipeline = run_pipeline(vec![
        "s3bulk",
        "rm",
        "--exclude",
        "*.txt",
        location.as_str(),
    ])
    .await;

    assert!(!pipeline.has_error());
    assert_eq!(pipeline.report().succeeded, 3);
    assert!(exists(dir.path(), "logs/2024-02/notes.txt"));
    assert!(!exists(dir.path(), "logs/2024-02/app.log"));
}

#[tokio::test]
async fn remove_several_locations() {
    init_dummy_tracing_subscriber();

    let dir = tempfile::tempdir().unwrap();
    create_files(dir.path(), FILES);
    let first = format!("{}logs/2024-01/*", dir_location(dir.path()));
    let second = format!("{}keep/app.log", dir_location(dir.path()));

    let pipeline = run_pipeline(vec!["s3bulk", "rm", first.as_str(), second.as_str()]).await;

    assert!(!pipeline.has_error());
    assert_eq!(pipeline.report().succeeded, 3);
    assert!(!exists(dir.path(), "keep/app.log"));
    assert!(exists(dir.path(), "logs/2024-02/app.log"));
}

#[tokio::test]
async fn dry_run_removes_nothing() {
    init_dummy_tracing_subscriber();

    let dir = tempfile::tempdir().unwrap();
    create_files(dir.path(), FILES);
    let location = format!("{}logs/*", dir_location(dir.path()));

    let pipeline = run_pipeline(vec!["s3bulk", "--dry-run", "rm", location.as_str()]).await;

    assert!(!pipeline.has_error());
    assert_eq!(pipeline.report().succeeded, 4);
    for (relative_path, _) in FILES {
        assert!(exists(dir.path(), relative_path));
    }
}

#[tokio::test]
async fn unmatched_wildcard_is_a_warning() {
    init_dummy_tracing_subscriber();

    let dir = tempfile::tempdir().unwrap();
    create_files(dir.path(), FILES);
    let location = format!("{}logs/*.csv", dir_location(dir.path()));

    let pipeline = run_pipeline(vec!["s3bulk", "rm", location.as_str()]).await;

    assert!(!pipeline.has_error());
    assert!(pipeline.has_warning());
    assert_eq!(pipeline.report().total(), 0);
}

#[tokio::test]
async fn missing_file_is_an_error() {
    init_dummy_tracing_subscriber();

    let dir = tempfile::tempdir().unwrap();
    let location = format!("{}missing.txt", dir_location(dir.path()));

    let pipeline = run_pipeline(vec!["s3bulk", "rm", location.as_str()]).await;

    assert!(pipeline.has_error());
    let errors = pipeline.get_errors_and_consume().unwrap();
    assert!(errors.iter().any(|e| matches!(
        e.downcast_ref::<S3bulkError>(),
        Some(S3bulkError::NoObjectFound(_))
    )));
}

#[tokio::test]
async fn cancelled_before_run_removes_nothing() {
    init_dummy_tracing_subscriber();

    let dir = tempfile::tempdir().unwrap();
    create_files(dir.path(), FILES);
    let location = format!("{}logs/*", dir_location(dir.path()));

    let cancellation_token = create_pipeline_cancellation_token();
    cancellation_token.cancel();
    let pipeline =
        run_pipeline_with_token(vec!["s3bulk", "rm", location.as_str()], cancellation_token)
            .await;

    assert!(!pipeline.has_error());
    assert_eq!(pipeline.report().succeeded, 0);
    for (relative_path, _) in FILES {
        assert!(exists(dir.path(), relative_path));
    }
}
