use anyhow::{Context, Result, anyhow};
use tracing::{debug, trace, warn};

use super::stage::{SendResult, Stage};
use crate::location::Location;
use crate::storage::Storage;
use crate::types::error::{S3bulkError, is_transient_error};
use crate::types::{ObjectInfo, StorageSide};

const LISTING_CHANNEL_CAPACITY: usize = 1000;

#[derive(Default)]
struct ListingProgress {
    matched: usize,
    last_key: Option<String>,
    buffered: Vec<ObjectInfo>,
}

/// Resolves one location into the objects it denotes.
pub struct ObjectLister {
    base: Stage<(), ObjectInfo>,
    location: Location,
    side: StorageSide,
}

impl ObjectLister {
    pub fn new(base: Stage<(), ObjectInfo>, location: Location, side: StorageSide) -> Self {
        Self {
            base,
            location,
            side,
        }
    }

    /// Sends every matching object in listing order. Remote listings come
    /// back in key order, local walks in directory order.
    pub async fn list(&self) -> Result<()> {
        self.list_objects(false).await
    }

    /// Sends every matching object sorted by relative path. Local entries
    /// are buffered for this, remote listings already are in this order.
    pub async fn list_sorted(&self) -> Result<()> {
        self.list_objects(true).await
    }

    async fn list_objects(&self, sorted: bool) -> Result<()> {
        let location = self.location.to_string();
        trace!(location = location, "list has started.");

        let storage = self.base.storages.get(self.side, &self.location)?;

        if self.location.is_single_object() {
            self.send_single_object(&storage).await?;
        } else {
            let matched = self
                .send_matching_objects(storage.clone(), sorted && storage.is_local_storage())
                .await?;

            if matched == 0 && self.location.is_wildcard() && !self.is_cancelled() {
                let pattern = self.location.original();
                warn!(pattern = pattern, "no object matched the wildcard.");
                self.base.set_warning();
            }
        }

        trace!(location = location, "list has been completed.");
        self.base.close_sender();

        Ok(())
    }

    async fn send_single_object(&self, storage: &Storage) -> Result<()> {
        let version_id = self.location.version_id().map(|v| v.to_string());

        let mut attempt = 0;
        let object = loop {
            attempt += 1;
            let e = match storage
                .head_object(self.location.path(), version_id.clone())
                .await
            {
                Ok(object) => break object,
                Err(e) => e,
            };

            if !self.backoff_before_retry(storage, attempt, &e).await {
                return if self.is_cancelled() { Ok(()) } else { Err(e) };
            }
        };

        let object = object.ok_or_else(|| {
            anyhow!(S3bulkError::NoObjectFound(
                self.location.original().to_string()
            ))
        })?;

        let relative_path = self.location.relative_path(&object.key);
        let version_id = version_id.or(object.version_id.clone());
        let object = object
            .with_relative_path(&relative_path)
            .with_version_id(version_id);

        self.base.send(object).await?;

        Ok(())
    }

    /// Returns the number of objects that matched the location. A listing
    /// interrupted by a transient error is resumed after the last key it
    /// delivered.
    async fn send_matching_objects(&self, storage: Storage, sorted: bool) -> Result<usize> {
        let mut progress = ListingProgress::default();

        let mut attempt = 0;
        loop {
            attempt += 1;
            let e = match self.list_once(storage.clone(), sorted, &mut progress).await {
                Ok(()) => break,
                Err(e) => e,
            };

            if !self.backoff_before_retry(&storage, attempt, &e).await {
                if self.is_cancelled() {
                    return Ok(progress.matched);
                }
                return Err(self.list_error(e));
            }
        }

        if sorted {
            progress
                .buffered
                .sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
            for object in progress.buffered {
                if self.is_cancelled() || self.base.send(object).await? == SendResult::Closed {
                    break;
                }
            }
        }

        Ok(progress.matched)
    }

    async fn list_once(
        &self,
        storage: Storage,
        sorted: bool,
        progress: &mut ListingProgress,
    ) -> Result<()> {
        let (sender, receiver) = async_channel::bounded(LISTING_CHANNEL_CAPACITY);
        let prefix = self.location.listing_prefix().to_string();
        let max_keys = self.base.config.max_keys;
        let start_after = progress.last_key.clone();

        let list_task = tokio::spawn(async move {
            let result = storage
                .list_objects(&prefix, &sender, max_keys, start_after)
                .await;
            sender.close();
            result
        });

        loop {
            if self.is_cancelled() {
                debug!("lister has been cancelled.");
                receiver.close();
                break;
            }

            let Ok(object) = receiver.recv().await else {
                break;
            };
            progress.last_key = Some(object.key.clone());

            if !self.location.matches(&object.key) {
                continue;
            }

            let relative_path = self.location.relative_path(&object.key);
            if relative_path.is_empty() {
                let key = object.key.as_str();
                debug!(key = key, "object without a relative path is skipped.");
                continue;
            }

            progress.matched += 1;
            let object = object.with_relative_path(&relative_path);

            if sorted {
                progress.buffered.push(object);
                continue;
            }

            if self.base.send(object).await? == SendResult::Closed {
                receiver.close();
                break;
            }
        }

        list_task
            .await
            .context("tokio::task::JoinHandle::await failed.")?
    }

    /// Sleeps before the next attempt. `false` means give up: the error is
    /// not transient, attempts are exhausted or the run was cancelled.
    async fn backoff_before_retry(
        &self,
        storage: &Storage,
        attempt: u32,
        e: &anyhow::Error,
    ) -> bool {
        let retry_config = &self.base.config.job_options.retry_config;
        if storage.is_local_storage()
            || !is_transient_error(e)
            || retry_config.retry_count.max(1) <= attempt
            || self.is_cancelled()
        {
            return false;
        }

        let backoff = retry_config.backoff(attempt);
        let location = self.location.to_string();
        let error = format!("{e:#}");
        warn!(
            location = location,
            attempt = attempt,
            error = error,
            "transient listing error, retrying."
        );

        tokio::select! {
            _ = tokio::time::sleep(backoff) => true,
            _ = self.base.cancellation_token.cancelled() => false,
        }
    }

    fn list_error(&self, e: anyhow::Error) -> anyhow::Error {
        if let Some(S3bulkError::ListError { .. }) = e.downcast_ref::<S3bulkError>() {
            return e;
        }

        anyhow!(S3bulkError::ListError {
            location: self.location.original().to_string(),
            message: format!("{e:#}"),
        })
    }

    fn is_cancelled(&self) -> bool {
        self.base.cancellation_token.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_channel::Receiver;
    use proptest::prelude::*;

    use super::*;
    use crate::config::args::build_config_from_args;
    use crate::location::ParseOptions;
    use crate::storage::StorageSet;
    use crate::storage::memory::{
        MemoryOperation, MemoryStorage, permanent_error, transient_error,
    };
    use crate::types::token::create_pipeline_cancellation_token;
    use tracing_subscriber::EnvFilter;

    fn create_lister(
        location: &str,
        raw: bool,
        storage: MemoryStorage,
    ) -> (ObjectLister, Receiver<ObjectInfo>, Arc<AtomicBool>) {
        let config = build_config_from_args(vec![
            "s3bulk",
            "--retry-count",
            "3",
            "--initial-backoff-milliseconds",
            "1",
            "cp",
            "s3://source-bucket/",
            "./download/",
        ])
        .unwrap();
        let location = Location::parse(
            location,
            &ParseOptions {
                raw,
                version_id: None,
            },
        )
        .unwrap();

        let mut storages = StorageSet::new();
        storages.insert(StorageSide::Source, &location, Box::new(storage));

        let (sender, receiver) = async_channel::unbounded();
        let has_warning = Arc::new(AtomicBool::new(false));
        let base = Stage::new(
            config,
            storages,
            None,
            Some(sender),
            create_pipeline_cancellation_token(),
            has_warning.clone(),
        );

        (
            ObjectLister::new(base, location, StorageSide::Source),
            receiver,
            has_warning,
        )
    }

    fn collect(receiver: &Receiver<ObjectInfo>) -> Vec<ObjectInfo> {
        let mut objects = vec![];
        while let Ok(object) = receiver.try_recv() {
            objects.push(object);
        }
        objects
    }

    fn storage_with_keys(keys: &[&str]) -> MemoryStorage {
        let storage = MemoryStorage::new();
        for key in keys {
            storage.insert_object(key, b"data", 1);
        }
        storage
    }

    #[tokio::test]
    async fn wildcard_yields_matching_keys_only() {
        init_dummy_tracing_subscriber();

        let storage = storage_with_keys(&[
            "logs/2024-01.txt",
            "logs/2024-02.txt",
            "logs/2024-03/a.txt",
            "logs/2024-04.txt",
            "logs/2024-05.txt",
            "logs/2023-12.txt",
            "logs/other.txt",
            "readme.txt",
        ]);
        let (lister, receiver, has_warning) =
            create_lister("s3://source-bucket/logs/2024-*", false, storage);

        lister.list().await.unwrap();

        let objects = collect(&receiver);
        let relative_paths: Vec<&str> = objects.iter().map(|o| o.relative_path.as_str()).collect();
        assert_eq!(
            relative_paths,
            vec![
                "2024-01.txt",
                "2024-02.txt",
                "2024-03/a.txt",
                "2024-04.txt",
                "2024-05.txt"
            ]
        );
        assert!(!has_warning.load(Ordering::SeqCst));
        assert!(receiver.is_closed());
    }

    #[tokio::test]
    async fn prefix_yields_relative_paths() {
        init_dummy_tracing_subscriber();

        let storage = storage_with_keys(&["dir/a.txt", "dir/sub/b.txt", "dir2/c.txt"]);
        let (lister, receiver, _) = create_lister("s3://source-bucket/dir/", false, storage);

        lister.list().await.unwrap();

        let objects = collect(&receiver);
        assert_eq!(objects.len(), 2);
        assert_eq!(objects[0].key, "dir/a.txt");
        assert_eq!(objects[0].relative_path, "a.txt");
        assert_eq!(objects[1].relative_path, "sub/b.txt");
    }

    #[tokio::test]
    async fn single_object_is_resolved_with_head() {
        init_dummy_tracing_subscriber();

        let storage = storage_with_keys(&["dir/a.txt", "dir/a.txt.bak"]);
        let (lister, receiver, _) =
            create_lister("s3://source-bucket/dir/a.txt", false, storage.clone());

        lister.list().await.unwrap();

        let objects = collect(&receiver);
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].key, "dir/a.txt");
        assert_eq!(objects[0].relative_path, "a.txt");
        assert_eq!(storage.call_count(MemoryOperation::List), 0);
        assert_eq!(storage.call_count(MemoryOperation::Head), 1);
    }

    #[tokio::test]
    async fn missing_single_object_is_an_error() {
        init_dummy_tracing_subscriber();

        let (lister, _receiver, _) =
            create_lister("s3://source-bucket/missing.txt", false, MemoryStorage::new());

        let e = lister.list().await.unwrap_err();

        assert!(matches!(
            e.downcast_ref::<S3bulkError>(),
            Some(S3bulkError::NoObjectFound(_))
        ));
    }

    #[tokio::test]
    async fn missing_prefix_yields_nothing() {
        init_dummy_tracing_subscriber();

        let storage = storage_with_keys(&["other/a.txt"]);
        let (lister, receiver, has_warning) =
            create_lister("s3://source-bucket/dir/", false, storage);

        lister.list().await.unwrap();

        assert!(collect(&receiver).is_empty());
        assert!(!has_warning.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn unmatched_wildcard_is_a_warning() {
        init_dummy_tracing_subscriber();

        let storage = storage_with_keys(&["dir/a.txt"]);
        let (lister, receiver, has_warning) =
            create_lister("s3://source-bucket/dir/*.csv", false, storage);

        lister.list().await.unwrap();

        assert!(collect(&receiver).is_empty());
        assert!(has_warning.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn raw_mode_matches_metacharacters_literally() {
        init_dummy_tracing_subscriber();

        let storage = storage_with_keys(&["dir/a*.txt", "dir/ab.txt"]);
        let (lister, receiver, _) =
            create_lister("s3://source-bucket/dir/a*.txt", true, storage);

        lister.list().await.unwrap();

        let objects = collect(&receiver);
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].key, "dir/a*.txt");
    }

    #[tokio::test]
    async fn listing_error_is_propagated() {
        init_dummy_tracing_subscriber();

        let storage = storage_with_keys(&["dir/a.txt"]);
        storage.fail(
            MemoryOperation::List,
            None,
            None,
            S3bulkError::ListError {
                location: "s3://source-bucket/dir/".to_string(),
                message: "AccessDenied".to_string(),
            },
            None,
        );
        let (lister, _receiver, _) = create_lister("s3://source-bucket/dir/", false, storage);

        let e = lister.list().await.unwrap_err();

        assert!(matches!(
            e.downcast_ref::<S3bulkError>(),
            Some(S3bulkError::ListError { .. })
        ));
    }

    #[tokio::test]
    async fn head_error_is_propagated() {
        init_dummy_tracing_subscriber();

        let storage = storage_with_keys(&["a.txt"]);
        storage.fail(
            MemoryOperation::Head,
            None,
            None,
            permanent_error("head_object"),
            None,
        );
        let (lister, _receiver, _) = create_lister("s3://source-bucket/a.txt", false, storage);

        assert!(lister.list().await.is_err());
    }

    #[tokio::test]
    async fn transient_listing_error_is_retried() {
        init_dummy_tracing_subscriber();

        let storage = storage_with_keys(&["dir/a.txt", "dir/b.txt", "dir/c.txt"]);
        storage.fail(
            MemoryOperation::List,
            None,
            None,
            transient_error("list_objects_v2"),
            Some(1),
        );
        let (lister, receiver, has_warning) =
            create_lister("s3://source-bucket/dir/", false, storage.clone());

        lister.list().await.unwrap();

        let keys: Vec<String> = collect(&receiver).into_iter().map(|o| o.key).collect();
        assert_eq!(keys, vec!["dir/a.txt", "dir/b.txt", "dir/c.txt"]);
        assert_eq!(storage.call_count(MemoryOperation::List), 2);
        assert!(!has_warning.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn interrupted_listing_resumes_after_last_key() {
        init_dummy_tracing_subscriber();

        let storage =
            storage_with_keys(&["dir/a.txt", "dir/b.txt", "dir/c.txt", "dir/d.txt"]);
        storage.fail(
            MemoryOperation::List,
            Some("dir/c.txt"),
            None,
            transient_error("list_objects_v2"),
            Some(1),
        );
        let (lister, receiver, _) =
            create_lister("s3://source-bucket/dir/*", false, storage.clone());

        lister.list().await.unwrap();

        let keys: Vec<String> = collect(&receiver).into_iter().map(|o| o.key).collect();
        assert_eq!(keys, vec!["dir/a.txt", "dir/b.txt", "dir/c.txt", "dir/d.txt"]);
        assert_eq!(storage.call_count(MemoryOperation::List), 2);
    }

    #[tokio::test]
    async fn exhausted_listing_retries_are_a_list_error() {
        init_dummy_tracing_subscriber();

        let storage = storage_with_keys(&["dir/a.txt"]);
        storage.fail(
            MemoryOperation::List,
            None,
            None,
            transient_error("list_objects_v2"),
            None,
        );
        let (lister, _receiver, _) =
            create_lister("s3://source-bucket/dir/", false, storage.clone());

        let e = lister.list().await.unwrap_err();

        assert!(matches!(
            e.downcast_ref::<S3bulkError>(),
            Some(S3bulkError::ListError { .. })
        ));
        assert_eq!(storage.call_count(MemoryOperation::List), 3);
    }

    #[tokio::test]
    async fn permanent_listing_error_is_not_retried() {
        init_dummy_tracing_subscriber();

        let storage = storage_with_keys(&["dir/a.txt"]);
        storage.fail(
            MemoryOperation::List,
            None,
            None,
            permanent_error("list_objects_v2"),
            Some(1),
        );
        let (lister, _receiver, _) =
            create_lister("s3://source-bucket/dir/", false, storage.clone());

        let e = lister.list().await.unwrap_err();

        assert!(matches!(
            e.downcast_ref::<S3bulkError>(),
            Some(S3bulkError::ListError { .. })
        ));
        assert_eq!(storage.call_count(MemoryOperation::List), 1);
    }

    #[tokio::test]
    async fn transient_head_error_is_retried() {
        init_dummy_tracing_subscriber();

        let storage = storage_with_keys(&["a.txt"]);
        storage.fail(
            MemoryOperation::Head,
            None,
            None,
            transient_error("head_object"),
            Some(2),
        );
        let (lister, receiver, _) =
            create_lister("s3://source-bucket/a.txt", false, storage.clone());

        lister.list().await.unwrap();

        assert_eq!(collect(&receiver).len(), 1);
        assert_eq!(storage.call_count(MemoryOperation::Head), 3);
    }

    #[tokio::test]
    async fn sorted_local_listing() {
        init_dummy_tracing_subscriber();

        let storage = MemoryStorage::new_local();
        for key in ["dir/b/c.txt", "dir/a.txt", "dir/b.txt"] {
            storage.insert_object(key, b"data", 1);
        }
        let (lister, receiver, _) = create_lister("dir/", false, storage);

        lister.list_sorted().await.unwrap();

        let relative_paths: Vec<String> = collect(&receiver)
            .into_iter()
            .map(|o| o.relative_path)
            .collect();
        assert_eq!(relative_paths, vec!["a.txt", "b.txt", "b/c.txt"]);
    }

    #[tokio::test]
    async fn cancelled_lister_sends_nothing() {
        init_dummy_tracing_subscriber();

        let storage = storage_with_keys(&["dir/a.txt", "dir/b.txt"]);
        let (lister, receiver, has_warning) =
            create_lister("s3://source-bucket/dir/*", false, storage);
        lister.base.cancellation_token.cancel();

        lister.list().await.unwrap();

        assert!(collect(&receiver).is_empty());
        assert!(!has_warning.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn closed_downstream_stops_listing() {
        init_dummy_tracing_subscriber();

        let storage = storage_with_keys(&["dir/a.txt", "dir/b.txt"]);
        let (lister, receiver, _) = create_lister("s3://source-bucket/dir/", false, storage);
        receiver.close();

        lister.list().await.unwrap();
    }

    fn key_strategy() -> impl Strategy<Value = Vec<String>> {
        prop::collection::btree_set("[ab]{1,2}(/[ab.]{1,3}){0,2}", 0..20)
            .prop_map(|keys| keys.into_iter().collect())
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn lister_output_equals_glob_matches(
            keys in key_strategy(),
            pattern in "(a|b|\\*|\\?|/|\\.){1,5}",
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();

            let location = format!("s3://source-bucket/{pattern}");
            let Ok(parsed) = Location::parse(&location, &ParseOptions::default()) else {
                return Ok(());
            };
            if !parsed.is_wildcard() {
                return Ok(());
            }
            let glob = parsed.glob().unwrap().clone();

            let storage = MemoryStorage::new();
            for key in &keys {
                storage.insert_object(key, b"x", 1);
            }
            let (lister, receiver, _) = create_lister(&location, false, storage);
            runtime.block_on(lister.list()).unwrap();

            let listed: Vec<String> = collect(&receiver).into_iter().map(|o| o.key).collect();
            let expected: Vec<String> = keys
                .iter()
                .filter(|key| glob.is_match(key))
                .filter(|key| !parsed.relative_path(key).is_empty())
                .cloned()
                .collect();
            prop_assert_eq!(listed, expected);
        }
    }

    fn init_dummy_tracing_subscriber() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env()
                    .or_else(|_| EnvFilter::try_new("dummy=trace"))
                    .unwrap(),
            )
            .try_init();
    }
}
