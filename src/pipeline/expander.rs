use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use anyhow::Result;
use tracing::{debug, trace, warn};

use super::stage::{SendResult, Stage};
use crate::config::{JobOptions, OperationKind};
use crate::location::Location;
use crate::types::{Action, Job, ObjectInfo, RemoveJob, StorageSide, TransferJob};

/// Hands out job ids, shared by every expander of one operation.
#[derive(Debug, Clone, Default)]
pub struct JobIdGenerator {
    next_id: Arc<AtomicU64>,
}

impl JobIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Turns the objects found below one cp/mv/rm location into Jobs.
pub struct ObjectExpander {
    base: Stage<ObjectInfo, Job>,
    source: Location,
    options: Arc<JobOptions>,
    id_generator: JobIdGenerator,
}

impl ObjectExpander {
    pub fn new(
        base: Stage<ObjectInfo, Job>,
        source: Location,
        id_generator: JobIdGenerator,
    ) -> Self {
        let options = Arc::new(base.config.job_options.clone());
        Self {
            base,
            source,
            options,
            id_generator,
        }
    }

    pub async fn expand(&self) -> Result<()> {
        trace!("expander has started.");

        loop {
            if self.base.cancellation_token.is_cancelled() {
                debug!("expander has been cancelled.");
                break;
            }

            let Some(object) = self.base.recv().await? else {
                break;
            };

            let Some(job) = self.build_job(object) else {
                continue;
            };

            if self.base.send(job).await? == SendResult::Closed {
                break;
            }
        }

        trace!("expander has been completed.");
        Ok(())
    }

    fn build_job(&self, object: ObjectInfo) -> Option<Job> {
        match self.base.config.operation {
            OperationKind::Remove => Some(Job::Remove(RemoveJob {
                id: self.id_generator.next(),
                target: object,
                location: self.source.clone(),
                side: StorageSide::Source,
                options: self.options.clone(),
            })),
            OperationKind::Copy | OperationKind::Move | OperationKind::Sync => {
                if skip_glacier_object(&self.base, &self.source, &object) {
                    return None;
                }

                let target = self.base.config.target.as_ref()?;
                let transfer_job = TransferJob {
                    id: self.id_generator.next(),
                    target: build_target_location(
                        &self.source,
                        target,
                        &object,
                        self.base.config.flatten,
                    ),
                    source: object,
                    source_location: self.source.clone(),
                    options: self.options.clone(),
                };

                if self.base.config.operation == OperationKind::Move {
                    Some(Job::Move(transfer_job))
                } else {
                    Some(Job::Copy(transfer_job))
                }
            }
            // ls and du never reach the expander.
            OperationKind::List | OperationKind::DiskUsage => None,
        }
    }
}

/// Turns sync Actions into Jobs. A Skip creates no Job.
pub struct ActionExpander {
    base: Stage<Action, Job>,
    source: Location,
    target: Location,
    options: Arc<JobOptions>,
    id_generator: JobIdGenerator,
    listing_failed: Option<Arc<AtomicBool>>,
}

impl ActionExpander {
    pub fn new(
        base: Stage<Action, Job>,
        source: Location,
        target: Location,
        id_generator: JobIdGenerator,
    ) -> Self {
        let options = Arc::new(base.config.job_options.clone());
        Self {
            base,
            source,
            target,
            options,
            id_generator,
            listing_failed: None,
        }
    }

    /// Deletions are dropped once `listing_failed` is set. An incomplete
    /// source listing would otherwise make live objects look extraneous.
    pub fn with_listing_failed_flag(mut self, listing_failed: Arc<AtomicBool>) -> Self {
        self.listing_failed = Some(listing_failed);
        self
    }

    pub async fn expand(&self) -> Result<()> {
        trace!("action expander has started.");

        loop {
            if self.base.cancellation_token.is_cancelled() {
                debug!("action expander has been cancelled.");
                break;
            }

            let Some(action) = self.base.recv().await? else {
                break;
            };

            let job = match action {
                Action::Copy { source, target } => {
                    if skip_glacier_object(&self.base, &self.source, &source) {
                        continue;
                    }
                    Job::Copy(TransferJob {
                        id: self.id_generator.next(),
                        source,
                        source_location: self.source.clone(),
                        target,
                        options: self.options.clone(),
                    })
                }
                Action::Delete { target } if self.is_listing_failed() => {
                    let key = target.key.as_str();
                    warn!(key = key, "deletion skipped because listing failed.");
                    self.base.set_warning();
                    continue;
                }
                Action::Delete { target } => Job::Remove(RemoveJob {
                    id: self.id_generator.next(),
                    target,
                    location: self.target.clone(),
                    side: StorageSide::Target,
                    options: self.options.clone(),
                }),
                Action::Skip {
                    relative_path,
                    reason,
                } => {
                    debug!(
                        relative_path = relative_path,
                        reason = reason,
                        "sync skipped."
                    );
                    continue;
                }
            };

            if self.base.send(job).await? == SendResult::Closed {
                break;
            }
        }

        self.base.close_sender();
        trace!("action expander has been completed.");
        Ok(())
    }

    fn is_listing_failed(&self) -> bool {
        self.listing_failed
            .as_ref()
            .is_some_and(|listing_failed| listing_failed.load(Ordering::SeqCst))
    }
}

fn skip_glacier_object<I>(base: &Stage<I, Job>, source: &Location, object: &ObjectInfo) -> bool {
    if !source.is_remote() || !object.is_glacier() || base.config.job_options.force_glacier_transfer
    {
        return false;
    }

    let key = object.key.as_str();
    let storage_class = object.storage_class.as_deref().unwrap_or_default();
    warn!(
        key = key,
        storage_class = storage_class,
        "glacier object is skipped. use --force-glacier-transfer to transfer it."
    );
    base.set_warning();

    true
}

/// The destination of one object. A destination that is a prefix, a bucket
/// or a local directory receives the object below it: under its base name,
/// or under its relative path when the source denotes several objects and
/// `flatten` is not set.
pub fn build_target_location(
    source: &Location,
    target: &Location,
    object: &ObjectInfo,
    flatten: bool,
) -> Location {
    let multi_object_source = !source.is_single_object();
    let join = target.is_prefix()
        || target.is_local_directory()
        || (multi_object_source && target.is_local());
    if !join {
        return target.clone();
    }

    let relative_path = if object.relative_path.is_empty() {
        object.key.as_str()
    } else {
        object.relative_path.as_str()
    };

    if multi_object_source && !flatten {
        return target.join(relative_path);
    }

    let base_name = relative_path.rsplit('/').next().unwrap_or(relative_path);
    target.join(base_name)
}

#[cfg(test)]
mod tests {
    use async_channel::Receiver;
    use aws_sdk_s3::primitives::DateTime;

    use super::*;
    use crate::Config;
    use crate::config::args::build_config_from_args;
    use crate::location::ParseOptions;
    use crate::storage::StorageSet;
    use crate::types::token::create_pipeline_cancellation_token;
    use tracing_subscriber::EnvFilter;

    fn parse(location: &str) -> Location {
        Location::parse(location, &ParseOptions::default()).unwrap()
    }

    fn object(key: &str, relative_path: &str) -> ObjectInfo {
        ObjectInfo::new(key, 1, DateTime::from_secs(1)).with_relative_path(relative_path)
    }

    fn create_expander(
        args: Vec<&str>,
    ) -> (
        ObjectExpander,
        async_channel::Sender<ObjectInfo>,
        Receiver<Job>,
        Arc<AtomicBool>,
    ) {
        let config = build_config_from_args(args).unwrap();
        let source = config.sources[0].clone();
        let (object_sender, object_receiver) = async_channel::unbounded();
        let (job_sender, job_receiver) = async_channel::unbounded();
        let has_warning = Arc::new(AtomicBool::new(false));

        let base = Stage::new(
            config,
            StorageSet::new(),
            Some(object_receiver),
            Some(job_sender),
            create_pipeline_cancellation_token(),
            has_warning.clone(),
        );

        (
            ObjectExpander::new(base, source, JobIdGenerator::new()),
            object_sender,
            job_receiver,
            has_warning,
        )
    }

    #[test]
    fn target_is_object() {
        init_dummy_tracing_subscriber();

        let target = build_target_location(
            &parse("s3://source-bucket/dir/a.txt"),
            &parse("s3://target-bucket/renamed.txt"),
            &object("dir/a.txt", "a.txt"),
            false,
        );
        assert_eq!(target.to_string(), "s3://target-bucket/renamed.txt");
    }

    #[test]
    fn target_is_prefix_with_single_object() {
        init_dummy_tracing_subscriber();

        let target = build_target_location(
            &parse("s3://source-bucket/dir/a.txt"),
            &parse("s3://target-bucket/backup/"),
            &object("dir/a.txt", "a.txt"),
            false,
        );
        assert_eq!(target.to_string(), "s3://target-bucket/backup/a.txt");

        let target = build_target_location(
            &parse("s3://source-bucket/dir/a.txt"),
            &parse("s3://target-bucket"),
            &object("dir/a.txt", "a.txt"),
            false,
        );
        assert_eq!(target.to_string(), "s3://target-bucket/a.txt");
    }

    #[test]
    fn target_keeps_relative_path_for_wildcards() {
        init_dummy_tracing_subscriber();

        let source = parse("s3://source-bucket/logs/2024-*");
        let target = build_target_location(
            &source,
            &parse("s3://target-bucket/backup/"),
            &object("logs/2024-01/a.txt", "2024-01/a.txt"),
            false,
        );
        assert_eq!(target.to_string(), "s3://target-bucket/backup/2024-01/a.txt");

        let target = build_target_location(
            &source,
            &parse("s3://target-bucket/backup/"),
            &object("logs/2024-01/a.txt", "2024-01/a.txt"),
            true,
        );
        assert_eq!(target.to_string(), "s3://target-bucket/backup/a.txt");
    }

    #[test]
    fn local_target_directory_without_slash() {
        init_dummy_tracing_subscriber();

        let target = build_target_location(
            &parse("s3://source-bucket/dir/"),
            &parse("download"),
            &object("dir/sub/a.txt", "sub/a.txt"),
            false,
        );
        assert_eq!(target.to_string(), "download/sub/a.txt");
    }

    #[tokio::test]
    async fn copy_jobs_are_numbered() {
        init_dummy_tracing_subscriber();

        let (expander, sender, receiver, _) =
            create_expander(vec!["s3bulk", "cp", "s3://source-bucket/dir/", "./download/"]);
        sender.send(object("dir/a.txt", "a.txt")).await.unwrap();
        sender.send(object("dir/b/c.txt", "b/c.txt")).await.unwrap();
        sender.close();

        expander.expand().await.unwrap();

        let Job::Copy(first) = receiver.recv().await.unwrap() else {
            panic!("copy job expected");
        };
        assert_eq!(first.id, 1);
        assert_eq!(first.target.path(), "./download/a.txt");
        let Job::Copy(second) = receiver.recv().await.unwrap() else {
            panic!("copy job expected");
        };
        assert_eq!(second.id, 2);
        assert_eq!(second.target.path(), "./download/b/c.txt");
    }

    #[tokio::test]
    async fn move_and_remove_jobs() {
        init_dummy_tracing_subscriber();

        let (expander, sender, receiver, _) =
            create_expander(vec!["s3bulk", "mv", "s3://source-bucket/dir/", "./download/"]);
        sender.send(object("dir/a.txt", "a.txt")).await.unwrap();
        sender.close();
        expander.expand().await.unwrap();
        assert!(matches!(receiver.recv().await.unwrap(), Job::Move(_)));

        let (expander, sender, receiver, _) =
            create_expander(vec!["s3bulk", "rm", "s3://source-bucket/dir/"]);
        sender.send(object("dir/a.txt", "a.txt")).await.unwrap();
        sender.close();
        expander.expand().await.unwrap();
        let Job::Remove(job) = receiver.recv().await.unwrap() else {
            panic!("remove job expected");
        };
        assert_eq!(job.side, StorageSide::Source);
        assert_eq!(job.target.key, "dir/a.txt");
    }

    #[tokio::test]
    async fn glacier_objects_are_skipped_with_warning() {
        init_dummy_tracing_subscriber();

        let (expander, sender, receiver, has_warning) =
            create_expander(vec!["s3bulk", "cp", "s3://source-bucket/dir/", "./download/"]);
        sender
            .send(
                object("dir/a.txt", "a.txt").with_storage_class(Some("GLACIER".to_string())),
            )
            .await
            .unwrap();
        sender.close();

        expander.expand().await.unwrap();

        assert!(receiver.try_recv().is_err());
        assert!(has_warning.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn glacier_objects_are_forced() {
        init_dummy_tracing_subscriber();

        let (expander, sender, receiver, has_warning) = create_expander(vec![
            "s3bulk",
            "cp",
            "--force-glacier-transfer",
            "s3://source-bucket/dir/",
            "./download/",
        ]);
        sender
            .send(
                object("dir/a.txt", "a.txt")
                    .with_storage_class(Some("DEEP_ARCHIVE".to_string())),
            )
            .await
            .unwrap();
        sender.close();

        expander.expand().await.unwrap();

        assert!(receiver.try_recv().is_ok());
        assert!(!has_warning.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn actions_become_jobs() {
        init_dummy_tracing_subscriber();

        let config: Config = build_config_from_args(vec![
            "s3bulk",
            "sync",
            "--delete",
            "s3://source-bucket/dir/",
            "s3://target-bucket/dir/",
        ])
        .unwrap();
        let source = config.sources[0].clone();
        let target = config.target.clone().unwrap();
        let (action_sender, action_receiver) = async_channel::unbounded();
        let (job_sender, job_receiver) = async_channel::unbounded();
        let base = Stage::new(
            config,
            StorageSet::new(),
            Some(action_receiver),
            Some(job_sender),
            create_pipeline_cancellation_token(),
            Arc::new(AtomicBool::new(false)),
        );
        let expander = ActionExpander::new(base, source, target.clone(), JobIdGenerator::new());

        action_sender
            .send(Action::Copy {
                source: object("dir/a.txt", "a.txt"),
                target: target.join("a.txt"),
            })
            .await
            .unwrap();
        action_sender
            .send(Action::Skip {
                relative_path: "b.txt".to_string(),
                reason: "not modified".to_string(),
            })
            .await
            .unwrap();
        action_sender
            .send(Action::Delete {
                target: object("dir/c.txt", "c.txt"),
            })
            .await
            .unwrap();
        action_sender.close();

        expander.expand().await.unwrap();

        assert!(matches!(job_receiver.recv().await.unwrap(), Job::Copy(_)));
        let Job::Remove(job) = job_receiver.recv().await.unwrap() else {
            panic!("remove job expected");
        };
        assert_eq!(job.side, StorageSide::Target);
        assert_eq!(job.id, 2);
        assert!(job_receiver.recv().await.is_err());
    }

    #[tokio::test]
    async fn deletions_are_dropped_after_listing_failure() {
        init_dummy_tracing_subscriber();

        let config: Config = build_config_from_args(vec![
            "s3bulk",
            "sync",
            "--delete",
            "s3://source-bucket/dir/",
            "s3://target-bucket/dir/",
        ])
        .unwrap();
        let source = config.sources[0].clone();
        let target = config.target.clone().unwrap();
        let (action_sender, action_receiver) = async_channel::unbounded();
        let (job_sender, job_receiver) = async_channel::unbounded();
        let has_warning = Arc::new(AtomicBool::new(false));
        let base = Stage::new(
            config,
            StorageSet::new(),
            Some(action_receiver),
            Some(job_sender),
            create_pipeline_cancellation_token(),
            has_warning.clone(),
        );
        let expander = ActionExpander::new(base, source, target.clone(), JobIdGenerator::new())
            .with_listing_failed_flag(Arc::new(AtomicBool::new(true)));

        action_sender
            .send(Action::Delete {
                target: object("dir/c.txt", "c.txt"),
            })
            .await
            .unwrap();
        action_sender
            .send(Action::Copy {
                source: object("dir/a.txt", "a.txt"),
                target: target.join("a.txt"),
            })
            .await
            .unwrap();
        action_sender.close();

        expander.expand().await.unwrap();

        assert!(matches!(job_receiver.recv().await.unwrap(), Job::Copy(_)));
        assert!(job_receiver.recv().await.is_err());
        assert!(has_warning.load(Ordering::SeqCst));
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
