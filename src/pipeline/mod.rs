use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Error, Result, anyhow};
use async_channel::Receiver;
use tracing::{error, trace};

use crate::Config;
use crate::config::OperationKind;
use crate::location::Location;
use crate::pipeline::aggregator::ResultAggregator;
use crate::pipeline::executor::ObjectExecutor;
use crate::pipeline::expander::{ActionExpander, JobIdGenerator, ObjectExpander};
use crate::pipeline::filter::{ExcludeFilter, IncludeFilter, ObjectFilter};
use crate::pipeline::inventory::ObjectInventory;
use crate::pipeline::lister::ObjectLister;
use crate::pipeline::scheduler::{Executor, Scheduler};
use crate::pipeline::stage::Stage;
use crate::pipeline::sync_planner::SyncPlanner;
use crate::storage::StorageSet;
use crate::types::error::S3bulkError;
use crate::types::token::PipelineCancellationToken;
use crate::types::{Action, Job, JobResult, ObjectInfo, OperationReport, StorageSide};

const CHANNEL_CAPACITY: usize = 20000;

mod aggregator;
mod diff_detector;
mod executor;
mod expander;
mod filter;
mod inventory;
mod lister;
mod scheduler;
mod stage;
mod storage_factory;
mod sync_planner;
mod transfer;

/// One cp, mv, rm, sync, ls or du operation.
///
/// cp/mv/rm: lister -> filters -> expander (per source location) -> scheduler -> aggregator
///
/// sync: two sorted listers -> filters -> sync planner -> expander -> scheduler -> aggregator
///
/// ls/du: lister -> filters -> inventory
pub struct Pipeline {
    config: Config,
    storages: StorageSet,
    cancellation_token: PipelineCancellationToken,
    has_error: Arc<AtomicBool>,
    has_warning: Arc<AtomicBool>,
    listing_failed: Arc<AtomicBool>,
    errors: Arc<Mutex<VecDeque<Error>>>,
    report: OperationReport,
    ready: bool,
}

impl Pipeline {
    /// Creates the storage clients every location of `config` needs.
    pub async fn new(config: Config, cancellation_token: PipelineCancellationToken) -> Result<Self> {
        let storages =
            storage_factory::create_storages(&config, cancellation_token.clone()).await?;

        Ok(Self::new_with_storages(config, storages, cancellation_token))
    }

    pub fn new_with_storages(
        config: Config,
        storages: StorageSet,
        cancellation_token: PipelineCancellationToken,
    ) -> Self {
        Self {
            config,
            storages,
            cancellation_token,
            has_error: Arc::new(AtomicBool::new(false)),
            has_warning: Arc::new(AtomicBool::new(false)),
            listing_failed: Arc::new(AtomicBool::new(false)),
            errors: Arc::new(Mutex::new(VecDeque::<Error>::new())),
            report: OperationReport::default(),
            ready: true,
        }
    }

    pub async fn run(&mut self) {
        if !self.ready {
            panic!("it can be executed only once.")
        }
        self.ready = false;

        if self.config.operation.is_listing_only() {
            self.report = self.take_inventory().await;
            trace!("pipeline has been completed.");
            return;
        }

        let jobs = match self.config.operation {
            OperationKind::Sync => self.plan_sync(),
            OperationKind::Copy | OperationKind::Move | OperationKind::Remove => {
                self.expand_objects()
            }
            OperationKind::List | OperationKind::DiskUsage => None,
        };

        let Some(jobs) = jobs else {
            return;
        };

        let results = self.schedule(jobs);
        self.report = self.aggregate(results).await;

        trace!("pipeline has been completed.");
    }

    fn expand_objects(&self) -> Option<Receiver<Job>> {
        let (job_sender, job_receiver) = async_channel::bounded(CHANNEL_CAPACITY);
        let id_generator = JobIdGenerator::new();

        // The job stream closes once the last expander has dropped its sender.
        for source in &self.config.sources {
            let objects = self.filter_objects(self.list(source.clone(), StorageSide::Source, false));

            let stage = Stage::new(
                self.config.clone(),
                self.storages.clone(),
                Some(objects),
                Some(job_sender.clone()),
                self.cancellation_token.clone(),
                self.has_warning.clone(),
            );
            let expander = ObjectExpander::new(stage, source.clone(), id_generator.clone());
            let has_error = self.has_error.clone();
            let error_list = self.errors.clone();

            tokio::spawn(async move {
                let result = expander.expand().await;
                match result {
                    Ok(_) => {}
                    Err(e) => {
                        log_error(has_error, error_list, e, "expand objects failed.");
                    }
                }
            });
        }

        Some(job_receiver)
    }

    fn plan_sync(&self) -> Option<Receiver<Job>> {
        let (Some(source), Some(target)) = (self.config.sources.first(), self.config.target.as_ref())
        else {
            self.store_error(anyhow!(S3bulkError::PolicyViolation(
                "sync requires a source and a target.".to_string()
            )));
            return None;
        };
        let sync_config = self.config.sync_config.unwrap_or_default();

        let source_objects =
            self.filter_objects(self.list(source.clone(), StorageSide::Source, true));
        let target_objects =
            self.filter_objects(self.list(target.clone(), StorageSide::Target, true));

        let (stage, actions) = self.create_stage::<ObjectInfo, Action>(Some(source_objects));
        let planner = SyncPlanner::new(stage, target_objects, target.clone(), sync_config);
        let has_error = self.has_error.clone();
        let error_list = self.errors.clone();
        tokio::spawn(async move {
            let result = planner.plan().await;
            match result {
                Ok(_) => {}
                Err(e) => {
                    log_error(has_error, error_list, e, "sync planning failed.");
                }
            }
        });

        let (stage, jobs) = self.create_stage::<Action, Job>(Some(actions));
        let expander =
            ActionExpander::new(stage, source.clone(), target.clone(), JobIdGenerator::new())
                .with_listing_failed_flag(self.listing_failed.clone());
        let has_error = self.has_error.clone();
        let error_list = self.errors.clone();
        tokio::spawn(async move {
            let result = expander.expand().await;
            match result {
                Ok(_) => {}
                Err(e) => {
                    log_error(has_error, error_list, e, "expand actions failed.");
                }
            }
        });

        Some(jobs)
    }

    async fn take_inventory(&self) -> OperationReport {
        let Some(location) = self.config.sources.first().cloned() else {
            self.store_error(anyhow!(S3bulkError::PolicyViolation(
                "ls and du require a location.".to_string()
            )));
            return OperationReport::default();
        };

        let sorted = self.config.operation == OperationKind::List;
        let objects = self.filter_objects(self.list(location.clone(), StorageSide::Source, sorted));
        let stage = Stage::new(
            self.config.clone(),
            self.storages.clone(),
            Some(objects),
            None,
            self.cancellation_token.clone(),
            self.has_warning.clone(),
        );

        match ObjectInventory::new(stage, location).run().await {
            Ok(report) => report,
            Err(e) => {
                log_error(
                    self.has_error.clone(),
                    self.errors.clone(),
                    e,
                    "take inventory failed.",
                );
                OperationReport::default()
            }
        }
    }

    fn list(&self, location: Location, side: StorageSide, sorted: bool) -> Receiver<ObjectInfo> {
        let (stage, next_stage_receiver) = self.create_stage::<(), ObjectInfo>(None);
        let object_lister = ObjectLister::new(stage, location, side);
        let has_error = self.has_error.clone();
        let listing_failed = self.listing_failed.clone();
        let error_list = self.errors.clone();

        tokio::spawn(async move {
            let result = if sorted {
                object_lister.list_sorted().await
            } else {
                object_lister.list().await
            };
            match result {
                Ok(()) => {}
                Err(e) => {
                    listing_failed.store(true, Ordering::SeqCst);
                    log_error(has_error, error_list, e, "list objects failed.");
                }
            }
        });

        next_stage_receiver
    }

    fn filter_objects(&self, objects_list: Receiver<ObjectInfo>) -> Receiver<ObjectInfo> {
        let mut previous_stage_receiver = objects_list;

        if !self.config.filter_config.include.is_empty() {
            let (stage, new_receiver) = self.create_stage(Some(previous_stage_receiver));

            self.spawn_filter(Box::new(IncludeFilter::new(stage)));
            trace!("IncludeFilter has been started.");

            previous_stage_receiver = new_receiver;
        }

        if !self.config.filter_config.exclude.is_empty() {
            let (stage, new_receiver) = self.create_stage(Some(previous_stage_receiver));

            self.spawn_filter(Box::new(ExcludeFilter::new(stage)));
            trace!("ExcludeFilter has been started.");

            previous_stage_receiver = new_receiver;
        }

        previous_stage_receiver
    }

    fn spawn_filter(&self, filter: Box<dyn ObjectFilter + Send + Sync>) {
        let has_error = self.has_error.clone();
        let error_list = self.errors.clone();

        tokio::spawn(async move {
            let result = filter.filter().await;
            match result {
                Ok(_) => {}
                Err(e) => {
                    log_error(has_error, error_list, e, "filter objects failed.");
                }
            }
        });
    }

    fn schedule(&self, jobs: Receiver<Job>) -> Receiver<JobResult> {
        let executor: Executor = Arc::new(ObjectExecutor::new(
            self.storages.clone(),
            self.cancellation_token.clone(),
            storage_factory::create_rate_limiter(self.config.rate_limit_objects),
        ));

        Scheduler::new(executor, self.cancellation_token.clone()).run(jobs, self.config.worker_size)
    }

    async fn aggregate(&self, results: Receiver<JobResult>) -> OperationReport {
        ResultAggregator::new(results, self.has_error.clone(), self.errors.clone())
            .aggregate()
            .await
    }

    fn create_stage<I, O>(&self, previous_stage_receiver: Option<Receiver<I>>) -> (Stage<I, O>, Receiver<O>) {
        let (sender, next_stage_receiver) = async_channel::bounded::<O>(CHANNEL_CAPACITY);
        let stage = Stage::new(
            self.config.clone(),
            self.storages.clone(),
            previous_stage_receiver,
            Some(sender),
            self.cancellation_token.clone(),
            self.has_warning.clone(),
        );

        (stage, next_stage_receiver)
    }

    fn store_error(&self, e: Error) {
        log_error(
            self.has_error.clone(),
            self.errors.clone(),
            e,
            "pipeline cannot be started.",
        );
    }

    pub fn has_error(&self) -> bool {
        self.has_error.load(Ordering::SeqCst)
    }

    pub fn has_warning(&self) -> bool {
        self.has_warning.load(Ordering::SeqCst)
    }

    pub fn get_errors_and_consume(&self) -> Option<Vec<Error>> {
        if !self.has_error() {
            return None;
        }

        let mut error_list = self.errors.lock().ok()?;

        Some(error_list.drain(..).collect())
    }

    /// Counts of the finished run. All zero before `run()`.
    pub fn report(&self) -> OperationReport {
        self.report.clone()
    }
}

fn log_error(
    has_error: Arc<AtomicBool>,
    errors: Arc<Mutex<VecDeque<Error>>>,
    e: Error,
    message: &str,
) {
    has_error.store(true, Ordering::SeqCst);

    let error = format!("{e:#}");
    let source = e.source();

    error!(error = error, source = source, message);

    if let Ok(mut error_list) = errors.lock() {
        error_list.push_back(e);
    }
}
