use std::collections::HashMap;
use std::time::Duration;

use aws_sdk_s3::types::{ObjectCannedAcl, ServerSideEncryption, StorageClass};
use chrono::{DateTime, Utc};

use crate::location::Location;
use crate::location::glob::GlobPattern;
use crate::types::{ClientConfigLocation, S3Credentials, SseKmsKeyId};

pub mod args;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Copy,
    Move,
    Remove,
    Sync,
    List,
    DiskUsage,
}

impl OperationKind {
    pub fn is_transfer(&self) -> bool {
        matches!(
            self,
            OperationKind::Copy | OperationKind::Move | OperationKind::Sync
        )
    }

    /// ls and du only read listings.
    pub fn is_listing_only(&self) -> bool {
        matches!(self, OperationKind::List | OperationKind::DiskUsage)
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub operation: OperationKind,
    /// One entry for cp/mv/sync/ls/du, one or more for rm.
    pub sources: Vec<Location>,
    /// `None` for rm, ls and du.
    pub target: Option<Location>,
    pub source_client_config: Option<ClientConfig>,
    pub target_client_config: Option<ClientConfig>,
    pub tracing_config: Option<TracingConfig>,
    pub job_options: JobOptions,
    pub filter_config: FilterConfig,
    pub sync_config: Option<SyncConfig>,
    pub list_config: Option<ListConfig>,
    pub worker_size: u16,
    pub max_keys: i32,
    pub flatten: bool,
    pub follow_symlinks: bool,
    pub rate_limit_objects: Option<u32>,
    pub auto_complete_shell: Option<clap_complete::shells::Shell>,
}

impl Config {
    pub fn is_dry_run(&self) -> bool {
        self.job_options.dry_run
    }
}

/// Options bundle every Job carries.
#[derive(Debug, Clone, Default)]
pub struct JobOptions {
    pub transfer_config: TransferConfig,
    pub overwrite_policy: OverwritePolicy,
    pub retry_config: JobRetryConfig,
    pub upload_config: UploadConfig,
    pub dry_run: bool,
    pub force_glacier_transfer: bool,
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub client_config_location: ClientConfigLocation,
    pub credential: S3Credentials,
    pub region: Option<String>,
    pub endpoint_url: Option<String>,
    pub force_path_style: bool,
    pub retry_config: RetryConfig,
    pub cli_timeout_config: CLITimeoutConfig,
    pub disable_stalled_stream_protection: bool,
}

/// SDK level retry. Job level retry is `JobRetryConfig`.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub aws_max_attempts: u32,
    pub initial_backoff_milliseconds: u64,
}

#[derive(Debug, Clone)]
pub struct CLITimeoutConfig {
    pub operation_timeout_milliseconds: Option<u64>,
    pub operation_attempt_timeout_milliseconds: Option<u64>,
    pub connect_timeout_milliseconds: Option<u64>,
    pub read_timeout_milliseconds: Option<u64>,
}

#[derive(Debug, Clone, Copy)]
pub struct TracingConfig {
    pub tracing_level: log::Level,
    pub json_tracing: bool,
    pub aws_sdk_tracing: bool,
    pub span_events_tracing: bool,
    pub disable_color_tracing: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JobRetryConfig {
    /// Total attempts, the first one included.
    pub retry_count: u32,
    pub initial_backoff_milliseconds: u64,
    pub max_backoff_milliseconds: u64,
}

impl Default for JobRetryConfig {
    fn default() -> Self {
        Self {
            retry_count: 10,
            initial_backoff_milliseconds: 100,
            max_backoff_milliseconds: 20_000,
        }
    }
}

impl JobRetryConfig {
    /// Backoff before the attempt following `attempt` (1-based). Doubles each
    /// time and is capped at `max_backoff_milliseconds`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32);
        let backoff = self
            .initial_backoff_milliseconds
            .saturating_mul(1u64 << exponent)
            .min(self.max_backoff_milliseconds);
        Duration::from_millis(backoff)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransferConfig {
    pub multipart_threshold: u64,
    pub part_size: u64,
    /// Parts of one object in flight at once.
    pub concurrency: u16,
    /// Remote-to-remote bodies are copied by the storage service.
    pub server_side_copy: bool,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            multipart_threshold: 50 * 1024 * 1024,
            part_size: 50 * 1024 * 1024,
            concurrency: 5,
            server_side_copy: false,
        }
    }
}

impl TransferConfig {
    pub fn is_multipart_upload_required(&self, content_length: u64) -> bool {
        self.multipart_threshold < content_length
    }
}

/// Gate evaluated against existing destination metadata. Flags are only
/// consulted when set.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct OverwritePolicy {
    pub no_clobber: bool,
    pub if_size_differ: bool,
    pub if_source_newer: bool,
}

impl OverwritePolicy {
    pub fn is_set(&self) -> bool {
        self.no_clobber || self.if_size_differ || self.if_source_newer
    }
}

#[derive(Debug, Clone, Default)]
pub struct UploadConfig {
    pub storage_class: Option<StorageClass>,
    pub canned_acl: Option<ObjectCannedAcl>,
    pub sse: Option<ServerSideEncryption>,
    pub sse_kms_key_id: SseKmsKeyId,
    pub content_type: Option<String>,
    pub cache_control: Option<String>,
    pub content_encoding: Option<String>,
    pub content_disposition: Option<String>,
    pub expires: Option<DateTime<Utc>>,
    pub metadata: Option<HashMap<String, String>>,
    pub no_guess_mime_type: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompareStrategy {
    SizeOnly,
    #[default]
    SizeAndModification,
    Hash,
    AlwaysOverwrite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncConfig {
    pub delete: bool,
    pub strategy: CompareStrategy,
}

/// Output options of ls and du.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ListConfig {
    pub show_e_tag: bool,
    pub show_storage_class: bool,
    pub show_full_path: bool,
    /// Sizes in KiB/MiB/GiB instead of bytes.
    pub humanize: bool,
    /// du prints one total per storage class.
    pub group_by_storage_class: bool,
}

/// Glob patterns matched against the relative path.
#[derive(Debug, Clone, Default)]
pub struct FilterConfig {
    pub include: Vec<GlobPattern>,
    pub exclude: Vec<GlobPattern>,
}

impl FilterConfig {
    pub fn is_empty(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty()
    }
}
