use std::fmt;
use std::fmt::{Debug, Display, Formatter};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Error, anyhow};
use aws_sdk_s3::primitives::DateTime;
use zeroize_derive::{Zeroize, ZeroizeOnDrop};

use crate::config::JobOptions;
use crate::location::Location;
use crate::types::error::S3bulkError;

pub mod error;
pub mod token;

const GLACIER_STORAGE_CLASSES: &[&str] = &["GLACIER", "DEEP_ARCHIVE"];

/// An object found by the lister. `key` is the full key (remote) or the full
/// path with `/` separators (local). `relative_path` is the part below the
/// listing root and is what sync compares.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectInfo {
    pub key: String,
    pub relative_path: String,
    pub size: u64,
    pub last_modified: DateTime,
    pub e_tag: Option<String>,
    pub storage_class: Option<String>,
    pub version_id: Option<String>,
}

impl ObjectInfo {
    pub fn new(key: &str, size: u64, last_modified: DateTime) -> Self {
        Self {
            key: key.to_string(),
            relative_path: String::new(),
            size,
            last_modified,
            e_tag: None,
            storage_class: None,
            version_id: None,
        }
    }

    pub fn with_e_tag(mut self, e_tag: Option<String>) -> Self {
        self.e_tag = e_tag;
        self
    }

    pub fn with_storage_class(mut self, storage_class: Option<String>) -> Self {
        self.storage_class = storage_class;
        self
    }

    pub fn with_version_id(mut self, version_id: Option<String>) -> Self {
        self.version_id = version_id;
        self
    }

    pub fn with_relative_path(mut self, relative_path: &str) -> Self {
        self.relative_path = relative_path.to_string();
        self
    }

    pub fn is_glacier(&self) -> bool {
        self.storage_class
            .as_deref()
            .is_some_and(|class| GLACIER_STORAGE_CLASSES.contains(&class))
    }

    /// ETag without the surrounding quotes S3 returns.
    pub fn normalized_e_tag(&self) -> Option<String> {
        normalize_e_tag(&self.e_tag)
    }
}

pub fn normalize_e_tag(e_tag: &Option<String>) -> Option<String> {
    e_tag.as_ref().map(|e_tag| e_tag.trim_matches('"').to_string())
}

pub fn is_multipart_upload_e_tag(e_tag: &Option<String>) -> bool {
    e_tag.as_ref().is_some_and(|e_tag| e_tag.contains('-'))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageSide {
    Source,
    Target,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Copy,
    Move,
    Remove,
}

impl Display for JobKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobKind::Copy => "cp",
            JobKind::Move => "mv",
            JobKind::Remove => "rm",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone)]
pub struct TransferJob {
    pub id: u64,
    pub source: ObjectInfo,
    pub source_location: Location,
    pub target: Location,
    pub options: Arc<JobOptions>,
}

#[derive(Debug, Clone)]
pub struct RemoveJob {
    pub id: u64,
    pub target: ObjectInfo,
    pub location: Location,
    pub side: StorageSide,
    pub options: Arc<JobOptions>,
}

/// One concrete operation. Wildcards are already expanded.
#[derive(Debug, Clone)]
pub enum Job {
    Copy(TransferJob),
    Move(TransferJob),
    Remove(RemoveJob),
}

impl Job {
    pub fn id(&self) -> u64 {
        match self {
            Job::Copy(job) | Job::Move(job) => job.id,
            Job::Remove(job) => job.id,
        }
    }

    pub fn kind(&self) -> JobKind {
        match self {
            Job::Copy(_) => JobKind::Copy,
            Job::Move(_) => JobKind::Move,
            Job::Remove(_) => JobKind::Remove,
        }
    }

    pub fn options(&self) -> &JobOptions {
        match self {
            Job::Copy(job) | Job::Move(job) => &job.options,
            Job::Remove(job) => &job.options,
        }
    }

    pub fn source_string(&self) -> String {
        match self {
            Job::Copy(job) | Job::Move(job) => job.source_location.object_url(&job.source.key),
            Job::Remove(job) => job.location.object_url(&job.target.key),
        }
    }

    pub fn target_string(&self) -> Option<String> {
        match self {
            Job::Copy(job) | Job::Move(job) => Some(job.target.to_string()),
            Job::Remove(_) => None,
        }
    }

    /// The user supplied location string the job was expanded from.
    pub fn origin(&self) -> &str {
        match self {
            Job::Copy(job) | Job::Move(job) => job.source_location.original(),
            Job::Remove(job) => job.location.original(),
        }
    }
}

#[derive(Debug)]
pub enum JobStatus {
    Succeeded,
    Skipped { reason: String },
    Failed(Error),
    Cancelled(Error),
}

impl JobStatus {
    pub fn cancelled() -> Self {
        JobStatus::Cancelled(anyhow!(S3bulkError::Cancelled))
    }

    pub fn error(&self) -> Option<&Error> {
        match self {
            JobStatus::Failed(e) | JobStatus::Cancelled(e) => Some(e),
            _ => None,
        }
    }
}

/// What a job execution reports back when it did not fail.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Done { bytes: u64 },
    Skipped { reason: String },
}

#[derive(Debug)]
pub struct JobResult {
    pub job_id: u64,
    pub kind: JobKind,
    pub origin: String,
    pub source: String,
    pub target: Option<String>,
    pub status: JobStatus,
    pub bytes: u64,
    pub attempts: u32,
    pub elapsed: Duration,
}

impl JobResult {
    pub fn new(job: &Job, status: JobStatus, bytes: u64, attempts: u32, elapsed: Duration) -> Self {
        Self {
            job_id: job.id(),
            kind: job.kind(),
            origin: job.origin().to_string(),
            source: job.source_string(),
            target: job.target_string(),
            status,
            bytes,
            attempts,
            elapsed,
        }
    }

    pub fn is_succeeded(&self) -> bool {
        matches!(self.status, JobStatus::Succeeded)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, JobStatus::Failed(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.status, JobStatus::Cancelled(_))
    }
}

/// Sync planner decision for one relative path.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Copy { source: ObjectInfo, target: Location },
    Delete { target: ObjectInfo },
    Skip { relative_path: String, reason: String },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OperationReport {
    pub succeeded: u64,
    pub skipped: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub bytes: u64,
}

impl OperationReport {
    pub fn total(&self) -> u64 {
        self.succeeded + self.skipped + self.failed + self.cancelled
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfigLocation {
    pub aws_config_file: Option<PathBuf>,
    pub aws_shared_credentials_file: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub enum S3Credentials {
    Profile(String),
    Credentials { access_keys: AccessKeys },
    FromEnvironment,
}

#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct AccessKeys {
    pub access_key: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl Debug for AccessKeys {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut keys = f.debug_struct("AccessKeys");
        let session_token = self
            .session_token
            .as_ref()
            .map_or("None", |_| "** redacted **");
        keys.field("access_key", &self.access_key)
            .field("secret_access_key", &"** redacted **")
            .field("session_token", &session_token);
        keys.finish()
    }
}

#[derive(Clone, Default, Zeroize, ZeroizeOnDrop)]
pub struct SseKmsKeyId {
    pub id: Option<String>,
}

impl Debug for SseKmsKeyId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut keys = f.debug_struct("SseKmsKeyId");
        let sse_kms_key_id = self.id.as_ref().map_or("None", |_| "** redacted **");
        keys.field("sse_kms_key_id", &sse_kms_key_id);
        keys.finish()
    }
}
