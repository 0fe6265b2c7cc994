use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use aws_sdk_s3::types::{ObjectCannedAcl, ServerSideEncryption, StorageClass};
use chrono::{DateTime, Utc};
use clap::builder::NonEmptyStringValueParser;
use clap::{Args, Parser, Subcommand};
use clap_verbosity_flag::{Verbosity, WarnLevel};

use crate::Config;
use crate::config::args::value_parser::{
    canned_acl, glob_pattern, human_bytes, metadata, sse, storage_class, url,
};
use crate::config::{
    CLITimeoutConfig, ClientConfig, CompareStrategy, FilterConfig, JobOptions, JobRetryConfig,
    ListConfig, OperationKind, OverwritePolicy, RetryConfig, SyncConfig, TracingConfig,
    TransferConfig, UploadConfig,
};
use crate::location::{Location, ParseOptions};
use crate::types::{AccessKeys, ClientConfigLocation, S3Credentials, SseKmsKeyId};

#[cfg(test)]
mod tests;
mod value_parser;

const DEFAULT_AWS_MAX_ATTEMPTS: u32 = 1;
const DEFAULT_INITIAL_BACKOFF_MILLISECONDS: u64 = 100;
const DEFAULT_RETRY_COUNT: u32 = 10;
const DEFAULT_MAX_BACKOFF_MILLISECONDS: u64 = 20_000;
const DEFAULT_JSON_TRACING: bool = false;
const DEFAULT_AWS_SDK_TRACING: bool = false;
const DEFAULT_SPAN_EVENTS_TRACING: bool = false;
const DEFAULT_DISABLE_COLOR_TRACING: bool = false;
const DEFAULT_CONCURRENCY: u16 = 5;
const DEFAULT_PART_SIZE: &str = "50MiB";
const DEFAULT_MULTIPART_THRESHOLD: &str = "50MiB";
const DEFAULT_FORCE_PATH_STYLE: bool = false;
const DEFAULT_NO_GUESS_MIME_TYPE: bool = false;
const DEFAULT_NO_SERVER_SIDE_COPY: bool = false;
const DEFAULT_NO_FOLLOW_SYMLINKS: bool = false;
const DEFAULT_FLATTEN: bool = false;
const DEFAULT_NO_CLOBBER: bool = false;
const DEFAULT_IF_SIZE_DIFFER: bool = false;
const DEFAULT_IF_SOURCE_NEWER: bool = false;
const DEFAULT_RAW: bool = false;
const DEFAULT_FORCE_GLACIER_TRANSFER: bool = false;
const DEFAULT_SYNC_WITH_DELETE: bool = false;
const DEFAULT_SIZE_ONLY: bool = false;
const DEFAULT_HASH_ONLY: bool = false;
const DEFAULT_ALWAYS_OVERWRITE: bool = false;
const DEFAULT_DRY_RUN: bool = false;
const DEFAULT_SHOW_E_TAG: bool = false;
const DEFAULT_SHOW_STORAGE_CLASS: bool = false;
const DEFAULT_SHOW_FULL_PATH: bool = false;
const DEFAULT_HUMANIZE: bool = false;
const DEFAULT_GROUP_BY_STORAGE_CLASS: bool = false;
const DEFAULT_MAX_KEYS: i32 = 1000;
const DEFAULT_DISABLE_STALLED_STREAM_PROTECTION: bool = false;
const MIN_WORKER_SIZE: u16 = 4;

const NO_COMMAND_SPECIFIED: &str = "a command is required: cp | mv | rm | sync | ls | du\n";
const LOCAL_TO_LOCAL_COPY: &str = "local to local copy is not supported\n";
const LOCAL_TO_LOCAL_SYNC: &str = "local to local sync is not supported\n";
const LOCAL_TO_BUCKET_ROOT_SYNC: &str =
    "sync from local storage to the root of a bucket is not supported. specify a prefix\n";
const SYNC_SOURCE_MUST_BE_DIRECTORY: &str =
    "sync source must be a local directory, a prefix or a wildcard\n";
const TARGET_MUST_NOT_BE_WILDCARD: &str = "target must not contain wildcards\n";
const TARGET_MUST_BE_PREFIX: &str =
    "target must be a bucket or a prefix (ending with '/') when the source matches multiple objects\n";
const TARGET_MUST_BE_DIRECTORY: &str =
    "target must be a directory when the source matches multiple objects\n";
const MOVE_TO_SAME_LOCATION: &str = "source and target must be different locations\n";
const MIXED_REMOVE_LOCATIONS: &str = "all locations must be either s3:// or local paths\n";
const VERSION_ID_WITH_MULTIPLE_LOCATIONS: &str =
    "--version-id can only be used with a single location\n";
const TARGET_LOCAL_STORAGE_SPECIFIED_WITH_STORAGE_CLASS: &str =
    "with --storage-class, target storage must be s3://\n";
const TARGET_LOCAL_STORAGE_SPECIFIED_WITH_SSE: &str =
    "with --sse/--sse-kms-key-id, target storage must be s3://\n";
const TARGET_LOCAL_STORAGE_SPECIFIED_WITH_ACL: &str = "with --acl, target storage must be s3://\n";
const TARGET_LOCAL_STORAGE_SPECIFIED_WITH_METADATA_OPTION: &str =
    "with metadata related option, target storage must be s3://\n";
const SSE_KMS_KEY_ID_ARGUMENTS_CONFLICT: &str =
    "--sse-kms-key-id must be used with --sse aws:kms | aws:kms:dsse\n";
const SOURCE_REMOTE_STORAGE_SPECIFIED_WITH_NO_FOLLOW_SYMLINKS: &str =
    "with --no-follow-symlinks, source storage must be local storage\n";
const SOURCE_REMOTE_STORAGE_SPECIFIED_WITH_NO_GUESS_MIME_TYPE: &str =
    "with --no-guess-mime-type, source storage must be local storage\n";
const SOURCE_LOCAL_STORAGE_SPECIFIED_WITH_ENDPOINT_URL: &str =
    "with --source-endpoint-url, source storage must be s3://\n";
const TARGET_LOCAL_STORAGE_SPECIFIED_WITH_ENDPOINT_URL: &str =
    "with --target-endpoint-url, target storage must be s3://\n";
const NO_SERVER_SIDE_COPY_WITH_LOCAL_STORAGE: &str =
    "with --no-server-side-copy, source and target storage must be s3://\n";
const STORAGE_CLASS_OF_LOCAL_STORAGE: &str =
    "local storage has no storage classes: --storage-class and --group require s3://\n";
const NO_SOURCE_CREDENTIAL_REQUIRED: &str = "no source credential required\n";
const NO_TARGET_CREDENTIAL_REQUIRED: &str = "no target credential required\n";

fn default_worker_size() -> u16 {
    let parallelism = std::thread::available_parallelism()
        .map(|parallelism| parallelism.get())
        .unwrap_or(1);

    u16::try_from(parallelism * 2)
        .unwrap_or(u16::MAX)
        .max(MIN_WORKER_SIZE)
}

#[derive(Parser, Clone, Debug)]
#[command(
    name = "s3bulk",
    version,
    about = "bulk cp/mv/rm/sync for S3 and S3-compatible storage",
    arg_required_else_help = true
)]
pub struct CLIArgs {
    #[command(subcommand)]
    command: Option<Commands>,

    /// A simulation mode. no actions will be performed
    #[arg(long, env, default_value_t = DEFAULT_DRY_RUN, help_heading = "General")]
    dry_run: bool,

    /// location of the file that the AWS CLI uses to store configuration profiles
    #[arg(long, env, value_name = "FILE", help_heading = "AWS Configuration")]
    aws_config_file: Option<PathBuf>,

    /// location of the file that the AWS CLI uses to store access keys
    #[arg(long, env, value_name = "FILE", help_heading = "AWS Configuration")]
    aws_shared_credentials_file: Option<PathBuf>,

    /// source AWS CLI profile
    #[arg(long, env, conflicts_with_all = ["source_access_key", "source_secret_access_key", "source_session_token"], help_heading = "AWS Configuration")]
    source_profile: Option<String>,

    /// source access key
    #[arg(long, env, conflicts_with_all = ["source_profile"], requires = "source_secret_access_key", help_heading = "AWS Configuration")]
    source_access_key: Option<String>,

    /// source secret access key
    #[arg(long, env, conflicts_with_all = ["source_profile"], requires = "source_access_key", help_heading = "AWS Configuration")]
    source_secret_access_key: Option<String>,

    /// source session token
    #[arg(long, env, conflicts_with_all = ["source_profile"], requires = "source_access_key", help_heading = "AWS Configuration")]
    source_session_token: Option<String>,

    /// source region
    #[arg(long, env, value_parser = NonEmptyStringValueParser::new(), help_heading = "Source Options")]
    source_region: Option<String>,

    /// source endpoint url
    #[arg(long, env, value_parser = url::check_scheme, help_heading = "Source Options")]
    source_endpoint_url: Option<String>,

    /// force path-style addressing for source endpoint
    #[arg(long, env, default_value_t = DEFAULT_FORCE_PATH_STYLE, help_heading = "Source Options")]
    source_force_path_style: bool,

    /// target AWS CLI profile
    #[arg(long, env, conflicts_with_all = ["target_access_key", "target_secret_access_key", "target_session_token"], help_heading = "AWS Configuration")]
    target_profile: Option<String>,

    /// target access key
    #[arg(long, env, conflicts_with_all = ["target_profile"], requires = "target_secret_access_key", help_heading = "AWS Configuration")]
    target_access_key: Option<String>,

    /// target secret access key
    #[arg(long, env, conflicts_with_all = ["target_profile"], requires = "target_access_key", help_heading = "AWS Configuration")]
    target_secret_access_key: Option<String>,

    /// target session token
    #[arg(long, env, conflicts_with_all = ["target_profile"], requires = "target_access_key", help_heading = "AWS Configuration")]
    target_session_token: Option<String>,

    /// target region
    #[arg(long, env, value_parser = NonEmptyStringValueParser::new(), help_heading = "Target Options")]
    target_region: Option<String>,

    /// target endpoint url
    #[arg(long, env, value_parser = url::check_scheme, help_heading = "Target Options")]
    target_endpoint_url: Option<String>,

    /// force path-style addressing for target endpoint
    #[arg(long, env, default_value_t = DEFAULT_FORCE_PATH_STYLE, help_heading = "Target Options")]
    target_force_path_style: bool,

    /// number of objects processed in parallel. default: twice the number of CPUs (at least 4)
    #[arg(long, env, default_value_t = default_worker_size(), value_parser = clap::value_parser!(u16).range(1..), help_heading = "Performance")]
    worker_size: u16,

    /// rate limit objects per second
    #[arg(long, env, value_parser = clap::value_parser!(u32).range(10..), help_heading = "Performance")]
    rate_limit_objects: Option<u32>,

    /// maximum number of objects returned in a single list object request
    #[arg(long, env, default_value_t = DEFAULT_MAX_KEYS, value_parser = clap::value_parser!(i32).range(1..=32767), help_heading = "Performance")]
    max_keys: i32,

    /// trace verbosity(-v: show info, -vv: show debug, -vvv show trace)
    #[clap(flatten)]
    verbosity: Verbosity<WarnLevel>,

    /// show trace as json format
    #[arg(long, env, default_value_t = DEFAULT_JSON_TRACING, help_heading = "Tracing/Logging")]
    json_tracing: bool,

    /// enable aws sdk tracing
    #[arg(long, env, default_value_t = DEFAULT_AWS_SDK_TRACING, help_heading = "Tracing/Logging")]
    aws_sdk_tracing: bool,

    /// show span event tracing
    #[arg(long, env, default_value_t = DEFAULT_SPAN_EVENTS_TRACING, help_heading = "Tracing/Logging")]
    span_events_tracing: bool,

    /// disable ANSI terminal colors
    #[arg(long, env, default_value_t = DEFAULT_DISABLE_COLOR_TRACING, help_heading = "Tracing/Logging")]
    disable_color_tracing: bool,

    /// total attempts of a request (object, part or listing page) that fails with a transient error
    #[arg(long, env, default_value_t = DEFAULT_RETRY_COUNT, value_parser = clap::value_parser!(u32).range(1..), help_heading = "Retry Options")]
    retry_count: u32,

    /// backoff before the first retry. doubled for every following retry
    #[arg(long, env, default_value_t = DEFAULT_INITIAL_BACKOFF_MILLISECONDS, value_name = "initial_backoff", help_heading = "Retry Options")]
    initial_backoff_milliseconds: u64,

    /// upper bound of the backoff between retries
    #[arg(long, env, default_value_t = DEFAULT_MAX_BACKOFF_MILLISECONDS, value_name = "max_backoff", help_heading = "Retry Options")]
    max_backoff_milliseconds: u64,

    /// maximum retry attempts that the aws sdk retry handler use
    #[arg(long, env, default_value_t = DEFAULT_AWS_MAX_ATTEMPTS, value_name = "max_attempts", help_heading = "Retry Options")]
    aws_max_attempts: u32,

    /// operation timeout (milliseconds). For details, see the AWS SDK for Rust TimeoutConfig documentation.
    /// The default has no timeout.
    #[arg(
        long,
        env,
        value_name = "operation_timeout",
        help_heading = "Timeout Options"
    )]
    operation_timeout_milliseconds: Option<u64>,

    /// operation attempt timeout (milliseconds). For details, see the AWS SDK for Rust TimeoutConfig documentation.
    /// The default has no timeout.
    #[arg(
        long,
        env,
        value_name = "operation_attempt_timeout",
        help_heading = "Timeout Options"
    )]
    operation_attempt_timeout_milliseconds: Option<u64>,

    /// connect timeout (milliseconds).
    /// The default has AWS SDK default timeout (Currently 3100 milliseconds).
    #[arg(
        long,
        env,
        value_name = "connect_timeout",
        help_heading = "Timeout Options"
    )]
    connect_timeout_milliseconds: Option<u64>,

    /// read timeout (milliseconds).
    /// The default has no timeout.
    #[arg(
        long,
        env,
        value_name = "read_timeout",
        help_heading = "Timeout Options"
    )]
    read_timeout_milliseconds: Option<u64>,

    /// disable stalled stream protection
    #[arg(long, env, default_value_t = DEFAULT_DISABLE_STALLED_STREAM_PROTECTION, help_heading = "Advanced")]
    disable_stalled_stream_protection: bool,

    /// generate a auto completions script. Valid values: bash, fish, zsh, powershell, elvish.
    #[arg(long, env, value_name = "SHELL", value_parser = clap_complete::shells::Shell::from_str, help_heading = "Advanced")]
    auto_complete_shell: Option<clap_complete::shells::Shell>,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// copy objects. wildcards in the source expand to one copy per object
    Cp(TransferArgs),
    /// copy objects, then delete each source object that was copied
    Mv(TransferArgs),
    /// remove objects
    Rm(RemoveArgs),
    /// make the target look like the source
    Sync(SyncArgs),
    /// list objects
    Ls(ListArgs),
    /// show the number and the total size of objects
    Du(DiskUsageArgs),
}

#[derive(Args, Clone, Debug)]
pub struct TransferArgs {
    #[arg(help = "s3://<BUCKET_NAME>[/key] or local path. may contain wildcards")]
    source: String,

    #[arg(help = "s3://<BUCKET_NAME>[/prefix] or local path")]
    target: String,

    /// copy a specific version of the source object
    #[arg(long, env, value_parser = NonEmptyStringValueParser::new())]
    version_id: Option<String>,

    #[command(flatten)]
    selection: SelectionArgs,

    #[command(flatten)]
    transfer: TransferOptionArgs,
}

#[derive(Args, Clone, Debug)]
pub struct SyncArgs {
    #[arg(help = "s3://<BUCKET_NAME>/prefix/, local directory or wildcard")]
    source: String,

    #[arg(help = "s3://<BUCKET_NAME>/prefix/ or local directory")]
    target: String,

    #[command(flatten)]
    selection: SelectionArgs,

    #[command(flatten)]
    transfer: TransferOptionArgs,

    /// delete objects that exist in the target but not in the source.
    /// [Warning] Since this can cause data loss, test first with the --dry-run option
    #[arg(long, env, default_value_t = DEFAULT_SYNC_WITH_DELETE, help_heading = "Dangerous")]
    delete: bool,

    /// compare size only
    #[arg(long, env, conflicts_with_all = ["hash_only", "always_overwrite"], default_value_t = DEFAULT_SIZE_ONLY, help_heading = "Comparison")]
    size_only: bool,

    /// compare size and ETag/MD5
    #[arg(long, env, conflicts_with_all = ["size_only", "always_overwrite"], default_value_t = DEFAULT_HASH_ONLY, help_heading = "Comparison")]
    hash_only: bool,

    /// copy every source object regardless of the target
    #[arg(long, env, conflicts_with_all = ["size_only", "hash_only"], default_value_t = DEFAULT_ALWAYS_OVERWRITE, help_heading = "Comparison")]
    always_overwrite: bool,
}

#[derive(Args, Clone, Debug)]
pub struct RemoveArgs {
    #[arg(required = true, num_args = 1.., help = "s3://<BUCKET_NAME>[/key] or local path. may contain wildcards")]
    locations: Vec<String>,

    /// remove a specific version of the object
    #[arg(long, env, value_parser = NonEmptyStringValueParser::new())]
    version_id: Option<String>,

    #[command(flatten)]
    selection: SelectionArgs,
}

#[derive(Args, Clone, Debug)]
pub struct ListArgs {
    #[arg(help = "s3://<BUCKET_NAME>[/prefix] or local path. may contain wildcards")]
    location: String,

    #[command(flatten)]
    selection: SelectionArgs,

    /// show the ETag of each object
    #[arg(short = 'e', long = "etag", env, default_value_t = DEFAULT_SHOW_E_TAG, help_heading = "Output")]
    show_e_tag: bool,

    /// show the storage class of each object
    #[arg(short = 's', long = "storage-class", env = "SHOW_STORAGE_CLASS", default_value_t = DEFAULT_SHOW_STORAGE_CLASS, help_heading = "Output")]
    show_storage_class: bool,

    /// show full keys instead of paths relative to the location
    #[arg(long = "show-fullpath", env, default_value_t = DEFAULT_SHOW_FULL_PATH, help_heading = "Output")]
    show_full_path: bool,

    /// human-readable sizes
    #[arg(short = 'H', long, env, default_value_t = DEFAULT_HUMANIZE, help_heading = "Output")]
    humanize: bool,
}

#[derive(Args, Clone, Debug)]
pub struct DiskUsageArgs {
    #[arg(help = "s3://<BUCKET_NAME>[/prefix] or local path. may contain wildcards")]
    location: String,

    #[command(flatten)]
    selection: SelectionArgs,

    /// one total per storage class
    #[arg(short = 'g', long = "group", env = "GROUP_BY_STORAGE_CLASS", default_value_t = DEFAULT_GROUP_BY_STORAGE_CLASS, help_heading = "Output")]
    group_by_storage_class: bool,

    /// human-readable sizes
    #[arg(short = 'H', long, env, default_value_t = DEFAULT_HUMANIZE, help_heading = "Output")]
    humanize: bool,
}

#[derive(Args, Clone, Debug)]
pub struct SelectionArgs {
    /// skip objects whose relative path matches the pattern. can be repeated
    #[arg(long, value_parser = glob_pattern::check_glob_pattern, help_heading = "Filtering")]
    exclude: Vec<String>,

    /// process only objects whose relative path matches the pattern. can be repeated
    #[arg(long, value_parser = glob_pattern::check_glob_pattern, help_heading = "Filtering")]
    include: Vec<String>,

    /// disable the wildcard interpretation of locations
    #[arg(long, env, default_value_t = DEFAULT_RAW, help_heading = "Filtering")]
    raw: bool,
}

#[derive(Args, Clone, Debug)]
pub struct TransferOptionArgs {
    /// number of parts of one object transferred in parallel
    #[arg(short = 'c', long, env, default_value_t = DEFAULT_CONCURRENCY, value_parser = clap::value_parser!(u16).range(1..), help_heading = "Multipart Settings")]
    concurrency: u16,

    /// part size of multipart transfers, Allow suffixes: MB, MiB, GB, GiB.
    /// the larger the size, the larger the memory usage.
    #[arg(short = 'p', long, env, default_value = DEFAULT_PART_SIZE, value_parser = human_bytes::check_part_size, help_heading = "Multipart Settings")]
    part_size: String,

    /// objects larger than this size are transferred in parts, Allow suffixes: MB, MiB, GB, GiB.
    #[arg(long, env, default_value = DEFAULT_MULTIPART_THRESHOLD, value_parser = human_bytes::check_human_bytes_without_limit, help_heading = "Multipart Settings")]
    multipart_threshold: String,

    /// use the base name of every source object as its target name
    #[arg(long, env, default_value_t = DEFAULT_FLATTEN, help_heading = "General")]
    flatten: bool,

    /// do not overwrite existing objects
    #[arg(short = 'n', long, env, default_value_t = DEFAULT_NO_CLOBBER, help_heading = "Overwrite")]
    no_clobber: bool,

    /// overwrite only when the sizes differ
    #[arg(short = 's', long, env, default_value_t = DEFAULT_IF_SIZE_DIFFER, help_heading = "Overwrite")]
    if_size_differ: bool,

    /// overwrite only when the source is newer
    #[arg(short = 'u', long, env, default_value_t = DEFAULT_IF_SOURCE_NEWER, help_heading = "Overwrite")]
    if_source_newer: bool,

    /// transfer objects in GLACIER/DEEP_ARCHIVE as well. they are skipped with a warning by default
    #[arg(long, env, default_value_t = DEFAULT_FORCE_GLACIER_TRANSFER, help_heading = "General")]
    force_glacier_transfer: bool,

    /// do not follow symbolic links
    #[arg(long, env, default_value_t = DEFAULT_NO_FOLLOW_SYMLINKS, help_heading = "General")]
    no_follow_symlinks: bool,

    /// stream s3-to-s3 copies through this host instead of copying server-side.
    /// server-side copy is used only when source and target share the endpoint
    #[arg(long, env, default_value_t = DEFAULT_NO_SERVER_SIDE_COPY, help_heading = "General")]
    no_server_side_copy: bool,

    /// type of storage to use for the target object.
    /// valid choices: STANDARD | REDUCED_REDUNDANCY | STANDARD_IA | ONEZONE_IA | INTELLIGENT_TIERING | GLACIER | DEEP_ARCHIVE | GLACIER_IR
    #[arg(long, env, value_parser = storage_class::parse_storage_class, help_heading = "Target Options")]
    storage_class: Option<String>,

    /// ACL for the objects
    /// valid choices: private | public-read | public-read-write | authenticated-read | aws-exec-read | bucket-owner-read | bucket-owner-full-control
    #[arg(long, env, value_parser = canned_acl::parse_canned_acl, help_heading = "Target Options")]
    acl: Option<String>,

    /// server-side encryption. valid choices: AES256 | aws:kms | aws:kms:dsse
    #[arg(long, env, value_parser = sse::parse_sse, help_heading = "Encryption")]
    sse: Option<String>,

    /// SSE KMS ID key
    #[arg(long, env, help_heading = "Encryption")]
    sse_kms_key_id: Option<String>,

    /// Content-Type HTTP header to set on the target object
    #[arg(long, env, help_heading = "Metadata/Headers")]
    content_type: Option<String>,

    /// Cache-Control HTTP header to set on the target object
    #[arg(long, env, help_heading = "Metadata/Headers")]
    cache_control: Option<String>,

    /// Content-Encoding HTTP header to set on the target object
    #[arg(long, env, help_heading = "Metadata/Headers")]
    content_encoding: Option<String>,

    /// Content-Disposition HTTP header to set on the target object
    #[arg(long, env, help_heading = "Metadata/Headers")]
    content_disposition: Option<String>,

    /// Expires HTTP header to set on the target object(RFC3339 datetime such as 2023-02-19T12:00:00Z)
    #[arg(long, env, help_heading = "Metadata/Headers")]
    expires: Option<DateTime<Utc>>,

    /// metadata to set on the target object. e.g. --metadata "key1=value1,key2=value2".
    #[arg(long, env, value_parser = metadata::check_metadata, help_heading = "Metadata/Headers")]
    metadata: Option<String>,

    /// do not try to guess the mime type of local file
    #[arg(long, env, default_value_t = DEFAULT_NO_GUESS_MIME_TYPE, help_heading = "Metadata/Headers")]
    no_guess_mime_type: bool,
}

impl Default for TransferOptionArgs {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            part_size: DEFAULT_PART_SIZE.to_string(),
            multipart_threshold: DEFAULT_MULTIPART_THRESHOLD.to_string(),
            flatten: DEFAULT_FLATTEN,
            no_clobber: DEFAULT_NO_CLOBBER,
            if_size_differ: DEFAULT_IF_SIZE_DIFFER,
            if_source_newer: DEFAULT_IF_SOURCE_NEWER,
            force_glacier_transfer: DEFAULT_FORCE_GLACIER_TRANSFER,
            no_follow_symlinks: DEFAULT_NO_FOLLOW_SYMLINKS,
            no_server_side_copy: DEFAULT_NO_SERVER_SIDE_COPY,
            storage_class: None,
            acl: None,
            sse: None,
            sse_kms_key_id: None,
            content_type: None,
            cache_control: None,
            content_encoding: None,
            content_disposition: None,
            expires: None,
            metadata: None,
            no_guess_mime_type: DEFAULT_NO_GUESS_MIME_TYPE,
        }
    }
}

/// A subcommand with its locations parsed.
struct ResolvedCommand {
    operation: OperationKind,
    sources: Vec<Location>,
    target: Option<Location>,
    selection: SelectionArgs,
    transfer: TransferOptionArgs,
    sync_config: Option<SyncConfig>,
    list_config: Option<ListConfig>,
}

pub fn parse_from_args<I, T>(args: I) -> Result<CLIArgs, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    CLIArgs::try_parse_from(args)
}

pub fn build_config_from_args<I, T>(args: I) -> Result<Config, String>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let config_args = CLIArgs::try_parse_from(args).map_err(|e| e.to_string())?;
    crate::Config::try_from(config_args)
}

impl CLIArgs {
    fn resolve_command(&self, command: &Commands) -> Result<ResolvedCommand, String> {
        let location_error = |e: crate::types::error::S3bulkError| format!("{e}\n");

        match command {
            Commands::Cp(args) | Commands::Mv(args) => {
                let operation = if matches!(command, Commands::Cp(_)) {
                    OperationKind::Copy
                } else {
                    OperationKind::Move
                };
                let source = Location::parse(
                    &args.source,
                    &ParseOptions {
                        raw: args.selection.raw,
                        version_id: args.version_id.clone(),
                    },
                )
                .map_err(location_error)?;
                let target =
                    Location::parse(&args.target, &ParseOptions::default()).map_err(location_error)?;

                Ok(ResolvedCommand {
                    operation,
                    sources: vec![source],
                    target: Some(target),
                    selection: args.selection.clone(),
                    transfer: args.transfer.clone(),
                    sync_config: None,
                    list_config: None,
                })
            }
            Commands::Sync(args) => {
                let options = ParseOptions {
                    raw: args.selection.raw,
                    version_id: None,
                };
                let mut source = Location::parse(&args.source, &options).map_err(location_error)?;
                if source.is_remote() && source.is_single_object() {
                    source = Location::parse(&format!("{}/", args.source), &options)
                        .map_err(location_error)?;
                }

                let target_string = if args.target.ends_with('/') {
                    args.target.clone()
                } else {
                    format!("{}/", args.target)
                };
                let target = Location::parse(&target_string, &ParseOptions::default())
                    .map_err(location_error)?;

                let strategy = if args.size_only {
                    CompareStrategy::SizeOnly
                } else if args.hash_only {
                    CompareStrategy::Hash
                } else if args.always_overwrite {
                    CompareStrategy::AlwaysOverwrite
                } else {
                    CompareStrategy::SizeAndModification
                };

                Ok(ResolvedCommand {
                    operation: OperationKind::Sync,
                    sources: vec![source],
                    target: Some(target),
                    selection: args.selection.clone(),
                    transfer: args.transfer.clone(),
                    sync_config: Some(SyncConfig {
                        delete: args.delete,
                        strategy,
                    }),
                    list_config: None,
                })
            }
            Commands::Rm(args) => {
                if args.version_id.is_some() && args.locations.len() > 1 {
                    return Err(VERSION_ID_WITH_MULTIPLE_LOCATIONS.to_string());
                }

                let options = ParseOptions {
                    raw: args.selection.raw,
                    version_id: args.version_id.clone(),
                };
                let sources = args
                    .locations
                    .iter()
                    .map(|location| Location::parse(location, &options).map_err(location_error))
                    .collect::<Result<Vec<_>, _>>()?;

                Ok(ResolvedCommand {
                    operation: OperationKind::Remove,
                    sources,
                    target: None,
                    selection: args.selection.clone(),
                    transfer: TransferOptionArgs::default(),
                    sync_config: None,
                    list_config: None,
                })
            }
            Commands::Ls(args) => {
                let location = Location::parse(
                    &args.location,
                    &ParseOptions {
                        raw: args.selection.raw,
                        version_id: None,
                    },
                )
                .map_err(location_error)?;

                Ok(ResolvedCommand {
                    operation: OperationKind::List,
                    sources: vec![location],
                    target: None,
                    selection: args.selection.clone(),
                    transfer: TransferOptionArgs::default(),
                    sync_config: None,
                    list_config: Some(ListConfig {
                        show_e_tag: args.show_e_tag,
                        show_storage_class: args.show_storage_class,
                        show_full_path: args.show_full_path,
                        humanize: args.humanize,
                        group_by_storage_class: false,
                    }),
                })
            }
            Commands::Du(args) => {
                let location = Location::parse(
                    &args.location,
                    &ParseOptions {
                        raw: args.selection.raw,
                        version_id: None,
                    },
                )
                .map_err(location_error)?;

                Ok(ResolvedCommand {
                    operation: OperationKind::DiskUsage,
                    sources: vec![location],
                    target: None,
                    selection: args.selection.clone(),
                    transfer: TransferOptionArgs::default(),
                    sync_config: None,
                    list_config: Some(ListConfig {
                        humanize: args.humanize,
                        group_by_storage_class: args.group_by_storage_class,
                        ..Default::default()
                    }),
                })
            }
        }
    }

    fn validate_storage_config(&self, resolved: &ResolvedCommand) -> Result<(), String> {
        self.check_remove_locations_conflict(resolved)?;
        self.check_target_not_wildcard(resolved)?;
        self.check_storage_conflict(resolved)?;
        self.check_sync_source(resolved)?;
        self.check_multi_object_target(resolved)?;
        self.check_move_to_same_location(resolved)?;
        self.check_storage_credentials_conflict(resolved)?;
        self.check_endpoint_url_conflict(resolved)?;
        self.check_storage_class_conflict(resolved)?;
        self.check_sse_conflict(resolved)?;
        self.check_acl_conflict(resolved)?;
        self.check_metadata_conflict(resolved)?;
        self.check_no_follow_symlinks_conflict(resolved)?;
        self.check_no_guess_mime_type_conflict(resolved)?;
        self.check_no_server_side_copy_conflict(resolved)?;
        self.check_listing_storage_class_conflict(resolved)?;

        Ok(())
    }

    fn check_remove_locations_conflict(&self, resolved: &ResolvedCommand) -> Result<(), String> {
        let remote = resolved.sources.iter().filter(|l| l.is_remote()).count();
        if remote != 0 && remote != resolved.sources.len() {
            return Err(MIXED_REMOVE_LOCATIONS.to_string());
        }

        Ok(())
    }

    fn check_target_not_wildcard(&self, resolved: &ResolvedCommand) -> Result<(), String> {
        if resolved.target.as_ref().is_some_and(|t| t.is_wildcard()) {
            return Err(TARGET_MUST_NOT_BE_WILDCARD.to_string());
        }

        Ok(())
    }

    fn check_storage_conflict(&self, resolved: &ResolvedCommand) -> Result<(), String> {
        let Some(target) = &resolved.target else {
            return Ok(());
        };

        if target.is_local() && resolved.sources.iter().all(|s| s.is_local()) {
            if resolved.operation == OperationKind::Sync {
                return Err(LOCAL_TO_LOCAL_SYNC.to_string());
            }
            return Err(LOCAL_TO_LOCAL_COPY.to_string());
        }

        if resolved.operation == OperationKind::Sync
            && target.is_bucket()
            && resolved.sources.iter().any(|s| s.is_local())
        {
            return Err(LOCAL_TO_BUCKET_ROOT_SYNC.to_string());
        }

        Ok(())
    }

    fn check_sync_source(&self, resolved: &ResolvedCommand) -> Result<(), String> {
        if resolved.operation != OperationKind::Sync {
            return Ok(());
        }

        if resolved.sources.iter().any(|s| s.is_single_object()) {
            return Err(SYNC_SOURCE_MUST_BE_DIRECTORY.to_string());
        }

        Ok(())
    }

    fn check_multi_object_target(&self, resolved: &ResolvedCommand) -> Result<(), String> {
        let Some(target) = &resolved.target else {
            return Ok(());
        };
        if resolved.sources.iter().all(|s| s.is_single_object()) {
            return Ok(());
        }

        if target.is_remote() && !target.is_prefix() {
            return Err(TARGET_MUST_BE_PREFIX.to_string());
        }
        if target.is_local() && Path::new(target.path()).is_file() {
            return Err(TARGET_MUST_BE_DIRECTORY.to_string());
        }

        Ok(())
    }

    fn check_move_to_same_location(&self, resolved: &ResolvedCommand) -> Result<(), String> {
        if resolved.operation != OperationKind::Move {
            return Ok(());
        }

        let Some(target) = &resolved.target else {
            return Ok(());
        };
        if resolved.sources.iter().any(|s| s.to_string() == target.to_string()) {
            return Err(MOVE_TO_SAME_LOCATION.to_string());
        }

        Ok(())
    }

    fn check_storage_credentials_conflict(&self, resolved: &ResolvedCommand) -> Result<(), String> {
        if resolved.sources.iter().all(|s| s.is_local())
            && (self.source_profile.is_some() || self.source_access_key.is_some())
        {
            return Err(NO_SOURCE_CREDENTIAL_REQUIRED.to_string());
        }

        let target_is_remote = resolved.target.as_ref().is_some_and(|t| t.is_remote());
        if !target_is_remote && (self.target_profile.is_some() || self.target_access_key.is_some())
        {
            return Err(NO_TARGET_CREDENTIAL_REQUIRED.to_string());
        }

        Ok(())
    }

    fn check_endpoint_url_conflict(&self, resolved: &ResolvedCommand) -> Result<(), String> {
        if self.source_endpoint_url.is_some() && resolved.sources.iter().all(|s| s.is_local()) {
            return Err(SOURCE_LOCAL_STORAGE_SPECIFIED_WITH_ENDPOINT_URL.to_string());
        }

        let target_is_remote = resolved.target.as_ref().is_some_and(|t| t.is_remote());
        if self.target_endpoint_url.is_some() && !target_is_remote {
            return Err(TARGET_LOCAL_STORAGE_SPECIFIED_WITH_ENDPOINT_URL.to_string());
        }

        Ok(())
    }

    fn check_storage_class_conflict(&self, resolved: &ResolvedCommand) -> Result<(), String> {
        if resolved.transfer.storage_class.is_some() && is_local_target(resolved) {
            return Err(TARGET_LOCAL_STORAGE_SPECIFIED_WITH_STORAGE_CLASS.to_string());
        }

        Ok(())
    }

    fn check_sse_conflict(&self, resolved: &ResolvedCommand) -> Result<(), String> {
        let transfer = &resolved.transfer;
        if (transfer.sse.is_some() || transfer.sse_kms_key_id.is_some())
            && is_local_target(resolved)
        {
            return Err(TARGET_LOCAL_STORAGE_SPECIFIED_WITH_SSE.to_string());
        }

        if transfer.sse_kms_key_id.is_some() && !transfer.sse.as_deref().is_some_and(sse::is_kms)
        {
            return Err(SSE_KMS_KEY_ID_ARGUMENTS_CONFLICT.to_string());
        }

        Ok(())
    }

    fn check_acl_conflict(&self, resolved: &ResolvedCommand) -> Result<(), String> {
        if resolved.transfer.acl.is_some() && is_local_target(resolved) {
            return Err(TARGET_LOCAL_STORAGE_SPECIFIED_WITH_ACL.to_string());
        }

        Ok(())
    }

    fn check_metadata_conflict(&self, resolved: &ResolvedCommand) -> Result<(), String> {
        let transfer = &resolved.transfer;
        let metadata_option_specified = transfer.content_type.is_some()
            || transfer.cache_control.is_some()
            || transfer.content_encoding.is_some()
            || transfer.content_disposition.is_some()
            || transfer.expires.is_some()
            || transfer.metadata.is_some();

        if metadata_option_specified && is_local_target(resolved) {
            return Err(TARGET_LOCAL_STORAGE_SPECIFIED_WITH_METADATA_OPTION.to_string());
        }

        Ok(())
    }

    fn check_no_follow_symlinks_conflict(&self, resolved: &ResolvedCommand) -> Result<(), String> {
        if resolved.transfer.no_follow_symlinks && resolved.sources.iter().any(|s| s.is_remote()) {
            return Err(SOURCE_REMOTE_STORAGE_SPECIFIED_WITH_NO_FOLLOW_SYMLINKS.to_string());
        }

        Ok(())
    }

    fn check_no_guess_mime_type_conflict(&self, resolved: &ResolvedCommand) -> Result<(), String> {
        if resolved.transfer.no_guess_mime_type && resolved.sources.iter().any(|s| s.is_remote()) {
            return Err(SOURCE_REMOTE_STORAGE_SPECIFIED_WITH_NO_GUESS_MIME_TYPE.to_string());
        }

        Ok(())
    }

    fn check_no_server_side_copy_conflict(&self, resolved: &ResolvedCommand) -> Result<(), String> {
        if resolved.transfer.no_server_side_copy && !is_remote_to_remote(resolved) {
            return Err(NO_SERVER_SIDE_COPY_WITH_LOCAL_STORAGE.to_string());
        }

        Ok(())
    }

    fn check_listing_storage_class_conflict(&self, resolved: &ResolvedCommand) -> Result<(), String> {
        let Some(list_config) = resolved.list_config else {
            return Ok(());
        };

        if (list_config.show_storage_class || list_config.group_by_storage_class)
            && resolved.sources.iter().any(|s| s.is_local())
        {
            return Err(STORAGE_CLASS_OF_LOCAL_STORAGE.to_string());
        }

        Ok(())
    }

    fn build_client_config(&self, credential: S3Credentials, source: bool) -> ClientConfig {
        let (region, endpoint_url, force_path_style) = if source {
            (
                self.source_region.clone(),
                self.source_endpoint_url.clone(),
                self.source_force_path_style,
            )
        } else {
            (
                self.target_region.clone(),
                self.target_endpoint_url.clone(),
                self.target_force_path_style,
            )
        };

        ClientConfig {
            client_config_location: ClientConfigLocation {
                aws_config_file: self.aws_config_file.clone(),
                aws_shared_credentials_file: self.aws_shared_credentials_file.clone(),
            },
            credential,
            region,
            endpoint_url,
            force_path_style,
            retry_config: RetryConfig {
                aws_max_attempts: self.aws_max_attempts,
                initial_backoff_milliseconds: self.initial_backoff_milliseconds,
            },
            cli_timeout_config: CLITimeoutConfig {
                operation_timeout_milliseconds: self.operation_timeout_milliseconds,
                operation_attempt_timeout_milliseconds: self.operation_attempt_timeout_milliseconds,
                connect_timeout_milliseconds: self.connect_timeout_milliseconds,
                read_timeout_milliseconds: self.read_timeout_milliseconds,
            },
            disable_stalled_stream_protection: self.disable_stalled_stream_protection,
        }
    }

    fn build_client_configs(
        &self,
        resolved: &ResolvedCommand,
    ) -> (Option<ClientConfig>, Option<ClientConfig>) {
        let source_credential = build_credential(
            &self.source_profile,
            &self.source_access_key,
            &self.source_secret_access_key,
            &self.source_session_token,
        );
        let target_credential = build_credential(
            &self.target_profile,
            &self.target_access_key,
            &self.target_secret_access_key,
            &self.target_session_token,
        );

        let source_client_config = resolved
            .sources
            .iter()
            .any(|s| s.is_remote())
            .then(|| self.build_client_config(source_credential, true));
        let target_client_config = resolved
            .target
            .as_ref()
            .is_some_and(|t| t.is_remote())
            .then(|| self.build_client_config(target_credential, false));

        (source_client_config, target_client_config)
    }

    fn build_tracing_config(&self) -> Option<TracingConfig> {
        let tracing_config = self.verbosity.log_level().map(|log_level| TracingConfig {
            tracing_level: log_level,
            json_tracing: self.json_tracing,
            aws_sdk_tracing: self.aws_sdk_tracing,
            span_events_tracing: self.span_events_tracing,
            disable_color_tracing: self.disable_color_tracing,
        });

        let listing_only = matches!(self.command, Some(Commands::Ls(_) | Commands::Du(_)));
        if !self.dry_run && !listing_only {
            return tracing_config;
        }

        // [dry-run] lines and the ls/du output are logged at info level.
        match tracing_config {
            None => Some(TracingConfig {
                tracing_level: log::Level::Info,
                json_tracing: DEFAULT_JSON_TRACING,
                aws_sdk_tracing: DEFAULT_AWS_SDK_TRACING,
                span_events_tracing: DEFAULT_SPAN_EVENTS_TRACING,
                disable_color_tracing: DEFAULT_DISABLE_COLOR_TRACING,
            }),
            Some(config) if config.tracing_level < log::Level::Info => Some(TracingConfig {
                tracing_level: log::Level::Info,
                ..config
            }),
            Some(config) => Some(config),
        }
    }

    fn build_job_options(&self, resolved: &ResolvedCommand) -> Result<JobOptions, String> {
        let transfer = &resolved.transfer;
        let server_side_copy = !transfer.no_server_side_copy
            && is_remote_to_remote(resolved)
            && self.source_endpoint_url == self.target_endpoint_url;

        let metadata = transfer
            .metadata
            .as_deref()
            .map(metadata::parse_metadata)
            .transpose()?;

        Ok(JobOptions {
            transfer_config: TransferConfig {
                multipart_threshold: human_bytes::parse_human_bytes_without_limit(
                    &transfer.multipart_threshold,
                )?,
                part_size: human_bytes::parse_part_size(&transfer.part_size)?,
                concurrency: transfer.concurrency,
                server_side_copy,
            },
            overwrite_policy: OverwritePolicy {
                no_clobber: transfer.no_clobber,
                if_size_differ: transfer.if_size_differ,
                if_source_newer: transfer.if_source_newer,
            },
            retry_config: JobRetryConfig {
                retry_count: self.retry_count,
                initial_backoff_milliseconds: self.initial_backoff_milliseconds,
                max_backoff_milliseconds: self
                    .max_backoff_milliseconds
                    .max(self.initial_backoff_milliseconds),
            },
            upload_config: UploadConfig {
                storage_class: transfer.storage_class.as_deref().map(StorageClass::from),
                canned_acl: transfer.acl.as_deref().map(ObjectCannedAcl::from),
                sse: transfer.sse.as_deref().map(ServerSideEncryption::from),
                sse_kms_key_id: SseKmsKeyId {
                    id: transfer.sse_kms_key_id.clone(),
                },
                content_type: transfer.content_type.clone(),
                cache_control: transfer.cache_control.clone(),
                content_encoding: transfer.content_encoding.clone(),
                content_disposition: transfer.content_disposition.clone(),
                expires: transfer.expires,
                metadata,
                no_guess_mime_type: transfer.no_guess_mime_type,
            },
            dry_run: self.dry_run,
            force_glacier_transfer: transfer.force_glacier_transfer,
        })
    }
}

fn build_credential(
    profile: &Option<String>,
    access_key: &Option<String>,
    secret_access_key: &Option<String>,
    session_token: &Option<String>,
) -> S3Credentials {
    if let Some(profile) = profile {
        return S3Credentials::Profile(profile.clone());
    }

    match (access_key, secret_access_key) {
        (Some(access_key), Some(secret_access_key)) => S3Credentials::Credentials {
            access_keys: AccessKeys {
                access_key: access_key.clone(),
                secret_access_key: secret_access_key.clone(),
                session_token: session_token.clone(),
            },
        },
        _ => S3Credentials::FromEnvironment,
    }
}

fn is_local_target(resolved: &ResolvedCommand) -> bool {
    resolved.target.as_ref().is_some_and(|t| t.is_local())
}

fn is_remote_to_remote(resolved: &ResolvedCommand) -> bool {
    resolved.target.as_ref().is_some_and(|t| t.is_remote())
        && resolved.sources.iter().all(|s| s.is_remote())
}

impl TryFrom<CLIArgs> for Config {
    type Error = String;

    fn try_from(value: CLIArgs) -> Result<Self, Self::Error> {
        let tracing_config = value.build_tracing_config();

        let Some(command) = value.command.clone() else {
            if let Some(shell) = value.auto_complete_shell {
                return Ok(Config {
                    operation: OperationKind::Copy,
                    sources: vec![],
                    target: None,
                    source_client_config: None,
                    target_client_config: None,
                    tracing_config,
                    job_options: JobOptions::default(),
                    filter_config: FilterConfig::default(),
                    sync_config: None,
                    list_config: None,
                    worker_size: value.worker_size,
                    max_keys: value.max_keys,
                    flatten: DEFAULT_FLATTEN,
                    follow_symlinks: true,
                    rate_limit_objects: None,
                    auto_complete_shell: Some(shell),
                });
            }
            return Err(NO_COMMAND_SPECIFIED.to_string());
        };

        let resolved = value.resolve_command(&command)?;
        value.validate_storage_config(&resolved)?;

        let (source_client_config, target_client_config) = value.build_client_configs(&resolved);
        let job_options = value.build_job_options(&resolved)?;

        let filter_config = FilterConfig {
            include: glob_pattern::parse_glob_patterns(&resolved.selection.include)?,
            exclude: glob_pattern::parse_glob_patterns(&resolved.selection.exclude)?,
        };

        Ok(Config {
            operation: resolved.operation,
            sources: resolved.sources,
            target: resolved.target,
            source_client_config,
            target_client_config,
            tracing_config,
            job_options,
            filter_config,
            sync_config: resolved.sync_config,
            list_config: resolved.list_config,
            worker_size: value.worker_size,
            max_keys: value.max_keys,
            flatten: resolved.transfer.flatten,
            follow_symlinks: !resolved.transfer.no_follow_symlinks,
            rate_limit_objects: value.rate_limit_objects,
            auto_complete_shell: value.auto_complete_shell,
        })
    }
}
