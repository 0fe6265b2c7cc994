use std::fmt;
use std::fmt::{Display, Formatter};
use std::path::Path;

use crate::location::glob::{GlobPattern, find_first_metacharacter, unescape};
use crate::types::error::S3bulkError;

pub mod glob;

pub const S3_SCHEME: &str = "s3";
const SCHEME_SEPARATOR: &str = "://";
const DELIMITER: char = '/';

const MIN_BUCKET_NAME_LENGTH: usize = 3;
const MAX_BUCKET_NAME_LENGTH: usize = 63;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParseOptions {
    /// Treat every character literally. Disables glob detection.
    pub raw: bool,
    pub version_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemoteLocation {
    pub bucket: String,
    pub key: String,
    pub version_id: Option<String>,
    pub raw_mode: bool,
    pub delimiter: char,
    glob: Option<GlobPattern>,
    prefix: String,
    original: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocalLocation {
    pub path: String,
    pub raw_mode: bool,
    glob: Option<GlobPattern>,
    prefix: String,
    original: String,
}

/// A parsed reference to a local path or a remote bucket/key.
/// Immutable once parsed; `join` and friends return new values.
#[derive(Debug, Clone, PartialEq)]
pub enum Location {
    Local(LocalLocation),
    Remote(RemoteLocation),
}

impl Location {
    pub fn parse(raw: &str, options: &ParseOptions) -> Result<Self, S3bulkError> {
        if raw.is_empty() {
            return Err(invalid_location(raw, "location is empty"));
        }

        let location = if let Some((scheme, rest)) = raw.split_once(SCHEME_SEPARATOR) {
            if scheme != S3_SCHEME {
                return Err(invalid_location(
                    raw,
                    &format!("unsupported scheme '{scheme}'"),
                ));
            }
            Location::Remote(parse_remote(raw, rest, options)?)
        } else {
            Location::Local(parse_local(raw, options)?)
        };

        if options.version_id.is_some() {
            if !location.is_remote() {
                return Err(S3bulkError::PolicyViolation(format!(
                    "version-id can only be used with a remote object: {raw}"
                )));
            }
            if location.is_wildcard() || location.is_prefix() {
                return Err(S3bulkError::PolicyViolation(format!(
                    "version-id cannot be used with a wildcard or prefix: {raw}"
                )));
            }
        }

        Ok(location)
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Location::Remote(_))
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Location::Local(_))
    }

    pub fn is_wildcard(&self) -> bool {
        self.glob().is_some()
    }

    /// A non-wildcard location that denotes everything beneath it.
    pub fn is_prefix(&self) -> bool {
        if self.is_wildcard() {
            return false;
        }
        match self {
            Location::Remote(remote) => {
                remote.key.is_empty() || remote.key.ends_with(remote.delimiter)
            }
            Location::Local(local) => local.path.ends_with(DELIMITER),
        }
    }

    pub fn is_bucket(&self) -> bool {
        matches!(self, Location::Remote(remote) if remote.key.is_empty())
    }

    /// True for local locations that name an existing directory.
    pub fn is_local_directory(&self) -> bool {
        match self {
            Location::Local(local) => !self.is_wildcard() && Path::new(&local.path).is_dir(),
            Location::Remote(_) => false,
        }
    }

    /// A location that names one object and can only produce one Job.
    pub fn is_single_object(&self) -> bool {
        !self.is_wildcard() && !self.is_prefix() && !self.is_local_directory()
    }

    pub fn glob(&self) -> Option<&GlobPattern> {
        match self {
            Location::Remote(remote) => remote.glob.as_ref(),
            Location::Local(local) => local.glob.as_ref(),
        }
    }

    pub fn bucket(&self) -> Option<&str> {
        match self {
            Location::Remote(remote) => Some(&remote.bucket),
            Location::Local(_) => None,
        }
    }

    pub fn version_id(&self) -> Option<&str> {
        match self {
            Location::Remote(remote) => remote.version_id.as_deref(),
            Location::Local(_) => None,
        }
    }

    pub fn is_raw_mode(&self) -> bool {
        match self {
            Location::Remote(remote) => remote.raw_mode,
            Location::Local(local) => local.raw_mode,
        }
    }

    /// The key (remote) or path (local), with escapes removed for plain locations.
    pub fn path(&self) -> &str {
        match self {
            Location::Remote(remote) => &remote.key,
            Location::Local(local) => &local.path,
        }
    }

    /// The literal part of the path in front of the first metacharacter.
    pub fn prefix(&self) -> &str {
        match self {
            Location::Remote(remote) => &remote.prefix,
            Location::Local(local) => &local.prefix,
        }
    }

    /// Where the lister starts. For local wildcards this is the directory
    /// part of the literal prefix, because a directory walk cannot start
    /// in the middle of a file name.
    pub fn listing_prefix(&self) -> &str {
        match self {
            Location::Remote(remote) => &remote.prefix,
            Location::Local(local) => {
                if local.glob.is_some() {
                    directory_part(&local.prefix)
                } else {
                    &local.path
                }
            }
        }
    }

    /// The user supplied string this location was parsed from.
    pub fn original(&self) -> &str {
        match self {
            Location::Remote(remote) => &remote.original,
            Location::Local(local) => &local.original,
        }
    }

    pub fn matches(&self, key: &str) -> bool {
        if let Some(glob) = self.glob() {
            return glob.is_match(key);
        }
        if self.is_prefix() {
            return key.starts_with(self.path());
        }
        if self.is_local_directory() {
            return key.starts_with(&format!("{}{DELIMITER}", self.path()));
        }

        key == self.path()
    }

    /// The part of `key` below this location. For wildcards the base is
    /// the literal prefix up to its last delimiter, so `logs/2024-*`
    /// keeps `2024-01/a.txt` for the key `logs/2024-01/a.txt`.
    pub fn relative_path(&self, key: &str) -> String {
        let base = self.relative_base();
        key.strip_prefix(base.as_str()).unwrap_or(key).to_string()
    }

    fn relative_base(&self) -> String {
        if self.is_wildcard() {
            return directory_part(self.prefix()).to_string();
        }
        if self.is_prefix() {
            return self.path().to_string();
        }
        if self.is_local_directory() {
            return format!("{}{DELIMITER}", self.path());
        }

        directory_part(self.path()).to_string()
    }

    /// Last path segment, ignoring a trailing delimiter.
    pub fn base_name(&self) -> &str {
        base_name(self.path())
    }

    /// A new concrete location below this one.
    pub fn join(&self, name: &str) -> Location {
        let joined = join_path(self.path(), name);
        self.with_path(&joined)
    }

    /// The same storage, pointed at another concrete key.
    pub fn with_path(&self, path: &str) -> Location {
        match self {
            Location::Remote(remote) => {
                let location = RemoteLocation {
                    bucket: remote.bucket.clone(),
                    key: path.to_string(),
                    version_id: None,
                    raw_mode: true,
                    delimiter: remote.delimiter,
                    glob: None,
                    prefix: path.to_string(),
                    original: format!("{S3_SCHEME}{SCHEME_SEPARATOR}{}/{path}", remote.bucket),
                };
                Location::Remote(location)
            }
            Location::Local(_) => Location::Local(LocalLocation {
                path: path.to_string(),
                raw_mode: true,
                glob: None,
                prefix: path.to_string(),
                original: path.to_string(),
            }),
        }
    }

    /// The URL of one object found below this location.
    pub fn object_url(&self, key: &str) -> String {
        match self {
            Location::Remote(remote) => {
                format!("{S3_SCHEME}{SCHEME_SEPARATOR}{}/{key}", remote.bucket)
            }
            Location::Local(_) => key.to_string(),
        }
    }
}

impl Display for Location {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Location::Remote(remote) => write!(f, "{}", self.object_url(&remote.key)),
            Location::Local(local) => write!(f, "{}", local.path),
        }
    }
}

fn parse_remote(
    raw: &str,
    rest: &str,
    options: &ParseOptions,
) -> Result<RemoteLocation, S3bulkError> {
    let (bucket, key) = rest.split_once(DELIMITER).unwrap_or((rest, ""));

    if bucket.is_empty() {
        return Err(invalid_location(raw, "s3 url should have a bucket"));
    }
    if find_first_metacharacter(bucket).is_some() {
        return Err(invalid_location(raw, "bucket name cannot contain wildcards"));
    }
    check_bucket_name(bucket).map_err(|reason| invalid_location(raw, &reason))?;

    let (key, glob, prefix) = classify_path(raw, key, options.raw)?;

    Ok(RemoteLocation {
        bucket: bucket.to_string(),
        key,
        version_id: options.version_id.clone(),
        raw_mode: options.raw,
        delimiter: DELIMITER,
        glob,
        prefix,
        original: raw.to_string(),
    })
}

fn parse_local(raw: &str, options: &ParseOptions) -> Result<LocalLocation, S3bulkError> {
    let path = convert_windows_directory_char_to_slash(raw);
    let (path, glob, prefix) = classify_path(raw, &path, options.raw)?;

    Ok(LocalLocation {
        path,
        raw_mode: options.raw,
        glob,
        prefix,
        original: raw.to_string(),
    })
}

fn classify_path(
    raw: &str,
    path: &str,
    raw_mode: bool,
) -> Result<(String, Option<GlobPattern>, String), S3bulkError> {
    if raw_mode {
        return Ok((path.to_string(), None, path.to_string()));
    }

    match find_first_metacharacter(path) {
        Some(index) => {
            let glob = GlobPattern::new(path).map_err(|e| match e {
                S3bulkError::InvalidLocation { reason, .. } => invalid_location(raw, &reason),
                other => other,
            })?;
            let prefix = unescape(&path[..index]);
            Ok((path.to_string(), Some(glob), prefix))
        }
        None => {
            let path = unescape(path);
            Ok((path.clone(), None, path))
        }
    }
}

fn check_bucket_name(bucket: &str) -> Result<(), String> {
    if bucket.len() < MIN_BUCKET_NAME_LENGTH || MAX_BUCKET_NAME_LENGTH < bucket.len() {
        return Err(format!(
            "bucket name must be between {MIN_BUCKET_NAME_LENGTH} and {MAX_BUCKET_NAME_LENGTH} characters long"
        ));
    }

    let valid_char = |c: char| c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_';
    if !bucket.chars().all(valid_char) {
        return Err(format!("bucket name contains invalid characters: {bucket}"));
    }

    let first_and_last_are_alphanumeric = bucket
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphanumeric())
        && bucket
            .chars()
            .last()
            .is_some_and(|c| c.is_ascii_alphanumeric());
    if !first_and_last_are_alphanumeric {
        return Err(format!(
            "bucket name must begin and end with a letter or number: {bucket}"
        ));
    }

    if bucket.contains("..") {
        return Err(format!(
            "bucket name must not contain two adjacent periods: {bucket}"
        ));
    }

    Ok(())
}

fn invalid_location(raw: &str, reason: &str) -> S3bulkError {
    S3bulkError::InvalidLocation {
        location: raw.to_string(),
        reason: reason.to_string(),
    }
}

/// Everything up to and including the last delimiter.
fn directory_part(path: &str) -> &str {
    match path.rfind(DELIMITER) {
        Some(index) => &path[..=index],
        None => "",
    }
}

fn base_name(path: &str) -> &str {
    let trimmed = path.trim_end_matches(DELIMITER);
    match trimmed.rfind(DELIMITER) {
        Some(index) => &trimmed[index + 1..],
        None => trimmed,
    }
}

fn join_path(base: &str, name: &str) -> String {
    if base.is_empty() || base.ends_with(DELIMITER) {
        format!("{base}{name}")
    } else {
        format!("{base}{DELIMITER}{name}")
    }
}

pub fn convert_windows_directory_char_to_slash(path: &str) -> String {
    if cfg!(windows) {
        path.replace('\\', "/")
    } else {
        path.to_string()
    }
}
