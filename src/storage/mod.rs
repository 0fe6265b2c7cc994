use std::collections::HashMap;

use anyhow::{Result, anyhow};
use async_channel::Sender;
use async_trait::async_trait;
use aws_sdk_s3::primitives::DateTime;
use dyn_clone::DynClone;

use crate::config::UploadConfig;
use crate::location::Location;
use crate::types::error::S3bulkError;
use crate::types::{ObjectInfo, StorageSide};

pub mod local;
#[cfg(test)]
pub mod memory;
pub mod s3;

pub type Storage = Box<dyn StorageTrait + Send + Sync>;

/// Attributes applied to an object when it is written.
#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    /// Preserved as the file mtime on local targets.
    pub last_modified: Option<DateTime>,
    pub content_type: Option<String>,
    pub upload_config: UploadConfig,
}

/// A contiguous byte range of an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileRange {
    pub offset: u64,
    pub size: u64,
}

impl FileRange {
    pub fn to_range_header(&self) -> String {
        format!(
            "bytes={}-{}",
            self.offset,
            self.offset + self.size.saturating_sub(1)
        )
    }
}

/// The object a server-side copy reads from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopySource {
    pub bucket: String,
    pub key: String,
    pub version_id: Option<String>,
}

impl CopySource {
    /// `bucket/key[?versionId=id]` with every key segment URL-encoded.
    pub fn to_copy_source_header(&self) -> String {
        let key = self
            .key
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/");

        match &self.version_id {
            Some(version_id) => format!(
                "{}/{}?versionId={}",
                self.bucket,
                key,
                urlencoding::encode(version_id)
            ),
            None => format!("{}/{}", self.bucket, key),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedPart {
    pub part_number: i32,
    pub e_tag: Option<String>,
}

/// The storage client contract. Keys are full keys (remote) or full paths
/// with `/` separators (local); a storage is never bound to a prefix.
#[async_trait]
pub trait StorageTrait: DynClone {
    fn is_local_storage(&self) -> bool;
    /// Sends every object whose key starts with `prefix`, in listing order.
    /// Remote storages skip keys up to and including `start_after`.
    async fn list_objects(
        &self,
        prefix: &str,
        sender: &Sender<ObjectInfo>,
        max_keys: i32,
        start_after: Option<String>,
    ) -> Result<()>;
    /// `Ok(None)` when the object does not exist.
    async fn head_object(&self, key: &str, version_id: Option<String>)
    -> Result<Option<ObjectInfo>>;
    async fn get_object(
        &self,
        key: &str,
        version_id: Option<String>,
        range: Option<FileRange>,
    ) -> Result<Vec<u8>>;
    async fn put_object(&self, key: &str, body: Vec<u8>, options: &PutOptions) -> Result<()>;
    async fn create_multipart_upload(
        &self,
        key: &str,
        size: u64,
        options: &PutOptions,
    ) -> Result<String>;
    /// `offset` is where the part starts in the final object.
    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        offset: u64,
        body: Vec<u8>,
    ) -> Result<UploadedPart>;
    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<UploadedPart>,
        options: &PutOptions,
    ) -> Result<()>;
    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> Result<()>;
    /// Copies `source` to `key` inside the storage service. The body never
    /// passes through this host.
    async fn copy_object(&self, key: &str, source: &CopySource, options: &PutOptions)
    -> Result<()>;
    async fn upload_part_copy(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        source: &CopySource,
        range: FileRange,
    ) -> Result<UploadedPart>;
    async fn delete_object(&self, key: &str, version_id: Option<String>) -> Result<()>;
}

dyn_clone::clone_trait_object!(StorageTrait);

/// Storages of one operation. Remote storages are bound to a bucket, so a
/// side may carry several of them (`rm s3://a/x s3://b/y`).
#[derive(Clone, Default)]
pub struct StorageSet {
    sources: HashMap<Option<String>, Storage>,
    targets: HashMap<Option<String>, Storage>,
}

impl StorageSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, side: StorageSide, location: &Location, storage: Storage) {
        let key = storage_key(location);
        match side {
            StorageSide::Source => self.sources.entry(key).or_insert(storage),
            StorageSide::Target => self.targets.entry(key).or_insert(storage),
        };
    }

    pub fn contains(&self, side: StorageSide, location: &Location) -> bool {
        self.side(side).contains_key(&storage_key(location))
    }

    pub fn get(&self, side: StorageSide, location: &Location) -> Result<Storage> {
        self.side(side)
            .get(&storage_key(location))
            .cloned()
            .ok_or_else(|| {
                anyhow!(S3bulkError::InvalidLocation {
                    location: location.original().to_string(),
                    reason: "no storage is configured for this location".to_string(),
                })
            })
    }

    fn side(&self, side: StorageSide) -> &HashMap<Option<String>, Storage> {
        match side {
            StorageSide::Source => &self.sources,
            StorageSide::Target => &self.targets,
        }
    }
}

fn storage_key(location: &Location) -> Option<String> {
    location.bucket().map(|bucket| bucket.to_string())
}

/// Upper bound of parts in one multipart upload.
pub const MAX_PARTS: u64 = 10_000;

/// Split `size` bytes into ranges of `part_size`. The last one may be shorter.
/// The part size grows when `size` would need more than `MAX_PARTS` parts.
pub fn split_into_ranges(size: u64, part_size: u64) -> Vec<FileRange> {
    let mut ranges = vec![];
    if part_size == 0 {
        return ranges;
    }

    let part_size = part_size.max(size.div_ceil(MAX_PARTS));

    let mut offset = 0;
    while offset < size {
        let part = part_size.min(size - offset);
        ranges.push(FileRange { offset, size: part });
        offset += part;
    }

    ranges
}
