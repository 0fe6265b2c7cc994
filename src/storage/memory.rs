use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_channel::Sender;
use async_trait::async_trait;
use aws_sdk_s3::primitives::DateTime;

use crate::storage::{CopySource, FileRange, PutOptions, StorageTrait, UploadedPart};
use crate::types::ObjectInfo;
use crate::types::error::S3bulkError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryOperation {
    List,
    Head,
    Get,
    Put,
    CreateMultipartUpload,
    UploadPart,
    CompleteMultipartUpload,
    AbortMultipartUpload,
    CopyObject,
    UploadPartCopy,
    Delete,
}

#[derive(Debug, Clone)]
struct MemoryObject {
    data: Vec<u8>,
    last_modified: DateTime,
    e_tag: String,
    storage_class: Option<String>,
}

#[derive(Debug, Default)]
struct MemoryUpload {
    key: String,
    parts: BTreeMap<i32, Vec<u8>>,
}

#[derive(Debug)]
struct InjectedFailure {
    operation: MemoryOperation,
    key: Option<String>,
    part_number: Option<i32>,
    error: S3bulkError,
    remaining: Option<usize>,
}

#[derive(Debug, Default)]
struct MemoryState {
    objects: BTreeMap<String, MemoryObject>,
    uploads: HashMap<String, MemoryUpload>,
    failures: Vec<InjectedFailure>,
    calls: HashMap<MemoryOperation, usize>,
    next_upload_id: u64,
    aborted_uploads: usize,
    delay: Option<Duration>,
    /// Buckets readable by server-side copies.
    buckets: HashMap<String, Arc<Mutex<MemoryState>>>,
}

/// In-memory storage double with failure injection.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    local: bool,
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports itself as local storage.
    pub fn new_local() -> Self {
        Self {
            local: true,
            ..Default::default()
        }
    }

    pub fn insert_object(&self, key: &str, data: &[u8], last_modified_secs: i64) {
        self.insert_object_with_storage_class(key, data, last_modified_secs, None);
    }

    pub fn insert_object_with_storage_class(
        &self,
        key: &str,
        data: &[u8],
        last_modified_secs: i64,
        storage_class: Option<&str>,
    ) {
        let mut state = self.state.lock().unwrap();
        state.objects.insert(
            key.to_string(),
            MemoryObject {
                data: data.to_vec(),
                last_modified: DateTime::from_secs(last_modified_secs),
                e_tag: single_part_e_tag(data),
                storage_class: storage_class.map(|class| class.to_string()),
            },
        );
    }

    pub fn object_data(&self, key: &str) -> Option<Vec<u8>> {
        let state = self.state.lock().unwrap();
        state.objects.get(key).map(|object| object.data.clone())
    }

    pub fn object_e_tag(&self, key: &str) -> Option<String> {
        let state = self.state.lock().unwrap();
        state.objects.get(key).map(|object| object.e_tag.clone())
    }

    pub fn keys(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state.objects.keys().cloned().collect()
    }

    /// Fails `operation` with `error`. `key` and `part_number` narrow the
    /// match; `times` of `None` fails forever.
    pub fn fail(
        &self,
        operation: MemoryOperation,
        key: Option<&str>,
        part_number: Option<i32>,
        error: S3bulkError,
        times: Option<usize>,
    ) {
        let mut state = self.state.lock().unwrap();
        state.failures.push(InjectedFailure {
            operation,
            key: key.map(|key| key.to_string()),
            part_number,
            error,
            remaining: times,
        });
    }

    /// Makes `storage` readable as `bucket` by server-side copies.
    pub fn link_bucket(&self, bucket: &str, storage: &MemoryStorage) {
        let mut state = self.state.lock().unwrap();
        state
            .buckets
            .insert(bucket.to_string(), storage.state.clone());
    }

    pub fn set_delay(&self, delay: Duration) {
        self.state.lock().unwrap().delay = Some(delay);
    }

    pub fn call_count(&self, operation: MemoryOperation) -> usize {
        let state = self.state.lock().unwrap();
        state.calls.get(&operation).copied().unwrap_or_default()
    }

    pub fn aborted_uploads(&self) -> usize {
        self.state.lock().unwrap().aborted_uploads
    }

    pub fn pending_uploads(&self) -> usize {
        self.state.lock().unwrap().uploads.len()
    }

    async fn enter(
        &self,
        operation: MemoryOperation,
        key: &str,
        part_number: Option<i32>,
    ) -> Result<()> {
        let delay = {
            let mut state = self.state.lock().unwrap();
            *state.calls.entry(operation).or_default() += 1;

            if let Some(error) = state.take_failure(operation, key, part_number, false) {
                return Err(anyhow!(error));
            }

            state.delay
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        Ok(())
    }
}

impl MemoryStorage {
    fn read_copy_source(&self, operation: &str, source: &CopySource) -> Result<MemoryObject> {
        let bucket = self
            .state
            .lock()
            .unwrap()
            .buckets
            .get(&source.bucket)
            .cloned()
            .ok_or_else(|| {
                anyhow!(S3bulkError::PermanentApiError {
                    operation: operation.to_string(),
                    code: "NoSuchBucket".to_string(),
                    message: source.bucket.clone(),
                })
            })?;

        let state = bucket.lock().unwrap();
        state.objects.get(&source.key).cloned().ok_or_else(|| {
            anyhow!(S3bulkError::PermanentApiError {
                operation: operation.to_string(),
                code: "NoSuchKey".to_string(),
                message: source.key.clone(),
            })
        })
    }
}

impl MemoryState {
    /// With `exact_key`, only failures registered for exactly `key` match.
    fn take_failure(
        &mut self,
        operation: MemoryOperation,
        key: &str,
        part_number: Option<i32>,
        exact_key: bool,
    ) -> Option<S3bulkError> {
        let failure = self.failures.iter_mut().find(|failure| {
            let key_matches = match failure.key.as_deref() {
                Some(failure_key) => failure_key == key,
                None => !exact_key,
            };
            failure.operation == operation
                && key_matches
                && (failure.part_number.is_none() || failure.part_number == part_number)
                && failure.remaining != Some(0)
        })?;

        if let Some(remaining) = failure.remaining.as_mut() {
            *remaining -= 1;
        }
        Some(failure.error.clone())
    }
}

#[async_trait]
impl StorageTrait for MemoryStorage {
    fn is_local_storage(&self) -> bool {
        self.local
    }

    async fn list_objects(
        &self,
        prefix: &str,
        sender: &Sender<ObjectInfo>,
        _max_keys: i32,
        start_after: Option<String>,
    ) -> Result<()> {
        self.enter(MemoryOperation::List, prefix, None).await?;

        let objects: Vec<ObjectInfo> = {
            let state = self.state.lock().unwrap();
            state
                .objects
                .iter()
                .filter(|(key, _)| key.starts_with(prefix))
                .filter(|(key, _)| {
                    start_after
                        .as_deref()
                        .is_none_or(|start_after| key.as_str() > start_after)
                })
                .map(|(key, object)| build_object_info(key, object))
                .collect()
        };

        for object in objects {
            // A failure registered for an object key interrupts the listing
            // right before that object.
            let failure = self.state.lock().unwrap().take_failure(
                MemoryOperation::List,
                &object.key,
                None,
                true,
            );
            if let Some(error) = failure {
                return Err(anyhow!(error));
            }

            if let Err(e) = sender
                .send(object)
                .await
                .context("async_channel::Sender::send() failed.")
            {
                return if !sender.is_closed() { Err(e) } else { Ok(()) };
            }
        }

        Ok(())
    }

    async fn head_object(
        &self,
        key: &str,
        _version_id: Option<String>,
    ) -> Result<Option<ObjectInfo>> {
        self.enter(MemoryOperation::Head, key, None).await?;

        let state = self.state.lock().unwrap();
        Ok(state
            .objects
            .get(key)
            .map(|object| build_object_info(key, object)))
    }

    async fn get_object(
        &self,
        key: &str,
        _version_id: Option<String>,
        range: Option<FileRange>,
    ) -> Result<Vec<u8>> {
        self.enter(MemoryOperation::Get, key, None).await?;

        let state = self.state.lock().unwrap();
        let object = state.objects.get(key).ok_or_else(|| {
            anyhow!(S3bulkError::PermanentApiError {
                operation: "get_object".to_string(),
                code: "NoSuchKey".to_string(),
                message: key.to_string(),
            })
        })?;

        Ok(match range {
            Some(range) => {
                let start = range.offset as usize;
                let end = (range.offset + range.size) as usize;
                object.data[start..end.min(object.data.len())].to_vec()
            }
            None => object.data.clone(),
        })
    }

    async fn put_object(&self, key: &str, body: Vec<u8>, options: &PutOptions) -> Result<()> {
        self.enter(MemoryOperation::Put, key, None).await?;

        let mut state = self.state.lock().unwrap();
        let last_modified = options
            .last_modified
            .unwrap_or_else(|| DateTime::from(std::time::SystemTime::now()));
        state.objects.insert(
            key.to_string(),
            MemoryObject {
                e_tag: single_part_e_tag(&body),
                data: body,
                last_modified,
                storage_class: options
                    .upload_config
                    .storage_class
                    .as_ref()
                    .map(|class| class.as_str().to_string()),
            },
        );

        Ok(())
    }

    async fn create_multipart_upload(
        &self,
        key: &str,
        _size: u64,
        _options: &PutOptions,
    ) -> Result<String> {
        self.enter(MemoryOperation::CreateMultipartUpload, key, None)
            .await?;

        let mut state = self.state.lock().unwrap();
        state.next_upload_id += 1;
        let upload_id = format!("upload-{}", state.next_upload_id);
        state.uploads.insert(
            upload_id.clone(),
            MemoryUpload {
                key: key.to_string(),
                ..Default::default()
            },
        );

        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        _offset: u64,
        body: Vec<u8>,
    ) -> Result<UploadedPart> {
        self.enter(MemoryOperation::UploadPart, key, Some(part_number))
            .await?;

        let mut state = self.state.lock().unwrap();
        let upload = state
            .uploads
            .get_mut(upload_id)
            .ok_or_else(|| anyhow!(no_such_upload(upload_id)))?;
        let e_tag = single_part_e_tag(&body);
        upload.parts.insert(part_number, body);

        Ok(UploadedPart {
            part_number,
            e_tag: Some(e_tag),
        })
    }

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<UploadedPart>,
        options: &PutOptions,
    ) -> Result<()> {
        self.enter(MemoryOperation::CompleteMultipartUpload, key, None)
            .await?;

        let mut state = self.state.lock().unwrap();
        let upload = state
            .uploads
            .remove(upload_id)
            .ok_or_else(|| anyhow!(no_such_upload(upload_id)))?;

        let mut data = vec![];
        for part in &parts {
            let body = upload.parts.get(&part.part_number).ok_or_else(|| {
                anyhow!(S3bulkError::PermanentApiError {
                    operation: "complete_multipart_upload".to_string(),
                    code: "InvalidPart".to_string(),
                    message: format!("part {} was not uploaded", part.part_number),
                })
            })?;
            data.extend_from_slice(body);
        }

        let last_modified = options
            .last_modified
            .unwrap_or_else(|| DateTime::from(std::time::SystemTime::now()));
        state.objects.insert(
            upload.key,
            MemoryObject {
                data,
                last_modified,
                e_tag: format!("\"{:x}-{}\"", md5::compute(upload_id), parts.len()),
                storage_class: None,
            },
        );

        Ok(())
    }

    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> Result<()> {
        self.enter(MemoryOperation::AbortMultipartUpload, key, None)
            .await?;

        let mut state = self.state.lock().unwrap();
        state.uploads.remove(upload_id);
        state.aborted_uploads += 1;

        Ok(())
    }

    async fn copy_object(
        &self,
        key: &str,
        source: &CopySource,
        options: &PutOptions,
    ) -> Result<()> {
        self.enter(MemoryOperation::CopyObject, key, None).await?;

        let object = self.read_copy_source("copy_object", source)?;
        let last_modified = options
            .last_modified
            .unwrap_or_else(|| DateTime::from(std::time::SystemTime::now()));

        let mut state = self.state.lock().unwrap();
        state.objects.insert(
            key.to_string(),
            MemoryObject {
                last_modified,
                storage_class: options
                    .upload_config
                    .storage_class
                    .as_ref()
                    .map(|class| class.as_str().to_string()),
                ..object
            },
        );

        Ok(())
    }

    async fn upload_part_copy(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        source: &CopySource,
        range: FileRange,
    ) -> Result<UploadedPart> {
        self.enter(MemoryOperation::UploadPartCopy, key, Some(part_number))
            .await?;

        let object = self.read_copy_source("upload_part_copy", source)?;
        let start = (range.offset as usize).min(object.data.len());
        let end = ((range.offset + range.size) as usize).min(object.data.len());
        let body = object.data[start..end].to_vec();

        let mut state = self.state.lock().unwrap();
        let upload = state
            .uploads
            .get_mut(upload_id)
            .ok_or_else(|| anyhow!(no_such_upload(upload_id)))?;
        let e_tag = single_part_e_tag(&body);
        upload.parts.insert(part_number, body);

        Ok(UploadedPart {
            part_number,
            e_tag: Some(e_tag),
        })
    }

    async fn delete_object(&self, key: &str, _version_id: Option<String>) -> Result<()> {
        self.enter(MemoryOperation::Delete, key, None).await?;

        self.state.lock().unwrap().objects.remove(key);

        Ok(())
    }
}

pub fn transient_error(operation: &str) -> S3bulkError {
    S3bulkError::TransientApiError {
        operation: operation.to_string(),
        code: "SlowDown".to_string(),
        message: "Please reduce your request rate.".to_string(),
    }
}

pub fn permanent_error(operation: &str) -> S3bulkError {
    S3bulkError::PermanentApiError {
        operation: operation.to_string(),
        code: "AccessDenied".to_string(),
        message: "Access Denied".to_string(),
    }
}

fn no_such_upload(upload_id: &str) -> S3bulkError {
    S3bulkError::PermanentApiError {
        operation: "upload_part".to_string(),
        code: "NoSuchUpload".to_string(),
        message: upload_id.to_string(),
    }
}

fn single_part_e_tag(data: &[u8]) -> String {
    format!("\"{:x}\"", md5::compute(data))
}

fn build_object_info(key: &str, object: &MemoryObject) -> ObjectInfo {
    ObjectInfo::new(key, object.data.len() as u64, object.last_modified)
        .with_e_tag(Some(object.e_tag.clone()))
        .with_storage_class(object.storage_class.clone())
}
