use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use async_channel::Sender;
use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::{ByteStream, DateTime};
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart, MetadataDirective};
use aws_smithy_runtime_api::http::Response;
use aws_smithy_types::body::SdkBody;
use aws_smithy_types::error::display::DisplayErrorContext;
use aws_smithy_types_convert::date_time::DateTimeExt;
use base64::{Engine as _, engine::general_purpose};
use tracing::{debug, trace};

use crate::storage::{CopySource, FileRange, PutOptions, Storage, StorageTrait, UploadedPart};
use crate::types::ObjectInfo;
use crate::types::error::{ErrorClass, S3bulkError, classify_service_error};
use crate::types::token::PipelineCancellationToken;

mod client_builder;

const NOT_FOUND_STATUS: u16 = 404;

#[derive(Clone)]
pub struct S3Storage {
    bucket: String,
    cancellation_token: PipelineCancellationToken,
    client: Arc<Client>,
}

impl S3Storage {
    /// Clients are shared between the buckets of one side.
    pub fn boxed_new(
        client: Arc<Client>,
        bucket: &str,
        cancellation_token: PipelineCancellationToken,
    ) -> Storage {
        let storage = S3Storage {
            bucket: bucket.to_string(),
            cancellation_token,
            client,
        };

        Box::new(storage)
    }
}

#[async_trait]
impl StorageTrait for S3Storage {
    fn is_local_storage(&self) -> bool {
        false
    }

    async fn list_objects(
        &self,
        prefix: &str,
        sender: &Sender<ObjectInfo>,
        max_keys: i32,
        start_after: Option<String>,
    ) -> Result<()> {
        let mut start_after = start_after;
        let mut continuation_token = None;
        loop {
            let list_object_v2 = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix)
                .set_start_after(start_after.take())
                .set_continuation_token(continuation_token)
                .max_keys(max_keys);

            if self.cancellation_token.is_cancelled() {
                trace!("list_objects() canceled.");
                break;
            }

            let list_objects_output = list_object_v2
                .send()
                .await
                .map_err(|e| convert_sdk_error("list_objects_v2", e))
                .context("aws_sdk_s3::client::list_objects_v2() failed.")?;

            for object in list_objects_output.contents() {
                let Some(key) = object.key() else {
                    continue;
                };
                if key.ends_with('/') {
                    debug!(key = key, "directory marker object is skipped.");
                    continue;
                }

                let last_modified = object
                    .last_modified()
                    .cloned()
                    .unwrap_or_else(|| DateTime::from_secs(0));
                let object_info = ObjectInfo::new(
                    key,
                    object.size().unwrap_or_default().max(0) as u64,
                    last_modified,
                )
                .with_e_tag(object.e_tag().map(|e_tag| e_tag.to_string()))
                .with_storage_class(
                    object
                        .storage_class()
                        .map(|storage_class| storage_class.as_str().to_string()),
                );

                if let Err(e) = sender
                    .send(object_info)
                    .await
                    .context("async_channel::Sender::send() failed.")
                {
                    return if !sender.is_closed() { Err(e) } else { Ok(()) };
                }
            }

            if !list_objects_output.is_truncated().unwrap_or_default() {
                break;
            }

            continuation_token = list_objects_output
                .next_continuation_token()
                .map(|token| token.to_string());
        }

        Ok(())
    }

    async fn head_object(
        &self,
        key: &str,
        version_id: Option<String>,
    ) -> Result<Option<ObjectInfo>> {
        let result = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .set_version_id(version_id)
            .send()
            .await;

        let head_object_output = match result {
            Ok(output) => output,
            Err(e) => {
                if is_not_found(&e) {
                    return Ok(None);
                }
                return Err(convert_sdk_error("head_object", e))
                    .context("aws_sdk_s3::client::head_object() failed.");
            }
        };

        let object_info = ObjectInfo::new(
            key,
            head_object_output.content_length().unwrap_or_default().max(0) as u64,
            head_object_output
                .last_modified()
                .cloned()
                .unwrap_or_else(|| DateTime::from_secs(0)),
        )
        .with_e_tag(head_object_output.e_tag().map(|e_tag| e_tag.to_string()))
        .with_storage_class(
            head_object_output
                .storage_class()
                .map(|storage_class| storage_class.as_str().to_string()),
        )
        .with_version_id(
            head_object_output
                .version_id()
                .map(|version_id| version_id.to_string()),
        );

        Ok(Some(object_info))
    }

    async fn get_object(
        &self,
        key: &str,
        version_id: Option<String>,
        range: Option<FileRange>,
    ) -> Result<Vec<u8>> {
        let get_object_output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .set_version_id(version_id)
            .set_range(range.map(|range| range.to_range_header()))
            .send()
            .await
            .map_err(|e| convert_sdk_error("get_object", e))
            .context("aws_sdk_s3::client::get_object() failed.")?;

        let body = get_object_output
            .body
            .collect()
            .await
            .map_err(|e| {
                anyhow!(S3bulkError::TransientApiError {
                    operation: "get_object".to_string(),
                    code: "ResponseError".to_string(),
                    message: e.to_string(),
                })
            })
            .context("aws_sdk_s3::primitives::ByteStream::collect() failed.")?;

        Ok(body.into_bytes().to_vec())
    }

    async fn put_object(&self, key: &str, body: Vec<u8>, options: &PutOptions) -> Result<()> {
        let md5_digest = md5::compute(&body);
        let md5_digest_base64 = general_purpose::STANDARD.encode(md5_digest.as_slice());
        let upload_config = &options.upload_config;

        let put_object_output = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_length(body.len() as i64)
            .content_md5(md5_digest_base64)
            .body(ByteStream::from(body))
            .set_storage_class(upload_config.storage_class.clone())
            .set_acl(upload_config.canned_acl.clone())
            .set_server_side_encryption(upload_config.sse.clone())
            .set_ssekms_key_id(upload_config.sse_kms_key_id.id.clone())
            .set_content_type(options.content_type.clone())
            .set_cache_control(upload_config.cache_control.clone())
            .set_content_encoding(upload_config.content_encoding.clone())
            .set_content_disposition(upload_config.content_disposition.clone())
            .set_expires(upload_config.expires.map(DateTime::from_chrono_utc))
            .set_metadata(upload_config.metadata.clone())
            .send()
            .await
            .map_err(|e| convert_sdk_error("put_object", e))
            .context("aws_sdk_s3::client::put_object() failed.")?;

        trace!(key = key, "{put_object_output:?}");

        Ok(())
    }

    async fn create_multipart_upload(
        &self,
        key: &str,
        _size: u64,
        options: &PutOptions,
    ) -> Result<String> {
        let upload_config = &options.upload_config;

        let create_multipart_upload_output = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .set_storage_class(upload_config.storage_class.clone())
            .set_acl(upload_config.canned_acl.clone())
            .set_server_side_encryption(upload_config.sse.clone())
            .set_ssekms_key_id(upload_config.sse_kms_key_id.id.clone())
            .set_content_type(options.content_type.clone())
            .set_cache_control(upload_config.cache_control.clone())
            .set_content_encoding(upload_config.content_encoding.clone())
            .set_content_disposition(upload_config.content_disposition.clone())
            .set_expires(upload_config.expires.map(DateTime::from_chrono_utc))
            .set_metadata(upload_config.metadata.clone())
            .send()
            .await
            .map_err(|e| convert_sdk_error("create_multipart_upload", e))
            .context("aws_sdk_s3::client::create_multipart_upload() failed.")?;

        create_multipart_upload_output
            .upload_id()
            .map(|upload_id| upload_id.to_string())
            .ok_or_else(|| {
                anyhow!(S3bulkError::PermanentApiError {
                    operation: "create_multipart_upload".to_string(),
                    code: "MissingUploadId".to_string(),
                    message: format!("no upload id returned for {key}"),
                })
            })
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        _offset: u64,
        body: Vec<u8>,
    ) -> Result<UploadedPart> {
        let md5_digest = md5::compute(&body);
        let md5_digest_base64 = general_purpose::STANDARD.encode(md5_digest.as_slice());

        let upload_part_output = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .content_length(body.len() as i64)
            .content_md5(md5_digest_base64)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| convert_sdk_error("upload_part", e))
            .context("aws_sdk_s3::client::upload_part() failed.")?;

        trace!(key = key, part_number = part_number, "{upload_part_output:?}");

        Ok(UploadedPart {
            part_number,
            e_tag: upload_part_output.e_tag().map(|e_tag| e_tag.to_string()),
        })
    }

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        mut parts: Vec<UploadedPart>,
        _options: &PutOptions,
    ) -> Result<()> {
        parts.sort_by_key(|part| part.part_number);
        let completed_parts = parts
            .into_iter()
            .map(|part| {
                CompletedPart::builder()
                    .set_e_tag(part.e_tag)
                    .part_number(part.part_number)
                    .build()
            })
            .collect::<Vec<_>>();

        let completed_multipart_upload = CompletedMultipartUpload::builder()
            .set_parts(Some(completed_parts))
            .build();

        let complete_multipart_upload_output = self
            .client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed_multipart_upload)
            .send()
            .await
            .map_err(|e| convert_sdk_error("complete_multipart_upload", e))
            .context("aws_sdk_s3::client::complete_multipart_upload() failed.")?;

        trace!(key = key, "{complete_multipart_upload_output:?}");

        Ok(())
    }

    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> Result<()> {
        self.client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|e| convert_sdk_error("abort_multipart_upload", e))
            .context("aws_sdk_s3::client::abort_multipart_upload() failed.")?;

        Ok(())
    }

    async fn copy_object(
        &self,
        key: &str,
        source: &CopySource,
        options: &PutOptions,
    ) -> Result<()> {
        let upload_config = &options.upload_config;

        let copy_object_output = self
            .client
            .copy_object()
            .bucket(&self.bucket)
            .key(key)
            .copy_source(source.to_copy_source_header())
            .metadata_directive(metadata_directive(options))
            .set_storage_class(upload_config.storage_class.clone())
            .set_acl(upload_config.canned_acl.clone())
            .set_server_side_encryption(upload_config.sse.clone())
            .set_ssekms_key_id(upload_config.sse_kms_key_id.id.clone())
            .set_content_type(options.content_type.clone())
            .set_cache_control(upload_config.cache_control.clone())
            .set_content_encoding(upload_config.content_encoding.clone())
            .set_content_disposition(upload_config.content_disposition.clone())
            .set_expires(upload_config.expires.map(DateTime::from_chrono_utc))
            .set_metadata(upload_config.metadata.clone())
            .send()
            .await
            .map_err(|e| convert_sdk_error("copy_object", e))
            .context("aws_sdk_s3::client::copy_object() failed.")?;

        trace!(key = key, "{copy_object_output:?}");

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
        let upload_part_copy_output = self
            .client
            .upload_part_copy()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .copy_source(source.to_copy_source_header())
            .copy_source_range(range.to_range_header())
            .send()
            .await
            .map_err(|e| convert_sdk_error("upload_part_copy", e))
            .context("aws_sdk_s3::client::upload_part_copy() failed.")?;

        trace!(key = key, part_number = part_number, "{upload_part_copy_output:?}");

        Ok(UploadedPart {
            part_number,
            e_tag: upload_part_copy_output
                .copy_part_result()
                .and_then(|result| result.e_tag())
                .map(|e_tag| e_tag.to_string()),
        })
    }

    async fn delete_object(&self, key: &str, version_id: Option<String>) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .set_version_id(version_id)
            .send()
            .await
            .map_err(|e| convert_sdk_error("delete_object", e))
            .context("aws_sdk_s3::client::delete_object() failed.")?;

        Ok(())
    }
}

/// The source metadata is kept unless the copy sets metadata of its own.
fn metadata_directive(options: &PutOptions) -> MetadataDirective {
    let upload_config = &options.upload_config;
    if options.content_type.is_some()
        || upload_config.cache_control.is_some()
        || upload_config.content_encoding.is_some()
        || upload_config.content_disposition.is_some()
        || upload_config.expires.is_some()
        || upload_config.metadata.is_some()
    {
        return MetadataDirective::Replace;
    }

    MetadataDirective::Copy
}

fn is_not_found<E>(e: &SdkError<E, Response<SdkBody>>) -> bool {
    if let SdkError::ServiceError(context) = e {
        return context.raw().status().as_u16() == NOT_FOUND_STATUS;
    }

    false
}

/// Maps an SDK failure onto the transient/permanent taxonomy.
pub fn convert_sdk_error<E>(operation: &str, e: SdkError<E, Response<SdkBody>>) -> anyhow::Error
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let message = DisplayErrorContext(&e).to_string();

    let (class, code) = match &e {
        SdkError::ServiceError(context) => {
            let code = context.err().code().map(|code| code.to_string());
            let status = context.raw().status().as_u16();
            (
                classify_service_error(code.as_deref(), Some(status)),
                code.unwrap_or_else(|| status.to_string()),
            )
        }
        SdkError::TimeoutError(_) => (ErrorClass::Transient, "TimeoutError".to_string()),
        SdkError::DispatchFailure(_) => (ErrorClass::Transient, "DispatchFailure".to_string()),
        SdkError::ResponseError(_) => (ErrorClass::Transient, "ResponseError".to_string()),
        _ => (ErrorClass::Permanent, "ConstructionFailure".to_string()),
    };

    let operation = operation.to_string();
    match class {
        ErrorClass::Transient => anyhow!(S3bulkError::TransientApiError {
            operation,
            code,
            message,
        }),
        ErrorClass::Permanent => anyhow!(S3bulkError::PermanentApiError {
            operation,
            code,
            message,
        }),
    }
}
