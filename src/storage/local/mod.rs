use std::collections::HashMap;
use std::io;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, anyhow};
use async_channel::Sender;
use async_trait::async_trait;
use aws_sdk_s3::primitives::DateTime;
use tempfile::NamedTempFile;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, trace, warn};
use walkdir::{DirEntry, WalkDir};

use crate::location::convert_windows_directory_char_to_slash;
use crate::storage::{CopySource, FileRange, PutOptions, Storage, StorageTrait, UploadedPart};
use crate::types::ObjectInfo;
use crate::types::error::S3bulkError;
use crate::types::token::PipelineCancellationToken;

pub mod fs_util;

const CURRENT_DIRECTORY: &str = ".";
const CURRENT_DIRECTORY_PREFIX: &str = "./";

struct LocalUpload {
    temp_file: NamedTempFile,
    real_path: PathBuf,
}

#[derive(Clone)]
pub struct LocalStorage {
    cancellation_token: PipelineCancellationToken,
    follow_symlinks: bool,
    /// Compute the MD5 of every listed file. Only hash comparison needs it.
    calculate_e_tag: bool,
    uploads: Arc<Mutex<HashMap<String, LocalUpload>>>,
    next_upload_id: Arc<AtomicU64>,
}

impl LocalStorage {
    pub fn boxed_new(
        cancellation_token: PipelineCancellationToken,
        follow_symlinks: bool,
        calculate_e_tag: bool,
    ) -> Storage {
        let storage = LocalStorage {
            cancellation_token,
            follow_symlinks,
            calculate_e_tag,
            uploads: Arc::new(Mutex::new(HashMap::new())),
            next_upload_id: Arc::new(AtomicU64::new(1)),
        };

        Box::new(storage)
    }

    fn lock_uploads(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, LocalUpload>>> {
        self.uploads
            .lock()
            .map_err(|e| anyhow!("local upload table poisoned: {e}"))
    }

    async fn build_object_info(&self, entry: &DirEntry, key: &str) -> Result<ObjectInfo> {
        let metadata = entry
            .metadata()
            .context("walkdir::DirEntry::metadata() failed.")?;
        let last_modified = DateTime::from(
            metadata
                .modified()
                .context("std::fs::Metadata::modified() failed.")?,
        );

        let e_tag = if self.calculate_e_tag {
            Some(fs_util::compute_md5_hex(entry.path()).await?)
        } else {
            None
        };

        Ok(ObjectInfo::new(key, metadata.len(), last_modified).with_e_tag(e_tag))
    }
}

#[async_trait]
impl StorageTrait for LocalStorage {
    fn is_local_storage(&self) -> bool {
        true
    }

    /// Walks `prefix` (a file or a directory). An empty prefix walks the
    /// current directory and yields keys without the leading `./`.
    /// Local walks are never resumed, so `start_after` is not used.
    async fn list_objects(
        &self,
        prefix: &str,
        sender: &Sender<ObjectInfo>,
        _max_keys: i32,
        _start_after: Option<String>,
    ) -> Result<()> {
        let root = if prefix.is_empty() {
            CURRENT_DIRECTORY
        } else {
            prefix
        };

        for entry in WalkDir::new(root).follow_links(self.follow_symlinks) {
            if self.cancellation_token.is_cancelled() {
                trace!("list_objects() canceled.");
                break;
            }

            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    if let Some(inner) = e.io_error() {
                        if inner.kind() == io::ErrorKind::NotFound {
                            continue;
                        }
                    }

                    let path = e
                        .path()
                        .unwrap_or_else(|| Path::new(""))
                        .to_string_lossy()
                        .to_string();

                    if e.depth() == 0 {
                        return Err(anyhow!(S3bulkError::ListError {
                            location: root.to_string(),
                            message: e.to_string(),
                        }));
                    }

                    let error = e.to_string();
                    warn!(path = path, error = error, "failed to list local files.");
                    continue;
                }
            };

            if !entry.file_type().is_file() {
                let path = entry.path().to_string_lossy().to_string();
                if !entry.file_type().is_dir() {
                    debug!(path = path, "skip non regular file.");
                }
                continue;
            }

            let mut key = convert_windows_directory_char_to_slash(&entry.path().to_string_lossy());
            if prefix.is_empty() {
                if let Some(stripped) = key.strip_prefix(CURRENT_DIRECTORY_PREFIX) {
                    key = stripped.to_string();
                }
            }

            let object = match self.build_object_info(&entry, &key).await {
                Ok(object) => object,
                Err(e) => {
                    let error = format!("{e:#}");
                    warn!(path = key, error = error, "failed to access file.");
                    continue;
                }
            };

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
        let path = fs_util::key_to_file_path(key);
        let metadata = match tokio::fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).context("tokio::fs::metadata() failed."),
        };

        if !metadata.is_file() {
            return Ok(None);
        }

        let last_modified = DateTime::from(
            metadata
                .modified()
                .context("std::fs::Metadata::modified() failed.")?,
        );
        let e_tag = if self.calculate_e_tag {
            Some(fs_util::compute_md5_hex(&path).await?)
        } else {
            None
        };

        Ok(Some(
            ObjectInfo::new(key, metadata.len(), last_modified).with_e_tag(e_tag),
        ))
    }

    async fn get_object(
        &self,
        key: &str,
        _version_id: Option<String>,
        range: Option<FileRange>,
    ) -> Result<Vec<u8>> {
        let path = fs_util::key_to_file_path(key);
        let mut file = tokio::fs::File::open(&path)
            .await
            .context("tokio::fs::File::open() failed.")?;

        let Some(range) = range else {
            let mut buffer = vec![];
            file.read_to_end(&mut buffer)
                .await
                .context("tokio::io::AsyncReadExt::read_to_end() failed.")?;
            return Ok(buffer);
        };

        file.seek(SeekFrom::Start(range.offset))
            .await
            .context("tokio::io::AsyncSeekExt::seek() failed.")?;
        let mut buffer = vec![0u8; range.size as usize];
        file.read_exact(buffer.as_mut_slice())
            .await
            .context("tokio::io::AsyncReadExt::read_exact() failed.")?;

        Ok(buffer)
    }

    async fn put_object(&self, key: &str, body: Vec<u8>, options: &PutOptions) -> Result<()> {
        if fs_util::check_directory_traversal(key) {
            return Err(anyhow!(S3bulkError::DirectoryTraversalError));
        }

        let real_path = fs_util::key_to_file_path(key);
        if fs_util::is_key_a_directory(key) {
            tokio::fs::create_dir_all(&real_path)
                .await
                .context("tokio::fs::create_dir_all() failed.")?;
            return Ok(());
        }

        let mut temp_file = fs_util::create_temp_file_for(&real_path).await?;
        let mut file = tokio::fs::File::from_std(
            temp_file
                .as_file_mut()
                .try_clone()
                .context("std::fs::File::try_clone() failed.")?,
        );
        file.write_all(&body)
            .await
            .context("tokio::io::AsyncWriteExt::write_all() failed.")?;
        file.flush().await?;
        drop(file);

        temp_file
            .persist(&real_path)
            .context("tempfile::NamedTempFile::persist() failed.")?;

        if let Some(last_modified) = &options.last_modified {
            fs_util::set_last_modified(&real_path, last_modified)
                .context("filetime::set_file_mtime() failed.")?;
        }

        Ok(())
    }

    async fn create_multipart_upload(
        &self,
        key: &str,
        size: u64,
        _options: &PutOptions,
    ) -> Result<String> {
        if fs_util::check_directory_traversal(key) {
            return Err(anyhow!(S3bulkError::DirectoryTraversalError));
        }

        let real_path = fs_util::key_to_file_path(key);
        let temp_file = fs_util::create_temp_file_for(&real_path).await?;
        temp_file
            .as_file()
            .set_len(size)
            .context("std::fs::File::set_len() failed.")?;

        let upload_id = self.next_upload_id.fetch_add(1, Ordering::SeqCst).to_string();
        self.lock_uploads()?.insert(
            upload_id.clone(),
            LocalUpload {
                temp_file,
                real_path,
            },
        );

        trace!(key = key, upload_id = upload_id, "local multipart upload created.");

        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        offset: u64,
        body: Vec<u8>,
    ) -> Result<UploadedPart> {
        let temp_path = self
            .lock_uploads()?
            .get(upload_id)
            .map(|upload| upload.temp_file.path().to_path_buf())
            .ok_or_else(|| anyhow!("local multipart upload {upload_id} not found. key={key}"))?;

        // Each part opens its own handle so that seeks do not interfere.
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .open(&temp_path)
            .await
            .context("tokio::fs::OpenOptions::open() failed.")?;
        file.seek(SeekFrom::Start(offset))
            .await
            .context("tokio::io::AsyncSeekExt::seek() failed.")?;
        file.write_all(&body)
            .await
            .context("tokio::io::AsyncWriteExt::write_all() failed.")?;
        file.flush().await?;

        Ok(UploadedPart {
            part_number,
            e_tag: Some(format!("{:x}", md5::compute(&body))),
        })
    }

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        _parts: Vec<UploadedPart>,
        options: &PutOptions,
    ) -> Result<()> {
        let upload = self
            .lock_uploads()?
            .remove(upload_id)
            .ok_or_else(|| anyhow!("local multipart upload {upload_id} not found. key={key}"))?;

        upload
            .temp_file
            .persist(&upload.real_path)
            .context("tempfile::NamedTempFile::persist() failed.")?;

        if let Some(last_modified) = &options.last_modified {
            fs_util::set_last_modified(&upload.real_path, last_modified)
                .context("filetime::set_file_mtime() failed.")?;
        }

        Ok(())
    }

    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> Result<()> {
        // Dropping the temp file removes the partial output.
        let removed = self.lock_uploads()?.remove(upload_id);
        if removed.is_none() {
            debug!(key = key, upload_id = upload_id, "nothing to abort.");
        }

        Ok(())
    }

    async fn copy_object(
        &self,
        _key: &str,
        _source: &CopySource,
        _options: &PutOptions,
    ) -> Result<()> {
        Err(anyhow!(server_side_copy_unsupported("copy_object")))
    }

    async fn upload_part_copy(
        &self,
        _key: &str,
        _upload_id: &str,
        _part_number: i32,
        _source: &CopySource,
        _range: FileRange,
    ) -> Result<UploadedPart> {
        Err(anyhow!(server_side_copy_unsupported("upload_part_copy")))
    }

    async fn delete_object(&self, key: &str, _version_id: Option<String>) -> Result<()> {
        tokio::fs::remove_file(fs_util::key_to_file_path(key))
            .await
            .context("tokio::fs::remove_file() failed.")?;

        Ok(())
    }
}

fn server_side_copy_unsupported(operation: &str) -> S3bulkError {
    S3bulkError::PermanentApiError {
        operation: operation.to_string(),
        code: "NotImplemented".to_string(),
        message: "local storage has no server-side copy".to_string(),
    }
}
