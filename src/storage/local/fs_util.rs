use std::path::{MAIN_SEPARATOR_STR, Path, PathBuf};

use anyhow::{Context, Result};
use aws_sdk_s3::primitives::DateTime;
use filetime::{FileTime, set_file_mtime};
use tempfile::NamedTempFile;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tracing::trace;

const PARENT_DIRECTORY: &str = "..";
const MD5_READ_BUFFER_SIZE: usize = 64 * 1024;

/// True when any segment of `key` is `..`.
pub fn check_directory_traversal(key: &str) -> bool {
    key.split(['/', '\\'])
        .any(|segment| segment == PARENT_DIRECTORY)
}

pub fn key_to_file_path(key: &str) -> PathBuf {
    PathBuf::from(key.replace('/', MAIN_SEPARATOR_STR))
}

pub fn is_key_a_directory(key: &str) -> bool {
    if cfg!(windows) && key.ends_with('\\') {
        return true;
    }

    key.ends_with('/')
}

/// Creates a temp file next to where `path` will be persisted, creating
/// the parent directories on the way.
pub async fn create_temp_file_for(path: &Path) -> Result<NamedTempFile> {
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };

    if !directory.try_exists().unwrap_or(false) {
        tokio::fs::create_dir_all(&directory)
            .await
            .context("tokio::fs::create_dir_all() failed.")?;

        let directory = directory.to_string_lossy().to_string();
        trace!(directory = directory, "directory created.");
    }

    NamedTempFile::new_in(&directory).context("NamedTempFile::new_in failed.")
}

pub fn set_last_modified(path: &Path, last_modified: &DateTime) -> std::io::Result<()> {
    set_file_mtime(
        path,
        FileTime::from_unix_time(last_modified.secs(), last_modified.subsec_nanos()),
    )
}

/// Lowercase hex MD5 of a whole file, read in chunks.
pub async fn compute_md5_hex(path: &Path) -> Result<String> {
    let mut file = File::open(path)
        .await
        .context("tokio::fs::File::open() failed.")?;

    let mut context = md5::Context::new();
    let mut buffer = vec![0u8; MD5_READ_BUFFER_SIZE];
    loop {
        let read = file
            .read(&mut buffer)
            .await
            .context("tokio::io::AsyncReadExt::read() failed.")?;
        if read == 0 {
            break;
        }
        context.consume(&buffer[..read]);
    }

    Ok(format!("{:x}", context.compute()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::EnvFilter;

    #[test]
    fn check_directory_traversal_test() {
        init_dummy_tracing_subscriber();

        assert!(check_directory_traversal("../etc/passwd"));
        assert!(check_directory_traversal("dir1/dir2/../../etc/passwd"));
        assert!(check_directory_traversal("/xyz/data/../../etc/passwd"));
        assert!(check_directory_traversal("..\\etc\\passwd"));
        assert!(check_directory_traversal("dir1\\dir2\\..\\..\\etc\\passwd"));
        assert!(check_directory_traversal("dir/.."));

        assert!(!check_directory_traversal("dir1/dir2/file"));
        assert!(!check_directory_traversal("dir1/..data/file"));
        assert!(!check_directory_traversal("dir1/data../file"));
        assert!(!check_directory_traversal("./dir1/file"));
    }

    #[test]
    fn is_key_a_directory_test() {
        init_dummy_tracing_subscriber();

        assert!(is_key_a_directory("dir1/"));
        assert!(!is_key_a_directory("dir1/file"));
    }

    #[tokio::test]
    async fn create_temp_file_creates_parents() {
        init_dummy_tracing_subscriber();

        let root = tempfile::tempdir().unwrap();
        let path = root.path().join("a").join("b").join("file.dat");

        let temp_file = create_temp_file_for(&path).await.unwrap();

        assert_eq!(temp_file.path().parent().unwrap(), root.path().join("a/b"));
    }

    #[tokio::test]
    async fn set_and_read_last_modified() {
        init_dummy_tracing_subscriber();

        let root = tempfile::tempdir().unwrap();
        let path = root.path().join("file.dat");
        std::fs::write(&path, b"data").unwrap();

        set_last_modified(&path, &DateTime::from_secs(1_700_000_000)).unwrap();

        let modified = std::fs::metadata(&path).unwrap().modified().unwrap();
        assert_eq!(DateTime::from(modified).secs(), 1_700_000_000);
    }

    #[tokio::test]
    async fn compute_md5_hex_test() {
        init_dummy_tracing_subscriber();

        let root = tempfile::tempdir().unwrap();
        let path = root.path().join("empty.dat");
        std::fs::write(&path, b"").unwrap();
        assert_eq!(
            compute_md5_hex(&path).await.unwrap(),
            "d41d8cd98f00b204e9800998ecf8427e"
        );

        let path = root.path().join("large.dat");
        let data = vec![7u8; MD5_READ_BUFFER_SIZE * 3 + 11];
        std::fs::write(&path, &data).unwrap();
        assert_eq!(
            compute_md5_hex(&path).await.unwrap(),
            format!("{:x}", md5::compute(&data))
        );
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
