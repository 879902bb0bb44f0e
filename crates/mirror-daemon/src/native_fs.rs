//! Native filesystem implementation using tokio::fs.

use async_trait::async_trait;
use mirror_core::fs::{FileEntry, FileStat, FileSystem, FsError, Result};
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Native filesystem implementation for the daemon
pub struct NativeFs {
    base_path: PathBuf,
}

impl NativeFs {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn full_path(&self, path: &str) -> PathBuf {
        if path.is_empty() {
            self.base_path.clone()
        } else {
            self.base_path.join(path)
        }
    }
}

/// Map an io error on `path` to the closest `FsError`.
fn io_error(path: &str, e: std::io::Error) -> FsError {
    match e.kind() {
        ErrorKind::NotFound => FsError::NotFound(path.to_string()),
        ErrorKind::AlreadyExists => FsError::AlreadyExists(path.to_string()),
        ErrorKind::IsADirectory => FsError::IsDirectory(path.to_string()),
        _ => FsError::Io(format!("{}: {}", path, e)),
    }
}

#[async_trait]
impl FileSystem for NativeFs {
    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let full_path = self.full_path(path);
        fs::read(&full_path).await.map_err(|e| io_error(path, e))
    }

    async fn create(&self, path: &str, content: &[u8]) -> Result<()> {
        let full_path = self.full_path(path);

        // create_new fails on an existing file and on a missing parent
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&full_path)
            .await
            .map_err(|e| io_error(path, e))?;
        file.write_all(content)
            .await
            .map_err(|e| io_error(path, e))?;
        file.flush().await.map_err(|e| io_error(path, e))
    }

    async fn modify(&self, path: &str, content: &[u8]) -> Result<()> {
        if !self.is_file(path).await? {
            return Err(FsError::NotFound(path.to_string()));
        }
        let full_path = self.full_path(path);
        fs::write(&full_path, content)
            .await
            .map_err(|e| io_error(path, e))
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        // fs::rename silently replaces an existing target on Unix
        if self.exists(to).await? {
            return Err(FsError::AlreadyExists(to.to_string()));
        }
        fs::rename(self.full_path(from), self.full_path(to))
            .await
            .map_err(|e| io_error(from, e))
    }

    async fn list(&self, path: &str) -> Result<Vec<FileEntry>> {
        let full_path = self.full_path(path);
        let mut entries = Vec::new();

        let mut dir = fs::read_dir(&full_path)
            .await
            .map_err(|e| io_error(path, e))?;

        while let Some(entry) = dir.next_entry().await.map_err(|e| io_error(path, e))? {
            let name = entry.file_name().to_string_lossy().to_string();
            let metadata = entry.metadata().await.map_err(|e| io_error(path, e))?;

            entries.push(FileEntry {
                name,
                is_dir: metadata.is_dir(),
            });
        }

        Ok(entries)
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let full_path = self.full_path(path);
        let metadata = fs::metadata(&full_path)
            .await
            .map_err(|e| io_error(path, e))?;

        if metadata.is_dir() {
            fs::remove_dir(&full_path)
                .await
                .map_err(|e| io_error(path, e))
        } else {
            fs::remove_file(&full_path)
                .await
                .map_err(|e| io_error(path, e))
        }
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let full_path = self.full_path(path);
        fs::try_exists(&full_path)
            .await
            .map_err(|e| io_error(path, e))
    }

    async fn stat(&self, path: &str) -> Result<FileStat> {
        let full_path = self.full_path(path);
        let metadata = fs::metadata(&full_path)
            .await
            .map_err(|e| io_error(path, e))?;

        let mtime_millis = metadata
            .modified()
            .map(|t| {
                t.duration_since(std::time::UNIX_EPOCH)
                    .map(|d| d.as_millis() as u64)
                    .unwrap_or(0)
            })
            .unwrap_or(0);

        Ok(FileStat {
            mtime_millis,
            size: metadata.len(),
            is_dir: metadata.is_dir(),
        })
    }

    async fn mkdir(&self, path: &str) -> Result<()> {
        if self.is_file(path).await? {
            return Err(FsError::NotDirectory(path.to_string()));
        }
        let full_path = self.full_path(path);
        fs::create_dir_all(&full_path)
            .await
            .map_err(|e| io_error(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn native() -> (TempDir, NativeFs) {
        let dir = TempDir::new().unwrap();
        let fs = NativeFs::new(dir.path().to_path_buf());
        (dir, fs)
    }

    #[tokio::test]
    async fn test_create_rejects_existing_and_missing_parent() {
        let (_dir, fs) = native();

        fs.create("a.md", b"one").await.unwrap();
        assert!(matches!(
            fs.create("a.md", b"two").await,
            Err(FsError::AlreadyExists(_))
        ));
        assert!(matches!(
            fs.create("missing/b.md", b"x").await,
            Err(FsError::NotFound(_))
        ));
        assert_eq!(fs.read("a.md").await.unwrap(), b"one");
    }

    #[tokio::test]
    async fn test_modify_requires_existing_file() {
        let (_dir, fs) = native();

        assert!(matches!(
            fs.modify("a.md", b"x").await,
            Err(FsError::NotFound(_))
        ));
        fs.create("a.md", b"x").await.unwrap();
        fs.modify("a.md", b"y").await.unwrap();
        assert_eq!(fs.read("a.md").await.unwrap(), b"y");
    }

    #[tokio::test]
    async fn test_rename_never_overwrites() {
        let (_dir, fs) = native();
        fs.create("a.md", b"a").await.unwrap();
        fs.create("b.md", b"b").await.unwrap();

        assert!(matches!(
            fs.rename("a.md", "b.md").await,
            Err(FsError::AlreadyExists(_))
        ));
        assert_eq!(fs.read("b.md").await.unwrap(), b"b");

        fs.rename("a.md", "c.md").await.unwrap();
        assert!(!fs.exists("a.md").await.unwrap());
        assert!(fs.is_file("c.md").await.unwrap());
    }

    #[tokio::test]
    async fn test_mkdir_over_file_fails() {
        let (_dir, fs) = native();
        fs.create("a", b"").await.unwrap();

        assert!(matches!(fs.mkdir("a").await, Err(FsError::NotDirectory(_))));
        fs.mkdir("x/y").await.unwrap();
        assert!(fs.is_dir("x/y").await.unwrap());
    }

    #[tokio::test]
    async fn test_read_directory_fails() {
        let (_dir, fs) = native();
        fs.mkdir("folder").await.unwrap();

        assert!(matches!(fs.read("folder").await, Err(FsError::IsDirectory(_))));
    }
}
