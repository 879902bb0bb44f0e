//! FileSystem trait abstraction for the host vault.
//!
//! Implementations:
//! - `InMemoryFs` - For testing; records every mutation and queues the host
//!   event it would raise
//! - `NativeFs` (in mirror-daemon) - Uses tokio::fs
//!
//! All paths are vault-relative and `/`-separated.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::RwLock;
use thiserror::Error;

use crate::events::VaultEvent;

#[derive(Debug, Error)]
pub enum FsError {
    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Is a directory: {0}")]
    IsDirectory(String),

    #[error("Not a directory: {0}")]
    NotDirectory(String),

    #[error("IO error: {0}")]
    Io(String),
}

pub type Result<T> = std::result::Result<T, FsError>;

/// File metadata
#[derive(Debug, Clone)]
pub struct FileStat {
    /// Modification time in milliseconds since epoch
    pub mtime_millis: u64,
    /// File size in bytes
    pub size: u64,
    /// Whether this is a directory
    pub is_dir: bool,
}

/// Directory entry
#[derive(Debug, Clone)]
pub struct FileEntry {
    /// File or directory name (not full path)
    pub name: String,
    /// Whether this is a directory
    pub is_dir: bool,
}

/// Vault filesystem as seen by the mirror engine.
///
/// Unlike a plain write, `create` and `modify` are distinct so that the host
/// can raise the matching event, and `rename` keeps the file's identity.
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Read file contents
    async fn read(&self, path: &str) -> Result<Vec<u8>>;

    /// Create a new file. Fails if it exists or the parent folder is missing.
    async fn create(&self, path: &str, content: &[u8]) -> Result<()>;

    /// Replace the contents of an existing file.
    async fn modify(&self, path: &str, content: &[u8]) -> Result<()>;

    /// Move a file. Fails if `to` exists or its parent folder is missing.
    async fn rename(&self, from: &str, to: &str) -> Result<()>;

    /// List directory contents
    async fn list(&self, path: &str) -> Result<Vec<FileEntry>>;

    /// Delete file or empty directory
    async fn delete(&self, path: &str) -> Result<()>;

    /// Check if path exists
    async fn exists(&self, path: &str) -> Result<bool>;

    /// Get file metadata
    async fn stat(&self, path: &str) -> Result<FileStat>;

    /// Create directory (and parents if needed)
    async fn mkdir(&self, path: &str) -> Result<()>;

    /// True if `path` is an existing regular file.
    async fn is_file(&self, path: &str) -> Result<bool> {
        match self.stat(path).await {
            Ok(stat) => Ok(!stat.is_dir),
            Err(FsError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// True if `path` is an existing folder. The vault root always is.
    async fn is_dir(&self, path: &str) -> Result<bool> {
        if path.is_empty() {
            return Ok(true);
        }
        match self.stat(path).await {
            Ok(stat) => Ok(stat.is_dir),
            Err(FsError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Parent folder of a vault path, `""` for files at the root.
pub fn parent_folder(path: &str) -> &str {
    path.rsplit_once('/').map_or("", |(parent, _)| parent)
}

/// Recursively list every file in the vault, skipping hidden entries
/// (`.obsidian`, `.trash`, ...).
pub async fn walk_files<F: FileSystem + ?Sized>(fs: &F) -> Result<Vec<String>> {
    let mut files = Vec::new();
    let mut dirs_to_visit = vec![String::new()];

    while let Some(dir) = dirs_to_visit.pop() {
        for entry in fs.list(&dir).await? {
            if entry.name.starts_with('.') {
                continue;
            }
            let path = if dir.is_empty() {
                entry.name.clone()
            } else {
                format!("{}/{}", dir, entry.name)
            };

            if entry.is_dir {
                dirs_to_visit.push(path);
            } else {
                files.push(path);
            }
        }
    }

    files.sort();
    Ok(files)
}

/// A mutation recorded by `InMemoryFs`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsOp {
    Create(String),
    Modify(String),
    Rename { from: String, to: String },
    Delete(String),
    Mkdir(String),
}

impl FsOp {
    /// True if the operation touches `path` (either side of a rename).
    pub fn touches(&self, path: &str) -> bool {
        match self {
            FsOp::Create(p) | FsOp::Modify(p) | FsOp::Delete(p) | FsOp::Mkdir(p) => p == path,
            FsOp::Rename { from, to } => from == path || to == path,
        }
    }
}

/// In-memory filesystem for testing
pub struct InMemoryFs {
    files: RwLock<HashMap<String, Vec<u8>>>,
    dirs: RwLock<HashSet<String>>,
    /// Tracks file modification times (path -> mtime in ms)
    mtimes: RwLock<HashMap<String, u64>>,
    /// Every mutation, in order
    journal: RwLock<Vec<FsOp>>,
    /// Host events raised by mutations, not yet delivered
    pending_events: RwLock<VecDeque<VaultEvent>>,
}

impl InMemoryFs {
    pub fn new() -> Self {
        let mut dirs = HashSet::new();
        dirs.insert(String::new()); // Root directory
        Self {
            files: RwLock::new(HashMap::new()),
            dirs: RwLock::new(dirs),
            mtimes: RwLock::new(HashMap::new()),
            journal: RwLock::new(Vec::new()),
            pending_events: RwLock::new(VecDeque::new()),
        }
    }

    /// Seed a file (creating parent folders) without journaling or raising
    /// events, as if it existed before the engine started.
    pub fn seed(&self, path: &str, content: &[u8]) {
        let path = Self::normalize_path(path);
        self.insert_dirs(Self::parent_path(&path).unwrap_or_default());
        self.files.write().unwrap().insert(path.clone(), content.to_vec());
        self.mtimes
            .write()
            .unwrap()
            .insert(path, Self::current_time_ms());
    }

    /// Set a specific mtime for testing "latest wins" scenarios
    pub fn set_mtime(&self, path: &str, mtime: u64) {
        let path = Self::normalize_path(path);
        let mut mtimes = self.mtimes.write().unwrap();
        mtimes.insert(path, mtime);
    }

    /// Snapshot of the mutation journal.
    pub fn journal(&self) -> Vec<FsOp> {
        self.journal.read().unwrap().clone()
    }

    /// Clear the mutation journal.
    pub fn clear_journal(&self) {
        self.journal.write().unwrap().clear();
    }

    /// Take the next host event raised by a mutation.
    pub fn next_event(&self) -> Option<VaultEvent> {
        self.pending_events.write().unwrap().pop_front()
    }

    /// Read a file as UTF-8, for assertions.
    pub fn read_string(&self, path: &str) -> Option<String> {
        let path = Self::normalize_path(path);
        self.files
            .read()
            .unwrap()
            .get(&path)
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }

    /// Get current time in milliseconds
    fn current_time_ms() -> u64 {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    fn normalize_path(path: &str) -> String {
        path.trim_matches('/').to_string()
    }

    fn parent_path(path: &str) -> Option<String> {
        let normalized = Self::normalize_path(path);
        if normalized.is_empty() {
            None
        } else {
            Some(parent_folder(&normalized).to_string())
        }
    }

    fn insert_dirs(&self, path: String) {
        let mut dirs = self.dirs.write().unwrap();
        let mut current = path;
        while !current.is_empty() && dirs.insert(current.clone()) {
            current = parent_folder(&current).to_string();
        }
    }

    fn record(&self, op: FsOp, event: Option<VaultEvent>) {
        self.journal.write().unwrap().push(op);
        if let Some(event) = event {
            self.pending_events.write().unwrap().push_back(event);
        }
    }

    fn require_parent(&self, path: &str) -> Result<()> {
        let parent = Self::parent_path(path).unwrap_or_default();
        if self.dirs.read().unwrap().contains(&parent) {
            Ok(())
        } else {
            Err(FsError::NotFound(parent))
        }
    }
}

impl Default for InMemoryFs {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FileSystem for InMemoryFs {
    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let path = Self::normalize_path(path);
        if self.dirs.read().unwrap().contains(&path) {
            return Err(FsError::IsDirectory(path));
        }
        let files = self.files.read().unwrap();
        files
            .get(&path)
            .cloned()
            .ok_or_else(|| FsError::NotFound(path))
    }

    async fn create(&self, path: &str, content: &[u8]) -> Result<()> {
        let path = Self::normalize_path(path);
        if self.exists(&path).await? {
            return Err(FsError::AlreadyExists(path));
        }
        self.require_parent(&path)?;

        self.files
            .write()
            .unwrap()
            .insert(path.clone(), content.to_vec());
        self.set_mtime(&path, Self::current_time_ms());
        self.record(
            FsOp::Create(path.clone()),
            Some(VaultEvent::Created { path }),
        );
        Ok(())
    }

    async fn modify(&self, path: &str, content: &[u8]) -> Result<()> {
        let path = Self::normalize_path(path);
        {
            let mut files = self.files.write().unwrap();
            let Some(existing) = files.get_mut(&path) else {
                return Err(FsError::NotFound(path));
            };
            *existing = content.to_vec();
        }
        self.set_mtime(&path, Self::current_time_ms());
        self.record(
            FsOp::Modify(path.clone()),
            Some(VaultEvent::Modified { path }),
        );
        Ok(())
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        let from = Self::normalize_path(from);
        let to = Self::normalize_path(to);
        if self.exists(&to).await? {
            return Err(FsError::AlreadyExists(to));
        }
        self.require_parent(&to)?;

        {
            let mut files = self.files.write().unwrap();
            let content = files
                .remove(&from)
                .ok_or_else(|| FsError::NotFound(from.clone()))?;
            files.insert(to.clone(), content);
        }
        {
            let mut mtimes = self.mtimes.write().unwrap();
            if let Some(mtime) = mtimes.remove(&from) {
                mtimes.insert(to.clone(), mtime);
            }
        }
        self.record(
            FsOp::Rename {
                from: from.clone(),
                to: to.clone(),
            },
            Some(VaultEvent::Renamed {
                path: to,
                old_path: from,
            }),
        );
        Ok(())
    }

    async fn list(&self, path: &str) -> Result<Vec<FileEntry>> {
        let path = Self::normalize_path(path);
        let prefix = if path.is_empty() {
            String::new()
        } else {
            format!("{}/", path)
        };

        let dirs = self.dirs.read().unwrap();
        if !dirs.contains(&path) {
            return Err(FsError::NotFound(path));
        }

        let mut entries = Vec::new();
        let files = self.files.read().unwrap();
        for file_path in files.keys() {
            if let Some(rest) = file_path.strip_prefix(&prefix) {
                if !rest.contains('/') {
                    entries.push(FileEntry {
                        name: rest.to_string(),
                        is_dir: false,
                    });
                }
            }
        }

        for dir_path in dirs.iter() {
            if let Some(rest) = dir_path.strip_prefix(&prefix) {
                if !rest.is_empty() && !rest.contains('/') {
                    entries.push(FileEntry {
                        name: rest.to_string(),
                        is_dir: true,
                    });
                }
            }
        }

        Ok(entries)
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let path = Self::normalize_path(path);

        // Try to delete as file first
        let removed = self.files.write().unwrap().remove(&path).is_some();
        if removed {
            self.mtimes.write().unwrap().remove(&path);
            self.record(
                FsOp::Delete(path.clone()),
                Some(VaultEvent::Deleted { path }),
            );
            return Ok(());
        }

        // Then as an empty directory
        let prefix = format!("{}/", path);
        let has_children = self
            .files
            .read()
            .unwrap()
            .keys()
            .chain(self.dirs.read().unwrap().iter())
            .any(|p| p.starts_with(&prefix));
        if has_children {
            return Err(FsError::Io(format!("Directory not empty: {}", path)));
        }
        if !path.is_empty() && self.dirs.write().unwrap().remove(&path) {
            self.record(FsOp::Delete(path), None);
            return Ok(());
        }

        Err(FsError::NotFound(path))
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let path = Self::normalize_path(path);
        let files = self.files.read().unwrap();
        let dirs = self.dirs.read().unwrap();
        Ok(files.contains_key(&path) || dirs.contains(&path))
    }

    async fn stat(&self, path: &str) -> Result<FileStat> {
        let path = Self::normalize_path(path);

        let files = self.files.read().unwrap();
        if let Some(content) = files.get(&path) {
            let mtimes = self.mtimes.read().unwrap();
            let mtime = mtimes.get(&path).copied().unwrap_or(0);
            return Ok(FileStat {
                mtime_millis: mtime,
                size: content.len() as u64,
                is_dir: false,
            });
        }

        let dirs = self.dirs.read().unwrap();
        if dirs.contains(&path) {
            return Ok(FileStat {
                mtime_millis: 0,
                size: 0,
                is_dir: true,
            });
        }

        Err(FsError::NotFound(path))
    }

    async fn mkdir(&self, path: &str) -> Result<()> {
        let path = Self::normalize_path(path);
        if path.is_empty() {
            return Ok(()); // Root always exists
        }
        if self.files.read().unwrap().contains_key(&path) {
            return Err(FsError::NotDirectory(path));
        }
        if self.dirs.read().unwrap().contains(&path) {
            return Ok(());
        }

        self.insert_dirs(path.clone());
        self.record(FsOp::Mkdir(path), None);
        Ok(())
    }
}

// Implement FileSystem for Arc<T> where T: FileSystem
// This lets tests keep a handle on the filesystem the engine owns
#[async_trait]
impl<T: FileSystem + ?Sized> FileSystem for std::sync::Arc<T> {
    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        (**self).read(path).await
    }

    async fn create(&self, path: &str, content: &[u8]) -> Result<()> {
        (**self).create(path, content).await
    }

    async fn modify(&self, path: &str, content: &[u8]) -> Result<()> {
        (**self).modify(path, content).await
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        (**self).rename(from, to).await
    }

    async fn list(&self, path: &str) -> Result<Vec<FileEntry>> {
        (**self).list(path).await
    }

    async fn delete(&self, path: &str) -> Result<()> {
        (**self).delete(path).await
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        (**self).exists(path).await
    }

    async fn stat(&self, path: &str) -> Result<FileStat> {
        (**self).stat(path).await
    }

    async fn mkdir(&self, path: &str) -> Result<()> {
        (**self).mkdir(path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_inmemory_fs_basic_operations() {
        let fs = InMemoryFs::new();

        fs.create("test.txt", b"hello world").await.unwrap();
        assert_eq!(fs.read("test.txt").await.unwrap(), b"hello world");

        fs.modify("test.txt", b"changed").await.unwrap();
        assert_eq!(fs.read_string("test.txt").as_deref(), Some("changed"));

        assert!(fs.is_file("test.txt").await.unwrap());
        assert!(!fs.exists("nonexistent.txt").await.unwrap());

        fs.delete("test.txt").await.unwrap();
        assert!(!fs.exists("test.txt").await.unwrap());

        assert_eq!(
            fs.journal(),
            vec![
                FsOp::Create("test.txt".into()),
                FsOp::Modify("test.txt".into()),
                FsOp::Delete("test.txt".into()),
            ]
        );
    }

    #[tokio::test]
    async fn test_create_requires_parent_and_rejects_existing() {
        let fs = InMemoryFs::new();

        assert!(matches!(
            fs.create("a/b.txt", b"x").await,
            Err(FsError::NotFound(_))
        ));

        fs.mkdir("a").await.unwrap();
        fs.create("a/b.txt", b"x").await.unwrap();
        assert!(matches!(
            fs.create("a/b.txt", b"y").await,
            Err(FsError::AlreadyExists(_))
        ));
        assert!(matches!(
            fs.modify("a/missing.txt", b"y").await,
            Err(FsError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_rename_keeps_content_and_mtime() {
        let fs = InMemoryFs::new();
        fs.seed("old/a.md", b"body");
        fs.set_mtime("old/a.md", 42);
        fs.mkdir("new").await.unwrap();

        fs.rename("old/a.md", "new/b.md").await.unwrap();

        assert!(!fs.exists("old/a.md").await.unwrap());
        assert_eq!(fs.read_string("new/b.md").as_deref(), Some("body"));
        assert_eq!(fs.stat("new/b.md").await.unwrap().mtime_millis, 42);
    }

    #[tokio::test]
    async fn test_mutations_queue_host_events() {
        let fs = InMemoryFs::new();
        fs.create("a.md", b"1").await.unwrap();
        fs.rename("a.md", "b.md").await.unwrap();
        fs.mkdir("folder").await.unwrap();

        assert_eq!(fs.next_event(), Some(VaultEvent::Created { path: "a.md".into() }));
        assert_eq!(
            fs.next_event(),
            Some(VaultEvent::Renamed {
                path: "b.md".into(),
                old_path: "a.md".into()
            })
        );
        assert_eq!(fs.next_event(), None);
    }

    #[tokio::test]
    async fn test_inmemory_fs_directories() {
        let fs = InMemoryFs::new();
        fs.mkdir("a/b").await.unwrap();
        fs.create("a/b/c.txt", b"content").await.unwrap();

        assert!(fs.is_dir("a").await.unwrap());
        assert!(fs.is_dir("a/b").await.unwrap());

        let entries = fs.list("a").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "b");
        assert!(entries[0].is_dir);

        assert!(fs.delete("a/b").await.is_err());
        assert!(matches!(fs.read("a/b").await, Err(FsError::IsDirectory(_))));
    }

    #[tokio::test]
    async fn test_walk_files_skips_hidden() {
        let fs = InMemoryFs::new();
        fs.seed("a.md", b"");
        fs.seed("x/y/z.excalidraw", b"");
        fs.seed(".obsidian/workspace.json", b"");

        let files = walk_files(&fs).await.unwrap();
        assert_eq!(files, vec!["a.md".to_string(), "x/y/z.excalidraw".to_string()]);
    }
}
