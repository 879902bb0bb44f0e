//! File watchers with debouncing for vault and settings changes.
//!
//! Uses notify-debouncer-mini for efficient file change detection. The
//! debouncer only reports "something happened at this path", so the vault
//! watcher keeps an mtime per known file to tell creates, modifies and
//! deletes apart, and pairs a delete with a create of the same mtime into a
//! rename.

use anyhow::Result;
use mirror_core::fs::{walk_files, FileSystem};
use mirror_core::pairing::extension;
use mirror_core::VaultEvent;
use notify::RecursiveMode;
use notify_debouncer_mini::{new_debouncer, DebouncedEvent};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, UNIX_EPOCH};
use tokio::sync::mpsc;
use tracing::{debug, error};

/// Debounce period for both watchers.
const DEBOUNCE: Duration = Duration::from_millis(200);

/// Last seen mtime (ms) of every known file, keyed by vault-relative path.
pub type MtimeCache = HashMap<String, u64>;

/// What the watcher found at a path after a debounced event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observed {
    /// A regular file with this mtime
    Present { path: String, mtime: u64 },
    /// Nothing there anymore
    Missing { path: String },
}

/// Turn one debounced batch into vault events, updating `known`.
///
/// - An unchanged mtime is a spurious event and is dropped
/// - A missing path that was never known (temp files) is dropped
/// - A delete and a create with the same extension and mtime become a rename
pub fn reconcile_batch(batch: Vec<Observed>, known: &mut MtimeCache) -> Vec<VaultEvent> {
    let mut created: Vec<(String, u64)> = Vec::new();
    let mut deleted: Vec<(String, u64)> = Vec::new();
    let mut modified: Vec<String> = Vec::new();

    for observed in batch {
        match observed {
            Observed::Present { path, mtime } => match known.insert(path.clone(), mtime) {
                Some(previous) if previous == mtime => {}
                Some(_) => modified.push(path),
                None => created.push((path, mtime)),
            },
            Observed::Missing { path } => {
                if let Some(mtime) = known.remove(&path) {
                    deleted.push((path, mtime));
                }
            }
        }
    }

    let mut events = Vec::new();
    for (old_path, mtime) in deleted {
        let partner = created.iter().position(|(path, created_mtime)| {
            *created_mtime == mtime && extension(path) == extension(&old_path)
        });
        match partner {
            Some(index) => {
                let (path, _) = created.remove(index);
                events.push(VaultEvent::Renamed { path, old_path });
            }
            None => events.push(VaultEvent::Deleted { path: old_path }),
        }
    }
    events.extend(
        created
            .into_iter()
            .map(|(path, _)| VaultEvent::Created { path }),
    );
    events.extend(modified.into_iter().map(|path| VaultEvent::Modified { path }));
    events
}

/// Record the current mtime of every file in the vault, so the watcher can
/// tell the first change of an existing file from a create.
pub async fn scan_mtimes<F: FileSystem + ?Sized>(fs: &F) -> mirror_core::fs::Result<MtimeCache> {
    let mut cache = MtimeCache::new();
    for path in walk_files(fs).await? {
        let stat = fs.stat(&path).await?;
        cache.insert(path, stat.mtime_millis);
    }
    Ok(cache)
}

/// Vault-relative `/`-separated path, or None for paths outside the vault
/// or inside hidden folders (.obsidian, .trash, .git).
fn relative_path(path: &Path, vault_path: &Path) -> Option<String> {
    let relative = path.strip_prefix(vault_path).ok()?;
    let relative = relative.to_str()?.replace('\\', "/");
    if relative.is_empty() || relative.split('/').any(|segment| segment.starts_with('.')) {
        return None;
    }
    Some(relative)
}

fn observe(path: &Path, relative: String) -> Option<Observed> {
    match std::fs::metadata(path) {
        // Folders raise no events of their own
        Ok(metadata) if metadata.is_dir() => None,
        Ok(metadata) => {
            let mtime = metadata
                .modified()
                .ok()?
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0);
            Some(Observed::Present {
                path: relative,
                mtime,
            })
        }
        Err(_) => Some(Observed::Missing { path: relative }),
    }
}

/// File watcher that monitors the vault directory.
pub struct FileWatcher {
    /// Vault base path
    vault_path: PathBuf,
    /// Debouncer handle (must keep alive)
    _debouncer: notify_debouncer_mini::Debouncer<notify::RecommendedWatcher>,
    /// Receiver for vault events
    event_rx: mpsc::UnboundedReceiver<VaultEvent>,
}

impl FileWatcher {
    /// Create a new file watcher for the vault, starting from the mtimes in
    /// `known` (see `scan_mtimes`).
    pub fn new(vault_path: PathBuf, known: MtimeCache) -> Result<Self> {
        // Canonicalize the path to resolve symlinks. On macOS, /var/folders/...
        // is actually /private/var/folders/..., and FSEvents needs the real path.
        let vault_path = vault_path.canonicalize().unwrap_or(vault_path);

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let vault_path_clone = vault_path.clone();
        let mtime_cache = Arc::new(Mutex::new(known));

        let mut debouncer = new_debouncer(
            DEBOUNCE,
            move |result: Result<Vec<DebouncedEvent>, notify::Error>| match result {
                Ok(events) => {
                    let batch: Vec<Observed> = events
                        .iter()
                        .filter_map(|event| {
                            let relative = relative_path(&event.path, &vault_path_clone)?;
                            observe(&event.path, relative)
                        })
                        .collect();

                    let vault_events = {
                        let mut cache = mtime_cache.lock().unwrap_or_else(|e| e.into_inner());
                        reconcile_batch(batch, &mut cache)
                    };

                    for event in vault_events {
                        debug!("File event: {:?}", event);
                        if event_tx.send(event).is_err() {
                            // Receiver dropped
                            return;
                        }
                    }
                }
                Err(e) => {
                    error!("File watcher error: {}", e);
                }
            },
        )?;

        debouncer
            .watcher()
            .watch(&vault_path, RecursiveMode::Recursive)?;

        Ok(Self {
            vault_path,
            _debouncer: debouncer,
            event_rx,
        })
    }

    /// Get the receiver for vault events.
    pub fn event_rx(&mut self) -> &mut mpsc::UnboundedReceiver<VaultEvent> {
        &mut self.event_rx
    }

    /// Get the vault path.
    pub fn vault_path(&self) -> &Path {
        &self.vault_path
    }
}

/// Watches the settings file and signals every change to it.
pub struct SettingsWatcher {
    _debouncer: notify_debouncer_mini::Debouncer<notify::RecommendedWatcher>,
    changed_rx: mpsc::UnboundedReceiver<()>,
}

impl SettingsWatcher {
    /// Watch `settings_path`. Its folder must exist; the file itself may
    /// appear later.
    pub fn new(settings_path: PathBuf) -> Result<Self> {
        let folder = settings_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let folder = folder.canonicalize().unwrap_or(folder);
        let file_name = settings_path.file_name().map(|name| name.to_os_string());

        let (changed_tx, changed_rx) = mpsc::unbounded_channel();
        let mut debouncer = new_debouncer(
            DEBOUNCE,
            move |result: Result<Vec<DebouncedEvent>, notify::Error>| match result {
                Ok(events) => {
                    let touched = events
                        .iter()
                        .any(|event| event.path.file_name() == file_name.as_deref());
                    if touched {
                        let _ = changed_tx.send(());
                    }
                }
                Err(e) => {
                    error!("Settings watcher error: {}", e);
                }
            },
        )?;

        debouncer
            .watcher()
            .watch(&folder, RecursiveMode::NonRecursive)?;

        Ok(Self {
            _debouncer: debouncer,
            changed_rx,
        })
    }

    /// Get the receiver for change signals.
    pub fn changed_rx(&mut self) -> &mut mpsc::UnboundedReceiver<()> {
        &mut self.changed_rx
    }
}
