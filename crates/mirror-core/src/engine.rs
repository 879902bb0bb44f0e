//! MirrorEngine: keeps each drawing and its mirror identical.
//!
//! The host feeds every vault event to `handle`. For each event the engine:
//!
//! 1. Updates the transclusion index
//! 2. Swallows the event if it was caused by one of its own writes
//! 3. Classifies the path (`Primary | Mirror | Unrelated`)
//! 4. Performs at most one operation on the counterpart, marking the
//!    counterpart in the `EchoSuppressor` before touching it
//!
//! Export siblings (`.svg`/`.png`) and open views follow renames and deletes
//! of their drawing independently of the mirror step.

use crate::events::{now_millis, EventBus, MirrorEvent, VaultEvent};
use crate::fs::{parent_folder, walk_files, FileSystem, FsError};
use crate::pairing::{
    export_siblings, extension, is_drawing, FileClass, PathPairing, MIRROR_EXTENSION,
};
use crate::settings::{Settings, SettingsHandle};
use crate::suppression::EchoSuppressor;
use crate::transclusion::TransclusionIndex;
use crate::views::{locate_views, NoViews, ViewError, ViewHost};

use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("Filesystem error: {0}")]
    Fs(#[from] FsError),

    #[error("View error: {0}")]
    View(#[from] ViewError),
}

pub type Result<T> = std::result::Result<T, MirrorError>;

/// A pair copied by `initiate_sync`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirroredPair {
    pub source: String,
    pub target: String,
}

/// Report from a bulk reconciliation
#[derive(Debug, Default)]
pub struct SyncReport {
    /// Pairs whose target was created or overwritten
    pub mirrored: Vec<MirroredPair>,
    /// Files chosen to propagate whose counterpart was already identical
    pub unchanged: Vec<String>,
    /// Files whose counterpart was newer (or the primary, on a tie)
    pub skipped: Vec<String>,
}

impl SyncReport {
    /// Check if any file was written
    pub fn has_changes(&self) -> bool {
        !self.mirrored.is_empty()
    }
}

pub struct MirrorEngine<F: FileSystem, V: ViewHost = NoViews> {
    fs: F,
    views: V,
    settings: SettingsHandle,
    suppressor: EchoSuppressor,
    index: TransclusionIndex,
    events: Arc<EventBus>,
}

impl<F: FileSystem> MirrorEngine<F> {
    /// Headless engine: no views to refresh.
    pub fn new(fs: F, settings: SettingsHandle) -> Self {
        Self {
            fs,
            views: NoViews,
            settings,
            suppressor: EchoSuppressor::new(),
            index: TransclusionIndex::new(),
            events: Arc::new(EventBus::new()),
        }
    }
}

impl<F: FileSystem, V: ViewHost> MirrorEngine<F, V> {
    /// Replace the view host.
    pub fn with_views<W: ViewHost>(self, views: W) -> MirrorEngine<F, W> {
        MirrorEngine {
            fs: self.fs,
            views,
            settings: self.settings,
            suppressor: self.suppressor,
            index: self.index,
            events: self.events,
        }
    }

    /// Replace the echo suppressor (e.g. one with a custom TTL).
    pub fn with_suppressor(mut self, suppressor: EchoSuppressor) -> Self {
        self.suppressor = suppressor;
        self
    }

    pub fn fs(&self) -> &F {
        &self.fs
    }

    pub fn views(&self) -> &V {
        &self.views
    }

    pub fn suppressor(&self) -> &EchoSuppressor {
        &self.suppressor
    }

    pub fn index(&self) -> &TransclusionIndex {
        &self.index
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Build the transclusion index from the vault, skipping the mirror
    /// folder.
    pub async fn initialize_index(&mut self) -> Result<()> {
        let pairing = PathPairing::new(&self.settings.current().mirror_folder);
        let excluded = pairing.as_ref().map(PathPairing::mirror_folder);
        self.index.initialize(&self.fs, excluded).await?;
        Ok(())
    }

    /// Dispatch a host event.
    pub async fn handle(&mut self, event: &VaultEvent) -> Result<()> {
        match event {
            VaultEvent::Created { path } | VaultEvent::Modified { path } => {
                self.on_create_or_modify(path).await
            }
            VaultEvent::Renamed { path, old_path } => self.on_rename(path, old_path).await,
            VaultEvent::Deleted { path } => self.on_delete(path).await,
        }
    }

    /// Handle a created or modified file.
    pub async fn on_create_or_modify(&mut self, path: &str) -> Result<()> {
        let settings = self.settings.current();
        let pairing = Self::pairing(&settings);

        self.track(path, pairing.as_ref()).await?;

        if !settings.sync_enabled {
            return Ok(());
        }
        if self.consume_echo(path) {
            return Ok(());
        }
        let Some(pairing) = pairing else {
            return Ok(());
        };

        match pairing.classify(path) {
            FileClass::Primary { mirror } => {
                self.sync_copy(path, &mirror).await?;
            }
            FileClass::Mirror { primary } => {
                if let Some(content) = self.sync_copy(path, &primary).await? {
                    self.refresh_views(&primary, &[primary.as_str()], &content)
                        .await?;
                }
            }
            FileClass::Unrelated => {}
        }
        Ok(())
    }

    /// Handle a file moved from `old_path` to `path`.
    pub async fn on_rename(&mut self, path: &str, old_path: &str) -> Result<()> {
        let settings = self.settings.current();
        let pairing = Self::pairing(&settings);

        self.index.update_transclusion(old_path, path);

        // An echo of our own rename skips only the mirror step. The exports
        // still follow a primary renamed on behalf of its mirror, since the
        // mirror rename never moves them (see DESIGN.md, open questions).
        if !self.consume_echo(path) && settings.sync_enabled {
            if let Some(pairing) = &pairing {
                self.mirror_rename(pairing, path, old_path).await?;
            }
        }

        if settings.keep_export_in_sync
            && Self::is_primary(pairing.as_ref(), old_path)
            && Self::is_primary(pairing.as_ref(), path)
        {
            self.rename_exports(old_path, path).await?;
        }
        Ok(())
    }

    /// Handle a deleted file.
    pub async fn on_delete(&mut self, path: &str) -> Result<()> {
        let settings = self.settings.current();
        let pairing = Self::pairing(&settings);

        self.index.forget_file(path);

        let was_primary = Self::is_primary(pairing.as_ref(), path);
        if was_primary {
            self.close_views(path).await?;
        }

        if settings.sync_enabled && !self.consume_echo(path) {
            let class = pairing
                .as_ref()
                .map_or(FileClass::Unrelated, |p| p.classify(path));
            match class {
                FileClass::Primary { mirror } => self.delete_counterpart(&mirror).await?,
                FileClass::Mirror { primary } => {
                    if self.fs.is_file(&primary).await? {
                        self.close_views(&primary).await?;
                    }
                    self.delete_counterpart(&primary).await?;
                }
                FileClass::Unrelated => {}
            }
        }

        if settings.keep_export_in_sync && was_primary {
            self.delete_exports(path).await?;
        }
        Ok(())
    }

    /// Reconcile every pairing in the vault.
    ///
    /// The direction of each pair is decided before any write: a file
    /// propagates if its counterpart is missing or strictly older, and the
    /// primary wins a tie. Running it twice in a row writes nothing the
    /// second time.
    pub async fn initiate_sync(&mut self) -> Result<SyncReport> {
        let settings = self.settings.current();
        let mut report = SyncReport::default();
        if !settings.sync_enabled {
            debug!("Sync disabled, skipping initial sync");
            return Ok(report);
        }
        let Some(pairing) = Self::pairing(&settings) else {
            return Ok(report);
        };

        let files = walk_files(&self.fs).await?;
        let known: HashSet<&str> = files.iter().map(String::as_str).collect();

        let mut plan = Vec::new();
        for path in &files {
            let (counterpart, is_primary) = match pairing.classify(path) {
                FileClass::Primary { mirror } => (mirror, true),
                FileClass::Mirror { primary } => (primary, false),
                FileClass::Unrelated => continue,
            };

            let propagate = if known.contains(counterpart.as_str()) {
                let mine = self.fs.stat(path).await?.mtime_millis;
                let theirs = self.fs.stat(&counterpart).await?.mtime_millis;
                mine > theirs || (mine == theirs && is_primary)
            } else {
                true
            };

            if propagate {
                plan.push((path.clone(), counterpart, is_primary));
            } else {
                report.skipped.push(path.clone());
            }
        }

        for (source, target, from_primary) in plan {
            match self.sync_copy(&source, &target).await? {
                Some(content) => {
                    if !from_primary {
                        self.refresh_views(&target, &[target.as_str()], &content)
                            .await?;
                    }
                    report.mirrored.push(MirroredPair { source, target });
                }
                None => report.unchanged.push(source),
            }
        }

        info!(
            "Initial sync: {} mirrored, {} unchanged, {} skipped",
            report.mirrored.len(),
            report.unchanged.len(),
            report.skipped.len()
        );
        Ok(report)
    }

    fn pairing(settings: &Settings) -> Option<PathPairing> {
        let pairing = PathPairing::new(&settings.mirror_folder);
        if pairing.is_none() {
            warn!(
                "Mirror folder {:?} resolves to the vault root, mirroring disabled",
                settings.mirror_folder
            );
        }
        pairing
    }

    fn is_primary(pairing: Option<&PathPairing>, path: &str) -> bool {
        match pairing {
            Some(pairing) => matches!(pairing.classify(path), FileClass::Primary { .. }),
            None => is_drawing(path),
        }
    }

    /// Index bookkeeping for a file that now exists.
    async fn track(&mut self, path: &str, pairing: Option<&PathPairing>) -> Result<()> {
        self.index.track_file(path);

        let is_document = extension(path) == Some(MIRROR_EXTENSION);
        let in_mirror_folder = pairing.is_some_and(|p| p.is_in_mirror_folder(path));
        if is_document && !in_mirror_folder {
            if let Some(content) = self.read_optional(path).await? {
                self.index
                    .index_document(path, &String::from_utf8_lossy(&content));
            }
        }
        Ok(())
    }

    fn consume_echo(&self, path: &str) -> bool {
        if !self.suppressor.try_consume(path) {
            return false;
        }
        debug!("Suppressed echo of own write: {}", path);
        self.events.emit(MirrorEvent::Suppressed {
            path: path.to_string(),
            timestamp: now_millis(),
        });
        true
    }

    async fn read_optional(&self, path: &str) -> Result<Option<Vec<u8>>> {
        match self.fs.read(path).await {
            Ok(content) => Ok(Some(content)),
            Err(FsError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn ensure_folder(&self, folder: &str) -> Result<()> {
        if !self.fs.is_dir(folder).await? {
            self.fs.mkdir(folder).await?;
        }
        Ok(())
    }

    /// Copy `source` over `target`. Returns the written content, or None if
    /// the source vanished or the target was already identical.
    async fn sync_copy(&self, source: &str, target: &str) -> Result<Option<String>> {
        let Some(content) = self.read_optional(source).await? else {
            debug!("Source vanished before mirroring: {}", source);
            return Ok(None);
        };

        self.ensure_folder(parent_folder(target)).await?;

        let existing = self.read_optional(target).await?;
        if existing.as_deref() == Some(content.as_slice()) {
            debug!("No changes detected, {} already matches {}", target, source);
            return Ok(None);
        }

        self.suppressor.mark_pending(target);
        let written = match existing {
            Some(_) => self.fs.modify(target, &content).await,
            None => self.fs.create(target, &content).await,
        };
        if let Err(e) = written {
            self.suppressor.try_consume(target);
            return Err(e.into());
        }

        info!("Mirrored {} -> {}", source, target);
        self.events.emit(MirrorEvent::Mirrored {
            source: source.to_string(),
            target: target.to_string(),
            timestamp: now_millis(),
        });
        Ok(Some(String::from_utf8_lossy(&content).into_owned()))
    }

    async fn mirror_rename(
        &self,
        pairing: &PathPairing,
        path: &str,
        old_path: &str,
    ) -> Result<()> {
        match (pairing.classify(old_path), pairing.classify(path)) {
            (FileClass::Primary { mirror: old_mirror }, FileClass::Primary { mirror }) => {
                if !self.move_counterpart(&old_mirror, &mirror).await? {
                    self.sync_copy(path, &mirror).await?;
                }
            }
            (FileClass::Mirror { primary: old_primary }, FileClass::Mirror { primary }) => {
                if !self.move_counterpart(&old_primary, &primary).await? {
                    self.sync_copy(path, &primary).await?;
                }
                if let Some(content) = self.read_optional(&primary).await? {
                    let content = String::from_utf8_lossy(&content);
                    self.refresh_views(&primary, &[primary.as_str(), old_primary.as_str()], &content)
                        .await?;
                }
            }
            // Moved across namespaces: treat the new path as fresh content
            (_, FileClass::Primary { mirror }) => {
                self.sync_copy(path, &mirror).await?;
            }
            (_, FileClass::Mirror { primary }) => {
                if let Some(content) = self.sync_copy(path, &primary).await? {
                    self.refresh_views(&primary, &[primary.as_str()], &content)
                        .await?;
                }
            }
            (_, FileClass::Unrelated) => {}
        }
        Ok(())
    }

    /// Rename the counterpart alongside its pair. Returns false if the old
    /// counterpart does not exist.
    async fn move_counterpart(&self, from: &str, to: &str) -> Result<bool> {
        if !self.fs.is_file(from).await? {
            return Ok(false);
        }
        self.ensure_folder(parent_folder(to)).await?;

        self.suppressor.mark_pending(to);
        if let Err(e) = self.fs.rename(from, to).await {
            self.suppressor.try_consume(to);
            return Err(e.into());
        }

        info!("Renamed {} -> {}", from, to);
        self.events.emit(MirrorEvent::Renamed {
            from: from.to_string(),
            to: to.to_string(),
            timestamp: now_millis(),
        });
        Ok(true)
    }

    async fn delete_counterpart(&self, path: &str) -> Result<()> {
        if !self.fs.is_file(path).await? {
            debug!("Counterpart already gone: {}", path);
            return Ok(());
        }

        self.suppressor.mark_pending(path);
        if let Err(e) = self.fs.delete(path).await {
            self.suppressor.try_consume(path);
            return Err(e.into());
        }

        info!("Deleted {}", path);
        self.events.emit(MirrorEvent::Deleted {
            path: path.to_string(),
            timestamp: now_millis(),
        });
        Ok(())
    }

    /// Reload views of `drawing` with `content` and ask embedding documents
    /// to re-render.
    async fn refresh_views(
        &self,
        drawing: &str,
        candidates: &[&str],
        content: &str,
    ) -> Result<()> {
        if let Some((shown_as, views)) = locate_views(&self.views, candidates) {
            debug!("Reloading {} view(s) of {}", views.len(), shown_as);
            for view in views {
                self.views.reload(view, content).await?;
            }
        }

        let embedders = self.index.lookup(drawing);
        if !embedders.is_empty() {
            self.views.rerender_embeds(drawing, &embedders);
        }
        Ok(())
    }

    async fn close_views(&self, path: &str) -> Result<()> {
        for view in self.views.open_views(path) {
            self.views.close(view).await?;
        }
        Ok(())
    }

    async fn rename_exports(&self, old_primary: &str, new_primary: &str) -> Result<()> {
        let old = export_siblings(old_primary);
        let new = export_siblings(new_primary);

        for (from, to) in old.iter().zip(&new) {
            if !self.fs.is_file(from).await? {
                continue;
            }
            if self.fs.exists(to).await? {
                warn!("Export {} already exists, leaving {} in place", to, from);
                continue;
            }
            self.ensure_folder(parent_folder(to)).await?;
            self.fs.rename(from, to).await?;

            info!("Renamed export {} -> {}", from, to);
            self.events.emit(MirrorEvent::ExportRenamed {
                from: from.clone(),
                to: to.clone(),
                timestamp: now_millis(),
            });
        }
        Ok(())
    }

    async fn delete_exports(&self, primary: &str) -> Result<()> {
        for export in export_siblings(primary) {
            if !self.fs.is_file(&export).await? {
                continue;
            }
            self.fs.delete(&export).await?;

            info!("Deleted export {}", export);
            self.events.emit(MirrorEvent::ExportDeleted {
                path: export,
                timestamp: now_millis(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::{FsOp, InMemoryFs};
    use crate::views::{RecordingViews, ViewCall, ViewId};
    use std::time::Duration;

    const DRAWING: &str = "Excalidraw/Drawing 1.excalidraw";
    const MIRROR: &str = "_sync/Excalidraw/Drawing 1.md";

    fn engine(settings: Settings) -> MirrorEngine<Arc<InMemoryFs>> {
        MirrorEngine::new(Arc::new(InMemoryFs::new()), SettingsHandle::new(settings))
    }

    #[tokio::test]
    async fn test_primary_modify_creates_mirror_with_parents() {
        let mut engine = engine(Settings::enabled("_sync"));
        engine.fs().seed(DRAWING, b"{\"v\":1}");

        engine.on_create_or_modify(DRAWING).await.unwrap();

        assert_eq!(engine.fs().read_string(MIRROR).as_deref(), Some("{\"v\":1}"));
        assert!(engine.suppressor().is_pending(MIRROR));
        assert!(engine.fs().journal().contains(&FsOp::Mkdir("_sync/Excalidraw".into())));
    }

    #[tokio::test]
    async fn test_custom_suppressor_ttl_lets_late_edits_through() {
        let mut engine = engine(Settings::enabled("_sync"))
            .with_suppressor(EchoSuppressor::with_ttl(Duration::from_millis(20)));
        engine.fs().seed(DRAWING, b"{\"v\":1}");

        engine.on_create_or_modify(DRAWING).await.unwrap();
        assert!(engine.suppressor().is_pending(MIRROR));

        tokio::time::sleep(Duration::from_millis(60)).await;
        engine.fs().seed(MIRROR, b"{\"v\":2}");
        engine.on_create_or_modify(MIRROR).await.unwrap();

        assert_eq!(engine.fs().read_string(DRAWING).as_deref(), Some("{\"v\":2}"));
    }

    #[tokio::test]
    async fn test_identical_counterpart_is_not_rewritten() {
        let mut engine = engine(Settings::enabled("_sync"));
        engine.fs().seed(DRAWING, b"same");
        engine.fs().seed(MIRROR, b"same");

        engine.on_create_or_modify(DRAWING).await.unwrap();

        assert!(engine.fs().journal().is_empty());
        assert!(engine.suppressor().is_empty());
    }

    #[tokio::test]
    async fn test_blocked_mirror_folder_is_an_error() {
        let mut engine = engine(Settings::enabled("_sync"));
        engine.fs().seed(DRAWING, b"{}");
        // A file where the mirror's folder should be
        engine.fs().seed("_sync/Excalidraw", b"not a folder");

        let err = engine.on_create_or_modify(DRAWING).await.unwrap_err();

        assert!(matches!(err, MirrorError::Fs(_)));
        assert!(!engine.suppressor().is_pending(MIRROR));
    }

    #[tokio::test]
    async fn test_disabled_sync_still_indexes() {
        let mut engine = engine(Settings::default());
        engine.fs().seed(DRAWING, b"{}");
        engine.fs().seed("notes/doc.md", b"![[Excalidraw/Drawing 1.excalidraw]]");

        engine.on_create_or_modify(DRAWING).await.unwrap();
        engine.on_create_or_modify("notes/doc.md").await.unwrap();

        assert!(engine.fs().journal().is_empty());
        assert_eq!(engine.index().lookup(DRAWING).len(), 1);
    }

    #[tokio::test]
    async fn test_mirror_modify_reloads_views_and_embeds() {
        let views = Arc::new(RecordingViews::new());
        views.open(ViewId(1), DRAWING);
        let mut engine = engine(Settings::enabled("_sync")).with_views(Arc::clone(&views));
        engine.fs().seed(DRAWING, b"old");
        engine.fs().seed(MIRROR, b"new");
        engine.fs().seed("doc.md", b"![[Excalidraw/Drawing 1.excalidraw]]");
        engine.initialize_index().await.unwrap();

        engine.on_create_or_modify(MIRROR).await.unwrap();

        assert_eq!(engine.fs().read_string(DRAWING).as_deref(), Some("new"));
        assert_eq!(
            views.calls(),
            vec![
                ViewCall::Reload {
                    view: ViewId(1),
                    content: "new".into()
                },
                ViewCall::Rerender {
                    drawing: DRAWING.into(),
                    embedders: vec!["doc.md".into()]
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_rename_existing_target_propagates_error() {
        let mut engine = engine(Settings::enabled("_sync"));
        engine.fs().seed("b.excalidraw", b"{}");
        engine.fs().seed("_sync/a.md", b"{}");
        engine.fs().seed("_sync/b.md", b"taken");

        let err = engine.on_rename("b.excalidraw", "a.excalidraw").await;

        assert!(matches!(err, Err(MirrorError::Fs(FsError::AlreadyExists(_)))));
        assert!(!engine.suppressor().is_pending("_sync/b.md"));
    }

    #[tokio::test]
    async fn test_rename_into_unrelated_does_nothing() {
        let mut engine = engine(Settings::enabled("_sync"));
        engine.fs().seed("a.txt", b"{}");
        engine.fs().seed("_sync/a.md", b"{}");

        engine.on_rename("a.txt", "a.excalidraw").await.unwrap();

        assert!(engine.fs().journal().is_empty());
    }

    #[tokio::test]
    async fn test_empty_mirror_folder_disables_mirroring() {
        let mut engine = engine(Settings::enabled("/"));
        engine.fs().seed("a.excalidraw", b"{}");

        engine.on_create_or_modify("a.excalidraw").await.unwrap();
        let report = engine.initiate_sync().await.unwrap();

        assert!(engine.fs().journal().is_empty());
        assert!(!report.has_changes());
    }
}
