//! Host views that display drawings.
//!
//! The engine never renders anything; it only tells the host to reload,
//! close, or re-render views after a sync. Headless hosts use `NoViews`.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ViewError {
    #[error("View not found: {0:?}")]
    NotFound(ViewId),
}

/// Opaque handle to an open view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ViewId(pub u64);

/// View operations the engine asks of the host.
#[async_trait]
pub trait ViewHost: Send + Sync {
    /// Views currently showing the drawing at `path`.
    fn open_views(&self, path: &str) -> Vec<ViewId>;

    /// Replace a view's content without saving it back.
    async fn reload(&self, view: ViewId, content: &str) -> Result<(), ViewError>;

    /// Detach a view from its file.
    async fn close(&self, view: ViewId) -> Result<(), ViewError>;

    /// Ask documents embedding `drawing` to re-render their previews.
    fn rerender_embeds(&self, drawing: &str, embedders: &HashSet<String>);
}

/// Try each candidate path in order and return the first one with open views.
///
/// Hosts can show a renamed file under either name for a moment, so callers
/// list the paths to try (e.g. new path, then old path).
pub fn locate_views<V: ViewHost + ?Sized>(
    host: &V,
    candidates: &[&str],
) -> Option<(String, Vec<ViewId>)> {
    candidates.iter().find_map(|path| {
        let views = host.open_views(path);
        (!views.is_empty()).then(|| (path.to_string(), views))
    })
}

/// View host for headless use: nothing is ever open.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoViews;

#[async_trait]
impl ViewHost for NoViews {
    fn open_views(&self, _path: &str) -> Vec<ViewId> {
        Vec::new()
    }

    async fn reload(&self, view: ViewId, _content: &str) -> Result<(), ViewError> {
        Err(ViewError::NotFound(view))
    }

    async fn close(&self, view: ViewId) -> Result<(), ViewError> {
        Err(ViewError::NotFound(view))
    }

    fn rerender_embeds(&self, _drawing: &str, _embedders: &HashSet<String>) {}
}

/// A call made to `RecordingViews`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewCall {
    Reload { view: ViewId, content: String },
    Close { view: ViewId },
    Rerender { drawing: String, embedders: Vec<String> },
}

/// In-memory view host for testing: tracks which file each view shows and
/// records every call.
#[derive(Default)]
pub struct RecordingViews {
    open: Mutex<BTreeMap<ViewId, Option<String>>>,
    calls: Mutex<Vec<ViewCall>>,
}

impl RecordingViews {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a view on `path`.
    pub fn open(&self, view: ViewId, path: &str) {
        self.open
            .lock()
            .unwrap()
            .insert(view, Some(path.to_string()));
    }

    /// Point an open view at a new path, as the host does after a rename.
    pub fn follow_rename(&self, from: &str, to: &str) {
        for file in self.open.lock().unwrap().values_mut() {
            if file.as_deref() == Some(from) {
                *file = Some(to.to_string());
            }
        }
    }

    /// File currently shown by `view`, None once closed.
    pub fn file_of(&self, view: ViewId) -> Option<String> {
        self.open.lock().unwrap().get(&view).cloned().flatten()
    }

    pub fn calls(&self) -> Vec<ViewCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ViewHost for RecordingViews {
    fn open_views(&self, path: &str) -> Vec<ViewId> {
        self.open
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, file)| file.as_deref() == Some(path))
            .map(|(id, _)| *id)
            .collect()
    }

    async fn reload(&self, view: ViewId, content: &str) -> Result<(), ViewError> {
        if !self.open.lock().unwrap().contains_key(&view) {
            return Err(ViewError::NotFound(view));
        }
        self.calls.lock().unwrap().push(ViewCall::Reload {
            view,
            content: content.to_string(),
        });
        Ok(())
    }

    async fn close(&self, view: ViewId) -> Result<(), ViewError> {
        match self.open.lock().unwrap().get_mut(&view) {
            Some(file) => *file = None,
            None => return Err(ViewError::NotFound(view)),
        }
        self.calls.lock().unwrap().push(ViewCall::Close { view });
        Ok(())
    }

    fn rerender_embeds(&self, drawing: &str, embedders: &HashSet<String>) {
        let mut embedders: Vec<String> = embedders.iter().cloned().collect();
        embedders.sort();
        self.calls.lock().unwrap().push(ViewCall::Rerender {
            drawing: drawing.to_string(),
            embedders,
        });
    }
}

// Share one view host between the engine and the test/host that drives it
#[async_trait]
impl<T: ViewHost + ?Sized> ViewHost for std::sync::Arc<T> {
    fn open_views(&self, path: &str) -> Vec<ViewId> {
        (**self).open_views(path)
    }

    async fn reload(&self, view: ViewId, content: &str) -> Result<(), ViewError> {
        (**self).reload(view, content).await
    }

    async fn close(&self, view: ViewId) -> Result<(), ViewError> {
        (**self).close(view).await
    }

    fn rerender_embeds(&self, drawing: &str, embedders: &HashSet<String>) {
        (**self).rerender_embeds(drawing, embedders)
    }
}
