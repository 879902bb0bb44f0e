//! Settings consumed by the mirror engine.
//!
//! The host owns the settings and may change them at any time; the engine
//! reads a fresh copy through `SettingsHandle` on every event.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};

/// Default mirror folder.
pub const DEFAULT_MIRROR_FOLDER: &str = "_sync";

/// Mirror settings, serialized with the drawing plugin's `data.json` keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Folder that holds the mirror files
    #[serde(rename = "syncFolder")]
    pub mirror_folder: String,
    /// Master switch for mirroring
    #[serde(rename = "excalidrawSync")]
    pub sync_enabled: bool,
    /// Rename/delete same-stem `.svg`/`.png` exports with their drawing
    #[serde(rename = "keepInSync")]
    pub keep_export_in_sync: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            mirror_folder: DEFAULT_MIRROR_FOLDER.to_string(),
            sync_enabled: false,
            keep_export_in_sync: false,
        }
    }
}

impl Settings {
    /// Settings with mirroring turned on for `mirror_folder`.
    pub fn enabled(mirror_folder: &str) -> Self {
        Self {
            mirror_folder: mirror_folder.to_string(),
            sync_enabled: true,
            ..Self::default()
        }
    }
}

/// Shared, runtime-updatable settings.
///
/// Cloning shares the underlying value, so the host keeps one handle to
/// update and the engine another to read.
#[derive(Debug, Clone, Default)]
pub struct SettingsHandle {
    inner: Arc<RwLock<Settings>>,
}

impl SettingsHandle {
    pub fn new(settings: Settings) -> Self {
        Self {
            inner: Arc::new(RwLock::new(settings)),
        }
    }

    /// Snapshot of the current settings.
    pub fn current(&self) -> Settings {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Replace the settings, returning the previous value.
    pub fn replace(&self, settings: Settings) -> Settings {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        std::mem::replace(&mut *guard, settings)
    }

    /// Modify the settings in place.
    pub fn update(&self, f: impl FnOnce(&mut Settings)) {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        f(&mut guard);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_plugin_data_json() {
        let json = r#"{
            "folder": "Excalidraw",
            "syncFolder": "excalidraw-sync",
            "excalidrawSync": true,
            "keepInSync": true,
            "width": "400"
        }"#;

        let settings: Settings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.mirror_folder, "excalidraw-sync");
        assert!(settings.sync_enabled);
        assert!(settings.keep_export_in_sync);
    }

    #[test]
    fn test_missing_keys_use_defaults() {
        let settings: Settings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_handle_clones_share_state() {
        let host = SettingsHandle::new(Settings::default());
        let engine = host.clone();

        host.update(|s| s.sync_enabled = true);
        assert!(engine.current().sync_enabled);

        let previous = host.replace(Settings::enabled("other"));
        assert!(previous.sync_enabled);
        assert_eq!(engine.current().mirror_folder, "other");
    }
}
