use mirror_core::Settings;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Where the drawing plugin keeps its settings, relative to the vault root.
pub const PLUGIN_SETTINGS_PATH: &str = ".obsidian/plugins/obsidian-excalidraw-plugin/data.json";

/// Default settings file for a vault.
pub fn default_settings_path(vault_path: &Path) -> PathBuf {
    vault_path.join(PLUGIN_SETTINGS_PATH)
}

/// Load settings from the plugin's `data.json`.
///
/// A missing file yields the defaults (mirroring off); unknown keys are
/// ignored.
pub async fn load_settings(path: &Path) -> Result<Settings, ConfigError> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!("Settings file {} not found, using defaults", path.display());
            return Ok(Settings::default());
        }
        Err(source) => {
            return Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Expand ~ or ~/ prefix to the user's home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" {
        dirs::home_dir().unwrap_or_else(|| PathBuf::from("~"))
    } else if let Some(rest) = path.strip_prefix("~/") {
        dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path))
    } else {
        PathBuf::from(path)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read settings {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid settings in {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}
