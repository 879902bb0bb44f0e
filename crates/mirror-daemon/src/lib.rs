//! mirror-daemon library: Exposes internal modules for testing.
//!
//! This is a thin library layer over the daemon components,
//! allowing integration tests to access internal types.

pub mod config;
pub mod native_fs;
pub mod watcher;

// Re-export key types for convenience
pub use config::{default_settings_path, expand_tilde, load_settings, ConfigError};
pub use native_fs::NativeFs;
pub use watcher::{reconcile_batch, scan_mtimes, FileWatcher, Observed, SettingsWatcher};
