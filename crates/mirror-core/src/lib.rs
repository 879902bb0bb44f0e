//! mirror-core: keeps Excalidraw drawings and their markdown mirrors in sync.
//!
//! This crate provides:
//! - The pairing function between a drawing and its mirror path
//! - `MirrorEngine`, which reacts to vault events with echo suppression
//! - `TransclusionIndex`, which tracks documents embedding each drawing
//! - FileSystem and ViewHost trait abstractions for the host

pub mod engine;
pub mod events;
pub mod fs;
pub mod pairing;
pub mod settings;
pub mod suppression;
pub mod transclusion;
pub mod views;

pub use engine::{MirrorEngine, MirrorError, MirroredPair, SyncReport};
pub use events::{EventBus, MirrorEvent, Subscription, VaultEvent};
pub use fs::{FileEntry, FileStat, FileSystem, FsError, InMemoryFs};
pub use pairing::{FileClass, PathPairing};
pub use settings::{Settings, SettingsHandle};
pub use suppression::EchoSuppressor;
pub use transclusion::TransclusionIndex;
pub use views::{NoViews, RecordingViews, ViewHost, ViewId};
