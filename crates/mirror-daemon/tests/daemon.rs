//! End-to-end tests for mirror-daemon.
//!
//! Tests the engine on a real filesystem, and the watchers that feed it.

use std::path::Path;
use std::time::Duration;

use mirror_core::{MirrorEngine, Settings, SettingsHandle, VaultEvent};
use mirror_daemon::{scan_mtimes, FileWatcher, NativeFs, SettingsWatcher};
use tempfile::TempDir;
use tokio::time::timeout;

fn engine_for(vault: &Path, settings: Settings) -> MirrorEngine<NativeFs> {
    MirrorEngine::new(
        NativeFs::new(vault.to_path_buf()),
        SettingsHandle::new(settings),
    )
}

/// Wait for the first event matching `wanted`, skipping others.
async fn expect_event(
    watcher: &mut FileWatcher,
    wanted: impl Fn(&VaultEvent) -> bool,
) -> VaultEvent {
    timeout(Duration::from_secs(10), async {
        loop {
            let event = watcher.event_rx().recv().await.expect("Watcher closed");
            if wanted(&event) {
                return event;
            }
        }
    })
    .await
    .expect("Timeout waiting for file event")
}

#[tokio::test]
async fn test_engine_mirrors_on_disk() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let vault = temp_dir.path();
    std::fs::create_dir_all(vault.join("Excalidraw")).unwrap();
    std::fs::write(vault.join("Excalidraw/Drawing 1.excalidraw"), "X").unwrap();

    let mut engine = engine_for(vault, Settings::enabled("_sync"));

    engine
        .on_create_or_modify("Excalidraw/Drawing 1.excalidraw")
        .await
        .unwrap();
    assert_eq!(
        std::fs::read_to_string(vault.join("_sync/Excalidraw/Drawing 1.md")).unwrap(),
        "X"
    );

    std::fs::rename(
        vault.join("Excalidraw/Drawing 1.excalidraw"),
        vault.join("Excalidraw/Drawing 2.excalidraw"),
    )
    .unwrap();
    engine
        .on_rename(
            "Excalidraw/Drawing 2.excalidraw",
            "Excalidraw/Drawing 1.excalidraw",
        )
        .await
        .unwrap();
    assert!(!vault.join("_sync/Excalidraw/Drawing 1.md").exists());
    assert_eq!(
        std::fs::read_to_string(vault.join("_sync/Excalidraw/Drawing 2.md")).unwrap(),
        "X"
    );

    std::fs::remove_file(vault.join("Excalidraw/Drawing 2.excalidraw")).unwrap();
    engine
        .on_delete("Excalidraw/Drawing 2.excalidraw")
        .await
        .unwrap();
    assert!(!vault.join("_sync/Excalidraw/Drawing 2.md").exists());
}

#[tokio::test]
async fn test_initial_sync_on_disk_is_idempotent() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let vault = temp_dir.path();
    std::fs::write(vault.join("a.excalidraw"), "{}").unwrap();
    std::fs::create_dir_all(vault.join("_sync/notes")).unwrap();
    std::fs::write(vault.join("_sync/notes/b.md"), "{\"b\":1}").unwrap();
    std::fs::create_dir_all(vault.join(".obsidian")).unwrap();
    std::fs::write(vault.join(".obsidian/c.excalidraw"), "hidden").unwrap();

    let mut engine = engine_for(vault, Settings::enabled("_sync"));

    let report = engine.initiate_sync().await.unwrap();
    assert_eq!(report.mirrored.len(), 2);
    assert_eq!(std::fs::read_to_string(vault.join("_sync/a.md")).unwrap(), "{}");
    assert_eq!(
        std::fs::read_to_string(vault.join("notes/b.excalidraw")).unwrap(),
        "{\"b\":1}"
    );
    assert!(!vault.join("_sync/.obsidian").exists());

    let again = engine.initiate_sync().await.unwrap();
    assert!(!again.has_changes());
}

#[tokio::test]
async fn test_file_watcher_reports_create_and_modify() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let vault_path = temp_dir.path().to_path_buf();

    let known = scan_mtimes(&NativeFs::new(vault_path.clone())).await.unwrap();
    let mut watcher = FileWatcher::new(vault_path.clone(), known).expect("Failed to create watcher");

    // Give watcher time to fully initialize - FSEvents on macOS needs time
    tokio::time::sleep(Duration::from_millis(500)).await;

    std::fs::write(vault_path.join("test.excalidraw"), "{}").expect("Failed to write file");

    let event = expect_event(&mut watcher, |e| e.path() == "test.excalidraw").await;
    assert_eq!(
        event,
        VaultEvent::Created {
            path: "test.excalidraw".into()
        }
    );

    // Make sure the next write lands on a different mtime
    tokio::time::sleep(Duration::from_millis(50)).await;
    std::fs::write(vault_path.join("test.excalidraw"), "{\"v\":2}").expect("Failed to modify file");

    let event = expect_event(&mut watcher, |e| e.path() == "test.excalidraw").await;
    assert_eq!(
        event,
        VaultEvent::Modified {
            path: "test.excalidraw".into()
        }
    );
}

#[tokio::test]
async fn test_file_watcher_reports_rename() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let vault_path = temp_dir.path().to_path_buf();
    std::fs::write(vault_path.join("a.excalidraw"), "{}").unwrap();

    let known = scan_mtimes(&NativeFs::new(vault_path.clone())).await.unwrap();
    let mut watcher = FileWatcher::new(vault_path.clone(), known).expect("Failed to create watcher");
    tokio::time::sleep(Duration::from_millis(500)).await;

    std::fs::rename(vault_path.join("a.excalidraw"), vault_path.join("b.excalidraw")).unwrap();

    let event = expect_event(&mut watcher, |_| true).await;
    assert_eq!(
        event,
        VaultEvent::Renamed {
            path: "b.excalidraw".into(),
            old_path: "a.excalidraw".into()
        }
    );
}

#[tokio::test]
async fn test_file_watcher_ignores_hidden_folders() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let vault_path = temp_dir.path().to_path_buf();
    let hidden = vault_path.join(".obsidian");
    std::fs::create_dir_all(&hidden).unwrap();

    let mut watcher =
        FileWatcher::new(vault_path.clone(), Default::default()).expect("Failed to create watcher");
    tokio::time::sleep(Duration::from_millis(500)).await;

    std::fs::write(hidden.join("workspace.json"), "{}").unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    std::fs::write(vault_path.join("visible.md"), "# Hi").unwrap();

    let event = expect_event(&mut watcher, |_| true).await;
    assert_eq!(event.path(), "visible.md");
}

#[tokio::test]
async fn test_settings_watcher_signals_changes() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let settings_path = temp_dir.path().join("data.json");
    std::fs::write(&settings_path, "{}").unwrap();

    let mut watcher = SettingsWatcher::new(settings_path.clone()).expect("Failed to create watcher");
    tokio::time::sleep(Duration::from_millis(500)).await;

    std::fs::write(&settings_path, r#"{"excalidrawSync": true}"#).unwrap();

    timeout(Duration::from_secs(10), watcher.changed_rx().recv())
        .await
        .expect("Timeout waiting for settings change")
        .expect("Watcher closed");
}
