//! mirror-daemon: Headless drawing mirror for a vault on disk.
//!
//! Uses the same mirror-core engine as the editor plugin, but runs as a
//! native binary that watches the vault and the plugin's settings file.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use mirror_daemon::config::{default_settings_path, expand_tilde, load_settings};
use mirror_daemon::native_fs::NativeFs;
use mirror_daemon::watcher::{scan_mtimes, FileWatcher, SettingsWatcher};

use mirror_core::{MirrorEngine, Settings, SettingsHandle, VaultEvent};

/// How often stale echo-suppression marks are swept.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(name = "mirror-daemon")]
#[command(about = "Keeps Excalidraw drawings and their markdown mirrors in sync")]
struct Args {
    /// Path to the vault directory
    #[arg(short, long)]
    vault: String,

    /// Settings file (defaults to the drawing plugin's data.json in the vault)
    #[arg(short, long)]
    settings: Option<String>,

    /// Reconcile every drawing and mirror at startup
    #[arg(long)]
    initial_sync: bool,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,

    /// Log every mirror event as JSON
    #[arg(long)]
    trace_events: bool,
}

/// Daemon state holding all components.
struct Daemon {
    engine: MirrorEngine<NativeFs>,
    settings: SettingsHandle,
    settings_path: PathBuf,
}

impl Daemon {
    /// Handle an event from the vault watcher.
    async fn on_vault_event(&mut self, event: VaultEvent) {
        if let Err(e) = self.engine.handle(&event).await {
            error!("Failed to mirror {}: {}", event.path(), e);
        }
    }

    /// Reload settings after the settings file changed.
    async fn on_settings_changed(&mut self) {
        let settings = match load_settings(&self.settings_path).await {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Keeping previous settings: {}", e);
                return;
            }
        };

        let previous = self.settings.replace(settings.clone());
        if previous == settings {
            debug!("Settings file touched, no changes");
            return;
        }
        info!(
            "Settings reloaded: sync {}, folder {:?}, exports {}",
            if settings.sync_enabled { "on" } else { "off" },
            settings.mirror_folder,
            if settings.keep_export_in_sync { "follow" } else { "stay" }
        );

        if previous.mirror_folder != settings.mirror_folder {
            if let Err(e) = self.engine.initialize_index().await {
                error!("Failed to rebuild embed index: {}", e);
            }
        }
        if Self::sync_switched_on(&previous, &settings) {
            self.initial_sync().await;
        }
    }

    fn sync_switched_on(previous: &Settings, current: &Settings) -> bool {
        current.sync_enabled
            && (!previous.sync_enabled || previous.mirror_folder != current.mirror_folder)
    }

    async fn initial_sync(&mut self) {
        match self.engine.initiate_sync().await {
            Ok(report) if report.has_changes() => {
                info!("Initial sync mirrored {} file(s)", report.mirrored.len())
            }
            Ok(_) => debug!("Initial sync: everything already mirrored"),
            Err(e) => error!("Initial sync failed: {}", e),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,mirror_daemon=debug,mirror_core=debug"
    } else {
        "info,mirror_daemon=info,mirror_core=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let vault_path = expand_tilde(&args.vault);
    let settings_path = args
        .settings
        .as_deref()
        .map(expand_tilde)
        .unwrap_or_else(|| default_settings_path(&vault_path));

    info!("Starting mirror-daemon");
    info!("Vault path: {:?}", vault_path);
    info!("Settings file: {:?}", settings_path);

    let settings = SettingsHandle::new(load_settings(&settings_path).await?);
    let current = settings.current();
    info!(
        "Mirror folder {:?}, sync {}",
        current.mirror_folder,
        if current.sync_enabled { "on" } else { "off" }
    );

    let fs = NativeFs::new(vault_path.clone());
    let known = scan_mtimes(&fs).await?;

    let mut engine = MirrorEngine::new(fs, settings.clone());
    engine.initialize_index().await?;

    let _trace = args.trace_events.then(|| {
        engine.events().subscribe(|event| match serde_json::to_string(&event) {
            Ok(json) => info!(target: "mirror_events", "{}", json),
            Err(e) => warn!("Failed to serialize mirror event: {}", e),
        })
    });

    // Start watching before the initial sync so its writes are seen as echoes
    let mut watcher = FileWatcher::new(vault_path.clone(), known)?;
    info!("File watcher started");

    let mut settings_watcher = match SettingsWatcher::new(settings_path.clone()) {
        Ok(watcher) => Some(watcher),
        Err(e) => {
            warn!("Not watching settings file: {}", e);
            None
        }
    };

    let mut daemon = Daemon {
        engine,
        settings,
        settings_path,
    };

    if args.initial_sync {
        daemon.initial_sync().await;
    }

    let mut cleanup = tokio::time::interval(CLEANUP_INTERVAL);

    info!("Daemon running. Press Ctrl+C to stop.");

    // Main event loop: one event at a time keeps the engine's handlers serialized
    loop {
        tokio::select! {
            Some(event) = watcher.event_rx().recv() => {
                daemon.on_vault_event(event).await;
            }

            Some(()) = async {
                match settings_watcher.as_mut() {
                    Some(watcher) => watcher.changed_rx().recv().await,
                    None => std::future::pending().await,
                }
            } => {
                daemon.on_settings_changed().await;
            }

            _ = cleanup.tick() => {
                let removed = daemon.engine.suppressor().cleanup_expired();
                if removed > 0 {
                    debug!("Dropped {} stale suppression mark(s)", removed);
                }
            }

            // Handle graceful shutdown
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    info!("Shutting down");
    Ok(())
}
