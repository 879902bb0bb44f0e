//! Event types for mirror-core.
//!
//! - `VaultEvent`: filesystem events raised by the host and fed to the engine
//! - `MirrorEvent`: what the engine did, for debug/monitoring subscribers
//! - `EventBus`: publishes `MirrorEvent`s to subscribers

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, Weak};
use std::time::{SystemTime, UNIX_EPOCH};

/// A filesystem event raised by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum VaultEvent {
    Created {
        path: String,
    },
    Modified {
        path: String,
    },
    Renamed {
        path: String,
        #[serde(rename = "oldPath")]
        old_path: String,
    },
    Deleted {
        path: String,
    },
}

impl VaultEvent {
    /// Current path of the file the event is about.
    pub fn path(&self) -> &str {
        match self {
            VaultEvent::Created { path }
            | VaultEvent::Modified { path }
            | VaultEvent::Renamed { path, .. }
            | VaultEvent::Deleted { path } => path,
        }
    }
}

/// Operations performed (or skipped) by the mirror engine.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum MirrorEvent {
    /// Content copied from one side of a pairing to the other.
    Mirrored {
        source: String,
        target: String,
        timestamp: f64,
    },
    /// Counterpart renamed to follow its pair.
    Renamed {
        from: String,
        to: String,
        timestamp: f64,
    },
    /// Counterpart deleted to follow its pair.
    Deleted { path: String, timestamp: f64 },
    /// An event caused by the engine's own write was swallowed.
    Suppressed { path: String, timestamp: f64 },
    /// Export sibling renamed next to a renamed drawing.
    ExportRenamed {
        from: String,
        to: String,
        timestamp: f64,
    },
    /// Export sibling deleted with its drawing.
    ExportDeleted { path: String, timestamp: f64 },
}

/// Milliseconds since Unix epoch, as used in event timestamps.
pub fn now_millis() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64() * 1000.0)
        .unwrap_or(0.0)
}

/// Subscription handle that unsubscribes automatically when dropped.
///
/// Follows the disposer pattern: hold this value to keep receiving events,
/// drop it (or let it go out of scope) to unsubscribe.
pub struct Subscription {
    bus: Weak<EventBus>,
    id: usize,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.id);
        }
    }
}

type Callback = Arc<dyn Fn(MirrorEvent) + Send + Sync>;

/// Event bus for publishing mirror events to subscribers.
///
/// Wrap in `Arc` to enable subscriptions.
pub struct EventBus {
    callbacks: RwLock<Vec<(usize, Callback)>>,
    next_id: AtomicUsize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self {
            callbacks: RwLock::new(Vec::new()),
            next_id: AtomicUsize::new(0),
        }
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events. Returns `Subscription` that unsubscribes on drop.
    pub fn subscribe(
        self: &Arc<Self>,
        callback: impl Fn(MirrorEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(callback)));
        Subscription {
            bus: Arc::downgrade(self),
            id,
        }
    }

    fn unsubscribe(&self, id: usize) {
        // Use try_write to avoid deadlock if Drop runs during panic unwinding
        // while a read lock is held (e.g., during emit).
        if let Ok(mut guard) = self.callbacks.try_write() {
            guard.retain(|(i, _)| *i != id);
        }
    }

    /// Emit an event to all subscribers.
    pub fn emit(&self, event: MirrorEvent) {
        // Clone the callback list so a callback may subscribe without deadlocking.
        let callbacks: Vec<_> = self
            .callbacks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();

        for callback in callbacks {
            callback(event.clone());
        }
    }
}
