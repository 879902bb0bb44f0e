//! Echo suppression for the engine's own writes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Time-to-live for pending marks. Marks older than this are considered stale.
pub const DEFAULT_TTL: Duration = Duration::from_secs(5);

/// Tracks paths the engine is about to write, so the host event each write
/// provokes is not propagated back.
///
/// Mark a path BEFORE issuing the create/modify/rename/delete. When the host
/// event for that path arrives, `try_consume` returns true exactly once.
///
/// Marks expire after the TTL. A host event that never arrives (e.g. sync
/// was switched off in between) would otherwise leave a mark behind that
/// swallows the next unrelated edit of the same path.
#[derive(Clone)]
pub struct EchoSuppressor {
    /// Map of path -> time it was marked
    pending: Arc<Mutex<HashMap<String, Instant>>>,
    ttl: Duration,
}

impl Default for EchoSuppressor {
    fn default() -> Self {
        Self::with_ttl(DEFAULT_TTL)
    }
}

impl EchoSuppressor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            pending: Arc::new(Mutex::new(HashMap::new())),
            ttl,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Instant>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Mark a path as about to be written by the engine.
    pub fn mark_pending(&self, path: &str) {
        self.lock().insert(path.to_string(), Instant::now());
    }

    /// Check if path is pending and consume the mark (returns true once).
    /// Returns false if the mark has expired.
    pub fn try_consume(&self, path: &str) -> bool {
        match self.lock().remove(path) {
            Some(marked_at) => marked_at.elapsed() < self.ttl,
            None => false,
        }
    }

    /// Check if path is pending (without consuming).
    pub fn is_pending(&self, path: &str) -> bool {
        self.lock()
            .get(path)
            .is_some_and(|marked_at| marked_at.elapsed() < self.ttl)
    }

    /// Remove expired marks to prevent memory growth.
    pub fn cleanup_expired(&self) -> usize {
        let mut pending = self.lock();
        let before = pending.len();
        pending.retain(|_, marked_at| marked_at.elapsed() < self.ttl);
        before - pending.len()
    }

    /// Number of marks held, expired or not.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_and_consume_once() {
        let suppressor = EchoSuppressor::new();

        assert!(!suppressor.is_pending("_sync/a.md"));

        suppressor.mark_pending("_sync/a.md");
        assert!(suppressor.is_pending("_sync/a.md"));

        assert!(suppressor.try_consume("_sync/a.md"));
        assert!(!suppressor.try_consume("_sync/a.md"));
        assert!(suppressor.is_empty());
    }

    #[test]
    fn test_consuming_one_path_keeps_others() {
        let suppressor = EchoSuppressor::new();
        suppressor.mark_pending("a.md");
        suppressor.mark_pending("b.md");

        assert!(suppressor.try_consume("b.md"));
        assert!(suppressor.is_pending("a.md"));
        assert!(!suppressor.is_pending("b.md"));
    }

    #[test]
    fn test_clone_shares_state() {
        let engine_side = EchoSuppressor::new();
        let host_side = engine_side.clone();

        engine_side.mark_pending("shared.md");
        assert!(host_side.try_consume("shared.md"));
        assert!(!engine_side.is_pending("shared.md"));
    }

    #[test]
    fn test_expired_mark_does_not_suppress() {
        let suppressor = EchoSuppressor::with_ttl(Duration::from_millis(10));
        suppressor.mark_pending("stale.md");

        std::thread::sleep(Duration::from_millis(30));

        assert!(!suppressor.is_pending("stale.md"));
        assert!(!suppressor.try_consume("stale.md"));
        assert!(suppressor.is_empty());
    }

    #[test]
    fn test_cleanup_expired() {
        let suppressor = EchoSuppressor::with_ttl(Duration::from_millis(100));
        suppressor.mark_pending("a.md");
        suppressor.mark_pending("b.md");

        // Fresh marks survive
        assert_eq!(suppressor.cleanup_expired(), 0);
        assert_eq!(suppressor.len(), 2);

        std::thread::sleep(Duration::from_millis(150));
        assert_eq!(suppressor.cleanup_expired(), 2);
        assert!(suppressor.is_empty());
    }
}
