//! In-memory set of revoked tokens.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use crate::lifecycle::MaintenanceTask;

/// Tokens invalidated before their natural expiry, keyed by the raw token.
///
/// Validation takes the read lock; revoke and sweep take the write lock.
#[derive(Debug, Default)]
pub struct RevocationStore {
    entries: RwLock<HashMap<String, DateTime<Utc>>>,
}

impl RevocationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `token` as revoked until `expires_at`.
    pub fn insert(&self, token: &str, expires_at: DateTime<Utc>) {
        self.entries.write().insert(token.to_string(), expires_at);
    }

    pub fn contains(&self, token: &str) -> bool {
        self.entries.read().contains_key(token)
    }

    /// Remove entries whose expiry is at or before `now`.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, expires_at| *expires_at > now);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn start_sweeper(
        self: &Arc<Self>,
        period: Duration,
        shutdown: broadcast::Receiver<()>,
    ) -> MaintenanceTask {
        let store = Arc::clone(self);
        MaintenanceTask::spawn("revocation-sweep", period, shutdown, move || {
            let removed = store.sweep(Utc::now());
            if removed > 0 {
                tracing::debug!(removed, remaining = store.len(), "Swept expired revocations");
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn test_sweep_drops_only_expired_entries() {
        let store = RevocationStore::new();
        let now = Utc::now();
        store.insert("old", now - ChronoDuration::seconds(1));
        store.insert("edge", now);
        store.insert("live", now + ChronoDuration::hours(1));

        assert_eq!(store.sweep(now), 2);
        assert!(store.contains("live"));
        assert!(!store.contains("old"));
        assert!(!store.contains("edge"));
    }

    #[tokio::test]
    async fn test_sweeper_stops_on_request() {
        let shutdown = crate::lifecycle::Shutdown::new();
        let store = Arc::new(RevocationStore::new());
        store.insert("gone", Utc::now() - ChronoDuration::minutes(5));

        let task = store.start_sweeper(Duration::from_millis(10), shutdown.subscribe());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(store.is_empty());

        task.stop().await;
    }
}
