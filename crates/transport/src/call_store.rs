//! Pending-call store
//!
//! The telephony webhook records `{to, from}` keyed by `callSid` before the
//! media stream opens. When a `start` frame arrives without custom
//! parameters, the adapter falls back to this store. Entries are read once
//! and deleted; unread entries expire after a short TTL.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

/// Default entry lifetime.
pub const CALL_TTL: Duration = Duration::from_secs(120);

/// Sweep cadence for expired entries.
const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// One pending call written by the webhook.
#[derive(Debug, Clone)]
pub struct PendingCall {
    pub to: String,
    pub from: String,
    pub inserted_at: Instant,
}

/// In-memory map of calls awaiting their media stream.
#[derive(Clone)]
pub struct CallStore {
    calls: Arc<DashMap<String, PendingCall>>,
    ttl: Duration,
}

impl Default for CallStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CallStore {
    pub fn new() -> Self {
        Self::with_ttl(CALL_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            calls: Arc::new(DashMap::new()),
            ttl,
        }
    }

    /// Record a pending call. Overwrites any prior entry for the sid.
    pub fn insert(&self, call_sid: &str, to: &str, from: &str) {
        self.calls.insert(
            call_sid.to_string(),
            PendingCall {
                to: to.to_string(),
                from: from.to_string(),
                inserted_at: Instant::now(),
            },
        );
    }

    /// Read-once lookup: returns and removes the entry. Expired entries
    /// return `None` even if still present.
    pub fn take(&self, call_sid: &str) -> Option<PendingCall> {
        let (_, entry) = self.calls.remove(call_sid)?;
        if entry.inserted_at.elapsed() > self.ttl {
            tracing::debug!(call_sid, "pending call entry expired before read");
            return None;
        }
        Some(entry)
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Drop expired entries.
    pub fn sweep(&self) {
        let ttl = self.ttl;
        let before = self.calls.len();
        self.calls.retain(|_, v| v.inserted_at.elapsed() <= ttl);
        let removed = before - self.calls.len();
        if removed > 0 {
            tracing::debug!(removed, "swept expired pending calls");
        }
    }

    /// Spawn the background sweeper; stops when the token is cancelled.
    pub fn spawn_sweeper(&self, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = interval.tick() => store.sweep(),
                    _ = shutdown.cancelled() => break,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_once_semantics() {
        let store = CallStore::new();
        store.insert("CA1", "+15551234567", "+15550001111");

        let entry = store.take("CA1").unwrap();
        assert_eq!(entry.to, "+15551234567");
        assert!(store.take("CA1").is_none());
    }

    #[test]
    fn test_expired_entry_not_returned() {
        let store = CallStore::with_ttl(Duration::from_millis(0));
        store.insert("CA1", "+15551234567", "+15550001111");
        std::thread::sleep(Duration::from_millis(5));
        assert!(store.take("CA1").is_none());
    }

    #[test]
    fn test_sweep_removes_expired() {
        let store = CallStore::with_ttl(Duration::from_millis(0));
        store.insert("CA1", "+1", "+2");
        store.insert("CA2", "+3", "+4");
        std::thread::sleep(Duration::from_millis(5));
        store.sweep();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_sweeper_stops_on_cancel() {
        let store = CallStore::new();
        let token = CancellationToken::new();
        let handle = store.spawn_sweeper(token.clone());
        token.cancel();
        handle.await.unwrap();
    }
}
