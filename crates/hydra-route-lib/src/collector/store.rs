//! Per-target snapshot history
//!
//! Append-only per target, truncated to the retention window. Writers are
//! the collection cycle only; readers get cheap `Arc` copies.

use crate::models::{MetricsSnapshot, TargetRef};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::warn;

/// Shared history map guarded by a single reader-writer lock
#[derive(Debug, Default)]
pub struct MetricsStore {
    inner: RwLock<HashMap<TargetRef, Vec<Arc<MetricsSnapshot>>>>,
}

impl MetricsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a snapshot to its target's history.
    ///
    /// Timestamps must be non-decreasing per target; an out-of-order
    /// snapshot is dropped rather than violating history ordering.
    pub async fn append(&self, snapshot: MetricsSnapshot) {
        let mut inner = self.inner.write().await;
        let history = inner.entry(snapshot.target.clone()).or_default();
        if let Some(last) = history.last() {
            if snapshot.timestamp < last.timestamp {
                warn!(
                    target = %snapshot.target,
                    snapshot_ts = %snapshot.timestamp,
                    last_ts = %last.timestamp,
                    "dropping out-of-order snapshot"
                );
                return;
            }
        }
        history.push(Arc::new(snapshot));
    }

    /// Most recent snapshot for a target
    pub async fn latest(&self, target: &TargetRef) -> Option<Arc<MetricsSnapshot>> {
        let inner = self.inner.read().await;
        inner.get(target).and_then(|h| h.last().cloned())
    }

    /// Full retained history for a target, oldest first
    pub async fn history(&self, target: &TargetRef) -> Vec<Arc<MetricsSnapshot>> {
        let inner = self.inner.read().await;
        inner.get(target).cloned().unwrap_or_default()
    }

    /// Drop snapshots older than the cutoff; targets left empty are removed
    pub async fn evict_older_than(&self, cutoff: DateTime<Utc>) {
        let mut inner = self.inner.write().await;
        for history in inner.values_mut() {
            history.retain(|snapshot| snapshot.timestamp >= cutoff);
        }
        inner.retain(|_, history| !history.is_empty());
    }

    /// Number of targets with retained history
    pub async fn target_count(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Total retained snapshots across all targets
    pub async fn snapshot_count(&self) -> usize {
        self.inner.read().await.values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn snapshot_at(target: &TargetRef, timestamp: DateTime<Utc>) -> MetricsSnapshot {
        MetricsSnapshot::empty(target.clone(), timestamp)
    }

    #[tokio::test]
    async fn test_append_and_latest() {
        let store = MetricsStore::new();
        let target = TargetRef::new("default", "web");
        let now = Utc::now();

        store
            .append(snapshot_at(&target, now - Duration::seconds(30)))
            .await;
        store.append(snapshot_at(&target, now)).await;

        let latest = store.latest(&target).await.unwrap();
        assert_eq!(latest.timestamp, now);
        assert_eq!(store.history(&target).await.len(), 2);
    }

    #[tokio::test]
    async fn test_latest_for_unknown_target() {
        let store = MetricsStore::new();
        assert!(store.latest(&TargetRef::new("default", "web")).await.is_none());
        assert!(store.history(&TargetRef::new("default", "web")).await.is_empty());
    }

    #[tokio::test]
    async fn test_out_of_order_snapshot_dropped() {
        let store = MetricsStore::new();
        let target = TargetRef::new("default", "web");
        let now = Utc::now();

        store.append(snapshot_at(&target, now)).await;
        store
            .append(snapshot_at(&target, now - Duration::seconds(10)))
            .await;

        let history = store.history(&target).await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].timestamp, now);
    }

    #[tokio::test]
    async fn test_eviction_respects_cutoff() {
        let store = MetricsStore::new();
        let target = TargetRef::new("default", "web");
        let now = Utc::now();

        for age_secs in [3600, 1800, 60, 0] {
            store
                .append(snapshot_at(&target, now - Duration::seconds(age_secs)))
                .await;
        }

        store.evict_older_than(now - Duration::seconds(900)).await;

        let history = store.history(&target).await;
        assert_eq!(history.len(), 2);
        assert!(history
            .iter()
            .all(|s| s.timestamp >= now - Duration::seconds(900)));
    }

    #[tokio::test]
    async fn test_eviction_removes_empty_targets() {
        let store = MetricsStore::new();
        let target = TargetRef::new("default", "web");
        let now = Utc::now();

        store
            .append(snapshot_at(&target, now - Duration::hours(25)))
            .await;
        store.evict_older_than(now - Duration::hours(24)).await;

        assert_eq!(store.target_count().await, 0);
        assert_eq!(store.snapshot_count().await, 0);
    }

    #[tokio::test]
    async fn test_histories_are_independent_per_target() {
        let store = MetricsStore::new();
        let web = TargetRef::new("default", "web");
        let api = TargetRef::new("default", "api");
        let now = Utc::now();

        store.append(snapshot_at(&web, now)).await;
        store.append(snapshot_at(&api, now)).await;
        store.append(snapshot_at(&api, now + Duration::seconds(30))).await;

        assert_eq!(store.history(&web).await.len(), 1);
        assert_eq!(store.history(&api).await.len(), 2);
        assert_eq!(store.target_count().await, 2);
    }
}
