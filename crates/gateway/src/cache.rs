// Metrics Cache
//
// Last known metric snapshot per device with the time it was observed.
// Stale entries are still served; staleness is only reported.

use crate::extract::MetricMap;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;

/// One device's last snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct CachedMetricSet {
    pub metrics: MetricMap,
    pub observed_at: DateTime<Utc>,
}

impl CachedMetricSet {
    pub fn age(&self) -> Duration {
        (Utc::now() - self.observed_at).to_std().unwrap_or_default()
    }

    pub fn is_stale(&self, threshold: Duration) -> bool {
        self.age() > threshold
    }

    /// `observed_at` as fractional unix seconds
    pub fn observed_at_unix(&self) -> f64 {
        self.observed_at.timestamp_millis() as f64 / 1000.0
    }
}

pub struct MetricsCache {
    entries: RwLock<HashMap<String, CachedMetricSet>>,
    stale_after: Duration,
}

impl MetricsCache {
    pub fn new(stale_after: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            stale_after,
        }
    }

    pub fn stale_after(&self) -> Duration {
        self.stale_after
    }

    /// Replace the device's snapshot wholesale and stamp it with now
    pub async fn update(&self, device_id: &str, metrics: MetricMap) {
        self.update_at(device_id, metrics, Utc::now()).await;
    }

    pub(crate) async fn update_at(
        &self,
        device_id: &str,
        metrics: MetricMap,
        observed_at: DateTime<Utc>,
    ) {
        let count = metrics.len();
        self.entries.write().await.insert(
            device_id.to_string(),
            CachedMetricSet {
                metrics,
                observed_at,
            },
        );
        tracing::debug!(device_id = %device_id, metrics = count, "Updated cached metrics");
    }

    /// Current snapshot regardless of age; warns when it is stale
    pub async fn get(&self, device_id: &str) -> Option<CachedMetricSet> {
        let entry = self.entries.read().await.get(device_id).cloned()?;
        if entry.is_stale(self.stale_after) {
            tracing::warn!(
                device_id = %device_id,
                age_secs = entry.age().as_secs(),
                "Serving stale metrics"
            );
        }
        Some(entry)
    }

    pub async fn remove(&self, device_id: &str) {
        if self.entries.write().await.remove(device_id).is_some() {
            tracing::debug!(device_id = %device_id, "Evicted cached metrics");
        }
    }

    /// Snapshot of devices with cached data, sorted
    pub async fn list_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.entries.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(pairs: &[(&str, f64)]) -> MetricMap {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[tokio::test]
    async fn test_update_replaces_wholesale() {
        let cache = MetricsCache::new(Duration::from_secs(60));
        cache
            .update("plug-1", metrics(&[("power_total_watts", 10.0), ("power_voltage_volts", 230.0)]))
            .await;
        cache.update("plug-1", metrics(&[("power_total_watts", 11.0)])).await;

        let entry = cache.get("plug-1").await.unwrap();
        assert_eq!(entry.metrics, metrics(&[("power_total_watts", 11.0)]));
        assert!(!entry.is_stale(cache.stale_after()));
    }

    #[tokio::test]
    async fn test_stale_entries_are_still_served() {
        let cache = MetricsCache::new(Duration::from_secs(60));
        let observed = Utc::now() - chrono::Duration::seconds(120);
        cache
            .update_at("plug-1", metrics(&[("power_total_watts", 3.0)]), observed)
            .await;

        let entry = cache.get("plug-1").await.expect("stale data is served");
        assert!(entry.is_stale(cache.stale_after()));
        assert!(entry.age() >= Duration::from_secs(119));
        assert_eq!(entry.metrics["power_total_watts"], 3.0);
    }

    #[tokio::test]
    async fn test_remove_and_list() {
        let cache = MetricsCache::new(Duration::from_secs(60));
        cache.update("b", MetricMap::new()).await;
        cache.update("a", MetricMap::new()).await;
        assert_eq!(cache.list_ids().await, vec!["a", "b"]);

        cache.remove("a").await;
        cache.remove("a").await;
        assert_eq!(cache.list_ids().await, vec!["b"]);
        assert!(cache.get("a").await.is_none());
        assert_eq!(cache.len().await, 1);
    }

    #[test]
    fn test_observed_at_unix() {
        let set = CachedMetricSet {
            metrics: MetricMap::new(),
            observed_at: DateTime::from_timestamp(1_700_000_000, 500_000_000).unwrap(),
        };
        assert_eq!(set.observed_at_unix(), 1_700_000_000.5);
    }
}
