use crate::config::StorageConfig;
use crate::telemetry::TelemetryRecord;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Aggregate request/error/status stats for one endpoint over a window.
#[derive(Debug, Clone, Serialize, Default, PartialEq)]
pub struct EndpointStats {
    pub request_count: u64,
    pub avg_latency_ms: f64,
    pub error_rate: f64,
    pub status_distribution: HashMap<u16, u64>,
}

/// Storage backend trait all telemetry backends implement.
///
/// `store_metric` must make the record visible to a subsequent
/// `get_recent_metrics`/`get_metrics_by_trace` call issued by the same caller
/// before `store_metric`'s future resolves ("completed happens-before").
#[async_trait]
pub trait TelemetryStore: Send + Sync {
    async fn store_metric(&self, record: TelemetryRecord) -> Result<()>;

    /// Most recent records first. `endpoint = None` spans every endpoint.
    async fn get_recent_metrics(
        &self,
        endpoint: Option<&str>,
        window: Duration,
    ) -> Result<Vec<TelemetryRecord>>;

    /// All records for a trace, oldest first.
    async fn get_metrics_by_trace(&self, trace_id: &str) -> Result<Vec<TelemetryRecord>>;

    async fn get_endpoint_stats(&self, endpoint: &str, window: Duration) -> Result<EndpointStats>;

    async fn get_all_endpoints(&self) -> Result<Vec<String>>;
}

/// In-process telemetry store. Indexed twice, matching the two access
/// patterns the rest of the engine actually uses: by endpoint (the
/// analyzer's hot path) and by trace id (the RCA engine's hot path).
pub struct MemoryStore {
    by_endpoint: DashMap<String, Vec<TelemetryRecord>>,
    by_trace: DashMap<String, Vec<TelemetryRecord>>,
}

impl MemoryStore {
    pub fn new(_config: &StorageConfig) -> Result<Self> {
        Ok(Self {
            by_endpoint: DashMap::new(),
            by_trace: DashMap::new(),
        })
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            by_endpoint: DashMap::new(),
            by_trace: DashMap::new(),
        }
    }
}

#[async_trait]
impl TelemetryStore for MemoryStore {
    async fn store_metric(&self, record: TelemetryRecord) -> Result<()> {
        self.by_endpoint
            .entry(record.endpoint.clone())
            .or_default()
            .push(record.clone());
        self.by_trace
            .entry(record.trace_id.clone())
            .or_default()
            .push(record);
        Ok(())
    }

    async fn get_recent_metrics(
        &self,
        endpoint: Option<&str>,
        window: Duration,
    ) -> Result<Vec<TelemetryRecord>> {
        let cutoff = Utc::now() - window;

        let mut records: Vec<TelemetryRecord> = match endpoint {
            Some(ep) => self
                .by_endpoint
                .get(ep)
                .map(|entry| entry.clone())
                .unwrap_or_default(),
            None => self
                .by_endpoint
                .iter()
                .flat_map(|entry| entry.value().clone())
                .collect(),
        };

        records.retain(|r| r.timestamp >= cutoff);
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(records)
    }

    async fn get_metrics_by_trace(&self, trace_id: &str) -> Result<Vec<TelemetryRecord>> {
        let mut records = self
            .by_trace
            .get(trace_id)
            .map(|entry| entry.clone())
            .unwrap_or_default();
        records.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(records)
    }

    async fn get_endpoint_stats(&self, endpoint: &str, window: Duration) -> Result<EndpointStats> {
        let records = self.get_recent_metrics(Some(endpoint), window).await?;

        if records.is_empty() {
            return Ok(EndpointStats::default());
        }

        let request_count = records.len() as u64;
        let total_latency: f64 = records.iter().map(|r| r.latency_ms).sum();
        let error_count = records.iter().filter(|r| r.status_code >= 500).count() as u64;

        let mut status_distribution: HashMap<u16, u64> = HashMap::new();
        for record in &records {
            *status_distribution.entry(record.status_code).or_insert(0) += 1;
        }

        Ok(EndpointStats {
            request_count,
            avg_latency_ms: total_latency / request_count as f64,
            error_rate: error_count as f64 / request_count as f64,
            status_distribution,
        })
    }

    async fn get_all_endpoints(&self) -> Result<Vec<String>> {
        Ok(self.by_endpoint.iter().map(|e| e.key().clone()).collect())
    }
}

/// Create a storage backend based on the configuration. Only the in-memory
/// backend ships today; the match exists so a future durable backend slots
/// in without touching callers, the way the config already names it.
pub async fn create_store(config: &StorageConfig) -> Result<Arc<dyn TelemetryStore>> {
    match config.backend.as_str() {
        "memory" => {
            tracing::info!("storage backend: in-memory (data will not persist across restarts)");
            Ok(Arc::new(MemoryStore::new(config)?))
        }
        other => {
            anyhow::bail!(
                "storage backend '{}' is not implemented; use 'memory'",
                other
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(endpoint: &str, trace_id: &str, status: u16, latency_ms: f64) -> TelemetryRecord {
        TelemetryRecord::new(
            "svc",
            endpoint,
            "GET",
            status,
            latency_ms,
            if status >= 500 {
                Some("boom".into())
            } else {
                None
            },
            trace_id,
            Utc::now(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn stores_and_retrieves_by_endpoint() {
        let store = MemoryStore::default();
        store.store_metric(record("/a", "t1", 200, 10.0)).await.unwrap();
        store.store_metric(record("/a", "t2", 200, 20.0)).await.unwrap();
        store.store_metric(record("/b", "t3", 200, 5.0)).await.unwrap();

        let recent = store
            .get_recent_metrics(Some("/a"), Duration::minutes(5))
            .await
            .unwrap();
        assert_eq!(recent.len(), 2);
    }

    #[tokio::test]
    async fn recent_metrics_newest_first() {
        let store = MemoryStore::default();
        let mut r1 = record("/a", "t1", 200, 10.0);
        r1.timestamp = Utc::now() - Duration::seconds(10);
        let r2 = record("/a", "t2", 200, 10.0);
        store.store_metric(r1.clone()).await.unwrap();
        store.store_metric(r2.clone()).await.unwrap();

        let recent = store
            .get_recent_metrics(Some("/a"), Duration::minutes(5))
            .await
            .unwrap();
        assert_eq!(recent[0].id, r2.id);
        assert_eq!(recent[1].id, r1.id);
    }

    #[tokio::test]
    async fn metrics_by_trace_ascending() {
        let store = MemoryStore::default();
        let mut r1 = record("/a", "t1", 200, 10.0);
        r1.timestamp = Utc::now() - Duration::seconds(10);
        let r2 = record("/b", "t1", 200, 10.0);
        store.store_metric(r2.clone()).await.unwrap();
        store.store_metric(r1.clone()).await.unwrap();

        let trace = store.get_metrics_by_trace("t1").await.unwrap();
        assert_eq!(trace.len(), 2);
        assert_eq!(trace[0].id, r1.id);
        assert_eq!(trace[1].id, r2.id);
    }

    #[tokio::test]
    async fn endpoint_stats_zero_safe() {
        let store = MemoryStore::default();
        let stats = store
            .get_endpoint_stats("/nonexistent", Duration::minutes(5))
            .await
            .unwrap();
        assert_eq!(stats.request_count, 0);
        assert_eq!(stats.avg_latency_ms, 0.0);
        assert_eq!(stats.error_rate, 0.0);
    }

    #[tokio::test]
    async fn endpoint_stats_computed_over_window() {
        let store = MemoryStore::default();
        store.store_metric(record("/a", "t1", 200, 10.0)).await.unwrap();
        store.store_metric(record("/a", "t2", 500, 30.0)).await.unwrap();

        let stats = store
            .get_endpoint_stats("/a", Duration::minutes(5))
            .await
            .unwrap();
        assert_eq!(stats.request_count, 2);
        assert_eq!(stats.avg_latency_ms, 20.0);
        assert_eq!(stats.error_rate, 0.5);
        assert_eq!(stats.status_distribution.get(&200), Some(&1));
        assert_eq!(stats.status_distribution.get(&500), Some(&1));
    }

    #[tokio::test]
    async fn window_excludes_old_records() {
        let store = MemoryStore::default();
        let mut old = record("/a", "t1", 200, 10.0);
        old.timestamp = Utc::now() - Duration::hours(2);
        store.store_metric(old).await.unwrap();
        store.store_metric(record("/a", "t2", 200, 10.0)).await.unwrap();

        let recent = store
            .get_recent_metrics(Some("/a"), Duration::minutes(5))
            .await
            .unwrap();
        assert_eq!(recent.len(), 1);
    }

    #[tokio::test]
    async fn all_endpoints_lists_every_seen_endpoint() {
        let store = MemoryStore::default();
        store.store_metric(record("/a", "t1", 200, 10.0)).await.unwrap();
        store.store_metric(record("/b", "t2", 200, 10.0)).await.unwrap();

        let mut endpoints = store.get_all_endpoints().await.unwrap();
        endpoints.sort();
        assert_eq!(endpoints, vec!["/a".to_string(), "/b".to_string()]);
    }
}
