use crate::config::AnalyzerConfig;
use crate::store::TelemetryStore;
use crate::telemetry::is_reserved_endpoint;
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Total ordering over anomaly/incident severity, low to high.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// One detected deviation from learned-normal behavior.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Anomaly {
    LatencyAnomaly {
        endpoint: String,
        severity: Severity,
        baseline_ms: f64,
        current_ms: f64,
        deviation: f64,
        sample_size: usize,
        detected_at: DateTime<Utc>,
        trace_ids: Vec<String>,
    },
    ErrorSpike {
        endpoint: String,
        severity: Severity,
        error_rate: f64,
        error_count: usize,
        total_requests: usize,
        sample_errors: Vec<String>,
        detected_at: DateTime<Utc>,
        trace_ids: Vec<String>,
    },
    Silence {
        endpoint: String,
        severity: Severity,
        message: String,
        last_seen: Option<DateTime<Utc>>,
        detected_at: DateTime<Utc>,
    },
}

impl Anomaly {
    pub fn endpoint(&self) -> &str {
        match self {
            Anomaly::LatencyAnomaly { endpoint, .. } => endpoint,
            Anomaly::ErrorSpike { endpoint, .. } => endpoint,
            Anomaly::Silence { endpoint, .. } => endpoint,
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            Anomaly::LatencyAnomaly { severity, .. } => *severity,
            Anomaly::ErrorSpike { severity, .. } => *severity,
            Anomaly::Silence { severity, .. } => *severity,
        }
    }

    pub fn detected_at(&self) -> DateTime<Utc> {
        match self {
            Anomaly::LatencyAnomaly { detected_at, .. } => *detected_at,
            Anomaly::ErrorSpike { detected_at, .. } => *detected_at,
            Anomaly::Silence { detected_at, .. } => *detected_at,
        }
    }

    /// trace ids this anomaly carries evidence for, if any.
    pub fn trace_ids(&self) -> &[String] {
        match self {
            Anomaly::LatencyAnomaly { trace_ids, .. } => trace_ids,
            Anomaly::ErrorSpike { trace_ids, .. } => trace_ids,
            Anomaly::Silence { .. } => &[],
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Anomaly::LatencyAnomaly { .. } => "latency_anomaly",
            Anomaly::ErrorSpike { .. } => "error_spike",
            Anomaly::Silence { .. } => "timeout_issue",
        }
    }
}

/// Output of one `run_analysis` pass.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisTick {
    pub timestamp: DateTime<Utc>,
    pub anomalies: Vec<Anomaly>,
    pub baselines: HashMap<String, f64>,
}

/// Health snapshot for a single endpoint, folded in from the original
/// platform's endpoint-health surface (spec names it inline in the Read API,
/// this is the function that computes it).
#[derive(Debug, Clone, Serialize)]
pub struct EndpointHealth {
    pub endpoint: String,
    pub health_score: f64,
    pub status: &'static str,
    pub current_metrics: crate::store::EndpointStats,
    pub baseline_latency_ms: Option<f64>,
}

/// Self-learning anomaly detection engine. Owns the baseline map exclusively;
/// outside readers only ever see a cloned snapshot.
pub struct AnomalyAnalyzer {
    store: Arc<dyn TelemetryStore>,
    baselines: RwLock<HashMap<String, f64>>,
    config: AnalyzerConfig,
}

impl AnomalyAnalyzer {
    pub fn new(store: Arc<dyn TelemetryStore>, config: AnalyzerConfig) -> Self {
        Self {
            store,
            baselines: RwLock::new(HashMap::new()),
            config,
        }
    }

    pub async fn baselines(&self) -> HashMap<String, f64> {
        self.baselines.read().await.clone()
    }

    /// Updates the per-endpoint EWMA latency baseline from successful (2xx)
    /// requests over the baseline window. Endpoints without enough samples
    /// keep whatever baseline (or absence of one) they already had.
    pub async fn learn_baselines(&self) -> Result<()> {
        let endpoints = self.store.get_all_endpoints().await?;
        let window = Duration::minutes(self.config.baseline_window_minutes);

        for endpoint in endpoints {
            if is_reserved_endpoint(&endpoint) {
                continue;
            }

            let metrics = self.store.get_recent_metrics(Some(&endpoint), window).await?;
            let successful: Vec<_> = metrics.iter().filter(|m| m.is_success()).collect();

            if successful.len() < self.config.min_samples_for_baseline {
                continue;
            }

            let avg_latency: f64 =
                successful.iter().map(|m| m.latency_ms).sum::<f64>() / successful.len() as f64;

            let mut baselines = self.baselines.write().await;
            baselines
                .entry(endpoint)
                .and_modify(|baseline| *baseline = 0.9 * *baseline + 0.1 * avg_latency)
                .or_insert(avg_latency);
        }

        Ok(())
    }

    /// Recent average latency more than `latency_multiplier`x the baseline.
    /// Note this window is not filtered to successes only, unlike the
    /// baseline window itself — a burst of 5xx responses can inflate the
    /// current average and trip this detector, which is the intended
    /// (if asymmetric) behavior.
    pub async fn detect_latency_anomalies(&self) -> Result<Vec<Anomaly>> {
        let mut anomalies = Vec::new();
        let endpoints = self.store.get_all_endpoints().await?;
        let baselines = self.baselines.read().await.clone();
        let window = Duration::minutes(self.config.analysis_window_minutes);

        for endpoint in endpoints {
            if is_reserved_endpoint(&endpoint) {
                continue;
            }

            let Some(&baseline) = baselines.get(&endpoint) else {
                continue;
            };

            let recent = self.store.get_recent_metrics(Some(&endpoint), window).await?;
            if recent.is_empty() {
                continue;
            }

            let current_avg: f64 =
                recent.iter().map(|m| m.latency_ms).sum::<f64>() / recent.len() as f64;

            if current_avg > baseline * self.config.latency_multiplier {
                let severity = if current_avg > baseline * 5.0 {
                    Severity::High
                } else {
                    Severity::Medium
                };

                let mut trace_ids: Vec<String> =
                    recent.iter().map(|m| m.trace_id.clone()).collect();
                trace_ids.sort();
                trace_ids.dedup();

                anomalies.push(Anomaly::LatencyAnomaly {
                    endpoint,
                    severity,
                    baseline_ms: round2(baseline),
                    current_ms: round2(current_avg),
                    deviation: round2(current_avg / baseline),
                    sample_size: recent.len(),
                    detected_at: Utc::now(),
                    trace_ids,
                });
            }
        }

        Ok(anomalies)
    }

    /// 5xx error rate over the analysis window exceeding the configured
    /// threshold. Requires at least 5 samples so a single failed request on a
    /// quiet endpoint doesn't read as a spike.
    pub async fn detect_error_spikes(&self) -> Result<Vec<Anomaly>> {
        let mut anomalies = Vec::new();
        let endpoints = self.store.get_all_endpoints().await?;
        let window = Duration::minutes(self.config.analysis_window_minutes);

        for endpoint in endpoints {
            if is_reserved_endpoint(&endpoint) {
                continue;
            }

            let recent = self.store.get_recent_metrics(Some(&endpoint), window).await?;
            if recent.len() < 5 {
                continue;
            }

            let error_count = recent.iter().filter(|m| m.is_server_error()).count();
            let error_rate = error_count as f64 / recent.len() as f64;

            if error_rate > self.config.error_rate_threshold {
                let severity = if error_rate > 0.5 {
                    Severity::Critical
                } else {
                    Severity::High
                };

                let sample_errors: Vec<String> = recent
                    .iter()
                    .filter(|m| m.is_server_error())
                    .filter_map(|m| m.error_message.as_deref())
                    .map(|msg| msg.chars().take(200).collect())
                    .take(3)
                    .collect();

                let mut trace_ids: Vec<String> = recent
                    .iter()
                    .filter(|m| m.is_server_error())
                    .map(|m| m.trace_id.clone())
                    .collect();
                trace_ids.sort();
                trace_ids.dedup();

                anomalies.push(Anomaly::ErrorSpike {
                    endpoint,
                    severity,
                    error_rate: round2(error_rate),
                    error_count,
                    total_requests: recent.len(),
                    sample_errors,
                    detected_at: Utc::now(),
                    trace_ids,
                });
            }
        }

        Ok(anomalies)
    }

    /// Endpoints that went quiet: no requests in the last 5 minutes despite
    /// more than 10 requests in the last hour. Timeouts often never produce
    /// an error response at all, so absence of traffic is its own signal.
    pub async fn detect_silence(&self) -> Result<Vec<Anomaly>> {
        let mut anomalies = Vec::new();
        let endpoints = self.store.get_all_endpoints().await?;

        for endpoint in endpoints {
            if is_reserved_endpoint(&endpoint) {
                continue;
            }

            let very_recent = self
                .store
                .get_recent_metrics(Some(&endpoint), Duration::minutes(5))
                .await?;
            let historical = self
                .store
                .get_recent_metrics(Some(&endpoint), Duration::minutes(60))
                .await?;

            if very_recent.is_empty() && historical.len() > 10 {
                anomalies.push(Anomaly::Silence {
                    endpoint,
                    severity: Severity::Medium,
                    message: "endpoint stopped responding (no requests in last 5 minutes)"
                        .to_string(),
                    last_seen: historical.first().map(|m| m.timestamp),
                    detected_at: Utc::now(),
                });
            }
        }

        Ok(anomalies)
    }

    /// Runs one full detection cycle: learn, then all three detectors.
    /// Intended to be called periodically by the scheduler.
    pub async fn run_analysis(&self) -> Result<AnalysisTick> {
        self.learn_baselines().await?;

        let mut anomalies = self.detect_latency_anomalies().await?;
        anomalies.extend(self.detect_error_spikes().await?);
        anomalies.extend(self.detect_silence().await?);

        Ok(AnalysisTick {
            timestamp: Utc::now(),
            anomalies,
            baselines: self.baselines().await,
        })
    }

    pub async fn get_endpoint_health(&self, endpoint: &str) -> Result<EndpointHealth> {
        let stats = self
            .store
            .get_endpoint_stats(endpoint, Duration::minutes(60))
            .await?;
        let baseline = self.baselines.read().await.get(endpoint).copied();

        let mut health_score = 100.0;
        if stats.error_rate > 0.0 {
            health_score -= stats.error_rate * 50.0;
        }
        if let Some(baseline) = baseline {
            if stats.avg_latency_ms > 0.0 && baseline > 0.0 {
                let ratio = stats.avg_latency_ms / baseline;
                if ratio > 2.0 {
                    health_score -= 30.0;
                }
            }
        }
        health_score = health_score.max(0.0);

        let status = if health_score > 80.0 {
            "healthy"
        } else if health_score > 50.0 {
            "degraded"
        } else {
            "critical"
        };

        Ok(EndpointHealth {
            endpoint: endpoint.to_string(),
            health_score: round2(health_score),
            status,
            current_metrics: stats,
            baseline_latency_ms: baseline.map(round2),
        })
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::telemetry::TelemetryRecord;

    fn record(endpoint: &str, status: u16, latency_ms: f64, trace_id: &str) -> TelemetryRecord {
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

    async fn seed(store: &MemoryStore, endpoint: &str, n: usize, latency_ms: f64) {
        for i in 0..n {
            store
                .store_metric(record(endpoint, 200, latency_ms, &format!("t{i}")))
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn pure_baseline_no_anomalies() {
        let store = Arc::new(MemoryStore::default());
        seed(&store, "/checkout", 20, 50.0).await;

        let analyzer = AnomalyAnalyzer::new(store, AnalyzerConfig::default());
        let tick = analyzer.run_analysis().await.unwrap();

        assert!(tick.anomalies.is_empty());
        assert_eq!(tick.baselines.get("/checkout"), Some(&50.0));
    }

    #[tokio::test]
    async fn sub_threshold_sample_count_builds_no_baseline() {
        let store = Arc::new(MemoryStore::default());
        seed(&store, "/checkout", 9, 50.0).await;

        let analyzer = AnomalyAnalyzer::new(store, AnalyzerConfig::default());
        analyzer.learn_baselines().await.unwrap();

        assert!(analyzer.baselines().await.is_empty());
    }

    #[tokio::test]
    async fn latency_anomaly_detected_above_multiplier() {
        let store = Arc::new(MemoryStore::default());
        seed(&store, "/checkout", 20, 50.0).await;

        let analyzer = AnomalyAnalyzer::new(store.clone(), AnalyzerConfig::default());
        analyzer.learn_baselines().await.unwrap();

        // current latency way above baseline*3 but below baseline*5 -> medium
        for i in 0..5 {
            store
                .store_metric(record("/checkout", 200, 200.0, &format!("slow{i}")))
                .await
                .unwrap();
        }

        let anomalies = analyzer.detect_latency_anomalies().await.unwrap();
        assert_eq!(anomalies.len(), 1);
        match &anomalies[0] {
            Anomaly::LatencyAnomaly { severity, .. } => assert_eq!(*severity, Severity::Medium),
            _ => panic!("expected latency anomaly"),
        }
    }

    #[tokio::test]
    async fn latency_anomaly_escalates_to_high_above_5x() {
        let store = Arc::new(MemoryStore::default());
        seed(&store, "/checkout", 20, 50.0).await;

        let analyzer = AnomalyAnalyzer::new(store.clone(), AnalyzerConfig::default());
        analyzer.learn_baselines().await.unwrap();

        for i in 0..5 {
            store
                .store_metric(record("/checkout", 200, 300.0, &format!("slow{i}")))
                .await
                .unwrap();
        }

        let anomalies = analyzer.detect_latency_anomalies().await.unwrap();
        match &anomalies[0] {
            Anomaly::LatencyAnomaly { severity, .. } => assert_eq!(*severity, Severity::High),
            _ => panic!("expected latency anomaly"),
        }
    }

    #[tokio::test]
    async fn error_spike_detected_with_critical_above_half() {
        let store = Arc::new(MemoryStore::default());
        for i in 0..10 {
            let status = if i < 6 { 500 } else { 200 };
            store
                .store_metric(record("/payment", status, 20.0, &format!("t{i}")))
                .await
                .unwrap();
        }

        let analyzer = AnomalyAnalyzer::new(store, AnalyzerConfig::default());
        let anomalies = analyzer.detect_error_spikes().await.unwrap();

        assert_eq!(anomalies.len(), 1);
        match &anomalies[0] {
            Anomaly::ErrorSpike {
                severity,
                error_count,
                ..
            } => {
                assert_eq!(*severity, Severity::Critical);
                assert_eq!(*error_count, 6);
            }
            _ => panic!("expected error spike"),
        }
    }

    #[tokio::test]
    async fn error_rate_at_exact_threshold_does_not_trigger() {
        let store = Arc::new(MemoryStore::default());
        // 20% error rate exactly (threshold is ">", not ">=")
        for i in 0..10 {
            let status = if i < 2 { 500 } else { 200 };
            store
                .store_metric(record("/payment", status, 20.0, &format!("t{i}")))
                .await
                .unwrap();
        }

        let analyzer = AnomalyAnalyzer::new(store, AnalyzerConfig::default());
        let anomalies = analyzer.detect_error_spikes().await.unwrap();
        assert!(anomalies.is_empty());
    }

    #[tokio::test]
    async fn silence_requires_prior_activity() {
        let store = Arc::new(MemoryStore::default());
        let mut old = record("/reports", 200, 20.0, "t1");
        old.timestamp = Utc::now() - Duration::minutes(30);
        for i in 0..12 {
            let mut r = old.clone();
            r.trace_id = format!("t{i}");
            store.store_metric(r).await.unwrap();
        }

        let analyzer = AnomalyAnalyzer::new(store, AnalyzerConfig::default());
        let anomalies = analyzer.detect_silence().await.unwrap();

        assert_eq!(anomalies.len(), 1);
        assert!(matches!(anomalies[0], Anomaly::Silence { .. }));
    }

    #[tokio::test]
    async fn silence_not_raised_for_new_endpoint_with_little_history() {
        let store = Arc::new(MemoryStore::default());
        let mut old = record("/reports", 200, 20.0, "t1");
        old.timestamp = Utc::now() - Duration::minutes(30);
        store.store_metric(old).await.unwrap();

        let analyzer = AnomalyAnalyzer::new(store, AnalyzerConfig::default());
        let anomalies = analyzer.detect_silence().await.unwrap();
        assert!(anomalies.is_empty());
    }

    #[tokio::test]
    async fn reserved_endpoints_never_analyzed() {
        let store = Arc::new(MemoryStore::default());
        seed(&store, "/aiops/metrics", 20, 5000.0).await;

        let analyzer = AnomalyAnalyzer::new(store, AnalyzerConfig::default());
        let tick = analyzer.run_analysis().await.unwrap();
        assert!(tick.anomalies.is_empty());
        assert!(tick.baselines.is_empty());
    }

    #[tokio::test]
    async fn endpoint_health_degrades_with_errors() {
        let store = Arc::new(MemoryStore::default());
        for i in 0..10 {
            let status = if i < 5 { 500 } else { 200 };
            store
                .store_metric(record("/payment", status, 20.0, &format!("t{i}")))
                .await
                .unwrap();
        }

        let analyzer = AnomalyAnalyzer::new(store, AnalyzerConfig::default());
        let health = analyzer.get_endpoint_health("/payment").await.unwrap();
        assert_eq!(health.status, "degraded");
        assert!(health.health_score < 100.0);
    }
}
