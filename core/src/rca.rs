use crate::analyzer::{Anomaly, Severity};
use crate::config::RcaConfig;
use crate::store::TelemetryStore;
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IncidentStatus {
    Active,
    Resolved,
}

/// One sample trace's contribution to the root-cause vote.
#[derive(Debug, Clone, Serialize)]
pub struct SampleTraceDetail {
    pub trace_id: String,
    pub root_endpoint: String,
    pub root_status: u16,
    pub affected_chain: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RootCause {
    pub endpoint: String,
    pub confidence: f64,
    pub description: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TraceCorrelation {
    pub total_traces: usize,
    pub sample_traces: Vec<SampleTraceDetail>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Incident {
    pub id: String,
    pub severity: Severity,
    pub status: IncidentStatus,
    pub title: String,
    pub root_cause: RootCause,
    pub affected_endpoints: Vec<String>,
    pub anomalies: Vec<Anomaly>,
    pub trace_correlation: Option<TraceCorrelation>,
    pub first_detected: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

struct TraceAnalysis {
    root_endpoint: String,
    root_cause_frequency: usize,
    affected_endpoints: Vec<String>,
    trace_analysis: Vec<SampleTraceDetail>,
    total_traces_analyzed: usize,
}

/// Correlates anomalies into incidents and owns the incident table.
/// Single-owner (`DashMap`), mutated only inside `correlate`.
pub struct RcaEngine {
    store: Arc<dyn TelemetryStore>,
    incidents: DashMap<String, Incident>,
    incident_counter: AtomicU64,
    config: RcaConfig,
}

impl RcaEngine {
    pub fn new(store: Arc<dyn TelemetryStore>, config: RcaConfig) -> Self {
        Self {
            store,
            incidents: DashMap::new(),
            incident_counter: AtomicU64::new(0),
            config,
        }
    }

    /// Groups anomalies by temporal proximity, analyzes trace correlation per
    /// group and stores one incident per group. Returns the incidents created
    /// or updated by this call.
    pub async fn correlate(&self, anomalies: Vec<Anomaly>) -> Result<Vec<Incident>> {
        if anomalies.is_empty() {
            return Ok(Vec::new());
        }

        let groups = group_by_time(anomalies, self.config.correlation_window_minutes);
        let mut incidents = Vec::with_capacity(groups.len());

        for group in groups {
            let mut trace_ids: HashSet<String> = HashSet::new();
            for anomaly in &group {
                trace_ids.extend(anomaly.trace_ids().iter().cloned());
            }

            let incident = if trace_ids.is_empty() {
                self.create_simple_incident(group)
            } else {
                let rca = self.analyze_traces(trace_ids, &group).await?;
                self.create_incident_with_rca(group, rca)
            };

            self.incidents.insert(incident.id.clone(), incident.clone());
            incidents.push(incident);
        }

        Ok(incidents)
    }

    async fn analyze_traces(
        &self,
        trace_ids: HashSet<String>,
        anomalies: &[Anomaly],
    ) -> Result<TraceAnalysis> {
        // BTreeMap keeps iteration order deterministic so ties in the vote
        // resolve to the first endpoint seen in sorted trace-id order.
        let mut root_causes: BTreeMap<String, usize> = BTreeMap::new();
        let mut affected_endpoints: HashSet<String> = HashSet::new();
        let mut trace_details = Vec::new();

        let mut sorted_trace_ids: Vec<String> = trace_ids.into_iter().collect();
        sorted_trace_ids.sort();

        for trace_id in &sorted_trace_ids {
            let mut trace_metrics = self.store.get_metrics_by_trace(trace_id).await?;
            if trace_metrics.is_empty() {
                continue;
            }
            trace_metrics.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));

            let first_failure = trace_metrics.iter().find(|m| m.is_failure());

            if let Some(first_failure) = first_failure {
                *root_causes.entry(first_failure.endpoint.clone()).or_insert(0) += 1;

                for metric in &trace_metrics {
                    affected_endpoints.insert(metric.endpoint.clone());
                }

                trace_details.push(SampleTraceDetail {
                    trace_id: trace_id.clone(),
                    root_endpoint: first_failure.endpoint.clone(),
                    root_status: first_failure.status_code,
                    affected_chain: trace_metrics.iter().map(|m| m.endpoint.clone()).collect(),
                });
            }
        }

        let (root_endpoint, root_cause_frequency) = root_causes
            .iter()
            .max_by_key(|(_, count)| **count)
            .map(|(endpoint, count)| (endpoint.clone(), *count))
            .unwrap_or_else(|| {
                let fallback = anomalies
                    .first()
                    .map(|a| a.endpoint().to_string())
                    .unwrap_or_else(|| "unknown".to_string());
                (fallback, 0)
            });

        let mut affected_endpoints: Vec<String> = affected_endpoints.into_iter().collect();
        affected_endpoints.sort();
        trace_details.truncate(5);
        let total_traces_analyzed = sorted_trace_ids.len();

        Ok(TraceAnalysis {
            root_endpoint,
            root_cause_frequency,
            affected_endpoints,
            trace_analysis: trace_details,
            total_traces_analyzed,
        })
    }

    fn next_incident_id(&self) -> String {
        let n = self.incident_counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("INC-{}-{}", Utc::now().timestamp(), n)
    }

    fn create_incident_with_rca(&self, anomalies: Vec<Anomaly>, rca: TraceAnalysis) -> Incident {
        let severity = anomalies
            .iter()
            .map(|a| a.severity())
            .max()
            .unwrap_or(Severity::Medium);

        let issue_type = if anomalies.iter().any(|a| a.kind() == "error_spike") {
            "Error spike"
        } else if anomalies.iter().any(|a| a.kind() == "latency_anomaly") {
            "Latency spike"
        } else {
            "Service degradation"
        };

        let confidence = rca.root_cause_frequency as f64 / rca.total_traces_analyzed.max(1) as f64;
        let description = generate_rca_description(&anomalies, &rca);
        let first_detected = anomalies
            .iter()
            .map(|a| a.detected_at())
            .min()
            .unwrap_or_else(Utc::now);

        Incident {
            id: self.next_incident_id(),
            severity,
            status: IncidentStatus::Active,
            title: format!("{} detected in {}", issue_type, rca.root_endpoint),
            root_cause: RootCause {
                endpoint: rca.root_endpoint.clone(),
                confidence: round2(confidence),
                description,
            },
            affected_endpoints: rca.affected_endpoints,
            anomalies,
            trace_correlation: Some(TraceCorrelation {
                total_traces: rca.total_traces_analyzed,
                sample_traces: rca.trace_analysis,
            }),
            first_detected,
            last_updated: Utc::now(),
            resolved_at: None,
        }
    }

    fn create_simple_incident(&self, anomalies: Vec<Anomaly>) -> Incident {
        let anomaly = &anomalies[0];
        let endpoint = anomaly.endpoint().to_string();
        let description = format!("{} detected", anomaly.kind());
        let first_detected = anomaly.detected_at();
        let severity = anomaly.severity();

        Incident {
            id: self.next_incident_id(),
            severity,
            status: IncidentStatus::Active,
            title: format!("Anomaly detected in {}", endpoint),
            root_cause: RootCause {
                endpoint: endpoint.clone(),
                confidence: 1.0,
                description,
            },
            affected_endpoints: vec![endpoint],
            anomalies,
            trace_correlation: None,
            first_detected,
            last_updated: Utc::now(),
            resolved_at: None,
        }
    }

    /// Incidents still within the TTL window and not manually resolved,
    /// newest-severity-first then oldest-first-detected.
    pub fn get_active_incidents(&self) -> Vec<Incident> {
        let cutoff = Utc::now() - Duration::minutes(self.config.incident_ttl_minutes);

        let mut active: Vec<Incident> = self
            .incidents
            .iter()
            .map(|entry| entry.value().clone())
            .filter(|i| i.status == IncidentStatus::Active && i.last_updated > cutoff)
            .collect();

        active.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then(a.first_detected.cmp(&b.first_detected))
        });

        active
    }

    /// Returns an incident regardless of TTL expiry — TTL only governs the
    /// "active" listing, it never deletes the incident itself.
    pub fn get_incident_by_id(&self, id: &str) -> Option<Incident> {
        self.incidents.get(id).map(|entry| entry.value().clone())
    }

    pub fn resolve_incident(&self, id: &str) -> Option<Incident> {
        self.incidents.get_mut(id).map(|mut entry| {
            entry.status = IncidentStatus::Resolved;
            entry.resolved_at = Some(Utc::now());
            entry.value().clone()
        })
    }
}

/// Groups anomalies anchored on the first member of each group: every member
/// within `window` minutes of the group's *first* anomaly joins the group,
/// not the most recently added one. A slow-building trail of anomalies can
/// therefore split across groups once it drifts past the anchor — this is
/// the original algorithm's behavior, preserved as specified.
fn group_by_time(mut anomalies: Vec<Anomaly>, window_minutes: i64) -> Vec<Vec<Anomaly>> {
    anomalies.sort_by_key(|a| a.detected_at());

    let mut groups: Vec<Vec<Anomaly>> = Vec::new();
    let mut current_group = vec![anomalies.remove(0)];
    let mut group_start = current_group[0].detected_at();

    for anomaly in anomalies {
        if (anomaly.detected_at() - group_start) < Duration::minutes(window_minutes) {
            current_group.push(anomaly);
        } else {
            group_start = anomaly.detected_at();
            groups.push(std::mem::replace(&mut current_group, vec![anomaly]));
        }
    }
    groups.push(current_group);

    groups
}

fn generate_rca_description(anomalies: &[Anomaly], rca: &TraceAnalysis) -> String {
    let root_anomaly = anomalies.iter().find(|a| a.endpoint() == rca.root_endpoint);

    let Some(root_anomaly) = root_anomaly else {
        return format!("Issue detected in {}", rca.root_endpoint);
    };

    match root_anomaly {
        Anomaly::LatencyAnomaly {
            baseline_ms,
            current_ms,
            deviation,
            ..
        } => format!(
            "Latency spike: {:.0}ms (baseline: {:.0}ms, {:.1}x slower)",
            current_ms, baseline_ms, deviation
        ),
        Anomaly::ErrorSpike {
            error_rate,
            error_count,
            ..
        } => format!(
            "Error spike: {:.0}% error rate ({} failures)",
            error_rate * 100.0,
            error_count
        ),
        Anomaly::Silence { .. } => "Endpoint stopped responding".to_string(),
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

    fn latency_anomaly(endpoint: &str, trace_ids: Vec<&str>, detected_at: DateTime<Utc>) -> Anomaly {
        Anomaly::LatencyAnomaly {
            endpoint: endpoint.to_string(),
            severity: Severity::High,
            baseline_ms: 50.0,
            current_ms: 300.0,
            deviation: 6.0,
            sample_size: 5,
            detected_at,
            trace_ids: trace_ids.into_iter().map(String::from).collect(),
        }
    }

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

    #[tokio::test]
    async fn simple_incident_when_no_trace_ids() {
        let store = Arc::new(MemoryStore::default());
        let engine = RcaEngine::new(store, RcaConfig::default());

        let anomaly = Anomaly::Silence {
            endpoint: "/reports".to_string(),
            severity: Severity::Medium,
            message: "quiet".to_string(),
            last_seen: None,
            detected_at: Utc::now(),
        };

        let incidents = engine.correlate(vec![anomaly]).await.unwrap();
        assert_eq!(incidents.len(), 1);
        assert!(incidents[0].trace_correlation.is_none());
        assert_eq!(incidents[0].root_cause.confidence, 1.0);
    }

    #[tokio::test]
    async fn trace_based_rca_picks_root_endpoint() {
        let store = Arc::new(MemoryStore::default());
        // trace t1: checkout (200) -> payment (500, fails)
        store.store_metric(record("/checkout", 200, 20.0, "t1")).await.unwrap();
        let mut payment_fail = record("/payment", 500, 20.0, "t1");
        payment_fail.timestamp = Utc::now() + Duration::milliseconds(5);
        store.store_metric(payment_fail).await.unwrap();

        let engine = RcaEngine::new(store, RcaConfig::default());
        let now = Utc::now();
        let anomalies = vec![
            latency_anomaly("/checkout", vec!["t1"], now),
            Anomaly::ErrorSpike {
                endpoint: "/payment".to_string(),
                severity: Severity::Critical,
                error_rate: 0.6,
                error_count: 6,
                total_requests: 10,
                sample_errors: vec!["boom".to_string()],
                detected_at: now,
                trace_ids: vec!["t1".to_string()],
            },
        ];

        let incidents = engine.correlate(anomalies).await.unwrap();
        assert_eq!(incidents.len(), 1);
        assert_eq!(incidents[0].root_cause.endpoint, "/payment");
        assert_eq!(incidents[0].severity, Severity::Critical);
        assert!(incidents[0].affected_endpoints.contains(&"/checkout".to_string()));
    }

    #[tokio::test]
    async fn groups_split_when_anchor_drifts_past_window() {
        let store = Arc::new(MemoryStore::default());
        let engine = RcaEngine::new(store, RcaConfig::default());

        let t0 = Utc::now();
        let anomalies = vec![
            latency_anomaly("/a", vec![], t0),
            latency_anomaly("/a", vec![], t0 + Duration::minutes(6)),
        ];

        let incidents = engine.correlate(anomalies).await.unwrap();
        assert_eq!(incidents.len(), 2);
    }

    #[tokio::test]
    async fn active_listing_excludes_expired_and_resolved() {
        let store = Arc::new(MemoryStore::default());
        let engine = RcaEngine::new(store, RcaConfig::default());

        let anomaly = Anomaly::Silence {
            endpoint: "/reports".to_string(),
            severity: Severity::Medium,
            message: "quiet".to_string(),
            last_seen: None,
            detected_at: Utc::now(),
        };
        let incidents = engine.correlate(vec![anomaly]).await.unwrap();
        let id = incidents[0].id.clone();

        assert_eq!(engine.get_active_incidents().len(), 1);
        engine.resolve_incident(&id);
        assert_eq!(engine.get_active_incidents().len(), 0);
        // still retrievable by id after resolution
        assert!(engine.get_incident_by_id(&id).is_some());
    }

    #[tokio::test]
    async fn incident_ids_are_unique_across_calls() {
        let store = Arc::new(MemoryStore::default());
        let engine = RcaEngine::new(store, RcaConfig::default());

        let a1 = Anomaly::Silence {
            endpoint: "/a".to_string(),
            severity: Severity::Medium,
            message: "quiet".to_string(),
            last_seen: None,
            detected_at: Utc::now(),
        };
        let a2 = Anomaly::Silence {
            endpoint: "/b".to_string(),
            severity: Severity::Medium,
            message: "quiet".to_string(),
            last_seen: None,
            detected_at: Utc::now() + Duration::minutes(10),
        };

        let i1 = engine.correlate(vec![a1]).await.unwrap();
        let i2 = engine.correlate(vec![a2]).await.unwrap();
        assert_ne!(i1[0].id, i2[0].id);
    }
}
