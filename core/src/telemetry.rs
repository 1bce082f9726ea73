use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single observed request/response, the unit the rest of the engine operates on.
///
/// One record is produced per completed HTTP request by the ingest instrumentation
/// layer; the store never merges or mutates a record after it is written.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TelemetryRecord {
    pub id: Uuid,
    pub service_name: String,
    pub endpoint: String,
    pub method: String,
    pub status_code: u16,
    pub latency_ms: f64,
    pub error_message: Option<String>,
    pub trace_id: String,
    pub timestamp: DateTime<Utc>,
}

impl TelemetryRecord {
    /// Builds a record, rejecting shapes the rest of the engine cannot reason about.
    pub fn new(
        service_name: impl Into<String>,
        endpoint: impl Into<String>,
        method: impl Into<String>,
        status_code: u16,
        latency_ms: f64,
        error_message: Option<String>,
        trace_id: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Result<Self, String> {
        let trace_id = trace_id.into();
        if trace_id.trim().is_empty() {
            return Err("trace_id must not be empty".to_string());
        }
        if latency_ms < 0.0 {
            return Err("latency_ms must not be negative".to_string());
        }
        if error_message.is_some() && status_code < 500 {
            return Err("error_message requires a 5xx status_code".to_string());
        }

        Ok(Self {
            id: Uuid::new_v4(),
            service_name: service_name.into(),
            endpoint: endpoint.into(),
            method: method.into(),
            status_code,
            latency_ms,
            error_message,
            trace_id,
            timestamp,
        })
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    pub fn is_server_error(&self) -> bool {
        self.status_code >= 500
    }

    /// A request is "failed" for root-cause purposes if the server errored or the
    /// call ran long enough to be treated as a functional failure regardless of status.
    pub fn is_failure(&self) -> bool {
        self.status_code >= 500 || self.latency_ms > 5000.0
    }
}

/// Paths the analyzer and RCA engine never treat as application endpoints.
pub fn is_reserved_endpoint(endpoint: &str) -> bool {
    endpoint.starts_with("/aiops/") || endpoint.starts_with("/simulate/") || endpoint == "/health"
}
