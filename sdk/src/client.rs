use crate::context::{current_trace_id, TraceContext, TRACE_CONTEXT};
use axum::{extract::Request, http::HeaderMap, middleware::Next, response::Response};
use serde::Serialize;
use std::cell::RefCell;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

pub const TRACE_ID_HEADER: &str = "x-trace-id";

#[derive(Debug, Serialize)]
struct IngestPayload<'a> {
    service_name: &'a str,
    endpoint: &'a str,
    method: &'a str,
    status_code: u16,
    latency_ms: f64,
    error_message: Option<String>,
}

/// Wraps a `reqwest::Client` with automatic trace-id propagation and
/// telemetry reporting to an AIOps server's ingest endpoint. One client per
/// monitored service, installed once as Axum middleware and state.
#[derive(Clone)]
pub struct PropagatingClient {
    aiops_endpoint: String,
    service_name: String,
    http_client: reqwest::Client,
}

impl PropagatingClient {
    pub fn new(aiops_endpoint: &str, service_name: &str) -> Self {
        Self {
            aiops_endpoint: aiops_endpoint.trim_end_matches('/').to_string(),
            service_name: service_name.to_string(),
            http_client: reqwest::Client::new(),
        }
    }

    /// Axum middleware: mints or forwards `X-Trace-ID`, runs the rest of the
    /// request inside that trace context, echoes the header back, and
    /// reports the completed request to the AIOps server.
    pub async fn middleware(
        client: Arc<Self>,
        headers: HeaderMap,
        request: Request,
        next: Next,
    ) -> Response {
        let trace_id = headers
            .get(TRACE_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let method = request.method().to_string();
        let endpoint = request.uri().path().to_string();
        let start = Instant::now();

        let ctx = RefCell::new(TraceContext::new(trace_id.clone()));
        let mut response = TRACE_CONTEXT.scope(ctx, next.run(request)).await;

        let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
        let status = response.status().as_u16();

        if let Ok(value) = axum::http::HeaderValue::from_str(&trace_id) {
            response.headers_mut().insert(TRACE_ID_HEADER, value);
        }

        let error_message = if status >= 500 {
            Some(format!("{} {} returned {}", method, endpoint, status))
        } else {
            None
        };

        client.report(&endpoint, &method, status, latency_ms, error_message);

        response
    }

    /// Forwards the current request's trace id (if any) onto an outbound
    /// `reqwest::RequestBuilder`.
    pub fn propagate(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match current_trace_id() {
            Some(trace_id) => builder.header(TRACE_ID_HEADER, trace_id),
            None => builder,
        }
    }

    pub fn get(&self, url: &str) -> reqwest::RequestBuilder {
        self.propagate(self.http_client.get(url))
    }

    pub fn post(&self, url: &str) -> reqwest::RequestBuilder {
        self.propagate(self.http_client.post(url))
    }

    /// Fire-and-forget report of one completed request to the AIOps ingest
    /// endpoint. Failures are logged and otherwise swallowed: a monitored
    /// service must never fail a request because telemetry reporting failed.
    fn report(
        &self,
        endpoint: &str,
        method: &str,
        status_code: u16,
        latency_ms: f64,
        error_message: Option<String>,
    ) {
        let url = format!("{}/events", self.aiops_endpoint);
        let payload = IngestPayload {
            service_name: &self.service_name,
            endpoint,
            method,
            status_code,
            latency_ms,
            error_message,
        };
        let client = self.http_client.clone();
        let body = serde_json::to_value(&payload).unwrap_or(serde_json::Value::Null);

        tokio::spawn(async move {
            if let Err(e) = client.post(url).json(&body).send().await {
                eprintln!("[aiops-sdk] failed to report telemetry: {}", e);
            }
        });
    }
}
