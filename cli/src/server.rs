use aiops_core::error::ServiceError;
use aiops_core::rca::Incident;
use aiops_core::store::TelemetryStore;
use aiops_core::telemetry::TelemetryRecord;
use aiops_core::trace::{trace_id_from_header, TRACE_ID_HEADER};
use aiops_core::{AiopsEngine, Config};
use anyhow::Result;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use axum::http::Request;
use chrono::Utc;
use governor::{clock::DefaultClock, state::keyed::DefaultKeyedStateStore, Quota, RateLimiter};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};

#[derive(Clone)]
pub struct AppState {
    engine: Arc<AiopsEngine>,
}

type KeyedRateLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

#[derive(Debug, Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    data: Option<T>,
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

impl ApiResponse<()> {
    fn error_response(status: StatusCode, message: String) -> Response {
        let body = ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(message),
        };
        (status, Json(body)).into_response()
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        match self {
            ServiceError::NotFound(msg) => ApiResponse::error_response(StatusCode::NOT_FOUND, msg),
            ServiceError::BadRequest(msg) => {
                ApiResponse::error_response(StatusCode::BAD_REQUEST, msg)
            }
            ServiceError::Internal(err) => {
                tracing::error!("internal error: {:#}", err);
                ApiResponse::error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal error".to_string(),
                )
            }
        }
    }
}

/// Starts the HTTP server: ingest + Read API + background scheduler.
pub async fn start_server(config: Config) -> Result<()> {
    let log_level = match config.logging.level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_target(config.logging.include_modules)
        .with_max_level(log_level)
        .compact()
        .init();

    let engine = Arc::new(AiopsEngine::new(config.clone()).await?);
    engine.start().await?;

    let app = build_router(&config, Arc::clone(&engine));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("aiops server listening on http://{}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

pub fn build_router(config: &Config, engine: Arc<AiopsEngine>) -> Router {
    let state = AppState { engine };

    let mut router = Router::new()
        .route("/health", get(health_handler))
        .route("/events", post(ingest_event_handler))
        .route("/aiops/metrics", get(metrics_handler))
        .route("/aiops/incidents", get(list_incidents_handler))
        .route("/aiops/incidents/:id", get(get_incident_handler))
        .route(
            "/aiops/incidents/:id/resolve",
            post(resolve_incident_handler),
        )
        .route("/aiops/analyze", post(analyze_handler))
        .layer(middleware::from_fn(telemetry_middleware))
        .with_state(state);

    if config.server.cors_enabled {
        router = router.layer(build_cors(config));
    }

    if config.server.rate_limit_enabled {
        if let Some(rpm) = NonZeroU32::new(config.server.rate_limit_rpm) {
            let limiter: Arc<KeyedRateLimiter> =
                Arc::new(RateLimiter::keyed(Quota::per_minute(rpm)));
            router = router.layer(middleware::from_fn_with_state(limiter, rate_limit_middleware));
        }
    }

    router
}

fn build_cors(config: &Config) -> CorsLayer {
    if config.server.cors_origins.iter().any(|o| o == "*") {
        CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
    } else {
        let origins: Vec<_> = config
            .server
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new().allow_origin(origins)
    }
}

async fn rate_limit_middleware(
    State(limiter): State<Arc<KeyedRateLimiter>>,
    headers: HeaderMap,
    request: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let key = extract_client_identifier(&headers);
    if limiter.check_key(&key).is_err() {
        return ApiResponse::error_response(
            StatusCode::TOO_MANY_REQUESTS,
            "rate limit exceeded".to_string(),
        );
    }
    next.run(request).await
}

fn extract_client_identifier(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| "anonymous".to_string())
}

/// Ingest instrumentation: mints/forwards the trace id, times the handler,
/// and echoes the trace id back on the response. One `TelemetryRecord` is
/// recorded per completed request by the downstream handler, not here — this
/// middleware only establishes timing and trace context.
async fn telemetry_middleware(
    headers: HeaderMap,
    request: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let trace_id = trace_id_from_header(
        headers
            .get(TRACE_ID_HEADER)
            .and_then(|v| v.to_str().ok()),
    );

    let start = Instant::now();
    let mut response = next.run(request).await;
    let _elapsed = start.elapsed();

    if let Ok(value) = HeaderValue::from_str(&trace_id) {
        response.headers_mut().insert(TRACE_ID_HEADER, value);
    }
    response
}

async fn health_handler() -> impl IntoResponse {
    Json(ApiResponse::success(serde_json::json!({ "status": "ok" })))
}

#[derive(Debug, Deserialize)]
struct IngestPayload {
    service_name: String,
    endpoint: String,
    method: String,
    status_code: u16,
    latency_ms: f64,
    error_message: Option<String>,
}

/// Ingest endpoint used by monitored services (e.g. the demo checkout
/// service) that report completed requests instead of going through a
/// same-process middleware.
async fn ingest_event_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<IngestPayload>,
) -> Result<Json<ApiResponse<()>>, ServiceError> {
    let trace_id = trace_id_from_header(headers.get(TRACE_ID_HEADER).and_then(|v| v.to_str().ok()));

    let record = TelemetryRecord::new(
        payload.service_name,
        payload.endpoint,
        payload.method,
        payload.status_code,
        payload.latency_ms,
        payload.error_message,
        trace_id,
        Utc::now(),
    )
    .map_err(ServiceError::BadRequest)?;

    state
        .engine
        .store()
        .store_metric(record)
        .await
        .map_err(ServiceError::Internal)?;

    Ok(Json(ApiResponse::success(())))
}

#[derive(Debug, Serialize)]
struct HealthSummary {
    health_score: f64,
    status: &'static str,
}

#[derive(Debug, Serialize)]
struct EndpointMetrics {
    request_count: u64,
    avg_latency_ms: f64,
    error_rate: f64,
    status_distribution: HashMap<u16, u64>,
    baseline_latency_ms: Option<f64>,
    health: HealthSummary,
}

#[derive(Debug, Serialize)]
struct MetricsResponse {
    timestamp: chrono::DateTime<Utc>,
    metrics: HashMap<String, EndpointMetrics>,
}

/// `/aiops/metrics` - literal contract, not wrapped in `ApiResponse`: the
/// exact shape of this path is part of the external interface.
async fn metrics_handler(
    State(state): State<AppState>,
) -> Result<Json<MetricsResponse>, ServiceError> {
    let endpoints = state
        .engine
        .store()
        .get_all_endpoints()
        .await
        .map_err(ServiceError::Internal)?;

    let mut metrics = HashMap::with_capacity(endpoints.len());
    for endpoint in &endpoints {
        let health = state
            .engine
            .analyzer()
            .get_endpoint_health(endpoint)
            .await
            .map_err(ServiceError::Internal)?;

        metrics.insert(
            endpoint.clone(),
            EndpointMetrics {
                request_count: health.current_metrics.request_count,
                avg_latency_ms: health.current_metrics.avg_latency_ms,
                error_rate: health.current_metrics.error_rate,
                status_distribution: health.current_metrics.status_distribution,
                baseline_latency_ms: health.baseline_latency_ms,
                health: HealthSummary {
                    health_score: health.health_score,
                    status: health.status,
                },
            },
        );
    }

    Ok(Json(MetricsResponse {
        timestamp: Utc::now(),
        metrics,
    }))
}

#[derive(Debug, Deserialize)]
struct IncidentsQuery {
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Serialize)]
struct IncidentsResponse {
    timestamp: chrono::DateTime<Utc>,
    active_incidents: Vec<Incident>,
    incident_count: usize,
}

/// `/aiops/incidents` - literal contract, not wrapped in `ApiResponse`.
async fn list_incidents_handler(
    State(state): State<AppState>,
    Query(query): Query<IncidentsQuery>,
) -> impl IntoResponse {
    let active_incidents: Vec<Incident> = match query.status.as_deref() {
        Some("active") | None => state.engine.rca().get_active_incidents(),
        Some(_) => Vec::new(),
    };
    let incident_count = active_incidents.len();

    Json(IncidentsResponse {
        timestamp: Utc::now(),
        active_incidents,
        incident_count,
    })
}

async fn get_incident_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<Incident>>, ServiceError> {
    state
        .engine
        .rca()
        .get_incident_by_id(&id)
        .map(|incident| Json(ApiResponse::success(incident)))
        .ok_or_else(|| ServiceError::NotFound(format!("incident {} not found", id)))
}

#[derive(Debug, Serialize)]
struct ResolveResponse {
    status: &'static str,
    incident_id: String,
}

/// `/aiops/incidents/{id}/resolve` - literal contract, not wrapped in
/// `ApiResponse`.
async fn resolve_incident_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ResolveResponse>, ServiceError> {
    state
        .engine
        .rca()
        .resolve_incident(&id)
        .map(|incident| {
            Json(ResolveResponse {
                status: "resolved",
                incident_id: incident.id,
            })
        })
        .ok_or_else(|| ServiceError::NotFound(format!("incident {} not found", id)))
}

#[derive(Debug, Serialize)]
struct AnalyzeResponse {
    analysis: aiops_core::analyzer::AnalysisTick,
    incidents_created: usize,
}

/// `/aiops/analyze` - literal contract, not wrapped in `ApiResponse`. Safe
/// to call concurrently with the scheduler's own tick: both share the
/// engine's tick lock.
async fn analyze_handler(
    State(state): State<AppState>,
) -> Result<Json<AnalyzeResponse>, ServiceError> {
    let (analysis, incidents) = state
        .engine
        .run_tick_now()
        .await
        .map_err(ServiceError::Internal)?;

    Ok(Json(AnalyzeResponse {
        incidents_created: incidents.len(),
        analysis,
    }))
}
