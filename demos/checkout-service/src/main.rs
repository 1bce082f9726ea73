/*!
# checkout-service

A small monitored service wired up with `aiops-sdk`. Plays the external
collaborator from a typical storefront: `/checkout`, `/payment`, `/inventory`.

Also exposes `/simulate/*` failure-injection controls so the AIOps engine's
anomaly detection can be exercised on demand, instead of waiting for real
production issues:

    curl -X POST localhost:3051/simulate/delay -d '{"endpoint":"/payment","delay_ms":800}'
    curl -X POST localhost:3051/simulate/errors -d '{"endpoint":"/payment","error_rate":0.4}'
    curl -X POST localhost:3051/simulate/clear -d '{"endpoint":"/payment"}'

Run the AIOps server first (`cargo run -p aiops -- serve`), then this demo
with `AIOPS_ENDPOINT` pointing at it (defaults to `http://localhost:8080`).
*/

use aiops_sdk::PropagatingClient;
use axum::{
    extract::State,
    http::StatusCode,
    middleware,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use parking_lot::RwLock;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Default)]
struct FailureConfig {
    delay_ms: Option<u64>,
    error_rate: Option<f64>,
}

/// Chaos controls for one endpoint at a time. Mirrors a simple per-endpoint
/// delay/error-rate knob: enough to exercise latency and error-spike
/// detection without building a full scenario DSL.
#[derive(Clone, Default)]
struct FailureInjector {
    config: Arc<RwLock<HashMap<String, FailureConfig>>>,
}

impl FailureInjector {
    fn set_delay(&self, endpoint: &str, delay_ms: u64) {
        self.config
            .write()
            .entry(endpoint.to_string())
            .or_default()
            .delay_ms = Some(delay_ms);
    }

    fn set_error_rate(&self, endpoint: &str, error_rate: f64) {
        self.config
            .write()
            .entry(endpoint.to_string())
            .or_default()
            .error_rate = Some(error_rate.clamp(0.0, 1.0));
    }

    fn clear(&self, endpoint: &str) {
        self.config.write().remove(endpoint);
    }

    fn clear_all(&self) {
        self.config.write().clear();
    }

    /// Applies whatever failures are configured for `endpoint`. Returns an
    /// error message if a simulated failure should be raised.
    async fn inject(&self, endpoint: &str) -> Option<&'static str> {
        let config = self.config.read().get(endpoint).cloned();
        let Some(config) = config else { return None };

        if let Some(delay_ms) = config.delay_ms {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }

        if let Some(error_rate) = config.error_rate {
            if rand::thread_rng().gen::<f64>() < error_rate {
                const ERRORS: &[&str] = &[
                    "database connection timeout",
                    "downstream service unavailable",
                    "out of memory",
                    "circuit breaker open",
                    "rate limit exceeded",
                ];
                return Some(ERRORS[rand::thread_rng().gen_range(0..ERRORS.len())]);
            }
        }

        None
    }
}

#[derive(Clone)]
struct AppState {
    injector: FailureInjector,
    inventory: Arc<RwLock<HashMap<String, u32>>>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().compact().init();

    let aiops_endpoint =
        std::env::var("AIOPS_ENDPOINT").unwrap_or_else(|_| "http://localhost:8080".to_string());
    let client = Arc::new(PropagatingClient::new(&aiops_endpoint, "checkout-service"));

    let mut inventory = HashMap::new();
    inventory.insert("widget".to_string(), 100);
    inventory.insert("gadget".to_string(), 40);

    let state = AppState {
        injector: FailureInjector::default(),
        inventory: Arc::new(RwLock::new(inventory)),
    };

    let app = Router::new()
        .route("/checkout", post(checkout_handler))
        .route("/payment", post(payment_handler))
        .route("/inventory/:sku", get(inventory_handler))
        .route("/simulate/delay", post(simulate_delay_handler))
        .route("/simulate/errors", post(simulate_errors_handler))
        .route("/simulate/clear", post(simulate_clear_handler))
        .route("/health", get(|| async { "ok" }))
        .layer(middleware::from_fn(move |headers, request, next| {
            let client = client.clone();
            async move { PropagatingClient::middleware(client, headers, request, next).await }
        }))
        .with_state(state);

    let port = std::env::var("PORT").unwrap_or_else(|_| "3051".to_string());
    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap();

    tracing::info!("checkout-service listening on http://{}", addr);
    axum::serve(listener, app).await.unwrap();
}

#[derive(Debug, Deserialize)]
struct CheckoutRequest {
    sku: String,
    quantity: u32,
}

#[derive(Debug, Serialize)]
struct CheckoutResponse {
    sku: String,
    remaining: u32,
}

async fn checkout_handler(
    State(state): State<AppState>,
    Json(req): Json<CheckoutRequest>,
) -> Result<Json<CheckoutResponse>, (StatusCode, String)> {
    if let Some(reason) = state.injector.inject("/checkout").await {
        return Err((StatusCode::INTERNAL_SERVER_ERROR, reason.to_string()));
    }

    let mut inventory = state.inventory.write();
    let remaining = inventory.entry(req.sku.clone()).or_insert(0);
    if *remaining < req.quantity {
        return Err((StatusCode::BAD_REQUEST, "insufficient stock".to_string()));
    }
    *remaining -= req.quantity;

    Ok(Json(CheckoutResponse {
        sku: req.sku,
        remaining: *remaining,
    }))
}

#[derive(Debug, Deserialize)]
struct PaymentRequest {
    amount_cents: u64,
}

#[derive(Debug, Serialize)]
struct PaymentResponse {
    charged_cents: u64,
}

async fn payment_handler(
    State(state): State<AppState>,
    Json(req): Json<PaymentRequest>,
) -> Result<Json<PaymentResponse>, (StatusCode, String)> {
    if let Some(reason) = state.injector.inject("/payment").await {
        return Err((StatusCode::INTERNAL_SERVER_ERROR, reason.to_string()));
    }

    Ok(Json(PaymentResponse {
        charged_cents: req.amount_cents,
    }))
}

async fn inventory_handler(
    State(state): State<AppState>,
    axum::extract::Path(sku): axum::extract::Path<String>,
) -> impl IntoResponse {
    if let Some(reason) = state.injector.inject("/inventory").await {
        return (StatusCode::INTERNAL_SERVER_ERROR, reason.to_string()).into_response();
    }

    let count = state.inventory.read().get(&sku).copied().unwrap_or(0);
    Json(serde_json::json!({ "sku": sku, "count": count })).into_response()
}

#[derive(Debug, Deserialize)]
struct DelayRequest {
    endpoint: String,
    delay_ms: u64,
}

async fn simulate_delay_handler(
    State(state): State<AppState>,
    Json(req): Json<DelayRequest>,
) -> impl IntoResponse {
    state.injector.set_delay(&req.endpoint, req.delay_ms);
    StatusCode::NO_CONTENT
}

#[derive(Debug, Deserialize)]
struct ErrorRateRequest {
    endpoint: String,
    error_rate: f64,
}

async fn simulate_errors_handler(
    State(state): State<AppState>,
    Json(req): Json<ErrorRateRequest>,
) -> impl IntoResponse {
    state.injector.set_error_rate(&req.endpoint, req.error_rate);
    StatusCode::NO_CONTENT
}

#[derive(Debug, Deserialize)]
struct ClearRequest {
    endpoint: Option<String>,
}

async fn simulate_clear_handler(
    State(state): State<AppState>,
    Json(req): Json<ClearRequest>,
) -> impl IntoResponse {
    match req.endpoint {
        Some(endpoint) => state.injector.clear(&endpoint),
        None => state.injector.clear_all(),
    }
    StatusCode::NO_CONTENT
}
