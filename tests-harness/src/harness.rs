use aiops::server::build_router;
use aiops_core::{AiopsEngine, Config};
use anyhow::{anyhow, Result};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

/// Boots the AIOps axum app in-process for black-box integration tests.
/// No TCP socket is bound; requests are driven directly through the router
/// via `tower::ServiceExt::oneshot`.
pub struct TestApp {
    engine: Arc<AiopsEngine>,
    router: Router,
}

impl TestApp {
    pub async fn new(config: Config) -> Result<Self> {
        let engine = Arc::new(AiopsEngine::new(config.clone()).await?);
        let router = build_router(&config, Arc::clone(&engine));
        Ok(Self { engine, router })
    }

    /// Direct access to the engine, mainly so tests can seed the store with
    /// records at specific historical timestamps instead of going through
    /// `/events`, which always stamps `Utc::now()`.
    pub fn engine(&self) -> Arc<AiopsEngine> {
        Arc::clone(&self.engine)
    }

    pub async fn get_json(&self, path: &str) -> Result<Value> {
        let request = Request::builder()
            .method("GET")
            .uri(path)
            .body(Body::empty())?;
        self.dispatch(request).await
    }

    pub async fn post_json(&self, path: &str, body: Value) -> Result<Value> {
        let request = Request::builder()
            .method("POST")
            .uri(path)
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body)?))?;
        self.dispatch(request).await
    }

    async fn dispatch(&self, request: Request<Body>) -> Result<Value> {
        let response = self.router.clone().oneshot(request).await?;
        let status = response.status();
        let bytes = response.into_body().collect().await?.to_bytes();

        let body: Value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)?
        };

        if status.is_success() || status == StatusCode::NO_CONTENT {
            Ok(body)
        } else {
            Err(anyhow!("request failed with status {}: {}", status, body))
        }
    }
}
