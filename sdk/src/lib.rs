/*!
# aiops-sdk

Trace-context propagation and telemetry reporting for services monitored by
an AIOps engine.

## Features

- **Plug-and-play middleware**: mints or forwards `X-Trace-ID` for Axum
  services, with zero manual context management (`tokio::task_local!`).
- **Automatic telemetry reporting**: every request the middleware observes is
  reported to the AIOps server's ingest endpoint once it completes.
- **Outbound propagation**: `PropagatingClient::get`/`post` forward the
  current request's trace id onto downstream calls.

## Example

```rust
use aiops_sdk::PropagatingClient;
use axum::{Router, routing::get};
use std::sync::Arc;

#[tokio::main]
async fn main() {
    let client = Arc::new(PropagatingClient::new("http://localhost:8080", "checkout-service"));

    let app = Router::new()
        .route("/checkout", get(|| async { "ok" }))
        .layer(axum::middleware::from_fn(move |headers, request, next| {
            let client = client.clone();
            async move { PropagatingClient::middleware(client, headers, request, next).await }
        }));

    // Server runs...
    let _ = app;
}
```
*/

mod client;
mod context;

pub use client::{PropagatingClient, TRACE_ID_HEADER};
pub use context::{current_trace_id, TraceContext};
