#![forbid(unsafe_code)]
#![allow(missing_docs)]

//! Observability: the Prometheus registry extended with DHT/overlay/gossip/
//! post/image/ephemeral counters alongside the original transport gauges,
//! plus the `axum` server exposing them.

pub mod metrics;

use std::sync::Arc;

use axum::{extract::State, routing::get, Router};
use prometheus::{Encoder, TextEncoder};
use tracing::info;

use metrics::Metrics;

async fn metrics_handler(State(metrics): State<Arc<Metrics>>) -> String {
    let families = metrics.registry.gather();
    let mut buf = Vec::new();
    if TextEncoder::new().encode(&families, &mut buf).is_err() {
        return String::new();
    }
    String::from_utf8(buf).unwrap_or_default()
}

async fn healthz_handler() -> &'static str {
    "ok"
}

/// Serve `/metrics` (Prometheus text format) and `/healthz` on `listen_addr`
/// until the process is killed. Runs as its own `tokio` task; a bind failure
/// is logged and the task exits without taking the node down with it.
pub async fn serve(listen_addr: String, metrics: Arc<Metrics>) {
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz_handler))
        .with_state(metrics);

    let listener = match tokio::net::TcpListener::bind(&listen_addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(%listen_addr, error = %e, "failed to bind metrics listener");
            return;
        }
    };
    info!(%listen_addr, "metrics server listening");
    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!(error = %e, "metrics server exited");
    }
}
