//! HTTP-surface Prometheus instruments and the `/metrics` and `/ready`
//! handlers (spec.md §4.F, §4.H), registered the same way the teacher's
//! `middleware/metrics.rs` registers its own vectors. `/metrics` gathers the
//! whole process-wide registry, so `tka-controller`'s and `tka-gossip`'s
//! instruments ride along automatically.

use axum::extract::State;
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, Encoder, HistogramVec, IntCounterVec,
    TextEncoder,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::error;

lazy_static! {
    static ref HTTP_REQUEST_DURATION: HistogramVec = register_histogram_vec!(
        "tka_http_request_duration_seconds",
        "HTTP request latencies in seconds, by method, path and status",
        &["method", "path", "status"]
    )
    .unwrap();

    static ref HTTP_REQUEST_COUNTER: IntCounterVec = register_int_counter_vec!(
        "tka_http_requests_total",
        "Total HTTP requests, by method, path and status",
        &["method", "path", "status"]
    )
    .unwrap();
}

/// Wrapped in an `Arc` and shared between the lifecycle supervisor (the
/// writer: flips true once overlay, reconciler client, HTTP surface and
/// gossip have all reported started; flips back before drain step 2) and
/// this module's `/ready` handler (the reader).
#[derive(Debug, Clone, Default)]
pub struct ReadyGate(Arc<AtomicBool>);

impl ReadyGate {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn set_ready(&self, ready: bool) {
        self.0.store(ready, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Records one request's method/path/status/latency (spec.md §10 "HTTP
/// request metrics"). The path used is the matched route pattern (e.g.
/// `/api/v1alpha1/login`), not the literal URI, since there's no per-user
/// path segment here to normalize away.
pub async fn metrics_middleware(request: axum::extract::Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let path = request
        .extensions()
        .get::<axum::extract::MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());

    let response = next.run(request).await;
    let status = response.status().as_u16().to_string();

    HTTP_REQUEST_DURATION
        .with_label_values(&[&method, &path, &status])
        .observe(start.elapsed().as_secs_f64());
    HTTP_REQUEST_COUNTER
        .with_label_values(&[&method, &path, &status])
        .inc();

    response
}

async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        error!("failed to encode metrics: {err}");
        return (StatusCode::INTERNAL_SERVER_ERROR, "failed to encode metrics".to_string())
            .into_response();
    }

    let output = String::from_utf8(buffer).unwrap_or_else(|err| {
        error!("metrics output was not valid utf-8: {err}");
        "failed to encode metrics".to_string()
    });

    (StatusCode::OK, output).into_response()
}

async fn ready_handler(State(gate): State<ReadyGate>) -> impl IntoResponse {
    if gate.is_ready() {
        (StatusCode::OK, "ready").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready").into_response()
    }
}

/// The unversioned, unauthenticated `/ready` + `/metrics` listener (spec.md
/// §4.H: "a separate listener from the main API surface, bound to a
/// conventional port rather than the overlay, so orchestration tooling that
/// can't speak the overlay protocol can still probe liveness").
pub fn health_router(gate: ReadyGate) -> Router {
    Router::new()
        .route("/ready", get(ready_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(gate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gate_starts_not_ready() {
        let gate = ReadyGate::new();
        assert!(!gate.is_ready());
    }

    #[test]
    fn gate_flips_on_set_ready() {
        let gate = ReadyGate::new();
        gate.set_ready(true);
        assert!(gate.is_ready());
        gate.set_ready(false);
        assert!(!gate.is_ready());
    }
}
