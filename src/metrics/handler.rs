//! HTTP handler for `GET /metrics`.
//!
//! Serves Prometheus-formatted metrics when the `prometheus` feature is
//! enabled. The text-exposition format itself is out of scope —
//! rendering is delegated entirely to `metrics-exporter-prometheus`.

use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};

#[cfg(feature = "prometheus")]
static PROM_HANDLE: std::sync::OnceLock<metrics_exporter_prometheus::PrometheusHandle> =
    std::sync::OnceLock::new();

#[cfg(feature = "prometheus")]
pub(crate) fn set_prom_handle(handle: metrics_exporter_prometheus::PrometheusHandle) {
    let _ = PROM_HANDLE.set(handle);
}

pub async fn metrics_endpoint() -> Response {
    #[cfg(feature = "prometheus")]
    {
        tracing::debug!("Metrics requested");
        if let Some(handle) = PROM_HANDLE.get() {
            let body = handle.render();
            return (
                StatusCode::OK,
                [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
                body,
            )
                .into_response();
        }
        (
            StatusCode::SERVICE_UNAVAILABLE,
            "prometheus recorder not initialized",
        )
            .into_response()
    }
    #[cfg(not(feature = "prometheus"))]
    {
        tracing::warn!("Metrics endpoint called with metrics disabled");
        (StatusCode::NOT_FOUND, "metrics disabled").into_response()
    }
}
