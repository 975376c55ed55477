//! C2 Metrics module.
//!
//! Thin wrappers over the `metrics` facade so call sites never reach for the
//! `counter!`/`histogram!` macros directly. The `prometheus` feature installs
//! a global Prometheus recorder; with the feature disabled every function
//! below is a no-op.

pub mod handler;

/// Installs the Prometheus metrics recorder, if the `prometheus` feature is
/// enabled. No-op otherwise.
pub fn init() {
    #[cfg(feature = "prometheus")]
    {
        use metrics_exporter_prometheus::PrometheusBuilder;
        use tracing::debug;

        debug!("Prometheus metrics endpoint is enabled");
        if let Ok(handle) = PrometheusBuilder::new().install_recorder() {
            handler::set_prom_handle(handle.clone());
            tokio::spawn(async move {
                let mut tick = tokio::time::interval(std::time::Duration::from_secs(30));
                loop {
                    tick.tick().await;
                    handle.run_upkeep();
                }
            });
        }
    }
}

/// `requests_total{method,status}` and `request_duration_seconds`.
pub fn record_request(method: &str, status: &str, duration_secs: f64) {
    #[cfg(feature = "prometheus")]
    {
        use metrics::{counter, histogram};
        counter!(
            "gateway_requests_total",
            "method" => method.to_string(),
            "status" => status.to_string()
        )
        .increment(1);
        histogram!(
            "gateway_request_duration_seconds",
            "method" => method.to_string()
        )
        .record(duration_secs);
        if status != "ok" {
            counter!("gateway_requests_failed_total", "method" => method.to_string()).increment(1);
        }
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (method, status, duration_secs);
    }
}

/// Per-backend dispatch outcome, feeding `least_loaded` selection.
pub fn record_backend_call(service_id: &str, success: bool, duration_secs: f64) {
    #[cfg(feature = "prometheus")]
    {
        use metrics::{counter, histogram};
        counter!(
            "gateway_backend_calls_total",
            "service" => service_id.to_string(),
            "result" => if success { "success" } else { "failure" }
        )
        .increment(1);
        histogram!("gateway_backend_latency_seconds", "service" => service_id.to_string())
            .record(duration_secs);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (service_id, success, duration_secs);
    }
}

/// `mcp_response_validation_failures_total`.
pub fn record_response_validation_failure(method: &str) {
    #[cfg(feature = "prometheus")]
    {
        use metrics::counter;
        counter!("mcp_response_validation_failures_total", "method" => method.to_string())
            .increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = method;
    }
}

/// Health checker outcomes.
pub fn record_health_check(checker: &str, status: &str, duration_secs: f64) {
    #[cfg(feature = "prometheus")]
    {
        use metrics::{counter, histogram};
        counter!(
            "gateway_health_checks_total",
            "checker" => checker.to_string(),
            "status" => status.to_string()
        )
        .increment(1);
        histogram!("gateway_health_check_duration_seconds", "checker" => checker.to_string())
            .record(duration_secs);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (checker, status, duration_secs);
    }
}

/// RBAC token cache hit/miss.
pub fn record_rbac_cache(hit: bool) {
    #[cfg(feature = "prometheus")]
    {
        use metrics::counter;
        counter!("gateway_rbac_cache_total", "result" => if hit { "hit" } else { "miss" })
            .increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = hit;
    }
}
