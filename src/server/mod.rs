//! HTTP surface: `POST /mcp` (and method-scoped aliases), health endpoints,
//! and the Prometheus `/metrics` endpoint.

use axum::Router as AxumRouter;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::health::HealthStatus;
use crate::jsonrpc::RpcResponse;
use crate::metrics::handler::metrics_endpoint;
use crate::state::AppState;

pub fn build(state: AppState, cors_allowed_origin: Option<&str>, enable_method_aliases: bool) -> AxumRouter {
    let mut app = AxumRouter::new()
        .route("/mcp", post(handle_mcp))
        .route("/health", get(health_summary))
        .route("/health/live", get(health_live))
        .route("/health/ready", get(health_ready))
        .route("/health/detailed", get(health_detailed))
        .route("/metrics", get(metrics_endpoint));

    if enable_method_aliases {
        app = app.route("/mcp/{*method_path}", post(handle_mcp_alias));
    }

    let cors = match cors_allowed_origin {
        Some(origin) => CorsLayer::new().allow_origin(origin.parse::<axum::http::HeaderValue>().expect("valid cors origin")),
        None => CorsLayer::new().allow_origin(Any),
    };

    app.layer(cors).layer(TraceLayer::new_for_http()).with_state(state)
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

async fn handle_mcp(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let response = state.router.handle(&body, bearer_token(&headers)).await;
    rpc_into_response(response)
}

/// `POST /mcp/<method-path>` alias: the method in the URL is informational
/// only; the JSON-RPC envelope in the body is authoritative.
async fn handle_mcp_alias(
    State(state): State<AppState>,
    Path(_method_path): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let response = state.router.handle(&body, bearer_token(&headers)).await;
    rpc_into_response(response)
}

/// JSON-RPC errors are always carried in the envelope body, never via HTTP
/// status — the transport layer stays at `200 OK`.
fn rpc_into_response(response: RpcResponse) -> Response {
    (StatusCode::OK, axum::Json(response)).into_response()
}

/// HTTP status per overall health status: 200 healthy/degraded,
/// 503 unhealthy/not-ready, 500 unknown.
fn status_code_for(status: HealthStatus) -> StatusCode {
    match status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        HealthStatus::Unknown => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// `X-Health-Status`, `X-Health-Timestamp`, `X-Health-Version`,
/// `X-Health-Uptime`.
fn health_headers(state: &AppState, status: HealthStatus) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        "X-Health-Status",
        HeaderValue::from_str(&format!("{status:?}").to_lowercase()).expect("status is ascii"),
    );
    headers.insert(
        "X-Health-Timestamp",
        HeaderValue::from_str(&chrono::Utc::now().to_rfc3339()).expect("rfc3339 is ascii"),
    );
    headers.insert(
        "X-Health-Version",
        HeaderValue::from_static(env!("CARGO_PKG_VERSION")),
    );
    headers.insert(
        "X-Health-Uptime",
        HeaderValue::from_str(&state.lifecycle.uptime().as_secs().to_string()).expect("uptime is ascii"),
    );
    headers
}

async fn health_summary(State(state): State<AppState>) -> Response {
    let report = state.health.run_checks().await;
    let headers = health_headers(&state, report.status);
    (status_code_for(report.status), headers, axum::Json(report)).into_response()
}

async fn health_live(State(state): State<AppState>) -> Response {
    let report = state.health.run_checks().await;
    let live = report.status != HealthStatus::Unhealthy;
    let headers = health_headers(&state, report.status);
    let code = if live { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (code, headers).into_response()
}

async fn health_ready(State(state): State<AppState>) -> Response {
    let report = state.health.run_checks().await;
    let ready = report
        .checks
        .iter()
        .filter(|c| c.critical)
        .all(|c| c.status == HealthStatus::Healthy);
    let headers = health_headers(&state, report.status);
    let code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (code, headers).into_response()
}

#[derive(Debug, serde::Deserialize)]
struct HealthDetailQuery {
    #[serde(default)]
    full: bool,
    #[serde(default)]
    debug: bool,
}

/// `GET /health/detailed?full=true&debug=true`: `full` includes
/// every checker's result, not just the summary; `debug` additionally
/// includes reload history and the loaded plugin set.
async fn health_detailed(State(state): State<AppState>, Query(query): Query<HealthDetailQuery>) -> Response {
    let report = state.health.run_checks().await;
    let headers = health_headers(&state, report.status);

    let checks = if query.full {
        serde_json::to_value(&report.checks).expect("checks serialize")
    } else {
        serde_json::json!(report.checks.len())
    };

    let mut body = serde_json::json!({
        "status": report.status,
        "checks": checks,
        "timed_out": report.timed_out,
    });

    if query.debug {
        body["reload_history"] = serde_json::to_value(state.reload.history(None)).expect("history serializes");
        body["plugins"] = serde_json::json!(state.plugins.names());
    }

    (status_code_for(report.status), headers, axum::Json(body)).into_response()
}
