//! C8 Router: JSON-RPC ingress, authN, plugin/backend dispatch, retry, and
//! response shaping.

mod plugin_path;

use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::Client;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::config::RouterConfig;
use crate::errors::{ErrorKind, GatewayError};
use crate::jsonrpc::{RpcId, RpcRequest, RpcResponse, codes};
use crate::metrics;
use crate::plugins::PluginManager;
use crate::rbac::{Capabilities, RbacEngine};
use crate::registry::{SelectionCriteria, ServiceRegistry};
use crate::validator;

/// Fixed method -> backend service-type routing table.
fn service_type_for_method(method: &str) -> Option<&'static str> {
    match method {
        m if m.starts_with("tools/") => Some("tool_provider"),
        m if m.starts_with("resources/") => Some("resource_provider"),
        m if m.starts_with("prompts/") => Some("prompt_provider"),
        "completion/complete" => Some("completion_provider"),
        "sampling/createMessage" => Some("sampling_provider"),
        "roots/list" => Some("root_provider"),
        "logging/setLevel" => Some("logging_provider"),
        _ => None,
    }
}

const PLUGIN_ROUTED_METHODS: &[&str] = &["tools/list", "tools/call", "resources/list", "prompts/list"];

pub struct Router {
    config: RouterConfig,
    rbac: Option<Arc<RbacEngine>>,
    plugins: Arc<PluginManager>,
    registry: Arc<ServiceRegistry>,
    http: Client,
}

impl Router {
    pub fn new(
        config: RouterConfig,
        rbac: Option<Arc<RbacEngine>>,
        plugins: Arc<PluginManager>,
        registry: Arc<ServiceRegistry>,
    ) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.default_timeout_secs))
            .build()
            .expect("reqwest client builds");
        Self {
            config,
            rbac,
            plugins,
            registry,
            http,
        }
    }

    /// Runs the full pipeline for one JSON-RPC request body. Always returns
    /// exactly one response envelope, even for a `null` id.
    pub async fn handle(&self, raw: &[u8], bearer: Option<&str>) -> RpcResponse {
        let start = Instant::now();

        if raw.len() > self.config.max_request_size {
            return RpcResponse::failure_code(
                RpcId::Null,
                codes::INVALID_REQUEST,
                format!("request body exceeds max_request_size ({} bytes)", self.config.max_request_size),
            );
        }

        let request: RpcRequest = match serde_json::from_slice(raw) {
            Ok(r) => r,
            Err(e) => {
                return RpcResponse::failure_code(RpcId::Null, codes::PARSE_ERROR, format!("parse error: {e}"));
            }
        };

        if let Err(e) = request.validate_envelope() {
            return RpcResponse::failure_code(request.id.clone(), codes::INVALID_REQUEST, e.message);
        }

        let response = self.handle_request(&request, bearer).await;
        let status = if response.error.is_some() { "error" } else { "ok" };
        if self.config.enable_metrics {
            metrics::record_request(&request.method, status, start.elapsed().as_secs_f64());
        }
        response
    }

    async fn handle_request(&self, request: &RpcRequest, bearer: Option<&str>) -> RpcResponse {
        let caps = match self.authenticate(bearer) {
            Ok(c) => c,
            Err(e) => return RpcResponse::from_gateway_error(request.id.clone(), &e),
        };

        if self.config.validate_requests
            && let Err(e) = validator::validate_request(&request.method, &request.params)
        {
            return RpcResponse::from_gateway_error(request.id.clone(), &e);
        }

        let cancellation = CancellationToken::new();

        if self.config.enable_plugin_routing && PLUGIN_ROUTED_METHODS.contains(&request.method.as_str()) {
            match plugin_path::dispatch(&self.plugins, &caps, &cancellation, &request.method, &request.params).await
            {
                Some(result) => return self.shape_result(request, result),
                None => {
                    // Plugin path declined (e.g. no plugins can serve it); fall
                    // through to the backend path below.
                }
            }
        }

        let Some(service_type) = service_type_for_method(&request.method) else {
            return RpcResponse::failure_code(
                request.id.clone(),
                codes::METHOD_NOT_FOUND,
                format!("unknown method \"{}\"", request.method),
            );
        };

        match self.dispatch_to_backend(service_type, request, &cancellation).await {
            Ok(result) => self.shape_result(request, Ok(result)),
            Err(e) => RpcResponse::from_gateway_error(request.id.clone(), &e),
        }
    }

    fn shape_result(&self, request: &RpcRequest, result: Result<Value, GatewayError>) -> RpcResponse {
        match result {
            Ok(value) => {
                if self.config.validate_responses {
                    let kind = validator::result_kind_for_method(&request.method);
                    let warnings = validator::validate_response(kind, &value);
                    if !warnings.is_empty() {
                        metrics::record_response_validation_failure(&request.method);
                        tracing::warn!(method = %request.method, ?warnings, "response failed validation");
                    }
                }
                RpcResponse::success(request.id.clone(), value)
            }
            Err(e) => RpcResponse::from_gateway_error(request.id.clone(), &e),
        }
    }

    fn authenticate(&self, bearer: Option<&str>) -> Result<Capabilities, GatewayError> {
        match (&self.rbac, bearer) {
            (Some(rbac), Some(token)) => rbac.process_token(token),
            (Some(_), None) if self.config.require_authentication => {
                Err(GatewayError::unauthorized("Authentication failed"))
            }
            (Some(rbac), None) => Ok(Capabilities::anonymous(&rbac.default_capabilities())),
            (None, _) if self.config.require_authentication => {
                Err(GatewayError::unauthorized("Authentication failed"))
            }
            (None, _) => Ok(Capabilities::anonymous(&std::collections::HashMap::new())),
        }
    }

    /// Select, forward, retry with linear backoff, re-selecting a different
    /// instance on each attempt. `retry_attempts` is the total attempt
    /// budget (including the first try), not an addition to it.
    async fn dispatch_to_backend(
        &self,
        service_type: &str,
        request: &RpcRequest,
        cancellation: &CancellationToken,
    ) -> Result<Value, GatewayError> {
        let max_attempts = if self.config.retry_enabled {
            self.config.retry_attempts.max(1)
        } else {
            1
        };

        let mut attempt = 1u32;
        loop {
            if cancellation.is_cancelled() {
                return Err(GatewayError::internal("request cancelled"));
            }

            let service = self.registry.select(service_type, &SelectionCriteria::default())?;
            let guard = self.registry.begin_in_flight(&service.id);
            let (result, duration) = self.forward_once(&service.endpoint, request).await;
            drop(guard);

            match &result {
                Ok(_) => {
                    self.registry.record_success(&service.id, duration);
                    metrics::record_backend_call(&service.id, true, duration.as_secs_f64());
                    return result;
                }
                Err(e) => {
                    self.registry.record_failure(&service.id);
                    metrics::record_backend_call(&service.id, false, duration.as_secs_f64());
                    let retryable = e.is_retryable() && e.kind != ErrorKind::Validation;
                    if !retryable || attempt >= max_attempts {
                        return result;
                    }
                    tokio::time::sleep(self.config.retry_backoff_ms_duration() * attempt).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn forward_once(&self, endpoint: &str, request: &RpcRequest) -> (Result<Value, GatewayError>, Duration) {
        let start = Instant::now();
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": request.id,
            "method": request.method,
            "params": request.params,
        });

        let result = self
            .http
            .post(endpoint)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json")
            .header("User-Agent", &self.config.user_agent)
            .json(&body)
            .send()
            .await;

        let outcome = match result {
            Ok(resp) => {
                let status = resp.status();
                if status.is_server_error() {
                    Err(GatewayError::unavailable(format!("backend returned {status}")))
                } else if status.is_client_error() {
                    Err(GatewayError::validation(format!("backend returned {status}")))
                } else {
                    match resp.json::<Value>().await {
                        Ok(envelope) => {
                            if let Some(err) = envelope.get("error") {
                                let code = err.get("code").and_then(|c| c.as_i64()).unwrap_or(codes::INTERNAL_ERROR);
                                let message = err
                                    .get("message")
                                    .and_then(|m| m.as_str())
                                    .unwrap_or("backend error")
                                    .to_string();
                                Err(GatewayError::new(kind_for_backend_code(code), message))
                            } else {
                                Ok(envelope.get("result").cloned().unwrap_or(Value::Null))
                            }
                        }
                        Err(e) => Err(GatewayError::internal(format!("malformed backend response: {e}"))),
                    }
                }
            }
            Err(e) if e.is_timeout() => Err(GatewayError::timeout(format!("backend request timed out: {e}"))),
            Err(e) => Err(GatewayError::unavailable(format!("backend request failed: {e}"))),
        };

        (outcome, start.elapsed())
    }
}

impl RouterConfig {
    fn retry_backoff_ms_duration(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

fn kind_for_backend_code(code: i64) -> ErrorKind {
    match code {
        codes::INVALID_PARAMS => ErrorKind::Validation,
        codes::METHOD_NOT_FOUND => ErrorKind::MethodNotFound,
        codes::UNAUTHORIZED => ErrorKind::Unauthorized,
        codes::FORBIDDEN => ErrorKind::Forbidden,
        codes::NOT_FOUND | codes::RESOURCE_NOT_FOUND | codes::TOOL_NOT_FOUND | codes::PROMPT_NOT_FOUND => {
            ErrorKind::NotFound
        }
        codes::SERVICE_UNAVAILABLE => ErrorKind::Unavailable,
        codes::TIMEOUT => ErrorKind::Timeout,
        _ => ErrorKind::Internal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_routing_table_maps_to_fixed_service_types() {
        assert_eq!(service_type_for_method("tools/call"), Some("tool_provider"));
        assert_eq!(service_type_for_method("resources/read"), Some("resource_provider"));
        assert_eq!(service_type_for_method("completion/complete"), Some("completion_provider"));
        assert_eq!(service_type_for_method("nonsense"), None);
    }

    #[test]
    fn backend_error_codes_map_back_to_error_kinds() {
        assert_eq!(kind_for_backend_code(codes::INVALID_PARAMS), ErrorKind::Validation);
        assert_eq!(kind_for_backend_code(codes::UNAUTHORIZED), ErrorKind::Unauthorized);
        assert_eq!(kind_for_backend_code(-1), ErrorKind::Internal);
    }
}
