//! Black-box HTTP-level scenarios, driven through the axum app the same way
//! a real client would.

use std::io::Write;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use mcp_gateway::config::policy::{Policy, PolicyFile, PolicyRule};
use mcp_gateway::config::GatewayConfig;
use mcp_gateway::registry::{LoadBalancingStrategy, RegisterRequest, ServiceHealth, ServiceStatus};
use mcp_gateway::state::AppState;
use serde_json::{json, Value};
use tower::ServiceExt;

const EXPIRED_JWT_TOKEN: &str = include_str!("fixtures/expired_jwt_token.txt");

fn wildcard_policy_file() -> (tempfile::NamedTempFile, String) {
    let mut policies = std::collections::HashMap::new();
    policies.insert(
        "admin".to_string(),
        Policy {
            description: None,
            rules: vec![PolicyRule {
                plugin: "*".to_string(),
                permissions: vec!["read".into(), "write".into(), "execute".into(), "admin".into()],
                conditions: None,
            }],
        },
    );
    let file = PolicyFile {
        policies,
        default: Some("admin".to_string()),
    };
    let mut tmp = tempfile::NamedTempFile::new().unwrap();
    let yaml = serde_yaml_ng::to_string(&file).unwrap();
    tmp.write_all(yaml.as_bytes()).unwrap();
    let path = tmp.path().to_str().unwrap().to_string();
    (tmp, path)
}

fn viewer_only_policy_file() -> (tempfile::NamedTempFile, String) {
    let mut policies = std::collections::HashMap::new();
    policies.insert(
        "viewer".to_string(),
        Policy {
            description: None,
            rules: vec![PolicyRule {
                plugin: "memory".to_string(),
                permissions: vec!["read".into(), "execute".into()],
                conditions: None,
            }],
        },
    );
    let file = PolicyFile {
        policies,
        default: Some("viewer".to_string()),
    };
    let mut tmp = tempfile::NamedTempFile::new().unwrap();
    let yaml = serde_yaml_ng::to_string(&file).unwrap();
    tmp.write_all(yaml.as_bytes()).unwrap();
    let path = tmp.path().to_str().unwrap().to_string();
    (tmp, path)
}

async fn send(app: axum::Router, body: Value) -> (StatusCode, Value) {
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/mcp")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn tools_list_aggregates_across_all_builtin_plugins() {
    let (_tmp, path) = wildcard_policy_file();
    let mut config = GatewayConfig::default();
    config.rbac.policy_path = Some(path);
    let state = AppState::build(&config).unwrap();
    let app = mcp_gateway::server::build(state, None, true);

    let (status, body) = send(
        app,
        json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list", "params": {}}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let tools = body["result"]["tools"].as_array().unwrap();
    assert_eq!(tools.len(), 9, "memory + git + editor contribute 3 tools each");
    assert!(tools.iter().any(|t| t["name"] == "memory.store"));
}

#[tokio::test]
async fn destructive_tool_without_admin_permission_is_forbidden() {
    let (_tmp, path) = viewer_only_policy_file();
    let mut config = GatewayConfig::default();
    config.rbac.policy_path = Some(path);
    let state = AppState::build(&config).unwrap();
    let app = mcp_gateway::server::build(state, None, true);

    let (_status, body) = send(
        app,
        json!({
            "jsonrpc": "2.0",
            "id": 2,
            "method": "tools/call",
            "params": {"name": "memory.clear", "arguments": {}}
        }),
    )
    .await;

    assert_eq!(body["error"]["code"], -32403);
}

#[tokio::test]
async fn memory_store_then_get_round_trips_through_the_http_surface() {
    let (_tmp, path) = wildcard_policy_file();
    let mut config = GatewayConfig::default();
    config.rbac.policy_path = Some(path);
    let state = AppState::build(&config).unwrap();
    let app = mcp_gateway::server::build(state, None, true);

    let (_status, store_body) = send(
        app.clone(),
        json!({
            "jsonrpc": "2.0",
            "id": 3,
            "method": "tools/call",
            "params": {"name": "memory.store", "arguments": {"key": "greeting", "value": "hi"}}
        }),
    )
    .await;
    assert!(store_body.get("error").is_none());

    let (_status, get_body) = send(
        app,
        json!({
            "jsonrpc": "2.0",
            "id": 4,
            "method": "tools/call",
            "params": {"name": "memory.get", "arguments": {"key": "greeting"}}
        }),
    )
    .await;
    let text = get_body["result"]["content"][0]["text"].as_str().unwrap();
    assert_eq!(text, "hi");
}

#[tokio::test]
async fn expired_jwt_is_rejected_with_unauthorized_code() {
    let (_tmp, path) = wildcard_policy_file();
    let mut config = GatewayConfig::default();
    config.rbac.policy_path = Some(path);
    config.rbac.jwt.public_key_path = Some(
        std::env::current_dir()
            .unwrap()
            .join("tests/fixtures/expired_jwt_public_key.pem")
            .to_str()
            .unwrap()
            .to_string(),
    );
    config.rbac.jwt.issuer = Some("mcp-gateway-tests".to_string());

    let state = AppState::build(&config).unwrap();
    let app = mcp_gateway::server::build(state, None, true);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/mcp")
                .header("content-type", "application/json")
                .header("authorization", format!("Bearer {}", EXPIRED_JWT_TOKEN.trim()))
                .body(Body::from(
                    json!({"jsonrpc": "2.0", "id": 5, "method": "tools/list", "params": {}}).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["error"]["code"], -32401);
    assert_eq!(body["error"]["message"], "Authentication failed");
}

#[tokio::test]
async fn retry_on_transient_backend_failure_succeeds_on_second_instance() {
    let failing = wiremock::MockServer::start().await;
    let healthy = wiremock::MockServer::start().await;

    wiremock::Mock::given(wiremock::matchers::method("POST"))
        .respond_with(wiremock::ResponseTemplate::new(502))
        .mount(&failing)
        .await;
    wiremock::Mock::given(wiremock::matchers::method("POST"))
        .respond_with(wiremock::ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 6,
            "result": {"completion": {"values": ["ok"]}}
        })))
        .mount(&healthy)
        .await;

    let (_tmp, path) = wildcard_policy_file();
    let mut config = GatewayConfig::default();
    config.rbac.policy_path = Some(path);
    config.router.retry_attempts = 3;
    config.router.retry_backoff_ms = 5;
    let state = AppState::build(&config).unwrap();

    state
        .registry
        .register(RegisterRequest {
            name: "completion-a".into(),
            type_: "completion_provider".into(),
            version: "1.0.0".into(),
            endpoint: failing.uri(),
            capabilities: Default::default(),
            tags: None,
            metadata: None,
        })
        .unwrap();
    let id_b = state
        .registry
        .register(RegisterRequest {
            name: "completion-b".into(),
            type_: "completion_provider".into(),
            version: "1.0.0".into(),
            endpoint: healthy.uri(),
            capabilities: Default::default(),
            tags: None,
            metadata: None,
        })
        .unwrap();
    state.registry.observe(&id_b, Some(ServiceStatus::Active), Some(ServiceHealth::Healthy));
    for record in state.registry.list_by_type("completion_provider") {
        if record.name == "completion-a" {
            state.registry.observe(&record.id, Some(ServiceStatus::Active), Some(ServiceHealth::Healthy));
        }
    }

    let app = mcp_gateway::server::build(state, None, true);
    let (status, body) = send(
        app,
        json!({
            "jsonrpc": "2.0",
            "id": 6,
            "method": "completion/complete",
            "params": {"ref": "memory.get", "argument": {"name": "key", "value": "g"}}
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert!(body.get("error").is_none(), "expected success after retry, got {body:?}");
    assert_eq!(body["result"]["completion"]["values"][0], "ok");
}

#[tokio::test]
async fn round_robin_strategy_is_accepted_as_config_default() {
    let config = GatewayConfig::default();
    assert_eq!(config.router.load_balancing_strategy, LoadBalancingStrategy::RoundRobin);
}
