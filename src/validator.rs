//! C1 Validator: schema checks on MCP requests/responses.
//!
//! The validator is intentionally narrow: it checks a fixed set of shapes
//! explicitly, not a full JSON-Schema engine. Request validation is wired
//! into the router pipeline behind `RouterConfig::validate_requests`;
//! response validation behind `validate_responses` and never rewrites or
//! rejects the client-visible response.

use serde_json::Value;

use crate::errors::GatewayError;

/// Methods recognised by the gateway.
pub const KNOWN_METHODS: &[&str] = &[
    "initialize",
    "tools/list",
    "tools/call",
    "resources/list",
    "resources/read",
    "resources/subscribe",
    "prompts/list",
    "prompts/get",
    "completion/complete",
    "logging/setLevel",
    "sampling/createMessage",
    "roots/list",
];

/// Validates method name and params shape against MCP expectations.
/// Returns `Validation` (-32602) on failure.
pub fn validate_request(method: &str, params: &Value) -> Result<(), GatewayError> {
    if !params.is_object() && !params.is_null() {
        return Err(GatewayError::validation(format!(
            "params for method \"{method}\" must be an object or omitted"
        )));
    }

    match method {
        "tools/call" => require_fields(params, &["name"]),
        "resources/read" | "resources/subscribe" => require_fields(params, &["uri"]),
        "prompts/get" => require_fields(params, &["name"]),
        "logging/setLevel" => require_fields(params, &["level"]),
        "completion/complete" => require_fields(params, &["ref", "argument"]),
        _ => Ok(()),
    }
}

fn require_fields(params: &Value, fields: &[&str]) -> Result<(), GatewayError> {
    for f in fields {
        if params.get(f).is_none() {
            return Err(GatewayError::validation(format!(
                "params missing required field \"{f}\""
            )));
        }
    }
    Ok(())
}

/// The typed result kinds the response validator understands:
/// initialize, list-tools/resources/prompts, call-tool, get-prompt,
/// complete, subscribe/unsubscribe, logging-level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultKind {
    Initialize,
    ListTools,
    ListResources,
    ListPrompts,
    CallTool,
    GetPrompt,
    Complete,
    Subscribe,
    Unsubscribe,
    LoggingLevel,
    Other,
}

pub fn result_kind_for_method(method: &str) -> ResultKind {
    match method {
        "initialize" => ResultKind::Initialize,
        "tools/list" => ResultKind::ListTools,
        "resources/list" => ResultKind::ListResources,
        "prompts/list" => ResultKind::ListPrompts,
        "tools/call" => ResultKind::CallTool,
        "prompts/get" => ResultKind::GetPrompt,
        "completion/complete" => ResultKind::Complete,
        "resources/subscribe" => ResultKind::Subscribe,
        "logging/setLevel" => ResultKind::LoggingLevel,
        _ => ResultKind::Other,
    }
}

/// Validates a response `result` value against its kind. Failures are
/// reported to the caller as a `Vec<String>` of warnings — the router logs
/// them and bumps a metric but never fails the client call.
pub fn validate_response(kind: ResultKind, result: &Value) -> Vec<String> {
    let mut warnings = Vec::new();
    match kind {
        ResultKind::CallTool => validate_call_tool_result(result, &mut warnings),
        ResultKind::ListTools => validate_named_list(result, "tools", &mut warnings),
        ResultKind::ListResources => validate_named_list(result, "resources", &mut warnings),
        ResultKind::ListPrompts => validate_named_list(result, "prompts", &mut warnings),
        ResultKind::GetPrompt => {
            if result.get("messages").is_none_or(|m| !m.is_array()) {
                warnings.push("get-prompt result missing messages array".into());
            } else if let Some(messages) = result.get("messages").and_then(|m| m.as_array()) {
                for msg in messages {
                    validate_prompt_message(msg, &mut warnings);
                }
            }
        }
        ResultKind::Initialize => {
            if let Some(v) = result.get("protocolVersion").and_then(|v| v.as_str())
                && !is_protocol_version(v)
            {
                warnings.push(format!("invalid protocolVersion \"{v}\""));
            }
        }
        _ => {}
    }
    warnings
}

fn validate_named_list(result: &Value, field: &str, warnings: &mut Vec<String>) {
    if result.get(field).is_none_or(|v| !v.is_array()) {
        warnings.push(format!("{field} result missing array field \"{field}\""));
    }
}

/// ResourceContent must have exactly one of `text` or `blob`.
pub fn validate_resource_content(content: &Value, warnings: &mut Vec<String>) {
    let has_text = content.get("text").is_some();
    let has_blob = content.get("blob").is_some();
    if has_text == has_blob {
        warnings.push("ResourceContent must have exactly one of text or blob".into());
    }
}

/// `CallToolResult.content` must be non-empty; each item's `type` in
/// {text, image, resource}; text requires non-empty `text`; image/resource
/// require non-empty `data`.
fn validate_call_tool_result(result: &Value, warnings: &mut Vec<String>) {
    let Some(content) = result.get("content").and_then(|c| c.as_array()) else {
        warnings.push("CallToolResult missing content array".into());
        return;
    };
    if content.is_empty() {
        warnings.push("CallToolResult.content must be non-empty".into());
    }
    for item in content {
        match item.get("type").and_then(|t| t.as_str()) {
            Some("text") => {
                if item.get("text").and_then(|t| t.as_str()).is_none_or(str::is_empty) {
                    warnings.push("text content item requires non-empty text".into());
                }
            }
            Some("image") | Some("resource") => {
                if item.get("data").and_then(|d| d.as_str()).is_none_or(str::is_empty) {
                    warnings.push("image/resource content item requires non-empty data".into());
                }
            }
            other => warnings.push(format!("unknown content item type {other:?}")),
        }
    }
}

/// PromptMessage role in {user, assistant, system}.
fn validate_prompt_message(msg: &Value, warnings: &mut Vec<String>) {
    match msg.get("role").and_then(|r| r.as_str()) {
        Some("user") | Some("assistant") | Some("system") => {}
        other => warnings.push(format!("invalid PromptMessage role {other:?}")),
    }
}

/// Protocol version strings must match `^\d+\.\d+\.\d+$`.
pub fn is_protocol_version(s: &str) -> bool {
    let mut parts = s.split('.');
    let ok = (0..3).all(|_| {
        parts
            .next()
            .is_some_and(|p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()))
    });
    ok && parts.next().is_none()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn protocol_version_matches_semver_shape() {
        assert!(is_protocol_version("2024.11.05"));
        assert!(!is_protocol_version("2024.11"));
        assert!(!is_protocol_version("a.b.c"));
    }

    #[test]
    fn tools_call_requires_name() {
        assert!(validate_request("tools/call", &json!({})).is_err());
        assert!(validate_request("tools/call", &json!({"name": "memory.get"})).is_ok());
    }

    #[test]
    fn empty_call_tool_content_warns_without_failing() {
        let warnings = validate_response(ResultKind::CallTool, &json!({"content": []}));
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn resource_content_requires_exactly_one_of_text_or_blob() {
        let mut warnings = Vec::new();
        validate_resource_content(&json!({"text": "hi"}), &mut warnings);
        assert!(warnings.is_empty());
        let mut warnings = Vec::new();
        validate_resource_content(&json!({"text": "hi", "blob": "AA=="}), &mut warnings);
        assert_eq!(warnings.len(), 1);
    }
}
