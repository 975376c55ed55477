//! Plugin-path dispatch for `tools/list`, `tools/call`, `resources/list`,
//! `prompts/list`. Returns `None` when no plugin can serve
//! the request, letting the caller fall through to the backend path.

use std::sync::Arc;

use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use crate::config::policy::Permission;
use crate::errors::GatewayError;
use crate::plugins::{PluginContext, PluginManager, normalize_tool_result, resolve_tool_name};
use crate::rbac::{Capabilities, classify_tool_permission, is_destructive_tool};

pub async fn dispatch(
    plugins: &Arc<PluginManager>,
    caps: &Capabilities,
    cancellation: &CancellationToken,
    method: &str,
    params: &Value,
) -> Option<Result<Value, GatewayError>> {
    match method {
        "tools/list" => Some(Ok(json!({ "tools": plugins.aggregate_tools(caps) }))),
        "resources/list" => Some(Ok(json!({ "resources": plugins.aggregate_resources(caps) }))),
        "prompts/list" => Some(Ok(json!({ "prompts": plugins.aggregate_prompts(caps) }))),
        "tools/call" => Some(call_tool(plugins, caps, cancellation, params).await),
        _ => None,
    }
}

async fn call_tool(
    plugins: &Arc<PluginManager>,
    caps: &Capabilities,
    cancellation: &CancellationToken,
    params: &Value,
) -> Result<Value, GatewayError> {
    let qualified = params
        .get("name")
        .and_then(|v| v.as_str())
        .ok_or_else(|| GatewayError::validation("tools/call requires \"name\""))?;
    let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));

    let default_plugin = plugins.names().first().cloned();
    let (plugin_name, tool_name) = resolve_tool_name(qualified, default_plugin.as_deref());
    let plugin_name = plugin_name
        .ok_or_else(|| GatewayError::not_found(format!("could not resolve a plugin for tool \"{qualified}\"")))?;

    if !caps.has_permission(&plugin_name, Permission::Execute) {
        return Err(GatewayError::forbidden(format!(
            "\"execute\" permission required on plugin \"{plugin_name}\""
        )));
    }

    let required = classify_tool_permission(&tool_name);
    if !caps.has_permission(&plugin_name, required) {
        return Err(GatewayError::forbidden(format!(
            "\"{required:?}\" permission required on plugin \"{plugin_name}\""
        )));
    }
    if is_destructive_tool(&tool_name) && !caps.has_permission(&plugin_name, Permission::Admin) {
        return Err(GatewayError::forbidden(format!(
            "destructive tool \"{tool_name}\" requires \"admin\" permission on plugin \"{plugin_name}\""
        )));
    }

    let ctx = PluginContext {
        cancellation: cancellation.clone(),
    };
    let result = plugins
        .call_tool_with_retry(&plugin_name, &ctx, &tool_name, arguments)
        .await?;
    Ok(normalize_tool_result(result))
}
