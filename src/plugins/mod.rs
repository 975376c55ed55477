//! C4 Plugin Manager: lifecycle, capability aggregation, tool-name
//! normalization, and retried invocation of in-process plugins.

pub mod builtin;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::capability::{PromptDescriptor, ResourceDescriptor, ToolDescriptor};
use crate::errors::{ErrorKind, GatewayError};
use crate::rbac::Capabilities;

/// Monotonic plugin lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PluginState {
    Registered,
    Initialized,
    Running,
    Draining,
    Shutdown,
}

/// Carries per-call cancellation.
#[derive(Clone)]
pub struct PluginContext {
    pub cancellation: CancellationToken,
}

impl PluginContext {
    pub fn new() -> Self {
        Self {
            cancellation: CancellationToken::new(),
        }
    }
}

impl Default for PluginContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Contract every in-process capability provider implements.
/// The concrete providers (memory K/V store, git shell wrapper, file editor)
/// are external collaborators — only this trait is normative.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;
    fn version(&self) -> &str;
    fn description(&self) -> &str;

    fn get_tools(&self) -> Vec<ToolDescriptor>;
    fn get_resources(&self) -> Vec<ResourceDescriptor>;
    fn get_prompts(&self) -> Vec<PromptDescriptor>;

    async fn call_tool(
        &self,
        ctx: &PluginContext,
        name: &str,
        args: Value,
    ) -> Result<Value, GatewayError>;

    async fn read_resource(&self, ctx: &PluginContext, uri: &str) -> Result<Value, GatewayError>;

    async fn get_prompt(
        &self,
        ctx: &PluginContext,
        name: &str,
        args: Value,
    ) -> Result<Value, GatewayError>;

    async fn initialize(&self) -> Result<(), GatewayError>;
    async fn shutdown(&self) -> Result<(), GatewayError>;
    async fn health_check(&self) -> Result<(), GatewayError>;
}

struct ManagedPlugin {
    plugin: Arc<dyn Plugin>,
    state: std::sync::RwLock<PluginState>,
    in_flight: AtomicI64,
}

/// Result shapes a plugin may return, normalized at the boundary into the
/// MCP `CallToolResult` content shape.
pub fn normalize_tool_result(value: Value) -> Value {
    let text = match &value {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => map.get("text").and_then(|v| v.as_str()).map(str::to_string),
        other => Some(other.to_string()),
    };
    match text {
        Some(text) => serde_json::json!({
            "content": [{"type": "text", "text": text}],
            "isError": false,
        }),
        None => value,
    }
}

/// Splits `"plugin.tool"` on the first `.`; falls back to the
/// `memory_`/`git_`/`editor_` prefix heuristic; otherwise treats the whole
/// name as unqualified.
pub fn resolve_tool_name(qualified: &str, default_plugin: Option<&str>) -> (Option<String>, String) {
    if let Some((plugin, tool)) = qualified.split_once('.') {
        return (Some(plugin.to_string()), tool.to_string());
    }
    for (prefix, plugin) in [("memory_", "memory"), ("git_", "git"), ("editor_", "editor")] {
        if let Some(rest) = qualified.strip_prefix(prefix) {
            return (Some(plugin.to_string()), format!("{prefix}{rest}"));
        }
    }
    (default_plugin.map(str::to_string), qualified.to_string())
}

/// Registry of loaded plugins and their tool/resource/prompt aggregation.
pub struct PluginManager {
    plugins: std::sync::RwLock<HashMap<String, Arc<ManagedPlugin>>>,
    max_retries: u32,
    retry_backoff: Duration,
}

impl PluginManager {
    pub fn new(max_retries: u32, retry_backoff: Duration) -> Self {
        Self {
            plugins: std::sync::RwLock::new(HashMap::new()),
            max_retries,
            retry_backoff,
        }
    }

    pub fn register(&self, plugin: Arc<dyn Plugin>) {
        let name = plugin.name().to_string();
        let managed = Arc::new(ManagedPlugin {
            plugin,
            state: std::sync::RwLock::new(PluginState::Registered),
            in_flight: AtomicI64::new(0),
        });
        self.plugins
            .write()
            .expect("plugins poisoned")
            .insert(name, managed);
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.plugins
            .write()
            .expect("plugins poisoned")
            .remove(name)
            .is_some()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Plugin>> {
        self.plugins
            .read()
            .expect("plugins poisoned")
            .get(name)
            .map(|m| m.plugin.clone())
    }

    pub fn names(&self) -> Vec<String> {
        self.plugins.read().expect("plugins poisoned").keys().cloned().collect()
    }

    pub fn set_state(&self, name: &str, state: PluginState) {
        if let Some(m) = self.plugins.read().expect("plugins poisoned").get(name) {
            *m.state.write().expect("plugin state poisoned") = state;
        }
    }

    pub fn state_of(&self, name: &str) -> Option<PluginState> {
        self.plugins
            .read()
            .expect("plugins poisoned")
            .get(name)
            .map(|m| *m.state.read().expect("plugin state poisoned"))
    }

    pub fn in_flight(&self, name: &str) -> i64 {
        self.plugins
            .read()
            .expect("plugins poisoned")
            .get(name)
            .map(|m| m.in_flight.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Replace a plugin map entry atomically during a reload's swap phase.
    /// Returns the prior instance, if any.
    pub fn swap(&self, name: &str, new_plugin: Arc<dyn Plugin>) -> Option<Arc<dyn Plugin>> {
        let mut plugins = self.plugins.write().expect("plugins poisoned");
        let prior = plugins.get(name).map(|m| m.plugin.clone());
        plugins.insert(
            name.to_string(),
            Arc::new(ManagedPlugin {
                plugin: new_plugin,
                state: std::sync::RwLock::new(PluginState::Running),
                in_flight: AtomicI64::new(0),
            }),
        );
        prior
    }

    /// Aggregate tools across plugins the caller may `execute` on, prefixed
    /// `"<plugin>."`.
    pub fn aggregate_tools(&self, caps: &Capabilities) -> Vec<serde_json::Value> {
        let plugins = self.plugins.read().expect("plugins poisoned");
        let mut out = Vec::new();
        for (name, managed) in plugins.iter() {
            if !caps.has_permission(name, crate::config::policy::Permission::Execute) {
                continue;
            }
            for tool in managed.plugin.get_tools() {
                out.push(serde_json::json!({
                    "name": format!("{name}.{}", tool.name),
                    "description": tool.description,
                    "inputSchema": tool.input_schema,
                }));
            }
        }
        out
    }

    pub fn aggregate_resources(&self, caps: &Capabilities) -> Vec<serde_json::Value> {
        let plugins = self.plugins.read().expect("plugins poisoned");
        let mut out = Vec::new();
        for (name, managed) in plugins.iter() {
            if !caps.has_permission(name, crate::config::policy::Permission::Read) {
                continue;
            }
            for res in managed.plugin.get_resources() {
                out.push(serde_json::to_value(res).expect("resource descriptor serializes"));
            }
        }
        out
    }

    pub fn aggregate_prompts(&self, caps: &Capabilities) -> Vec<serde_json::Value> {
        let plugins = self.plugins.read().expect("plugins poisoned");
        let mut out = Vec::new();
        for (name, managed) in plugins.iter() {
            if !caps.has_permission(name, crate::config::policy::Permission::Read) {
                continue;
            }
            for prompt in managed.plugin.get_prompts() {
                out.push(serde_json::to_value(prompt).expect("prompt descriptor serializes"));
            }
        }
        out
    }

    /// `execute_with_retry`: up to `max_retries` total attempts (including
    /// the first), spaced by linear backoff `attempt * retry_backoff`;
    /// never retries on cancellation or a `Forbidden` outcome (the typed
    /// stand-in for "access denied").
    pub async fn call_tool_with_retry(
        &self,
        plugin_name: &str,
        ctx: &PluginContext,
        tool_name: &str,
        args: Value,
    ) -> Result<Value, GatewayError> {
        let managed = {
            let plugins = self.plugins.read().expect("plugins poisoned");
            plugins
                .get(plugin_name)
                .cloned()
                .ok_or_else(|| GatewayError::not_found(format!("plugin \"{plugin_name}\" not found")))?
        };

        managed.in_flight.fetch_add(1, Ordering::Relaxed);
        let _guard = scopeguard(&managed);

        let max_attempts = self.max_retries.max(1);
        let mut attempt = 1u32;
        loop {
            if ctx.cancellation.is_cancelled() {
                return Err(GatewayError::internal("request cancelled"));
            }
            match managed.plugin.call_tool(ctx, tool_name, args.clone()).await {
                Ok(v) => return Ok(v),
                Err(e) if e.kind == ErrorKind::Forbidden || attempt >= max_attempts => {
                    return Err(e);
                }
                Err(_) => {
                    tokio::time::sleep(self.retry_backoff * attempt).await;
                    attempt += 1;
                }
            }
        }
    }
}

fn scopeguard(managed: &Arc<ManagedPlugin>) -> impl Drop + '_ {
    struct Guard<'a>(&'a Arc<ManagedPlugin>);
    impl Drop for Guard<'_> {
        fn drop(&mut self) {
            self.0.in_flight.fetch_sub(1, Ordering::Relaxed);
        }
    }
    Guard(managed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_dot_and_underscore_names_resolve_to_same_plugin() {
        let (plugin_a, tool_a) = resolve_tool_name("memory.get", None);
        let (plugin_b, _tool_b) = resolve_tool_name("memory_get", None);
        assert_eq!(plugin_a.as_deref(), Some("memory"));
        assert_eq!(plugin_b.as_deref(), Some("memory"));
        assert_eq!(tool_a, "get");
    }

    #[test]
    fn string_result_normalizes_to_text_content() {
        let out = normalize_tool_result(Value::String("hi".into()));
        assert_eq!(out["content"][0]["text"], "hi");
        assert_eq!(out["isError"], false);
    }

    #[test]
    fn map_with_text_field_normalizes_like_string() {
        let out = normalize_tool_result(serde_json::json!({"text": "hello", "extra": 1}));
        assert_eq!(out["content"][0]["text"], "hello");
    }
}
