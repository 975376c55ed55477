//! Reference plugin implementations exercising the `Plugin` contract.
//!
//! The memory K/V store, git shell wrapper, and file-editor plugins are
//! external collaborators — only their contract to the Plugin Manager is
//! normative here. `MemoryPlugin` is a minimal, in-process stand-in used by
//! tests and local development; `GitPlugin` and `EditorPlugin` are thin
//! stubs that advertise their tool surface without shelling out or touching
//! the filesystem.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::capability::{PromptDescriptor, ResourceDescriptor, ToolDescriptor};
use crate::errors::GatewayError;
use crate::plugins::{Plugin, PluginContext};

/// In-process key/value store plugin.
pub struct MemoryPlugin {
    store: RwLock<HashMap<String, Value>>,
}

impl MemoryPlugin {
    pub fn new() -> Self {
        Self {
            store: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for MemoryPlugin {
    fn name(&self) -> &str {
        "memory"
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    fn description(&self) -> &str {
        "In-process key/value store"
    }

    fn get_tools(&self) -> Vec<ToolDescriptor> {
        vec![
            ToolDescriptor {
                name: "get".into(),
                description: "Fetch a stored value by key".into(),
                category: Some("read".into()),
                input_schema: json!({"type": "object", "properties": {"key": {"type": "string"}}, "required": ["key"]}),
                examples: None,
            },
            ToolDescriptor {
                name: "store".into(),
                description: "Store a value under a key".into(),
                category: Some("write".into()),
                input_schema: json!({"type": "object", "properties": {"key": {"type": "string"}, "value": {}}, "required": ["key", "value"]}),
                examples: None,
            },
            ToolDescriptor {
                name: "clear".into(),
                description: "Remove all stored keys".into(),
                category: Some("destructive".into()),
                input_schema: json!({"type": "object", "properties": {"confirm": {"type": "boolean"}}}),
                examples: None,
            },
        ]
    }

    fn get_resources(&self) -> Vec<ResourceDescriptor> {
        vec![]
    }

    fn get_prompts(&self) -> Vec<PromptDescriptor> {
        vec![]
    }

    async fn call_tool(
        &self,
        _ctx: &PluginContext,
        name: &str,
        args: Value,
    ) -> Result<Value, GatewayError> {
        // The router's backward-compatibility prefix heuristic routes
        // `memory_get` etc. here without stripping the prefix, so the two
        // spellings of the same tool must resolve identically.
        let name = name.strip_prefix("memory_").unwrap_or(name);
        match name {
            "get" => {
                let key = args
                    .get("key")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| GatewayError::validation("memory.get requires \"key\""))?;
                let store = self.store.read().expect("memory store poisoned");
                Ok(store.get(key).cloned().unwrap_or(Value::Null))
            }
            "store" => {
                let key = args
                    .get("key")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| GatewayError::validation("memory.store requires \"key\""))?
                    .to_string();
                let value = args
                    .get("value")
                    .cloned()
                    .ok_or_else(|| GatewayError::validation("memory.store requires \"value\""))?;
                self.store.write().expect("memory store poisoned").insert(key, value);
                Ok(Value::String("stored".into()))
            }
            "clear" => {
                self.store.write().expect("memory store poisoned").clear();
                Ok(Value::String("cleared".into()))
            }
            other => Err(GatewayError::not_found(format!("unknown memory tool \"{other}\""))),
        }
    }

    async fn read_resource(&self, _ctx: &PluginContext, uri: &str) -> Result<Value, GatewayError> {
        Err(GatewayError::not_found(format!("no such resource \"{uri}\"")))
    }

    async fn get_prompt(
        &self,
        _ctx: &PluginContext,
        name: &str,
        _args: Value,
    ) -> Result<Value, GatewayError> {
        Err(GatewayError::not_found(format!("no such prompt \"{name}\"")))
    }

    async fn initialize(&self) -> Result<(), GatewayError> {
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), GatewayError> {
        Ok(())
    }

    async fn health_check(&self) -> Result<(), GatewayError> {
        Ok(())
    }
}

macro_rules! stub_plugin {
    ($struct_name:ident, $plugin_name:literal, $description:literal, [$($tool:literal),* $(,)?]) => {
        #[doc = concat!("Thin contract-only stub for the ", $description, " plugin.")]
        pub struct $struct_name;

        #[async_trait]
        impl Plugin for $struct_name {
            fn name(&self) -> &str {
                $plugin_name
            }

            fn version(&self) -> &str {
                "0.1.0"
            }

            fn description(&self) -> &str {
                $description
            }

            fn get_tools(&self) -> Vec<ToolDescriptor> {
                vec![$(ToolDescriptor {
                    name: $tool.into(),
                    description: concat!($tool, " (external collaborator; not implemented by the gateway core)").into(),
                    category: None,
                    input_schema: json!({"type": "object"}),
                    examples: None,
                }),*]
            }

            fn get_resources(&self) -> Vec<ResourceDescriptor> {
                vec![]
            }

            fn get_prompts(&self) -> Vec<PromptDescriptor> {
                vec![]
            }

            async fn call_tool(
                &self,
                _ctx: &PluginContext,
                name: &str,
                _args: Value,
            ) -> Result<Value, GatewayError> {
                Err(GatewayError::internal(format!(
                    "{} is a contract stub; tool \"{name}\" has no implementation",
                    $plugin_name
                )))
            }

            async fn read_resource(&self, _ctx: &PluginContext, uri: &str) -> Result<Value, GatewayError> {
                Err(GatewayError::not_found(format!("no such resource \"{uri}\"")))
            }

            async fn get_prompt(
                &self,
                _ctx: &PluginContext,
                name: &str,
                _args: Value,
            ) -> Result<Value, GatewayError> {
                Err(GatewayError::not_found(format!("no such prompt \"{name}\"")))
            }

            async fn initialize(&self) -> Result<(), GatewayError> {
                Ok(())
            }

            async fn shutdown(&self) -> Result<(), GatewayError> {
                Ok(())
            }

            async fn health_check(&self) -> Result<(), GatewayError> {
                Ok(())
            }
        }
    };
}

stub_plugin!(GitPlugin, "git", "git shell wrapper", ["status", "diff", "commit"]);
stub_plugin!(EditorPlugin, "editor", "file editor", ["read", "write", "remove"]);

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn store_then_get_round_trips() {
        let plugin = MemoryPlugin::new();
        let ctx = PluginContext::new();
        plugin
            .call_tool(&ctx, "store", json!({"key": "a", "value": 42}))
            .await
            .unwrap();
        let got = plugin.call_tool(&ctx, "get", json!({"key": "a"})).await.unwrap();
        assert_eq!(got, json!(42));
    }

    #[tokio::test]
    async fn clear_empties_the_store() {
        let plugin = MemoryPlugin::new();
        let ctx = PluginContext::new();
        plugin.call_tool(&ctx, "store", json!({"key": "a", "value": 1})).await.unwrap();
        plugin.call_tool(&ctx, "clear", json!({})).await.unwrap();
        let got = plugin.call_tool(&ctx, "get", json!({"key": "a"})).await.unwrap();
        assert_eq!(got, Value::Null);
    }

    #[tokio::test]
    async fn prefixed_and_bare_tool_names_are_equivalent() {
        let plugin = MemoryPlugin::new();
        let ctx = PluginContext::new();
        plugin
            .call_tool(&ctx, "memory_store", json!({"key": "a", "value": 7}))
            .await
            .unwrap();
        let got = plugin.call_tool(&ctx, "memory_get", json!({"key": "a"})).await.unwrap();
        assert_eq!(got, json!(7));
    }
}
