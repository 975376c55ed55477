//! Capability descriptors shared by the Service Registry (C7) and Plugin
//! Manager (C4): tools, resources, and prompts advertised by a plugin or
//! backend.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Names must match `[A-Za-z0-9_-]+`.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

/// URIs must be non-empty and contain a scheme.
pub fn is_valid_uri(uri: &str) -> bool {
    url::Url::parse(uri).is_ok()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub category: Option<String>,
    pub input_schema: Value,
    #[serde(default)]
    pub examples: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub uri: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptArgument {
    pub name: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptDescriptor {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub arguments: Vec<PromptArgument>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CapabilitySet {
    #[serde(default)]
    pub tools: Vec<ToolDescriptor>,
    #[serde(default)]
    pub resources: Vec<ResourceDescriptor>,
    #[serde(default)]
    pub prompts: Vec<PromptDescriptor>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_validation_rejects_dots_and_slashes() {
        assert!(is_valid_name("memory_get"));
        assert!(is_valid_name("memory-get-2"));
        assert!(!is_valid_name("memory.get"));
        assert!(!is_valid_name(""));
    }

    #[test]
    fn uri_validation_requires_scheme() {
        assert!(is_valid_uri("plugin://memory/notes"));
        assert!(is_valid_uri("https://example.com/x"));
        assert!(!is_valid_uri("not a uri"));
    }
}
