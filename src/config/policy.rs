//! Policy file shape.
//!
//! Parsing the YAML itself is treated as ambient config I/O ("YAML policy
//! file I/O" is an external collaborator contract); this module only
//! defines the shape and a thin `serde_yaml_ng` load used by
//! `rbac::PolicyStore::from_file` so the binary has something to run.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::errors::StartupError;

/// One of the four permission levels a policy rule can grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Read,
    Write,
    Execute,
    Admin,
}

impl Permission {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "read" => Some(Permission::Read),
            "write" => Some(Permission::Write),
            "execute" => Some(Permission::Execute),
            "admin" => Some(Permission::Admin),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PolicyRule {
    pub plugin: String,
    pub permissions: Vec<String>,
    #[serde(default)]
    pub conditions: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Policy {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub rules: Vec<PolicyRule>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct PolicyFile {
    #[serde(default)]
    pub policies: HashMap<String, Policy>,
    pub default: Option<String>,
}

impl PolicyFile {
    pub fn from_yaml_str(s: &str) -> Result<Self, StartupError> {
        serde_yaml_ng::from_str(s).map_err(|e| StartupError::PolicyError(e.to_string()))
    }

    pub fn load(path: &std::path::Path) -> Result<Self, StartupError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| StartupError::PolicyError(format!("{}: {e}", path.display())))?;
        Self::from_yaml_str(&contents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_policy_file() {
        let yaml = r#"
policies:
  admin:
    rules:
      - plugin: "*"
        permissions: [read, write, execute, admin]
  viewer:
    rules:
      - plugin: memory
        permissions: [read]
default: viewer
"#;
        let file = PolicyFile::from_yaml_str(yaml).unwrap();
        assert_eq!(file.default.as_deref(), Some("viewer"));
        assert_eq!(file.policies["admin"].rules[0].plugin, "*");
    }
}
