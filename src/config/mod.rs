//! Gateway configuration root module.
//!
//! A root `GatewayConfig` loaded from an optional YAML file and layered with
//! CLI/env overrides with highest precedence. Parsing the config file itself
//! is treated as ambient I/O; the structures below are the contract that
//! I/O produces.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod components;
pub mod defaults;
pub mod policy;

pub use components::{
    CommConfig, HealthConfig, JwtConfig, PluginManagerConfig, RbacConfig, ReloadConfig,
    RouterConfig, ServerConfig,
};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GatewayConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub router: RouterConfig,

    #[serde(default)]
    pub rbac: RbacConfig,

    #[serde(default)]
    pub health: HealthConfig,

    #[serde(default)]
    pub plugins: PluginManagerConfig,

    #[serde(default)]
    pub comm: CommConfig,

    #[serde(default)]
    pub reload: ReloadConfig,
}

impl GatewayConfig {
    /// Compute the default configuration file path, overridable via
    /// `GATEWAY_CONFIG_PATH`.
    pub fn default_path() -> PathBuf {
        if let Some(p) = std::env::var_os("GATEWAY_CONFIG_PATH") {
            return PathBuf::from(p);
        }
        if cfg!(target_os = "windows") {
            let home = std::env::var_os("USERPROFILE").unwrap_or_default();
            PathBuf::from(home).join("mcp-gateway").join("config.yaml")
        } else {
            PathBuf::from("/etc/mcp-gateway/config.yaml")
        }
    }

    /// Load from `config_path` (or the default path) and apply the supplied
    /// CLI/env overrides, which take highest precedence.
    pub fn load_with_overrides(
        config_path: Option<PathBuf>,
        bind_address: Option<String>,
        require_authentication: Option<bool>,
    ) -> Result<Self, ConfigError> {
        let path = config_path.unwrap_or_else(Self::default_path);

        let mut cfg = if path.exists() {
            tracing::debug!("Reading configuration from {:?}", path);
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::Parse(path.clone(), format!("I/O error: {e}")))?;
            Self::parse_yaml_with_path(&path, &text)?
        } else {
            tracing::warn!("No configuration file at {:?}, using defaults", path);
            Self::default()
        };

        if let Some(addr) = bind_address {
            cfg.server.bind_address = addr;
        }
        if let Some(req_auth) = require_authentication {
            cfg.router.require_authentication = req_auth;
        }

        Ok(cfg)
    }

    fn parse_yaml_with_path(path: &Path, text: &str) -> Result<Self, ConfigError> {
        serde_yaml_ng::from_str::<Self>(text).map_err(|e| {
            let msg = if let Some(loc) = e.location() {
                format!("yaml error at line {}, column {}: {e}", loc.line(), loc.column())
            } else {
                format!("yaml error: {e}")
            };
            ConfigError::Parse(path.to_path_buf(), msg)
        })
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to parse {0}: {1}")]
    Parse(PathBuf, String),
}
