//! Gateway configuration components.

use serde::{Deserialize, Serialize};

use super::defaults;
use crate::registry::LoadBalancingStrategy;

/// Router (C8) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    #[serde(default = "defaults::default_request_timeout_secs")]
    pub default_timeout_secs: u64,

    #[serde(default = "defaults::default_max_request_size")]
    pub max_request_size: usize,

    #[serde(default = "defaults::default_true")]
    pub enable_method_routing: bool,

    #[serde(default = "defaults::default_load_balancing_strategy")]
    pub load_balancing_strategy: LoadBalancingStrategy,

    #[serde(default = "defaults::default_true")]
    pub validate_requests: bool,

    #[serde(default = "defaults::default_false")]
    pub validate_responses: bool,

    #[serde(default = "defaults::default_true")]
    pub retry_enabled: bool,

    #[serde(default = "defaults::default_retry_attempts")]
    pub retry_attempts: u32,

    #[serde(default = "defaults::default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    #[serde(default = "defaults::default_true")]
    pub enable_metrics: bool,

    #[serde(default = "defaults::default_true")]
    pub enable_plugin_routing: bool,

    #[serde(default = "defaults::default_false")]
    pub require_authentication: bool,

    /// User-Agent sent on backend dispatch requests.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_user_agent() -> String {
    format!("mcp-gateway/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: defaults::default_request_timeout_secs(),
            max_request_size: defaults::default_max_request_size(),
            enable_method_routing: defaults::default_true(),
            load_balancing_strategy: defaults::default_load_balancing_strategy(),
            validate_requests: defaults::default_true(),
            validate_responses: defaults::default_false(),
            retry_enabled: defaults::default_true(),
            retry_attempts: defaults::default_retry_attempts(),
            retry_backoff_ms: defaults::default_retry_backoff_ms(),
            enable_metrics: defaults::default_true(),
            enable_plugin_routing: defaults::default_true(),
            require_authentication: defaults::default_false(),
            user_agent: default_user_agent(),
        }
    }
}

/// JWT validation sub-config of RBAC.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct JwtConfig {
    /// Path to a PEM-encoded RSA public key used to verify RS256 signatures.
    pub public_key_path: Option<String>,

    /// Expected `iss` claim.
    pub issuer: Option<String>,

    /// Expected `aud` claim, if audience checking is enabled.
    pub audience: Option<String>,

    #[serde(default = "defaults::default_clock_skew_secs")]
    pub clock_skew_secs: u64,
}

/// RBAC (C3) configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RbacConfig {
    /// Path to the YAML policy file (I/O is an external collaborator;
    /// this field only names where to find it).
    pub policy_path: Option<String>,

    /// Name of the policy applied when no role policy matches.
    pub default_policy: Option<String>,

    #[serde(default = "defaults::default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    #[serde(default = "defaults::default_cache_capacity")]
    pub cache_capacity: usize,

    #[serde(default)]
    pub jwt: JwtConfig,
}

/// Health Manager (C9) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "defaults::default_unhealthy_threshold")]
    pub unhealthy_threshold: f64,

    #[serde(default = "defaults::default_degraded_threshold")]
    pub degraded_threshold: f64,

    #[serde(default = "defaults::default_quick_check_interval_secs")]
    pub quick_check_interval_secs: u64,

    #[serde(default = "defaults::default_full_check_interval_secs")]
    pub full_check_interval_secs: u64,

    #[serde(default = "defaults::default_global_timeout_secs")]
    pub global_timeout_secs: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            unhealthy_threshold: defaults::default_unhealthy_threshold(),
            degraded_threshold: defaults::default_degraded_threshold(),
            quick_check_interval_secs: defaults::default_quick_check_interval_secs(),
            full_check_interval_secs: defaults::default_full_check_interval_secs(),
            global_timeout_secs: defaults::default_global_timeout_secs(),
        }
    }
}

/// Plugin Manager (C4) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginManagerConfig {
    #[serde(default = "defaults::default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "defaults::default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Default plugin used when an unqualified tool name can't be resolved
    /// by the `memory_`/`git_`/`editor_` prefix heuristic.
    pub default_plugin: Option<String>,
}

impl Default for PluginManagerConfig {
    fn default() -> Self {
        Self {
            max_retries: defaults::default_max_retries(),
            retry_backoff_ms: defaults::default_retry_backoff_ms(),
            default_plugin: None,
        }
    }
}

/// Plugin Communication (C5) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommConfig {
    #[serde(default = "defaults::default_event_buffer_size")]
    pub event_buffer_size: usize,

    #[serde(default = "defaults::default_event_processing_timeout_secs")]
    pub event_processing_timeout_secs: u64,

    #[serde(default = "defaults::default_audit_retention_entries")]
    pub audit_retention_entries: usize,

    #[serde(default = "defaults::default_audit_retention_secs")]
    pub audit_retention_secs: u64,

    /// Allowed (from, to) communication pairs; `"*"` as `to` is an explicit
    /// wildcard. Empty means "all pairs allowed".
    #[serde(default)]
    pub allowed_pairs: Vec<(String, String)>,
}

impl Default for CommConfig {
    fn default() -> Self {
        Self {
            event_buffer_size: defaults::default_event_buffer_size(),
            event_processing_timeout_secs: defaults::default_event_processing_timeout_secs(),
            audit_retention_entries: defaults::default_audit_retention_entries(),
            audit_retention_secs: defaults::default_audit_retention_secs(),
            allowed_pairs: Vec::new(),
        }
    }
}

/// Hot Reload (C6) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReloadConfig {
    /// Deadline for the quiescence phase before proceeding anyway.
    #[serde(default = "default_quiesce_deadline_ms")]
    pub quiesce_deadline_ms: u64,

    /// Timeout bound on the post-swap `HealthCheck` in the `Verifying` phase.
    #[serde(default = "default_verify_timeout_ms")]
    pub verify_timeout_ms: u64,
}

fn default_quiesce_deadline_ms() -> u64 {
    5000
}

fn default_verify_timeout_ms() -> u64 {
    2000
}

impl Default for ReloadConfig {
    fn default() -> Self {
        Self {
            quiesce_deadline_ms: default_quiesce_deadline_ms(),
            verify_timeout_ms: default_verify_timeout_ms(),
        }
    }
}

/// HTTP server bind configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "defaults::default_bind_address")]
    pub bind_address: String,

    #[serde(default)]
    pub cors_allowed_origin: Option<String>,

    /// Enables `POST /mcp/<method-path>` aliases in addition to `POST /mcp`.
    #[serde(default = "defaults::default_true")]
    pub enable_method_aliases: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: defaults::default_bind_address(),
            cors_allowed_origin: None,
            enable_method_aliases: true,
        }
    }
}
