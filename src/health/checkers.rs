//! Concrete checkers wired into the `HealthManager` at startup, one per
//! subsystem the gateway actually depends on to serve traffic.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use super::{CheckResult, Checker, HealthStatus};
use crate::plugins::PluginManager;
use crate::registry::{ServiceHealth, ServiceRegistry};

/// Reports on the in-process plugins the Plugin Manager holds. Critical:
/// `tools/list`/`tools/call` have no fallback if every plugin is down.
pub struct PluginChecker {
    plugins: Arc<PluginManager>,
}

impl PluginChecker {
    pub fn new(plugins: Arc<PluginManager>) -> Self {
        Self { plugins }
    }
}

#[async_trait]
impl Checker for PluginChecker {
    fn name(&self) -> &str {
        "plugins"
    }

    fn critical(&self) -> bool {
        true
    }

    async fn check(&self) -> CheckResult {
        let names = self.plugins.names();
        if names.is_empty() {
            return CheckResult {
                name: self.name().to_string(),
                status: HealthStatus::Unhealthy,
                critical: true,
                message: Some("no plugins registered".to_string()),
                duration_ms: 0,
                suggestions: vec!["register at least one plugin".to_string()],
                details: json!({}),
            };
        }

        let mut failing = Vec::new();
        for name in &names {
            let Some(plugin) = self.plugins.get(name) else { continue };
            if plugin.health_check().await.is_err() {
                failing.push(name.clone());
            }
        }

        let status = if failing.is_empty() {
            HealthStatus::Healthy
        } else if failing.len() == names.len() {
            HealthStatus::Unhealthy
        } else {
            HealthStatus::Degraded
        };

        CheckResult {
            name: self.name().to_string(),
            status,
            critical: true,
            message: (!failing.is_empty()).then(|| format!("unhealthy plugins: {}", failing.join(", "))),
            duration_ms: 0,
            suggestions: if failing.is_empty() {
                vec![]
            } else {
                vec!["inspect the failing plugin's health_check implementation".to_string()]
            },
            details: json!({ "plugins": names, "failing": failing }),
        }
    }
}

/// Reports on registered remote backends. Non-critical: the gateway can
/// still serve plugin-routed methods with zero backends registered.
pub struct RegistryChecker {
    registry: Arc<ServiceRegistry>,
}

impl RegistryChecker {
    pub fn new(registry: Arc<ServiceRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl Checker for RegistryChecker {
    fn name(&self) -> &str {
        "service_registry"
    }

    fn critical(&self) -> bool {
        false
    }

    async fn check(&self) -> CheckResult {
        let services = self.registry.list_all();
        if services.is_empty() {
            return CheckResult {
                name: self.name().to_string(),
                status: HealthStatus::Healthy,
                critical: false,
                message: Some("no backends registered".to_string()),
                duration_ms: 0,
                suggestions: vec![],
                details: json!({}),
            };
        }

        let unhealthy: Vec<String> = services
            .iter()
            .filter(|s| s.health == ServiceHealth::Unhealthy)
            .map(|s| s.name.clone())
            .collect();

        let status = if unhealthy.is_empty() {
            HealthStatus::Healthy
        } else if unhealthy.len() == services.len() {
            HealthStatus::Unhealthy
        } else {
            HealthStatus::Degraded
        };

        CheckResult {
            name: self.name().to_string(),
            status,
            critical: false,
            message: (!unhealthy.is_empty()).then(|| format!("unhealthy backends: {}", unhealthy.join(", "))),
            duration_ms: 0,
            suggestions: if unhealthy.is_empty() {
                vec![]
            } else {
                vec!["check backend connectivity and recent error rates".to_string()]
            },
            details: json!({ "registered": services.len(), "unhealthy": unhealthy }),
        }
    }
}
