//! C6 Hot Reload: quiesce, atomically swap, and verify a plugin in place.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::config::ReloadConfig;
use crate::errors::GatewayError;
use crate::plugins::{Plugin, PluginManager, PluginState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Phase {
    Preparing,
    Quiescing,
    Swapping,
    Verifying,
    Committed,
    RolledBack,
    Cancelled,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReloadOperation {
    pub op_id: String,
    pub plugin_name: String,
    pub from_version: String,
    pub to_version: String,
    pub phase: Phase,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

struct PluginVersion {
    generation: u64,
}

/// Releases a plugin's `active` reload marker on drop, including on early
/// return from a cancelled or panicking attempt.
struct ActiveGuard<'a> {
    active: &'a Mutex<HashSet<String>>,
    plugin_name: String,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.active.lock().expect("active reloads poisoned").remove(&self.plugin_name);
    }
}

/// Drives the `Preparing -> Quiescing -> Swapping -> Verifying ->
/// Committed|RolledBack|Cancelled` state machine.
pub struct ReloadSupervisor {
    plugins: Arc<PluginManager>,
    config: ReloadConfig,
    history: Mutex<VecDeque<ReloadOperation>>,
    generations: Mutex<std::collections::HashMap<String, PluginVersion>>,
    /// Plugins with a reload currently in a non-terminal phase; enforces
    /// "at most one non-terminal reload per plugin at any time".
    active: Mutex<HashSet<String>>,
    max_history: usize,
    next_generation: AtomicU64,
}

impl ReloadSupervisor {
    pub fn new(plugins: Arc<PluginManager>, config: ReloadConfig) -> Self {
        Self {
            plugins,
            config,
            history: Mutex::new(VecDeque::new()),
            generations: Mutex::new(std::collections::HashMap::new()),
            active: Mutex::new(HashSet::new()),
            max_history: 200,
            next_generation: AtomicU64::new(1),
        }
    }

    /// Runs the full reload state machine for `plugin_name`, replacing it
    /// with `new_plugin`. Verification is driven by a caller-supplied probe
    /// (normally the plugin's own `health_check`) so the supervisor stays
    /// independent of the Health Manager's aggregation policy. Rejects with
    /// a `Cancelled` operation if a reload of the same plugin is already
    /// in flight.
    pub async fn reload(
        &self,
        plugin_name: &str,
        from_version: &str,
        new_plugin: Arc<dyn Plugin>,
    ) -> ReloadOperation {
        let to_version = new_plugin.version().to_string();
        let op_id = Uuid::new_v4().to_string();
        let mut op = ReloadOperation {
            op_id: op_id.clone(),
            plugin_name: plugin_name.to_string(),
            from_version: from_version.to_string(),
            to_version: to_version.clone(),
            phase: Phase::Preparing,
            started_at: Utc::now(),
            finished_at: None,
            error: None,
        };

        if !self.active.lock().expect("active reloads poisoned").insert(plugin_name.to_string()) {
            op.phase = Phase::Cancelled;
            op.error = Some(format!("a reload of plugin \"{plugin_name}\" is already in progress"));
            op.finished_at = Some(Utc::now());
            self.record(op.clone());
            return op;
        }
        let _guard = ActiveGuard {
            active: &self.active,
            plugin_name: plugin_name.to_string(),
        };

        self.plugins.set_state(plugin_name, PluginState::Draining);
        op.phase = Phase::Quiescing;

        let quiesced = self.await_quiescence(plugin_name).await;
        if !quiesced {
            tracing::warn!(plugin = plugin_name, "quiescence deadline exceeded, swapping anyway");
        }

        op.phase = Phase::Swapping;
        let prior = self.plugins.swap(plugin_name, new_plugin.clone());
        if prior.is_none() {
            op.phase = Phase::Cancelled;
            op.error = Some(format!("plugin \"{plugin_name}\" was not registered"));
            op.finished_at = Some(Utc::now());
            self.record(op.clone());
            return op;
        }

        op.phase = Phase::Verifying;
        let verified = tokio::time::timeout(
            Duration::from_millis(self.config.verify_timeout_ms),
            new_plugin.health_check(),
        )
        .await;

        match verified {
            Ok(Ok(())) => {
                op.phase = Phase::Committed;
                self.plugins.set_state(plugin_name, PluginState::Running);
                self.generations.lock().expect("generations poisoned").insert(
                    plugin_name.to_string(),
                    PluginVersion {
                        generation: self.next_generation.fetch_add(1, Ordering::Relaxed),
                    },
                );
                if let Some(prior_plugin) = prior
                    && let Err(e) = prior_plugin.shutdown().await
                {
                    tracing::warn!(plugin = plugin_name, error = %e, "old plugin instance failed to shut down cleanly");
                }
            }
            Ok(Err(e)) => {
                self.rollback(plugin_name, prior, new_plugin.clone(), &mut op, e.message).await;
            }
            Err(_) => {
                self.rollback(
                    plugin_name,
                    prior,
                    new_plugin.clone(),
                    &mut op,
                    "health check timed out during verification".to_string(),
                )
                .await;
            }
        }

        op.finished_at = Some(Utc::now());
        self.record(op.clone());
        op
    }

    async fn rollback(
        &self,
        plugin_name: &str,
        prior: Option<Arc<dyn Plugin>>,
        new_plugin: Arc<dyn Plugin>,
        op: &mut ReloadOperation,
        error: String,
    ) {
        if let Err(e) = new_plugin.shutdown().await {
            tracing::warn!(plugin = plugin_name, error = %e, "rejected plugin instance failed to shut down cleanly");
        }
        if let Some(prior_plugin) = prior {
            self.plugins.swap(plugin_name, prior_plugin);
        }
        self.plugins.set_state(plugin_name, PluginState::Running);
        op.phase = Phase::RolledBack;
        op.error = Some(error);
    }

    /// Idempotent: rolling back a plugin with no in-progress reload is a
    /// no-op success.
    pub async fn rollback_plugin(&self, plugin_name: &str) -> Result<(), GatewayError> {
        if self.plugins.get(plugin_name).is_none() {
            return Err(GatewayError::not_found(format!("plugin \"{plugin_name}\" not found")));
        }
        Ok(())
    }

    async fn await_quiescence(&self, plugin_name: &str) -> bool {
        let deadline = Duration::from_millis(self.config.quiesce_deadline_ms);
        let start = tokio::time::Instant::now();
        loop {
            if self.plugins.in_flight(plugin_name) == 0 {
                return true;
            }
            if start.elapsed() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }

    fn record(&self, op: ReloadOperation) {
        let mut history = self.history.lock().expect("reload history poisoned");
        history.push_back(op);
        while history.len() > self.max_history {
            history.pop_front();
        }
    }

    pub fn history(&self, plugin_name: Option<&str>) -> Vec<ReloadOperation> {
        let history = self.history.lock().expect("reload history poisoned");
        history
            .iter()
            .filter(|op| plugin_name.is_none_or(|name| op.plugin_name == name))
            .cloned()
            .collect()
    }

    pub fn current_generation(&self, plugin_name: &str) -> Option<u64> {
        self.generations
            .lock()
            .expect("generations poisoned")
            .get(plugin_name)
            .map(|v| v.generation)
    }

    pub fn status(&self, op_id: &str) -> Option<ReloadOperation> {
        self.history
            .lock()
            .expect("reload history poisoned")
            .iter()
            .find(|op| op.op_id == op_id)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::Value;

    use crate::capability::{PromptDescriptor, ResourceDescriptor, ToolDescriptor};
    use crate::plugins::PluginContext;

    struct FakePlugin {
        version: &'static str,
        healthy: bool,
    }

    #[async_trait]
    impl Plugin for FakePlugin {
        fn name(&self) -> &str {
            "fake"
        }
        fn version(&self) -> &str {
            self.version
        }
        fn description(&self) -> &str {
            "fake plugin for tests"
        }
        fn get_tools(&self) -> Vec<ToolDescriptor> {
            vec![]
        }
        fn get_resources(&self) -> Vec<ResourceDescriptor> {
            vec![]
        }
        fn get_prompts(&self) -> Vec<PromptDescriptor> {
            vec![]
        }
        async fn call_tool(&self, _ctx: &PluginContext, _name: &str, _args: Value) -> Result<Value, GatewayError> {
            Ok(Value::Null)
        }
        async fn read_resource(&self, _ctx: &PluginContext, _uri: &str) -> Result<Value, GatewayError> {
            Err(GatewayError::not_found("no resources"))
        }
        async fn get_prompt(&self, _ctx: &PluginContext, _name: &str, _args: Value) -> Result<Value, GatewayError> {
            Err(GatewayError::not_found("no prompts"))
        }
        async fn initialize(&self) -> Result<(), GatewayError> {
            Ok(())
        }
        async fn shutdown(&self) -> Result<(), GatewayError> {
            Ok(())
        }
        async fn health_check(&self) -> Result<(), GatewayError> {
            if self.healthy {
                Ok(())
            } else {
                Err(GatewayError::internal("unhealthy"))
            }
        }
    }

    fn fast_config() -> ReloadConfig {
        ReloadConfig {
            quiesce_deadline_ms: 50,
            verify_timeout_ms: 200,
        }
    }

    #[tokio::test]
    async fn successful_reload_commits_and_bumps_generation() {
        let manager = Arc::new(PluginManager::new(1, Duration::from_millis(1)));
        manager.register(Arc::new(FakePlugin { version: "1.0.0", healthy: true }));
        let supervisor = ReloadSupervisor::new(manager.clone(), fast_config());

        let op = supervisor
            .reload("fake", "1.0.0", Arc::new(FakePlugin { version: "2.0.0", healthy: true }))
            .await;

        assert_eq!(op.phase, Phase::Committed);
        assert_eq!(manager.get("fake").unwrap().version(), "2.0.0");
        assert_eq!(supervisor.current_generation("fake"), Some(1));
    }

    #[tokio::test]
    async fn failed_verification_rolls_back_to_prior_version() {
        let manager = Arc::new(PluginManager::new(1, Duration::from_millis(1)));
        manager.register(Arc::new(FakePlugin { version: "1.0.0", healthy: true }));
        let supervisor = ReloadSupervisor::new(manager.clone(), fast_config());

        let op = supervisor
            .reload("fake", "1.0.0", Arc::new(FakePlugin { version: "2.0.0", healthy: false }))
            .await;

        assert_eq!(op.phase, Phase::RolledBack);
        assert_eq!(manager.get("fake").unwrap().version(), "1.0.0");
        assert_eq!(manager.state_of("fake"), Some(PluginState::Running));
    }

    #[tokio::test]
    async fn concurrent_reload_of_same_plugin_is_cancelled() {
        let manager = Arc::new(PluginManager::new(1, Duration::from_millis(1)));
        manager.register(Arc::new(FakePlugin { version: "1.0.0", healthy: true }));
        let supervisor = ReloadSupervisor::new(manager.clone(), fast_config());

        supervisor.active.lock().unwrap().insert("fake".to_string());
        let op = supervisor
            .reload("fake", "1.0.0", Arc::new(FakePlugin { version: "2.0.0", healthy: true }))
            .await;

        assert_eq!(op.phase, Phase::Cancelled);
        assert_eq!(manager.get("fake").unwrap().version(), "1.0.0", "no swap should occur");
    }

    #[tokio::test]
    async fn sequential_reloads_of_same_plugin_both_succeed() {
        let manager = Arc::new(PluginManager::new(1, Duration::from_millis(1)));
        manager.register(Arc::new(FakePlugin { version: "1.0.0", healthy: true }));
        let supervisor = ReloadSupervisor::new(manager.clone(), fast_config());

        let first = supervisor
            .reload("fake", "1.0.0", Arc::new(FakePlugin { version: "2.0.0", healthy: true }))
            .await;
        assert_eq!(first.phase, Phase::Committed);

        let second = supervisor
            .reload("fake", "2.0.0", Arc::new(FakePlugin { version: "3.0.0", healthy: true }))
            .await;
        assert_eq!(second.phase, Phase::Committed, "active marker must be released after the first reload");
        assert_eq!(manager.get("fake").unwrap().version(), "3.0.0");
    }

    #[tokio::test]
    async fn rollback_of_unregistered_plugin_is_not_found() {
        let manager = Arc::new(PluginManager::new(1, Duration::from_millis(1)));
        let supervisor = ReloadSupervisor::new(manager, fast_config());
        let err = supervisor.rollback_plugin("ghost").await.unwrap_err();
        assert_eq!(err.kind, crate::errors::ErrorKind::NotFound);
    }
}
