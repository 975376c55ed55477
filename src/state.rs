//! Process-wide application state: component wiring and the startup/shutdown
//! lifecycle the main loop drives through.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::comm::PluginCommunicator;
use crate::config::GatewayConfig;
use crate::errors::StartupError;
use crate::health::HealthManager;
use crate::plugins::PluginManager;
use crate::rbac::{PolicyStore, RbacEngine};
use crate::registry::ServiceRegistry;
use crate::reload::ReloadSupervisor;
use crate::router::Router;

/// Monotonic process lifecycle (never regresses; `Ready` may be re-entered
/// after a reload, every other transition happens once).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ApplicationState {
    Unknown = 0,
    Initializing = 1,
    LoadingPlugins = 2,
    StartingNetwork = 3,
    Ready = 4,
    Terminating = 5,
}

impl From<u8> for ApplicationState {
    fn from(v: u8) -> Self {
        match v {
            1 => ApplicationState::Initializing,
            2 => ApplicationState::LoadingPlugins,
            3 => ApplicationState::StartingNetwork,
            4 => ApplicationState::Ready,
            5 => ApplicationState::Terminating,
            _ => ApplicationState::Unknown,
        }
    }
}

pub struct Lifecycle {
    state: AtomicU8,
    started_at: Instant,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(ApplicationState::Unknown as u8),
            started_at: Instant::now(),
        }
    }

    /// Wall-clock duration since the lifecycle was created, for the
    /// `X-Health-Uptime` header.
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn set(&self, state: ApplicationState) {
        tracing::info!(?state, "application state transition");
        self.state.store(state as u8, Ordering::SeqCst);
    }

    pub fn get(&self) -> ApplicationState {
        ApplicationState::from(self.state.load(Ordering::SeqCst))
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ApplicationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ApplicationState::Unknown => "unknown",
            ApplicationState::Initializing => "initializing",
            ApplicationState::LoadingPlugins => "loading_plugins",
            ApplicationState::StartingNetwork => "starting_network",
            ApplicationState::Ready => "ready",
            ApplicationState::Terminating => "terminating",
        };
        write!(f, "{s}")
    }
}

/// Everything an HTTP handler needs, cloned cheaply (all fields are `Arc`s).
#[derive(Clone)]
pub struct AppState {
    pub lifecycle: Arc<Lifecycle>,
    pub router: Arc<Router>,
    pub plugins: Arc<PluginManager>,
    pub registry: Arc<ServiceRegistry>,
    pub rbac: Option<Arc<RbacEngine>>,
    pub comm: Arc<PluginCommunicator>,
    pub reload: Arc<ReloadSupervisor>,
    pub health: Arc<HealthManager>,
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn build(config: &GatewayConfig) -> Result<Self, StartupError> {
        let lifecycle = Arc::new(Lifecycle::new());
        lifecycle.set(ApplicationState::Initializing);

        let registry = Arc::new(ServiceRegistry::new(config.router.load_balancing_strategy));

        let policy_store = match &config.rbac.policy_path {
            Some(path) => {
                let file = crate::config::policy::PolicyFile::load(std::path::Path::new(path))?;
                PolicyStore::new(file).map_err(|e| StartupError::PolicyError(e.message))?
            }
            None => PolicyStore::empty(),
        };
        // An RbacEngine is always constructed, even with no JWT public key
        // configured, so the policy store's default policy still governs
        // anonymous access; `process_token` simply refuses any bearer token
        // in that configuration.
        let rbac = Some(Arc::new(if config.rbac.jwt.public_key_path.is_some() {
            RbacEngine::new(&config.rbac, policy_store).map_err(|e| StartupError::ConfigError(e.message))?
        } else {
            RbacEngine::without_jwt(&config.rbac.jwt, policy_store)
        }));

        lifecycle.set(ApplicationState::LoadingPlugins);
        let plugins = Arc::new(PluginManager::new(
            config.plugins.max_retries,
            Duration::from_millis(config.plugins.retry_backoff_ms),
        ));
        plugins.register(Arc::new(crate::plugins::builtin::MemoryPlugin::new()));
        plugins.register(Arc::new(crate::plugins::builtin::GitPlugin));
        plugins.register(Arc::new(crate::plugins::builtin::EditorPlugin));
        for name in plugins.names() {
            plugins.set_state(&name, crate::plugins::PluginState::Running);
        }

        let comm = Arc::new(PluginCommunicator::new(
            config.comm.event_buffer_size,
            Duration::from_secs(config.comm.event_processing_timeout_secs),
            config.comm.audit_retention_entries,
            Duration::from_secs(config.comm.audit_retention_secs),
            config.comm.allowed_pairs.clone(),
        ));

        let reload = Arc::new(ReloadSupervisor::new(plugins.clone(), config.reload.clone()));
        let mut health_manager = HealthManager::new(config.health.clone());
        health_manager.register(Arc::new(crate::health::checkers::PluginChecker::new(plugins.clone())));
        health_manager.register(Arc::new(crate::health::checkers::RegistryChecker::new(registry.clone())));
        let health = Arc::new(health_manager);

        lifecycle.set(ApplicationState::StartingNetwork);
        let router = Arc::new(Router::new(config.router.clone(), rbac.clone(), plugins.clone(), registry.clone()));

        Ok(Self {
            lifecycle,
            router,
            plugins,
            registry,
            rbac,
            comm,
            reload,
            health,
            shutdown: CancellationToken::new(),
        })
    }
}
