//! mcp-gateway entry point: config load, component wiring, and the HTTP
//! server lifecycle.

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use mcp_gateway::config;
use mcp_gateway::errors::StartupError;
use mcp_gateway::metrics;
use mcp_gateway::server;
use mcp_gateway::state::{AppState, ApplicationState};

#[derive(Parser, Debug)]
#[command(name = "mcp-gateway", about = "MCP gateway federating plugins and remote services")]
struct Args {
    /// Path to the YAML configuration file. Defaults to `GATEWAY_CONFIG_PATH`
    /// or the platform default path.
    #[arg(long, env = "GATEWAY_CONFIG_PATH")]
    config: Option<PathBuf>,

    /// Overrides `server.bind_address`.
    #[arg(long, env = "GATEWAY_BIND_ADDRESS")]
    bind_address: Option<String>,

    /// Overrides `router.require_authentication`.
    #[arg(long, env = "GATEWAY_REQUIRE_AUTH")]
    require_authentication: Option<bool>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let args = Args::parse();
    if let Err(e) = run(args).await {
        tracing::error!(error = %e, "gateway exited with an error");
        return Err(e.into());
    }
    Ok(())
}

/// Filtering layer mirrors the upstream pattern: `RUST_LOG` takes
/// precedence, falling back to `info` for the gateway crate and `warn`
/// elsewhere so dependency chatter doesn't drown out request logs.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,mcp_gateway=info"));

    let fmt_layer = tracing_subscriber::fmt::layer().with_target(false).compact();
    let filtering_layer = FilteringLayer { inner: fmt_layer };

    tracing_subscriber::registry()
        .with(filtering_layer)
        .with(filter)
        .init();
}

/// Suppresses a single known-benign error event: hyper logging a client
/// disconnecting mid-request as an `ERROR`. Everything else passes through
/// unchanged to the wrapped layer.
struct FilteringLayer<L> {
    inner: L,
}

impl<L, S> Layer<S> for FilteringLayer<L>
where
    L: Layer<S>,
    S: tracing::Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, ctx: tracing_subscriber::layer::Context<'_, S>) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        if event.metadata().level() == &tracing::Level::ERROR
            && visitor.message.contains("connection closed before message completed")
        {
            return;
        }
        self.inner.on_event(event, ctx);
    }

    fn enabled(&self, metadata: &tracing::Metadata<'_>, ctx: tracing_subscriber::layer::Context<'_, S>) -> bool {
        self.inner.enabled(metadata, ctx)
    }

    fn on_new_span(&self, attrs: &tracing::span::Attributes<'_>, id: &tracing::Id, ctx: tracing_subscriber::layer::Context<'_, S>) {
        self.inner.on_new_span(attrs, id, ctx);
    }

    fn on_record(&self, span: &tracing::Id, values: &tracing::span::Record<'_>, ctx: tracing_subscriber::layer::Context<'_, S>) {
        self.inner.on_record(span, values, ctx);
    }

    fn on_enter(&self, id: &tracing::Id, ctx: tracing_subscriber::layer::Context<'_, S>) {
        self.inner.on_enter(id, ctx);
    }

    fn on_exit(&self, id: &tracing::Id, ctx: tracing_subscriber::layer::Context<'_, S>) {
        self.inner.on_exit(id, ctx);
    }

    fn on_close(&self, id: tracing::Id, ctx: tracing_subscriber::layer::Context<'_, S>) {
        self.inner.on_close(id, ctx);
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
}

impl tracing::field::Visit for MessageVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        }
    }
}

async fn run(args: Args) -> Result<(), StartupError> {
    let config = config::GatewayConfig::load_with_overrides(
        args.config,
        args.bind_address,
        args.require_authentication,
    )?;

    metrics::init();

    let state = AppState::build(&config)?;
    state.lifecycle.set(ApplicationState::Ready);
    tracing::info!(bind = %config.server.bind_address, "mcp-gateway ready");

    tokio::spawn(mcp_gateway::health::run_background_loop(
        state.health.clone(),
        state.shutdown.clone(),
        |report, full| {
            if full {
                tracing::debug!(status = ?report.status, "full health check");
            } else if report.status != mcp_gateway::health::HealthStatus::Healthy {
                tracing::warn!(status = ?report.status, "critical health check degraded");
            }
        },
    ));

    let app = server::build(
        state.clone(),
        config.server.cors_allowed_origin.as_deref(),
        config.server.enable_method_aliases,
    );

    let listener = tokio::net::TcpListener::bind(&config.server.bind_address)
        .await
        .map_err(|e| StartupError::Other(format!("failed to bind {}: {e}", config.server.bind_address)))?;

    let shutdown = state.shutdown.clone();
    let lifecycle = state.lifecycle.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            wait_for_shutdown_signal().await;
            lifecycle.set(ApplicationState::Terminating);
            shutdown.cancel();
        })
        .await
        .map_err(|e| StartupError::Other(format!("server error: {e}")))?;

    Ok(())
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}
