/// Server setup and initialization
/// 
/// Wires together all components: runtime services, comms hub, flows and HTTP routes.
/// Provides the main application factory function for creating the Axum app.

use crate::{
    api::{create_admin_routes, create_comms_routes, AppState},
    comms::CommsHub,
    config::{Config, ServerConfig},
    runtime::{parse_flows, Runtime},
};
use anyhow::Result;
use axum::{routing::get, Router};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// Build the shared application state
/// 
/// Creates the runtime (bus, registries, core node types) and a comms hub
/// subscribed to the runtime's bus.
pub fn create_state(config: &Config) -> Result<AppState> {
    tracing::info!("⚙️ Initializing runtime services");
    let runtime = Arc::new(Runtime::from_config(config)?);

    tracing::info!("📡 Initializing comms hub");
    let hub = Arc::new(CommsHub::new(config.comms.hub_config()));
    hub.attach(runtime.bus());

    Ok(AppState { runtime, hub })
}

/// Build the router for `state`
pub fn create_router(state: AppState, server: &ServerConfig) -> Router {
    let prefix = server.admin_prefix();
    let comms_path = server.comms_path();
    tracing::debug!("🔗 Admin routes under {}, comms at {}", prefix, comms_path);

    Router::new()
        // Health check endpoint
        .route("/healthz", get(health_check))
        // Flow, plugin and action admin routes
        .merge(create_admin_routes(&prefix))
        // Comms WebSocket
        .merge(create_comms_routes(&comms_path))
        .with_state(state)
}

/// Deploy every flow in the JSON file at `path`; returns how many were deployed
pub async fn deploy_flows_file(runtime: &Runtime, path: &str) -> Result<usize> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to read flow file {}: {}", path, e))?;
    let flows = parse_flows(&text)?;
    let count = flows.len();
    for flow in flows {
        runtime.deploy(flow)?;
    }
    Ok(count)
}

/// Create the main Axum application with all routes and middleware
/// 
/// Initializes all components and wires them together into a complete application.
/// This includes the runtime, the comms hub heartbeat, the flow file and HTTP routes.
pub async fn create_app(config: Config) -> Result<Router> {
    let state = create_state(&config)?;

    tracing::info!("💓 Starting comms heartbeat every {}s", config.comms.keepalive_secs);
    state.hub.spawn_heartbeat();

    if let Some(path) = &config.flows.flows_file {
        tracing::info!("📥 Deploying flows from {}", path);
        let count = deploy_flows_file(&state.runtime, path).await?;
        tracing::info!("📋 Deployed {} flow(s)", count);
    }

    tracing::info!("📡 Creating HTTP router with all endpoints");
    let app = create_router(state, &config.server);

    tracing::info!("✅ Application initialized successfully");

    Ok(app)
}

/// Start the HTTP server with the given configuration
/// 
/// Creates the application and starts the Axum server on the configured address and port.
pub async fn start_server(config: Config) -> Result<()> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    tracing::info!("Starting wireflow server...");

    // Create the application
    let app = create_app(config.clone()).await?;

    // Bind to the configured address
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&bind_addr).await?;

    tracing::info!("Server listening on http://{}", bind_addr);

    // Start the server
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

/// Health check endpoint handler
async fn health_check() -> &'static str {
    "ok"
}
