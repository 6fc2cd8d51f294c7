//! wg-peer-provisioner - WireGuard peer provisioning service
//!
//! Generates peer key pairs, registers peers with the router backend and
//! hands the operator a one-time QR code / config file. Private keys are
//! only ever held in memory for the operator's session.

mod api;
mod backend;
mod config;
mod error;
mod models;
mod provision;
mod render;
mod roster;
mod session;
mod state;
mod wireguard;

use std::net::SocketAddr;

use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::state::{AppState, Capabilities};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wg_peer_provisioner=info,tower_http=debug".into()),
        )
        .init();

    tracing::info!("Starting wg-peer-provisioner...");

    // Load configuration
    let config = config::Config::load()?;
    tracing::info!(
        "Configuration loaded (backend: {}, keys: {:?}, render: {:?})",
        config.backend.base_url,
        config.provisioning.key_source,
        config.render.policy
    );

    let caps = Capabilities::from_config(&config)?;
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;

    let app_state = AppState::new(config, caps);

    // Initial roster so the first page load is not empty
    match app_state.refresher.refresh_once().await {
        Ok(summary) => tracing::info!("[Roster] Loaded {} peers", summary.added),
        Err(e) => tracing::warn!("[Roster] Initial load failed (non-fatal): {}", e),
    }

    app_state.start_background_tasks();

    // Build application router
    let cors = CorsLayer::permissive();

    let app = api::routes(app_state.clone())
        .with_state(app_state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        );

    // Start server
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
