use axum::Router;
use std::time::Duration;
use tracing::{info, warn, Level};

mod routes;
mod models;
mod utils;
mod client;
mod state;

use crate::utils::conf_helper::{init_config_and_bind, get_cached_config, get_upstream_url};
use crate::state::app_state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .init();

    // === CONFIG + LISTENER ===
    let listener = init_config_and_bind()
        .await
        .map_err(|e| anyhow::anyhow!("CRITICAL INIT FAILURE: {e}"))?;

    let config = get_cached_config();

    let state = AppState::new(Duration::from_secs(config.stream.connect_timeout_secs.max(1)))?;

    info!(
        "{} v{} listening on {}:{} (upstream {})",
        config.name,
        config.version,
        config.connection.ip,
        config.connection.port,
        get_upstream_url()
    );

    if config.stream.auto_connect {
        if let Err(e) = client::upstream::connect_session(&state).await {
            warn!("Initial connect failed, waiting for POST /connect: {}", e);
        }
    }

    tokio::spawn(client::upstream::start_quality_watch(state.clone()));

    let app = Router::new()
        .merge(routes::info_routes::health_routes(state.clone()))
        .merge(routes::data_routes::data_routes(state.clone()));

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(session) = state.active_session().await {
        session.shutdown();
    }

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
