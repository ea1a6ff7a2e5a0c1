//! Standalone test server for E2E testing
//!
//! Starts the Axum server with a real store thread and a silent audio
//! output, without an uplink. Events arrive through POST /api/v1/ingest.

use callscope_core::{AudioEngine, CoreConfig, SilentSink, ViewControls};
use callscope_server::{AppState, ServerConfig, StoreHandle};
use std::sync::Arc;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("callscope=debug".parse().unwrap()),
        )
        .init();

    let port = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8930u16);

    let core = CoreConfig::default();
    let store = StoreHandle::spawn(core.clone(), ViewControls::default());
    let audio = Arc::new(AudioEngine::new(Arc::new(SilentSink::new()), &core));
    let (_uplink_tx, uplink_rx) = tokio::sync::watch::channel(false);

    let config = ServerConfig {
        port,
        bind_addr: "127.0.0.1".to_string(),
        ..ServerConfig::default()
    };
    let state = AppState::new(store, audio, config, None, uplink_rx);

    tokio::spawn(callscope_server::refresh_loop(state.clone()));

    tracing::info!(port, "Test server starting");

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    if let Err(e) = callscope_server::start_server(state, shutdown).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}
