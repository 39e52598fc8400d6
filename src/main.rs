use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use momoscore::config::Config;
use momoscore::jobs::{rest_refresh, ws_ingest};
use momoscore::provider;
use momoscore::routes;
use momoscore::state::{now_ms, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cfg = Config::from_env();
    let provider = provider::load_provider(&cfg)?;
    tracing::info!(provider = provider.id(), symbols = ?cfg.ws_symbols, "starting momoscore");

    let state = AppState::new(cfg.clone(), provider.id().to_string(), now_ms());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(ws_ingest::ws_ingest_loop(
        Arc::clone(&state),
        Arc::clone(&provider),
        shutdown_rx.clone(),
    ));
    tokio::spawn(rest_refresh::rest_refresh_loop(
        Arc::clone(&state),
        Arc::clone(&provider),
        shutdown_rx,
    ));

    let app = routes::api_router()
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr: SocketAddr = format!("{}:{}", cfg.bind, cfg.port).parse()?;
    tracing::info!("listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop the ingest and refresh loops; the provider connections close as
    // their tasks unwind.
    let _ = shutdown_tx.send(true);
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install Ctrl+C handler");
    tracing::info!("shutdown signal received, stopping");
}
