use std::net::SocketAddr;

use axum::{Router, routing::get};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use super::{services, state::AppState};
use crate::config::Config;
use crate::engine::Ipx;

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Builds the application router. Exposed so tests can drive the app
/// without a listener.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(services::health))
        // Everything else is an image path: /<modifiers>/<id…>
        .fallback(services::serve_image)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

pub async fn run(address: Option<SocketAddr>) -> Result<(), AnyError> {
    info!("Loading configuration");
    let config =
        Config::load().map_err(|e| format!("Failed to load config: {}", e))?;

    let address = address.unwrap_or(config.server.bind_addr);

    let engine = Ipx::new(&config)
        .map_err(|e| format!("Failed to initialize engine: {}", e))?;

    let state = AppState::new(config, engine);
    let app = router(state);

    let listener = TcpListener::bind(address).await?;
    info!(%address, "IPX server listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = signal(SignalKind::terminate())
            .expect("failed to install signal handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
