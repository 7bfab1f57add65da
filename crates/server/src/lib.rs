//! Gatehouse server library.
//!
//! Provides a reusable serve function wiring the rate limiting middleware in
//! front of the HTTP routes, used by the binary and by tests.

#![deny(missing_docs)]

mod rate_limit;
mod routes;

use std::net::SocketAddr;
use std::sync::Arc;

use ::rate_limit::RateLimiter;
use anyhow::anyhow;
use axum::{Router, routing::get};
use config::Config;
use rate_limit::RateLimitLayer;
use tokio::net::TcpListener;

/// Configuration for serving Gatehouse.
pub struct ServeConfig {
    /// The socket address (IP and port) the server will bind to.
    pub listen_address: SocketAddr,
    /// The deserialized Gatehouse TOML configuration.
    pub config: Config,
}

/// Starts and runs the Gatehouse server with the provided configuration.
///
/// Fails fast when the configured storage backend is unusable; every other
/// admission decision failure is handled per-request by the middleware.
pub async fn serve(ServeConfig { listen_address, config }: ServeConfig) -> anyhow::Result<()> {
    let limiter = RateLimiter::new(config.rate_limits)
        .await
        .map_err(|e| anyhow!("Failed to initialize rate limiter storage: {e}"))?;

    let limiter = Arc::new(limiter);

    let app = Router::new()
        .route("/", get(routes::home))
        .route("/api/test", get(routes::test))
        .layer(RateLimitLayer::new(limiter.clone()));

    let listener = TcpListener::bind(listen_address)
        .await
        .map_err(|e| anyhow!("Failed to bind to {listen_address}: {e}"))?;

    log::info!("Server listening on http://{listen_address}");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .map_err(|e| anyhow!("Failed to start HTTP server: {e}"))?;

    log::info!("Server is shutting down");

    // Teardown failures are reported, they never hold up process exit.
    if let Err(e) = limiter.close().await {
        log::error!("Failed to release rate limiter storage: {e}");
    }

    Ok(())
}

/// Resolves when the process receives SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Failed to install SIGINT handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                log::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
