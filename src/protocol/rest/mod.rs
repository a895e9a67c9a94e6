//! HTTP API Module
//!
//! Routes, CORS and server lifecycle for the query API.

pub mod dto;
pub mod error;
pub mod handlers;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{routing::get, Extension, Router};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::protocol::Handler;

use self::handlers::{admin, query};

/// Creates the Axum router
pub fn create_router(handler: Arc<Handler>, config: &ServerConfig) -> Router {
    let cors = if !config.cors_origins.is_empty() {
        // Explicit origins configured: restrict to those
        let origins: Vec<_> = config
            .cors_origins
            .iter()
            .filter_map(|s| {
                let parsed = s.parse();
                if parsed.is_err() {
                    warn!(origin = %s, "invalid_cors_origin_ignored");
                }
                parsed.ok()
            })
            .collect();
        Some(
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any),
        )
    } else if config.cors_allow_all {
        Some(CorsLayer::permissive())
    } else {
        None
    };

    let mut app = Router::new()
        .route("/health", get(admin::health))
        .route("/api/queries", get(query::list_queries))
        .route("/api/query/:slug", get(query::execute_query))
        .layer(Extension(handler));

    if let Some(cors) = cors {
        app = app.layer(cors);
    }

    app
}

/// Starts the HTTP server and serves until `shutdown` resolves.
///
/// In-flight requests are allowed to finish before this returns.
pub async fn start_http_server<F>(
    handler: Arc<Handler>,
    config: &ServerConfig,
    shutdown: F,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let app = create_router(handler, config);
    let addr: SocketAddr = config.bind_addr().parse()?;

    let socket = if addr.is_ipv6() {
        tokio::net::TcpSocket::new_v6()?
    } else {
        tokio::net::TcpSocket::new_v4()?
    };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    let listener = socket.listen(1024)?;

    info!(%addr, "http_server_listening");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await?;

    info!("http_server_stopped");
    Ok(())
}

/// Resolves on SIGINT (ctrl-c) or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "ctrl_c_handler_unavailable");
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
                warn!(error = %e, "sigterm_handler_unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("shutdown_signal_received");
}
