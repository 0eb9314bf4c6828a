//! Inbound HTTP API
//!
//! Axum-based server exposing the four scrape operations plus a health
//! check. Handlers own per-request deadlines; the server itself only
//! wires routing, CORS, request tracing, and graceful shutdown.

pub mod handlers;
pub mod types;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::Method;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::Config;
use crate::scraper::ScrapeService;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<dyn ScrapeService>,
    pub default_post_limit: i64,
    pub default_comment_limit: i64,
}

/// Build the API router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/subreddit", get(handlers::get_subreddit))
        .route("/user", get(handlers::get_user_activity))
        .route("/post", get(handlers::get_post))
        .route("/search", get(handlers::search))
        .layer(
            CorsLayer::new()
                .allow_methods([Method::GET])
                .allow_headers(Any)
                .allow_origin(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the HTTP server until SIGINT/SIGTERM.
pub async fn run(config: &Config, service: Arc<dyn ScrapeService>) -> Result<()> {
    let state = AppState {
        service,
        default_post_limit: config.default_post_limit,
        default_comment_limit: config.default_comment_limit,
    };
    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    info!("listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
