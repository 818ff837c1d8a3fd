//! HTTP surface for generation requests, status lookups, and profiles.

pub mod error;
pub mod handlers;

pub use error::{ApiError, ApiResult};

use crate::ledger::CreditLedger;
use crate::orchestrator::GenerationOrchestrator;
use crate::status::StatusReporter;
use crate::Result;
use axum::routing::{get, post};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<GenerationOrchestrator>,
    pub status: StatusReporter,
    pub ledger: Arc<dyn CreditLedger>,
    /// Credits granted when a profile is opened.
    pub starting_credits: u32,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route(
            "/api/generate",
            post(handlers::generate).get(handlers::generation_status),
        )
        .route("/api/generations", get(handlers::list_generations))
        .route("/api/profiles", post(handlers::open_profile))
        .route("/api/profiles/:id", get(handlers::get_profile))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Serve until Ctrl-C.
pub async fn serve(addr: SocketAddr, state: AppState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
