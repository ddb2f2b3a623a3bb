//! Peer sync service: what each node exposes to its counterpart.
//!
//! Endpoints:
//! - `GET /peer-status` / `POST /peer-status`: counterpart status, keyed by caller
//! - `POST /sync`: START / timestamp / END barrier
//! - `GET /status`: current sync phase
//! - `GET /health`: liveness

pub mod client;
mod handlers;
pub mod state;
pub mod types;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tokio::net::TcpListener;
use tracing::info;

pub use client::{HttpPeerLink, PeerError, PeerLink, StandalonePeer};
pub use handlers::PeerKey;
pub use state::{SyncMarker, SyncService, SyncState};
pub use types::PeerStatus;

/// Header a node sets to identify itself to its counterpart.
pub const PEER_ID_HEADER: &str = "x-peer-id";

/// Builds the axum router with all sync routes.
pub fn router(service: Arc<SyncService>) -> Router {
    Router::new()
        .route(
            "/peer-status",
            get(handlers::get_peer_status).post(handlers::post_peer_status),
        )
        .route("/sync", post(handlers::post_sync))
        .route("/status", get(handlers::get_status))
        .route("/health", get(handlers::health))
        .with_state(service)
}

/// Serves the sync routes on `listener` until `shutdown` resolves.
///
/// # Errors
///
/// Returns the underlying I/O error if the server fails.
pub async fn serve(
    service: Arc<SyncService>,
    listener: TcpListener,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let addr = listener.local_addr()?;
    info!(%addr, "sync service listening");
    axum::serve(
        listener,
        router(service).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
}
