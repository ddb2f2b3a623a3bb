//! Request handlers for the sync endpoints.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Json;
use axum::extract::{ConnectInfo, FromRequestParts, Query, State};
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::response::IntoResponse;

use super::PEER_ID_HEADER;
use super::state::{SyncMarker, SyncService};
use super::types::{Ack, ErrorResponse, PeerQuery, PeerStatus, StatusResponse, SyncRequest};

/// Identity of the caller: the `x-peer-id` header, else the remote IP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerKey(pub String);

impl<S> FromRequestParts<S> for PeerKey
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(PEER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        if let Some(id) = header {
            return Ok(Self(id.to_string()));
        }
        let key = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map_or_else(|| "unknown".to_string(), |ConnectInfo(addr)| addr.ip().to_string());
        Ok(Self(key))
    }
}

fn error(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<ErrorResponse>) {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

/// Returns the stored status of a peer.
///
/// `GET /peer-status` → most recently updated peer
/// `GET /peer-status?peer=ID` → that peer
/// → 404 + `ErrorResponse` when nothing has been received
pub async fn get_peer_status(
    State(service): State<Arc<SyncService>>,
    Query(query): Query<PeerQuery>,
) -> impl IntoResponse {
    match service.status_for(query.peer.as_deref()).await {
        Some(status) => Ok(Json(status)),
        None => Err(error(StatusCode::NOT_FOUND, "no peer status received")),
    }
}

/// Merges the pushed fields into the caller's stored status.
///
/// `POST /peer-status` → 200 + `{"status":"updated"}`
pub async fn post_peer_status(
    State(service): State<Arc<SyncService>>,
    PeerKey(key): PeerKey,
    Json(update): Json<PeerStatus>,
) -> Json<Ack> {
    service.update_status(&key, update).await;
    Json(Ack::new("updated"))
}

/// Advances the sync state.
///
/// `POST /sync` → 200 + `{"status":"synced"}` (stale markers included)
/// → 400 + `ErrorResponse` for an unparseable timestamp
pub async fn post_sync(
    State(service): State<Arc<SyncService>>,
    Json(request): Json<SyncRequest>,
) -> Result<Json<Ack>, (StatusCode, Json<ErrorResponse>)> {
    let marker: SyncMarker = request
        .timestamp
        .parse()
        .map_err(|e: String| error(StatusCode::BAD_REQUEST, e))?;
    service.advance(marker).await;
    Ok(Json(Ack::new("synced")))
}

/// `GET /status` → current sync phase.
pub async fn get_status(State(service): State<Arc<SyncService>>) -> Json<StatusResponse> {
    Json(service.status().await)
}

/// `GET /health` → liveness only.
pub async fn health() -> Json<Ack> {
    Json(Ack::new("healthy"))
}
