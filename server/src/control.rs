//! # Control API
//!
//! Create/list/status/delete endpoints guarded by a shared secret.
//! Per-route rate limiting is layered on in `main.rs` using the quotas
//! this module exposes as constants.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::GatewayError;
use crate::state::AppState;

/// Per-route quotas, in requests per minute, keyed by remote address
/// in `main.rs`.
pub const CREATE_QUOTA_PER_MINUTE: u64 = 10;
pub const DELETE_QUOTA_PER_MINUTE: u64 = 20;
pub const LIST_QUOTA_PER_MINUTE: u64 = 30;
pub const STATUS_QUOTA_PER_MINUTE: u64 = 60;

fn check_api_key(state: &AppState, headers: &HeaderMap) -> Result<(), GatewayError> {
    let Some(presented) = headers.get("x-api-key").and_then(|v| v.to_str().ok()) else {
        return Err(GatewayError::AuthMissing);
    };

    if state.config.api_keys().iter().any(|k| !k.is_empty() && *k == presented) {
        Ok(())
    } else {
        Err(GatewayError::AuthInvalid)
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateTunnelRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub local_port: Option<u16>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, Value>,
}

/// `POST /api/tunnels/create`.
pub async fn create_tunnel(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateTunnelRequest>,
) -> Result<Json<Value>, GatewayError> {
    check_api_key(&state, &headers)?;

    let tunnel = state.registry.create(req.name, req.local_port, req.metadata)?;

    Ok(Json(json!({
        "tunnel_id": tunnel.tunnel_id,
        "auth_token": tunnel.auth_token,
        "url": state.config.public_url(&tunnel.tunnel_id),
        "created_at": tunnel.created_at.to_rfc3339(),
    })))
}

/// `GET /api/tunnels/list`.
pub async fn list_tunnels(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, GatewayError> {
    check_api_key(&state, &headers)?;

    let tunnels = state.registry.list();
    Ok(Json(json!({
        "tunnels": tunnels,
        "total": state.registry.len(),
    })))
}

/// `GET /api/tunnels/{id}/status`.
pub async fn tunnel_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(tunnel_id): Path<String>,
) -> Result<Json<Value>, GatewayError> {
    check_api_key(&state, &headers)?;

    let tunnel = state
        .registry
        .get(&tunnel_id)
        .ok_or(GatewayError::TunnelNotFound)?;

    Ok(Json(json!({
        "tunnel_id": tunnel.tunnel_id,
        "name": tunnel.name,
        "status": tunnel.status(),
        "created_at": tunnel.created_at.to_rfc3339(),
        "last_active": tunnel.last_active().to_rfc3339(),
        "local_port": tunnel.local_port,
        "metadata": tunnel.metadata,
        "connected": tunnel.is_connected(),
        "pending_requests": tunnel.pending_count(),
    })))
}

/// `DELETE /api/tunnels/{id}`.
pub async fn delete_tunnel(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(tunnel_id): Path<String>,
) -> Result<Json<Value>, GatewayError> {
    check_api_key(&state, &headers)?;

    if state.registry.delete(&tunnel_id) {
        Ok(Json(json!({ "status": "deleted", "id": tunnel_id })))
    } else {
        Err(GatewayError::TunnelNotFound)
    }
}
