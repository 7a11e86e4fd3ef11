//! # Ingress Proxy
//!
//! Accepts public HTTP on `/{tunnel_id}` or `/{tunnel_id}/{rest}`, relays it
//! across the tunnel's duplex channel, and writes the response back to the
//! public caller.

use std::collections::HashMap;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap as AxumHeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use tokio::sync::oneshot;
use tracing::warn;
use tunnel_protocol::{
    decode_body, encode_body, strip_body_encoding_header, strip_host_header, Envelope,
    HeaderMap, MessageKind, SerializedHttpRequest,
};
use uuid::Uuid;

use crate::error::GatewayError;
use crate::state::AppState;

/// `<method> /{tunnel_id}` — no `rest` segment, equivalent to path `/`.
pub async fn proxy_root(
    method: Method,
    Path(tunnel_id): Path<String>,
    Query(query_params): Query<HashMap<String, String>>,
    headers: AxumHeaderMap,
    State(state): State<AppState>,
    body: Bytes,
) -> Response {
    proxy(method, tunnel_id, String::new(), query_params, headers, state, body).await
}

/// `<method> /{tunnel_id}/{*rest}`.
pub async fn proxy_path(
    method: Method,
    Path((tunnel_id, rest)): Path<(String, String)>,
    Query(query_params): Query<HashMap<String, String>>,
    headers: AxumHeaderMap,
    State(state): State<AppState>,
    body: Bytes,
) -> Response {
    proxy(method, tunnel_id, rest, query_params, headers, state, body).await
}

async fn proxy(
    method: Method,
    tunnel_id: String,
    rest: String,
    query_params: HashMap<String, String>,
    headers: AxumHeaderMap,
    state: AppState,
    body: Bytes,
) -> Response {
    match dispatch(method, &tunnel_id, rest, query_params, headers, &state, body).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn dispatch(
    method: Method,
    tunnel_id: &str,
    rest: String,
    query_params: HashMap<String, String>,
    headers: AxumHeaderMap,
    state: &AppState,
    body: Bytes,
) -> Result<Response, GatewayError> {
    let tunnel = state
        .registry
        .get(tunnel_id)
        .ok_or(GatewayError::TunnelNotFound)?;

    if tunnel.status() != crate::tunnel::TunnelStatus::Active {
        return Err(GatewayError::TunnelNotActive(tunnel.status().to_string()));
    }

    let request_id = Uuid::new_v4().to_string();

    let mut header_map: HeaderMap = headers
        .iter()
        .map(|(k, v)| (k.as_str().to_ascii_lowercase(), v.to_str().unwrap_or("").to_string()))
        .collect();
    strip_host_header(&mut header_map);

    let encoded_body = encode_body(&body, &mut header_map);

    let serialized = SerializedHttpRequest {
        request_id: request_id.clone(),
        method: method.as_str().to_string(),
        path: format!("/{rest}"),
        query_params,
        headers: header_map,
        body: encoded_body,
    };

    let (tx, rx) = oneshot::channel();
    tunnel.register_pending(request_id.clone(), tx);

    let envelope = Envelope::new(
        MessageKind::Request,
        Some(serde_json::to_value(&serialized).map_err(|e| GatewayError::Internal(e.to_string()))?),
    );

    if tunnel.send(envelope).is_err() {
        tunnel.take_pending(&request_id);
        return Err(GatewayError::SendFailure);
    }
    tunnel.touch();

    let outcome = tokio::time::timeout(state.config.request_timeout, rx).await;

    let result = match outcome {
        Ok(Ok(result)) => result,
        Ok(Err(_)) => {
            // Sender was dropped without a send — treat as a disconnect.
            Err(GatewayError::TunnelDisconnected)
        }
        Err(_) => {
            if tunnel.take_pending(&request_id).is_some() {
                warn!(tunnel_id = %tunnel_id, request_id = %request_id, "request timed out waiting for tunnel response");
            }
            Err(GatewayError::RequestTimeout)
        }
    };

    let response = result?;
    tunnel.touch();

    let body_bytes = decode_body(response.body.as_deref(), &response.headers)
        .map_err(|e| GatewayError::Internal(e.to_string()))?
        .unwrap_or_default();
    let mut response_headers = response.headers;
    strip_body_encoding_header(&mut response_headers);

    let status = StatusCode::from_u16(response.status_code)
        .map_err(|_| GatewayError::Internal(format!("invalid status code {}", response.status_code)))?;

    let mut builder = Response::builder().status(status);
    for (name, value) in response_headers {
        builder = builder.header(name, value);
    }
    builder
        .body(axum::body::Body::from(body_bytes))
        .map_err(|e| GatewayError::Internal(e.to_string()))
}
