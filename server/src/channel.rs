//! # Client-Channel Handler
//!
//! Accepts the duplex WebSocket connection a tunnel owner opens to attach
//! to their tunnel, authenticates it, drives the heartbeat/receive loop,
//! fulfills pending requests on response frames, and detaches on close.
//! One outbound writer task drains an `mpsc` queue, one inbound loop
//! dispatches by message kind, and cleanup runs whichever side closes
//! first.

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tunnel_protocol::{Envelope, MessageKind, SerializedHttpResponse};

use crate::state::AppState;

const AUTH_TIMEOUT: Duration = Duration::from_secs(10);

/// `GET /api/tunnel/connect/{tunnel_id}` — upgrades to the duplex
/// channel for that tunnel.
pub async fn connect(
    Path(tunnel_id): Path<String>,
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_channel(socket, tunnel_id, state))
}

/// WebSocket close code used when authentication fails or times out.
const CLOSE_POLICY_VIOLATION: u16 = 1008;

async fn send_error_and_close(socket: &mut WebSocket, message: &str, code: u16) {
    let envelope = Envelope::new(MessageKind::Error, Some(json!({ "message": message })));
    if let Ok(text) = envelope.encode() {
        let _ = socket.send(Message::Text(text.into())).await;
    }
    let _ = socket
        .send(Message::Close(Some(axum::extract::ws::CloseFrame {
            code,
            reason: message.to_string().into(),
        })))
        .await;
}

async fn handle_channel(mut socket: WebSocket, tunnel_id: String, state: AppState) {
    info!(tunnel_id = %tunnel_id, "duplex channel connecting");

    // ── Attachment protocol: wait up to AUTH_TIMEOUT for a
    // single `auth` envelope.
    let auth_frame = match tokio::time::timeout(AUTH_TIMEOUT, socket.recv()).await {
        Ok(Some(Ok(Message::Text(text)))) => text,
        Ok(Some(Ok(_))) => {
            warn!(tunnel_id = %tunnel_id, "non-text frame during authentication");
            send_error_and_close(&mut socket, "expected a text auth frame", CLOSE_POLICY_VIOLATION)
                .await;
            return;
        }
        Ok(Some(Err(e))) => {
            warn!(tunnel_id = %tunnel_id, error = %e, "socket error during authentication");
            return;
        }
        Ok(None) => {
            warn!(tunnel_id = %tunnel_id, "channel closed before authentication");
            return;
        }
        Err(_) => {
            warn!(tunnel_id = %tunnel_id, "authentication timed out");
            send_error_and_close(&mut socket, "authentication timed out", CLOSE_POLICY_VIOLATION).await;
            return;
        }
    };

    let envelope = match Envelope::decode(&auth_frame) {
        Ok(e) if e.kind == MessageKind::Auth => e,
        Ok(e) => {
            warn!(tunnel_id = %tunnel_id, kind = ?e.kind, "expected auth, got a different message type");
            send_error_and_close(&mut socket, "expected an auth message", CLOSE_POLICY_VIOLATION).await;
            return;
        }
        Err(e) => {
            warn!(tunnel_id = %tunnel_id, error = %e, "malformed authentication payload");
            send_error_and_close(&mut socket, "malformed authentication message", CLOSE_POLICY_VIOLATION)
                .await;
            return;
        }
    };

    let auth_token = envelope
        .data
        .as_ref()
        .and_then(|d| d.get("auth_token"))
        .and_then(|v| v.as_str())
        .map(str::to_string);

    let Some(auth_token) = auth_token else {
        warn!(tunnel_id = %tunnel_id, "authentication message missing auth_token");
        send_error_and_close(&mut socket, "auth_token required", CLOSE_POLICY_VIOLATION).await;
        return;
    };

    // ── Outbound queue, consumed by a single writer: the heartbeat and
    // response replies both enqueue here instead of writing the socket
    // directly.
    let (tx, mut rx) = mpsc::unbounded_channel::<Envelope>();

    let Some(generation) = state.registry.attach(&tunnel_id, &auth_token, tx.clone()) else {
        warn!(tunnel_id = %tunnel_id, "authentication failed");
        send_error_and_close(&mut socket, "authentication failed", CLOSE_POLICY_VIOLATION).await;
        return;
    };

    let connected = Envelope::new(
        MessageKind::Connected,
        Some(json!({ "tunnel_id": tunnel_id, "message": "Tunnel connected successfully" })),
    );
    if let Ok(text) = connected.encode() {
        if socket.send(Message::Text(text.into())).await.is_err() {
            state.registry.detach(&tunnel_id, generation);
            return;
        }
    }

    info!(tunnel_id = %tunnel_id, "tunnel authenticated and active");

    let (mut ws_sink, mut ws_stream) = socket.split();

    // ── Writer task: drains `rx`, serializes, writes. The sole writer of
    // this socket half.
    let writer = tokio::spawn(async move {
        while let Some(envelope) = rx.recv().await {
            let text = match envelope.encode() {
                Ok(t) => t,
                Err(e) => {
                    warn!(error = %e, "failed to serialize outbound envelope");
                    continue;
                }
            };
            if ws_sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    // ── Heartbeat: enqueues a ping every interval; stops quietly if the
    // queue is gone (writer exited, which means the receive loop will
    // observe the close too).
    let heartbeat_interval = state.config.heartbeat_interval;
    let heartbeat_tx = tx.clone();
    let heartbeat_tunnel_id = tunnel_id.clone();
    let heartbeat_registry = state.registry.clone();
    let heartbeat = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(heartbeat_interval);
        ticker.tick().await; // first tick fires immediately; skip it
        loop {
            ticker.tick().await;
            if heartbeat_tx.send(Envelope::new(MessageKind::Ping, None)).is_err() {
                break;
            }
            heartbeat_registry.update_activity(&heartbeat_tunnel_id);
        }
    });

    // ── Receive loop.
    while let Some(frame) = ws_stream.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                warn!(tunnel_id = %tunnel_id, error = %e, "channel read error");
                break;
            }
        };

        let envelope = match Envelope::decode(&text) {
            Ok(e) => e,
            Err(e) => {
                warn!(tunnel_id = %tunnel_id, error = %e, "dropping malformed envelope");
                continue;
            }
        };

        handle_inbound(&state, &tunnel_id, &tx, envelope).await;
    }

    // ── Teardown: cancel heartbeat, detach (which drops the registry's
    // own sender clone) — passing our own `generation` means this is a
    // no-op if a newer connection has since won a re-attach, so we only
    // ever tear down our own channel — then drop this function's clone;
    // only once every sender is gone does the writer's `rx.recv()` return
    // `None` and let it exit.
    heartbeat.abort();
    let _ = heartbeat.await;
    state.registry.detach(&tunnel_id, generation);
    drop(tx);
    let _ = writer.await;
    info!(tunnel_id = %tunnel_id, "duplex channel closed");
}

async fn handle_inbound(state: &AppState, tunnel_id: &str, tx: &mpsc::UnboundedSender<Envelope>, envelope: Envelope) {
    match envelope.kind {
        MessageKind::Pong => {
            state.registry.update_activity(tunnel_id);
        }
        MessageKind::Ping => {
            let _ = tx.send(Envelope::new(MessageKind::Pong, None));
            state.registry.update_activity(tunnel_id);
        }
        MessageKind::Response => {
            let Some(tunnel) = state.registry.get(tunnel_id) else {
                return;
            };
            let Some(data) = envelope.data else {
                warn!(tunnel_id = %tunnel_id, "response envelope missing data");
                return;
            };
            let response: SerializedHttpResponse = match serde_json::from_value(data) {
                Ok(r) => r,
                Err(e) => {
                    warn!(tunnel_id = %tunnel_id, error = %e, "malformed response payload");
                    return;
                }
            };
            match tunnel.take_pending(&response.request_id) {
                Some(sender) => {
                    let _ = sender.send(Ok(response));
                    tunnel.touch();
                }
                None => {
                    warn!(tunnel_id = %tunnel_id, request_id = %response.request_id, "response for unknown or already-resolved request");
                }
            }
        }
        other => {
            warn!(tunnel_id = %tunnel_id, kind = ?other, "unexpected message type on duplex channel");
        }
    }
}
