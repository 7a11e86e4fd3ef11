//! # Tunnel Gateway Server
//!
//! A reverse-tunneling HTTP gateway: a publicly reachable server that
//! accepts HTTP requests under a tunnel-id path prefix and forwards each,
//! over a long-lived duplex WebSocket channel, to the tunnel owner's
//! process, which re-issues it against a service reachable only on its
//! local network.
//!
//! ## Modules
//!
//! - [`tunnel`]   — the tunnel entity: identity, secret, pending requests
//! - [`registry`] — process-wide directory of live tunnels
//! - [`sweeper`]  — background task deleting idle/disconnected tunnels
//! - [`channel`]  — the duplex channel handler (tunnel-owner side)
//! - [`ingress`]  — the public HTTP proxy
//! - [`control`]  — the create/list/status/delete control API
//! - [`config`]   — environment-driven runtime configuration
//! - [`error`]    — the gateway's error type and its HTTP mapping
//! - [`state`]    — shared application state handed to every handler

pub mod channel;
pub mod config;
pub mod control;
pub mod error;
pub mod ingress;
pub mod registry;
pub mod state;
pub mod sweeper;
pub mod tunnel;

use axum::routing::{delete, get, post};
use axum::Router;
use governor::middleware::NoOpMiddleware;
use tower_governor::governor::GovernorConfigBuilder;
use tower_governor::key_extractor::SmartIpKeyExtractor;
use tower_governor::GovernorLayer;
use tower_http::cors::CorsLayer;

use crate::state::AppState;

fn quota_layer(per_minute: u64) -> GovernorLayer<SmartIpKeyExtractor, NoOpMiddleware> {
    let config = GovernorConfigBuilder::default()
        .per_second(60 / per_minute.max(1))
        .burst_size(per_minute as u32)
        .key_extractor(SmartIpKeyExtractor)
        .finish()
        .expect("static governor configuration is always valid");
    GovernorLayer { config: Box::leak(Box::new(config)) }
}

/// Assembles the full router: control API (rate-limited), duplex-channel
/// upgrade endpoint, and the public ingress proxy. Split out of `main` so
/// integration tests can drive a real `axum::serve` instance without
/// going through environment-variable configuration.
pub fn build_router(state: AppState) -> Router {
    let control_routes = Router::new()
        .route(
            "/api/tunnels/create",
            post(control::create_tunnel).layer(quota_layer(control::CREATE_QUOTA_PER_MINUTE)),
        )
        .route(
            "/api/tunnels/list",
            get(control::list_tunnels).layer(quota_layer(control::LIST_QUOTA_PER_MINUTE)),
        )
        .route(
            "/api/tunnels/{id}/status",
            get(control::tunnel_status).layer(quota_layer(control::STATUS_QUOTA_PER_MINUTE)),
        )
        .route(
            "/api/tunnels/{id}",
            delete(control::delete_tunnel).layer(quota_layer(control::DELETE_QUOTA_PER_MINUTE)),
        );

    Router::new()
        .merge(control_routes)
        .route("/api/tunnel/connect/{tunnel_id}", get(channel::connect))
        .route("/{tunnel_id}", axum::routing::any(ingress::proxy_root))
        .route("/{tunnel_id}/{*rest}", axum::routing::any(ingress::proxy_path))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
