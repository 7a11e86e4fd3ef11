//! # Demo Echo Server
//!
//! A minimal local service for exercising a tunnel end to end: echoes
//! method/path/headers/body as JSON, and round-trips a raw binary body on
//! `POST /binary`. Stands in for "a service reachable only on the client's
//! local network" in manual testing.

use std::collections::HashMap;
use std::net::SocketAddr;

use axum::body::Bytes;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::routing::{any, post};
use axum::{Json, Router};
use chrono::Utc;
use serde_json::json;

async fn echo(method: axum::http::Method, uri: axum::http::Uri, headers: HeaderMap, body: Bytes) -> impl IntoResponse {
    let header_map: HashMap<String, String> = headers
        .iter()
        .map(|(k, v)| (k.as_str().to_string(), v.to_str().unwrap_or("").to_string()))
        .collect();

    let body_text = String::from_utf8(body.to_vec()).unwrap_or_default();

    Json(json!({
        "message": "echo",
        "method": method.as_str(),
        "path": uri.path(),
        "timestamp": Utc::now().to_rfc3339(),
        "headers": header_map,
        "body": body_text,
    }))
}

async fn echo_binary(body: Bytes) -> impl IntoResponse {
    (
        axum::http::StatusCode::CREATED,
        [("content-type", "application/octet-stream")],
        body,
    )
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().init();

    let app = Router::new()
        .route("/binary", post(echo_binary))
        .route("/", any(echo))
        .route("/{*path}", any(echo));

    let port: u16 = std::env::args()
        .nth(1)
        .and_then(|p| p.parse().ok())
        .unwrap_or(3000);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    println!("Echo server listening on http://localhost:{port}");
    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
