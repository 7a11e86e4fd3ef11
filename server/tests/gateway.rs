//! Integration tests driving the control API and ingress proxy against a
//! real `axum::serve` instance, with an in-process mock tunnel owner
//! standing in for the tunnel client (S1, S2, S5 from the scenario list).

use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tunnel_gateway_server::config::Config;
use tunnel_gateway_server::state::AppState;
use tunnel_protocol::{Envelope, MessageKind};

const API_KEY: &str = "test-api-key";

async fn spawn_gateway() -> SocketAddr {
    let mut config = Config::from_env();
    config.owner_api_key = API_KEY.to_string();
    config.request_timeout = Duration::from_millis(500);

    let state = AppState::new(config);
    let app = tunnel_gateway_server::build_router(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn create_tunnel(addr: SocketAddr) -> (String, String) {
    let client = reqwest::Client::new();
    let body: Value = client
        .post(format!("http://{addr}/api/tunnels/create"))
        .header("x-api-key", API_KEY)
        .json(&json!({ "name": "t1" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    (
        body["tunnel_id"].as_str().unwrap().to_string(),
        body["auth_token"].as_str().unwrap().to_string(),
    )
}

#[tokio::test]
async fn happy_path_get_round_trips_through_the_tunnel() {
    let addr = spawn_gateway().await;
    let (tunnel_id, auth_token) = create_tunnel(addr).await;

    let (ws, _) = tokio_tungstenite::connect_async(format!(
        "ws://{addr}/api/tunnel/connect/{tunnel_id}"
    ))
    .await
    .unwrap();
    let (mut write, mut read) = ws.split();

    let auth = Envelope::new(MessageKind::Auth, Some(json!({ "auth_token": auth_token })));
    write.send(WsMessage::Text(auth.encode().unwrap().into())).await.unwrap();

    let connected = read.next().await.unwrap().unwrap();
    let connected = Envelope::decode(connected.to_text().unwrap()).unwrap();
    assert_eq!(connected.kind, MessageKind::Connected);

    let owner = tokio::spawn(async move {
        let frame = read.next().await.unwrap().unwrap();
        let envelope = Envelope::decode(frame.to_text().unwrap()).unwrap();
        assert_eq!(envelope.kind, MessageKind::Request);
        let request = envelope.data.unwrap();
        assert_eq!(request["method"], "GET");
        assert_eq!(request["path"], "/hello");

        let response = Envelope::new(
            MessageKind::Response,
            Some(json!({
                "request_id": request["request_id"],
                "status_code": 200,
                "headers": { "content-type": "text/plain" },
                "body": "world",
            })),
        );
        write.send(WsMessage::Text(response.encode().unwrap().into())).await.unwrap();
    });

    let client = reqwest::Client::new();
    let response = client
        .get(format!("http://{addr}/{tunnel_id}/hello"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "text/plain"
    );
    assert!(response.headers().get("x-tunnel-body-encoding").is_none());
    assert_eq!(response.text().await.unwrap(), "world");

    owner.await.unwrap();
}

#[tokio::test]
async fn unknown_tunnel_is_404() {
    let addr = spawn_gateway().await;
    let client = reqwest::Client::new();
    let response = client
        .get(format!("http://{addr}/does-not-exist/hello"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn unattached_tunnel_is_503() {
    let addr = spawn_gateway().await;
    let (tunnel_id, _auth_token) = create_tunnel(addr).await;

    let client = reqwest::Client::new();
    let response = client
        .get(format!("http://{addr}/{tunnel_id}/hello"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 503);
}

#[tokio::test]
async fn channel_disconnect_mid_flight_resolves_502() {
    let addr = spawn_gateway().await;
    let (tunnel_id, auth_token) = create_tunnel(addr).await;

    let (ws, _) = tokio_tungstenite::connect_async(format!(
        "ws://{addr}/api/tunnel/connect/{tunnel_id}"
    ))
    .await
    .unwrap();
    let (mut write, mut read) = ws.split();

    let auth = Envelope::new(MessageKind::Auth, Some(json!({ "auth_token": auth_token })));
    write.send(WsMessage::Text(auth.encode().unwrap().into())).await.unwrap();
    let connected = read.next().await.unwrap().unwrap();
    let connected = Envelope::decode(connected.to_text().unwrap()).unwrap();
    assert_eq!(connected.kind, MessageKind::Connected);

    let owner = tokio::spawn(async move {
        // Receive the forwarded request, then close the channel instead
        // of ever replying to it.
        let frame = read.next().await.unwrap().unwrap();
        let envelope = Envelope::decode(frame.to_text().unwrap()).unwrap();
        assert_eq!(envelope.kind, MessageKind::Request);
        write.close().await.unwrap();
    });

    let client = reqwest::Client::new();
    let response = client
        .get(format!("http://{addr}/{tunnel_id}/hello"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 502);
    owner.await.unwrap();
}

#[tokio::test]
async fn request_times_out_with_504_when_owner_never_responds() {
    let addr = spawn_gateway().await;
    let (tunnel_id, auth_token) = create_tunnel(addr).await;

    let (ws, _) = tokio_tungstenite::connect_async(format!(
        "ws://{addr}/api/tunnel/connect/{tunnel_id}"
    ))
    .await
    .unwrap();
    let (mut write, mut read) = ws.split();
    let auth = Envelope::new(MessageKind::Auth, Some(json!({ "auth_token": auth_token })));
    write.send(WsMessage::Text(auth.encode().unwrap().into())).await.unwrap();
    let _ = read.next().await.unwrap().unwrap();

    // Never reply.
    let _keep_alive = (write, read);

    let client = reqwest::Client::new();
    let response = client
        .get(format!("http://{addr}/{tunnel_id}/hello"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 504);
}

#[tokio::test]
async fn wrong_secret_is_rejected_and_tunnel_stays_connecting() {
    let addr = spawn_gateway().await;
    let (tunnel_id, _auth_token) = create_tunnel(addr).await;

    let (ws, _) = tokio_tungstenite::connect_async(format!(
        "ws://{addr}/api/tunnel/connect/{tunnel_id}"
    ))
    .await
    .unwrap();
    let (mut write, mut read) = ws.split();
    let auth = Envelope::new(MessageKind::Auth, Some(json!({ "auth_token": "wrong" })));
    write.send(WsMessage::Text(auth.encode().unwrap().into())).await.unwrap();

    let frame = read.next().await.unwrap().unwrap();
    let envelope = Envelope::decode(frame.to_text().unwrap()).unwrap();
    assert_eq!(envelope.kind, MessageKind::Error);

    let client = reqwest::Client::new();
    let status: Value = client
        .get(format!("http://{addr}/api/tunnels/{tunnel_id}/status"))
        .header("x-api-key", API_KEY)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["status"], "connecting");
}

#[tokio::test]
async fn delete_is_idempotent_and_404s_on_second_call() {
    let addr = spawn_gateway().await;
    let (tunnel_id, _auth_token) = create_tunnel(addr).await;

    let client = reqwest::Client::new();
    let first = client
        .delete(format!("http://{addr}/api/tunnels/{tunnel_id}"))
        .header("x-api-key", API_KEY)
        .send()
        .await
        .unwrap();
    assert_eq!(first.status(), 200);

    let second = client
        .delete(format!("http://{addr}/api/tunnels/{tunnel_id}"))
        .header("x-api-key", API_KEY)
        .send()
        .await
        .unwrap();
    assert_eq!(second.status(), 404);
}

#[tokio::test]
async fn missing_api_key_is_401_and_wrong_key_is_403() {
    let addr = spawn_gateway().await;
    let client = reqwest::Client::new();

    let missing = client
        .get(format!("http://{addr}/api/tunnels/list"))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), 401);

    let wrong = client
        .get(format!("http://{addr}/api/tunnels/list"))
        .header("x-api-key", "nope")
        .send()
        .await
        .unwrap();
    assert_eq!(wrong.status(), 403);
}
