//! # Tunnel Client
//!
//! The owner-side half of the tunnel: mints a tunnel via the control
//! API, opens the duplex channel, and re-issues each received request
//! against a local HTTP endpoint, returning the response through the same
//! channel.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use reqwest::redirect::Policy;
use serde_json::json;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{info, warn};
use tunnel_protocol::{
    decode_body, encode_body, strip_body_encoding_header, strip_host_header, Envelope,
    HeaderMap, MessageKind, SerializedHttpRequest, SerializedHttpResponse,
};

use crate::cli::Cli;

const LOCAL_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct TunnelClient {
    cli: Cli,
    http: reqwest::Client,
    tunnel_id: Option<String>,
    auth_token: Option<String>,
}

impl TunnelClient {
    pub fn new(cli: Cli) -> Self {
        let http = reqwest::Client::builder()
            .redirect(Policy::none())
            .timeout(LOCAL_REQUEST_TIMEOUT)
            .build()
            .expect("reqwest client with static configuration always builds");

        Self {
            cli,
            http,
            tunnel_id: None,
            auth_token: None,
        }
    }

    fn control_scheme(&self) -> &'static str {
        if self.cli.https { "https" } else { "http" }
    }

    fn ws_scheme(&self) -> &'static str {
        if self.cli.https { "wss" } else { "ws" }
    }

    /// `POST /api/tunnels/create`.
    async fn create_tunnel(&mut self) -> anyhow::Result<()> {
        let url = format!("{}://{}/api/tunnels/create", self.control_scheme(), self.cli.server);
        println!("Creating tunnel...");

        let response = self
            .http
            .post(&url)
            .header("x-api-key", &self.cli.api_key)
            .json(&json!({ "name": self.cli.name, "local_port": self.cli.port }))
            .send()
            .await?
            .error_for_status()?;

        let body: serde_json::Value = response.json().await?;
        let tunnel_id = body["tunnel_id"].as_str().unwrap_or_default().to_string();
        let auth_token = body["auth_token"].as_str().unwrap_or_default().to_string();
        let public_url = body["url"].as_str().unwrap_or_default().to_string();

        println!("Tunnel created: {tunnel_id}");
        println!("Public URL: {public_url}");

        self.tunnel_id = Some(tunnel_id);
        self.auth_token = Some(auth_token);
        Ok(())
    }

    /// Opens the duplex channel, authenticates, and serves requests until
    /// the channel closes or a cancellation signal fires.
    pub async fn run(mut self) -> anyhow::Result<()> {
        self.create_tunnel().await?;

        let tunnel_id = self.tunnel_id.clone().expect("set by create_tunnel");
        let auth_token = self.auth_token.clone().expect("set by create_tunnel");
        let ws_url = format!("{}://{}/api/tunnel/connect/{}", self.ws_scheme(), self.cli.server, tunnel_id);

        println!("Connecting to tunnel gateway...");
        let (ws_stream, _) = tokio_tungstenite::connect_async(ws_url.as_str()).await?;
        let (mut write, mut read) = ws_stream.split();

        let auth = Envelope::new(MessageKind::Auth, Some(json!({ "auth_token": auth_token })));
        write.send(WsMessage::Text(auth.encode()?.into())).await?;

        match read.next().await {
            Some(Ok(WsMessage::Text(text))) => match Envelope::decode(&text) {
                Ok(env) if env.kind == MessageKind::Connected => {
                    println!("Connected. Forwarding to http://{}:{}", self.cli.host, self.cli.port);
                }
                Ok(env) => anyhow::bail!("expected a connected message, got {:?}", env.kind),
                Err(e) => anyhow::bail!("malformed connect response: {e}"),
            },
            Some(Ok(_)) => anyhow::bail!("expected a text frame from the gateway"),
            Some(Err(e)) => anyhow::bail!("websocket error during connect: {e}"),
            None => anyhow::bail!("gateway closed the channel before confirming the connection"),
        }

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("shutdown requested, closing tunnel");
                    let _ = write.close().await;
                    break;
                }
                frame = read.next() => {
                    let Some(frame) = frame else {
                        println!("Tunnel gateway closed the connection.");
                        break;
                    };
                    let text = match frame {
                        Ok(WsMessage::Text(text)) => text,
                        Ok(WsMessage::Close(_)) => break,
                        Ok(_) => continue,
                        Err(e) => {
                            warn!(error = %e, "websocket read error");
                            break;
                        }
                    };

                    let envelope = match Envelope::decode(&text) {
                        Ok(e) => e,
                        Err(e) => {
                            warn!(error = %e, "dropping malformed envelope from gateway");
                            continue;
                        }
                    };

                    match envelope.kind {
                        MessageKind::Ping => {
                            let pong = Envelope::new(MessageKind::Pong, None);
                            if let Ok(text) = pong.encode() {
                                let _ = write.send(WsMessage::Text(text.into())).await;
                            }
                        }
                        MessageKind::Request => {
                            if let Some(response) = self.handle_request(envelope).await {
                                if let Ok(text) = response.encode() {
                                    let _ = write.send(WsMessage::Text(text.into())).await;
                                }
                            }
                        }
                        MessageKind::Error => {
                            warn!(data = ?envelope.data, "gateway reported an error");
                        }
                        other => {
                            warn!(kind = ?other, "unexpected message from gateway");
                        }
                    }
                }
            }
        }

        println!("Tunnel stopped.");
        Ok(())
    }

    /// Re-issues a tunneled request against the local service and returns
    /// the `response` envelope to send back, if the request carried a
    /// usable `request_id`.
    async fn handle_request(&self, envelope: Envelope) -> Option<Envelope> {
        let data = envelope.data?;
        let request: SerializedHttpRequest = match serde_json::from_value(data) {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "malformed request envelope");
                return None;
            }
        };

        println!("{} {} (request_id: {}...)", request.method, request.path, &request.request_id[..8.min(request.request_id.len())]);

        let response = match self.dispatch_locally(&request).await {
            Ok(response) => response,
            Err(status) => error_response(&request.request_id, status),
        };

        Some(Envelope::new(
            MessageKind::Response,
            Some(serde_json::to_value(&response).ok()?),
        ))
    }

    async fn dispatch_locally(
        &self,
        request: &SerializedHttpRequest,
    ) -> Result<SerializedHttpResponse, LocalDispatchStatus> {
        let mut headers = request.headers.clone();
        strip_host_header(&mut headers);
        strip_body_encoding_header(&mut headers);

        let body = decode_body(request.body.as_deref(), &request.headers)
            .map_err(|_| LocalDispatchStatus::Internal)?
            .unwrap_or_default();

        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|_| LocalDispatchStatus::Internal)?;
        let url = format!("http://{}:{}{}", self.cli.host, self.cli.port, request.path);

        let mut builder = self.http.request(method, &url);
        if !request.query_params.is_empty() {
            builder = builder.query(&request.query_params);
        }
        for (name, value) in &headers {
            builder = builder.header(name, value);
        }
        if !body.is_empty() {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                LocalDispatchStatus::Timeout
            } else if e.is_connect() {
                LocalDispatchStatus::Unreachable
            } else {
                LocalDispatchStatus::Internal
            }
        })?;

        let status_code = response.status().as_u16();
        let mut response_headers: HeaderMap = response
            .headers()
            .iter()
            .map(|(k, v)| (k.as_str().to_ascii_lowercase(), v.to_str().unwrap_or("").to_string()))
            .collect();
        let body = response.bytes().await.map_err(|_| LocalDispatchStatus::Internal)?;
        let encoded_body = encode_body(&body, &mut response_headers);

        println!("-> {status_code} ({} bytes)", body.len());

        Ok(SerializedHttpResponse {
            request_id: request.request_id.clone(),
            status_code,
            headers: response_headers,
            body: encoded_body,
        })
    }
}

#[derive(Debug, Clone, Copy)]
enum LocalDispatchStatus {
    Unreachable,
    Timeout,
    Internal,
}

fn error_response(request_id: &str, status: LocalDispatchStatus) -> SerializedHttpResponse {
    let (status_code, message) = match status {
        LocalDispatchStatus::Unreachable => (502, "Bad Gateway: local service not reachable"),
        LocalDispatchStatus::Timeout => (504, "Gateway Timeout"),
        LocalDispatchStatus::Internal => (500, "Internal Error"),
    };

    let mut headers = HeaderMap::new();
    headers.insert("content-type".to_string(), "application/json".to_string());

    SerializedHttpResponse {
        request_id: request_id.to_string(),
        status_code,
        headers,
        body: Some(json!({ "error": message }).to_string()),
    }
}
