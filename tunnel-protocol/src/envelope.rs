use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::CodecError;

/// The type discriminant carried by every envelope on the duplex channel.
///
/// Unlike `tunnel-protocol`'s sibling relay (whose `WsMessage` is an
/// internally-tagged enum carrying its payload fields directly), this
/// protocol keeps `type` and `data` separate: `data` is an opaque JSON
/// blob whose shape depends on `kind`, decoded on demand by whichever side
/// understands it (`SerializedHttpRequest`, `SerializedHttpResponse`, or a
/// small ad hoc object for `auth`/`connected`/`error`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Auth,
    Connected,
    Request,
    Response,
    Ping,
    Pong,
    Error,
}

impl MessageKind {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "auth" => Some(Self::Auth),
            "connected" => Some(Self::Connected),
            "request" => Some(Self::Request),
            "response" => Some(Self::Response),
            "ping" => Some(Self::Ping),
            "pong" => Some(Self::Pong),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// The wire envelope: `{ "type": "...", "data": {...} | null, "timestamp": "..." }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    pub timestamp: String,
}

impl Envelope {
    /// Builds an envelope of the given kind carrying `data`, stamped with
    /// the current instant.
    pub fn new(kind: MessageKind, data: Option<serde_json::Value>) -> Self {
        Self {
            kind,
            data,
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    pub fn encode(&self) -> Result<String, CodecError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decodes a raw text frame into an envelope.
    ///
    /// Distinguishes a malformed envelope (not JSON, not an object, or
    /// missing `type`) from an unknown `type` value so callers can log
    /// each case distinctly, per the protocol's error taxonomy.
    pub fn decode(text: &str) -> Result<Self, CodecError> {
        let value: serde_json::Value =
            serde_json::from_str(text).map_err(|e| CodecError::MalformedEnvelope(e.to_string()))?;

        let obj = value
            .as_object()
            .ok_or_else(|| CodecError::MalformedEnvelope("envelope is not a JSON object".into()))?;

        let kind_str = obj
            .get("type")
            .and_then(|v| v.as_str())
            .ok_or_else(|| CodecError::MalformedEnvelope("missing `type` field".into()))?;

        let kind = MessageKind::parse(kind_str)
            .ok_or_else(|| CodecError::UnknownType(kind_str.to_string()))?;

        let data = obj.get("data").cloned().filter(|v| !v.is_null());
        let timestamp = obj
            .get("timestamp")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| Utc::now().to_rfc3339());

        Ok(Self {
            kind,
            data,
            timestamp,
        })
    }
}
