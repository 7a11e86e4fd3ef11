use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::CodecError;

/// Header storage for serialized requests/responses. Keys are folded to
/// lowercase on insert so lookups are case-insensitive and duplicate
/// headers collapse to last-wins, matching `dict(request.headers)`
/// semantics in the system this protocol was distilled from.
pub type HeaderMap = HashMap<String, String>;

pub const BODY_ENCODING_HEADER: &str = "x-tunnel-body-encoding";
pub const BODY_ENCODING_VALUE: &str = "base64";

const BINARY_PREFIXES: &[&str] = &["image/", "video/", "audio/"];
const BINARY_EXACT: &[&str] = &[
    "application/octet-stream",
    "application/pdf",
    "application/zip",
    "application/x-tar",
];

/// A request serialized for transport through the duplex channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerializedHttpRequest {
    pub request_id: String,
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub query_params: HashMap<String, String>,
    #[serde(default)]
    pub headers: HeaderMap,
    #[serde(default)]
    pub body: Option<String>,
}

/// A response serialized for transport through the duplex channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerializedHttpResponse {
    pub request_id: String,
    pub status_code: u16,
    #[serde(default)]
    pub headers: HeaderMap,
    #[serde(default)]
    pub body: Option<String>,
}

/// Whether a content-type is treated as binary for the purposes of the
/// body escape: an `image/`, `video/`, `audio/` prefix, or one of
/// a short list of binary-ish `application/*` types.
pub fn is_binary_content_type(content_type: &str) -> bool {
    let ct = content_type.to_ascii_lowercase();
    BINARY_PREFIXES.iter().any(|p| ct.starts_with(p)) || BINARY_EXACT.contains(&ct.as_str())
}

/// Encodes a body for transport, mutating `headers` to carry the
/// `x-tunnel-body-encoding: base64` marker when the escape applies.
///
/// Returns `None` for an empty body (no `body` field is sent at all).
pub fn encode_body(bytes: &[u8], headers: &mut HeaderMap) -> Option<String> {
    if bytes.is_empty() {
        return None;
    }

    let content_type = headers.get("content-type").cloned().unwrap_or_default();
    if is_binary_content_type(&content_type) {
        headers.insert(BODY_ENCODING_HEADER.to_string(), BODY_ENCODING_VALUE.to_string());
        return Some(BASE64.encode(bytes));
    }

    match std::str::from_utf8(bytes) {
        Ok(s) => Some(s.to_string()),
        Err(_) => {
            headers.insert(BODY_ENCODING_HEADER.to_string(), BODY_ENCODING_VALUE.to_string());
            Some(BASE64.encode(bytes))
        }
    }
}

/// Inverts [`encode_body`]: decodes the wire body back to raw bytes,
/// consulting the `x-tunnel-body-encoding` marker.
pub fn decode_body(body: Option<&str>, headers: &HeaderMap) -> Result<Option<Vec<u8>>, CodecError> {
    let Some(s) = body else {
        return Ok(None);
    };
    if s.is_empty() {
        return Ok(None);
    }

    let is_base64 = headers
        .get(BODY_ENCODING_HEADER)
        .map(|v| v.eq_ignore_ascii_case(BODY_ENCODING_VALUE))
        .unwrap_or(false);

    if is_base64 {
        Ok(Some(BASE64.decode(s)?))
    } else {
        Ok(Some(s.as_bytes().to_vec()))
    }
}

/// Removes the `host` header — it would name the gateway, not the local
/// target the client is about to reissue the request against.
pub fn strip_host_header(headers: &mut HeaderMap) {
    headers.remove("host");
}

/// Removes the internal `x-tunnel-body-encoding` marker before a response
/// reaches the public caller, or before a request reaches the local
/// service unmarked.
pub fn strip_body_encoding_header(headers: &mut HeaderMap) {
    headers.remove(BODY_ENCODING_HEADER);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_body_round_trips_without_marker() {
        let mut headers = HeaderMap::new();
        headers.insert("content-type".into(), "text/plain".into());
        let encoded = encode_body(b"hello", &mut headers).unwrap();
        assert_eq!(encoded, "hello");
        assert!(!headers.contains_key(BODY_ENCODING_HEADER));

        let decoded = decode_body(Some(&encoded), &headers).unwrap().unwrap();
        assert_eq!(decoded, b"hello");
    }

    #[test]
    fn binary_content_type_forces_base64() {
        let mut headers = HeaderMap::new();
        headers.insert("content-type".into(), "application/octet-stream".into());
        let bytes = [0x00u8, 0x01, 0x02];
        let encoded = encode_body(&bytes, &mut headers).unwrap();
        assert_eq!(encoded, "AAEC");
        assert_eq!(headers.get(BODY_ENCODING_HEADER).unwrap(), "base64");

        let decoded = decode_body(Some(&encoded), &headers).unwrap().unwrap();
        assert_eq!(decoded, bytes);
    }

    #[test]
    fn non_utf8_falls_back_to_base64_even_with_text_content_type() {
        let mut headers = HeaderMap::new();
        headers.insert("content-type".into(), "text/plain".into());
        let bytes = [0xFFu8, 0xFE];
        let encoded = encode_body(&bytes, &mut headers).unwrap();
        assert_eq!(headers.get(BODY_ENCODING_HEADER).unwrap(), "base64");
        let decoded = decode_body(Some(&encoded), &headers).unwrap().unwrap();
        assert_eq!(decoded, bytes);
    }

    #[test]
    fn empty_body_encodes_to_none() {
        let mut headers = HeaderMap::new();
        assert!(encode_body(b"", &mut headers).is_none());
    }

    #[test]
    fn host_and_marker_headers_are_stripped() {
        let mut headers = HeaderMap::new();
        headers.insert("host".into(), "gateway.example".into());
        headers.insert(BODY_ENCODING_HEADER.into(), "base64".into());
        strip_host_header(&mut headers);
        strip_body_encoding_header(&mut headers);
        assert!(headers.is_empty());
    }
}
