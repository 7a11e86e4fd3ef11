//! # Tunnel Protocol
//!
//! Shared wire format between the gateway server and the tunnel client:
//! the duplex-channel envelope (`type`/`data`/`timestamp`), the serialized
//! HTTP request/response carried inside `data`, and the binary-body escape
//! used to move non-UTF-8 or binary-typed bodies across JSON.
//!
//! This crate is deliberately free of any networking or runtime
//! dependency — both binaries marshal bytes through it without sharing
//! any async machinery.

mod envelope;
mod error;
mod http;

pub use envelope::{Envelope, MessageKind};
pub use error::CodecError;
pub use http::{
    decode_body, encode_body, is_binary_content_type, strip_body_encoding_header,
    strip_host_header, HeaderMap, SerializedHttpRequest, SerializedHttpResponse,
    BODY_ENCODING_HEADER, BODY_ENCODING_VALUE,
};
