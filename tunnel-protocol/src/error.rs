use thiserror::Error;

/// Errors raised while encoding/decoding the duplex-channel wire format.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The envelope was not valid JSON, was not a JSON object, or lacked
    /// a `type` field.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// The envelope's `type` field held a value outside the enumerated
    /// message kinds.
    #[error("unknown message type: {0}")]
    UnknownType(String),

    /// A body claimed to be base64-encoded but failed to decode.
    #[error("bad body encoding: {0}")]
    BadBodyEncoding(#[from] base64::DecodeError),

    /// Failed to serialize an outgoing envelope.
    #[error("failed to serialize envelope: {0}")]
    Encode(#[from] serde_json::Error),
}
