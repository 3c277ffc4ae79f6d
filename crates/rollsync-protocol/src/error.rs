//! Error types for the protocol layer.
//!
//! A `ProtocolError` always means the bytes or the JSON shape were wrong,
//! never that the network misbehaved. Transport problems live in
//! `rollsync_transport::TransportError`.

/// Errors that can occur in the protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (turning a Rust type into bytes).
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed (turning bytes or a JSON value into a Rust type).
    ///
    /// Common causes: malformed JSON, missing required fields, or a payload
    /// shaped for a different method.
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The message parsed but does not follow JSON-RPC or the expected
    /// result shape: e.g. a subscribe response whose result is not an
    /// integer, or an unknown commitment level in configuration.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
