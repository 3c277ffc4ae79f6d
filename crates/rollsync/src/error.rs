//! Unified error type for the rollsync client.

use std::time::Duration;

use rollsync_protocol::{ProtocolError, RpcErrorObject};
use rollsync_transport::TransportError;

/// Top-level error for every client operation.
///
/// Sub-crate errors convert automatically through `#[from]`, so `?` works
/// across layers. Transport failures on the streaming link are handled by
/// the supervisor and never reach `watch` callers; they only surface here
/// for explicit requests.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Connect failed or the link closed unexpectedly.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A frame or payload could not be encoded or decoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// No response arrived within the request deadline.
    #[error("{method} timed out after {timeout:?}")]
    RequestTimeout {
        method: String,
        timeout: Duration,
    },

    /// The endpoint answered with a JSON-RPC error object.
    #[error("request failed: {message} (code {code})")]
    RequestFailed { code: i64, message: String },

    /// The link was torn down while the request was pending, or the client
    /// has been closed.
    #[error("connection closed")]
    Closed,

    /// A request needs the streaming link and it is not up.
    #[error("not connected")]
    NotConnected,

    /// The reconnect ceiling was exceeded.
    #[error("gave up reconnecting after {attempts} attempts")]
    GaveUp { attempts: u32 },

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl From<RpcErrorObject> for ClientError {
    fn from(error: RpcErrorObject) -> Self {
        Self::RequestFailed {
            code: error.code,
            message: error.message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_transport_error() {
        let err = TransportError::ConnectionClosed("gone".into());
        let client_err: ClientError = err.into();
        assert!(matches!(client_err, ClientError::Transport(_)));
        assert!(client_err.to_string().contains("gone"));
    }

    #[test]
    fn test_from_protocol_error() {
        let err = ProtocolError::InvalidMessage("bad".into());
        let client_err: ClientError = err.into();
        assert!(matches!(client_err, ClientError::Protocol(_)));
    }

    #[test]
    fn test_from_rpc_error_object() {
        let err = RpcErrorObject {
            code: -32602,
            message: "Invalid params".into(),
            data: None,
        };
        let client_err: ClientError = err.into();
        assert_eq!(client_err.to_string(), "request failed: Invalid params (code -32602)");
    }

    #[test]
    fn test_request_timeout_display_names_method() {
        let err = ClientError::RequestTimeout {
            method: "getSlot".into(),
            timeout: Duration::from_millis(250),
        };
        assert_eq!(err.to_string(), "getSlot timed out after 250ms");
    }
}
