/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection could not be established.
    #[error("connect to {url} failed: {reason}")]
    ConnectFailed {
        /// Endpoint that was dialed.
        url: String,
        /// Underlying failure, rendered.
        reason: String,
    },

    /// The connection was closed.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// Sending data failed.
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    /// Receiving data failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] std::io::Error),

    /// A unary HTTP round trip failed (network error or non-2xx status).
    #[error("http request failed: {0}")]
    Http(String),

    /// The transport was shut down.
    #[error("transport shut down")]
    Shutdown,
}
