//! Unary request/response transport over HTTP POST.

use std::time::Duration;

use reqwest::header::CONTENT_TYPE;

use crate::TransportError;

/// Default bound on a whole HTTP round trip.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Posts whole request bodies to one fixed URL and returns response bodies.
///
/// Each `HttpTransport` owns its own `reqwest::Client`, and with it its own
/// connection pool. Building a new transport is therefore how callers get a
/// fresh set of underlying connections.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    url: String,
    client: reqwest::Client,
}

impl HttpTransport {
    /// Creates a transport for `url` with the default request timeout.
    pub fn new(url: impl Into<String>) -> Result<Self, TransportError> {
        Self::with_timeout(url, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Creates a transport whose round trips fail after `timeout`.
    pub fn with_timeout(
        url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .tcp_nodelay(true)
            .build()
            .map_err(|e| TransportError::Http(e.to_string()))?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }

    /// The URL requests are posted to.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Posts a JSON body and returns the raw response body.
    ///
    /// Non-2xx statuses are errors; the body of an error status is not
    /// inspected.
    pub async fn post(&self, body: Vec<u8>) -> Result<Vec<u8>, TransportError> {
        let response = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?
            .error_for_status()
            .map_err(|e| TransportError::Http(e.to_string()))?;

        let bytes = response
            .bytes()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;
        tracing::trace!(url = %self.url, len = bytes.len(), "http response");
        Ok(bytes.to_vec())
    }
}
