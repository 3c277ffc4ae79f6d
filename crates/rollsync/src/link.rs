//! One incarnation of the streaming link.
//!
//! A [`Link`] wraps a single WebSocket connection, its pending-request
//! table and the task that reads inbound frames. When the connection dies
//! the dispatch task ends, fails every pending request with
//! [`ClientError::Closed`], and reports why. The client supervisor then
//! drops the link and, after backoff, opens a new one.

use std::sync::Arc;
use std::time::Duration;

use rollsync_protocol::{Codec, Inbound, JsonCodec, RequestId, RpcRequest, classify, methods};
use rollsync_transport::{Connection, ConnectionId, Connector, WebSocketConnection, WebSocketConnector};
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::ClientError;
use crate::multiplexer::{Multiplexer, ResponseHook};
use crate::registry::Registry;

/// Removes a pending entry if the waiting future is dropped early.
struct PendingGuard<'a> {
    mux: &'a Multiplexer,
    id: RequestId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.mux.cancel(self.id);
    }
}

pub(crate) struct Link {
    conn: Arc<WebSocketConnection>,
    mux: Arc<Multiplexer>,
    codec: JsonCodec,
    request_timeout: Duration,
}

impl Link {
    /// Dials the endpoint and starts the dispatch task.
    ///
    /// The returned handle completes with a short reason once the link is
    /// gone, whichever side closed it.
    pub(crate) async fn open(
        connector: &WebSocketConnector,
        registry: Arc<Registry>,
        request_timeout: Duration,
    ) -> Result<(Arc<Self>, JoinHandle<String>), ClientError> {
        let conn = Arc::new(connector.connect().await?);
        let mux = Arc::new(Multiplexer::new());

        let dispatch = tokio::spawn(dispatch_loop(
            Arc::clone(&conn),
            Arc::clone(&mux),
            registry,
        ));

        let link = Arc::new(Self {
            conn,
            mux,
            codec: JsonCodec,
            request_timeout,
        });
        Ok((link, dispatch))
    }

    pub(crate) fn id(&self) -> ConnectionId {
        self.conn.id()
    }

    /// Sends a request and waits for its response, up to the default
    /// request timeout.
    pub(crate) async fn request(&self, method: &str, params: Value) -> Result<Value, ClientError> {
        self.call(
            |id| RpcRequest::new(id, method, params),
            self.request_timeout,
            None,
        )
        .await
    }

    /// Sends the request `build` produces for a fresh id and waits up to
    /// `timeout` for the response. `hook` runs on the dispatch loop when the
    /// response arrives, before any later frame is handled.
    pub(crate) async fn call<F>(
        &self,
        build: F,
        timeout: Duration,
        hook: Option<ResponseHook>,
    ) -> Result<Value, ClientError>
    where
        F: FnOnce(RequestId) -> RpcRequest,
    {
        let (request, response) = self.mux.register(build, hook)?;
        let _guard = PendingGuard {
            mux: &self.mux,
            id: request.id,
        };

        let bytes = self.codec.encode(&request)?;
        self.conn.send(&bytes).await?;
        trace!(conn = %self.id(), id = %request.id, method = %request.method, "request sent");

        match tokio::time::timeout(timeout, response).await {
            Ok(Ok(result)) => result,
            // Sink dropped without an answer: the link was torn down.
            Ok(Err(_)) => Err(ClientError::Closed),
            Err(_) => Err(ClientError::RequestTimeout {
                method: request.method,
                timeout,
            }),
        }
    }

    /// Sends a JSON-RPC notification (no id, no response).
    pub(crate) async fn notify(&self, method: &str, params: Value) -> Result<(), ClientError> {
        if self.mux.is_closed() {
            return Err(ClientError::Closed);
        }
        let message = json!({ "jsonrpc": "2.0", "method": method, "params": params });
        self.conn.send(&self.codec.encode(&message)?).await?;
        Ok(())
    }

    /// Pending requests right now.
    pub(crate) fn pending(&self) -> usize {
        self.mux.len()
    }

    /// Fails pending requests and closes the connection.
    pub(crate) async fn close(&self) {
        let failed = self.mux.fail_all();
        if let Err(e) = self.conn.close().await {
            debug!(conn = %self.id(), error = %e, "close handshake failed");
        }
        debug!(conn = %self.id(), failed_requests = failed, "link closed by client");
    }
}

async fn dispatch_loop(
    conn: Arc<WebSocketConnection>,
    mux: Arc<Multiplexer>,
    registry: Arc<Registry>,
) -> String {
    let conn_id = conn.id();
    let reason = loop {
        let frame = match conn.recv().await {
            Ok(Some(frame)) => frame,
            Ok(None) => break "closed by remote".to_owned(),
            Err(e) => break e.to_string(),
        };

        match classify(&frame) {
            Inbound::Response(response) => {
                let id = response.id;
                if !mux.resolve(response) {
                    warn!(conn = %conn_id, %id, "response for unknown request dropped");
                }
            }
            Inbound::Notification(n) if n.method == methods::ACCOUNT_NOTIFICATION => {
                registry.dispatch_notification(n.subscription, n.result);
            }
            Inbound::Notification(n) => {
                warn!(conn = %conn_id, method = %n.method, "unexpected notification dropped");
            }
            Inbound::Malformed(why) => {
                warn!(conn = %conn_id, reason = %why, "malformed frame dropped");
            }
        }
    };

    let failed = mux.fail_all();
    debug!(conn = %conn_id, %reason, failed_requests = failed, "dispatch loop ended");
    reason
}
