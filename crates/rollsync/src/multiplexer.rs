//! Correlation of requests and responses on one streaming link.
//!
//! Every outbound request gets a fresh [`RequestId`] and a pending entry
//! holding a oneshot sink. The dispatch loop resolves entries as responses
//! arrive; timeouts and link teardown remove them. An entry exists from
//! send until exactly one of: response, deadline, teardown.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use rollsync_protocol::{RequestId, RpcErrorObject, RpcRequest, RpcResponse};
use serde_json::Value;
use tokio::sync::oneshot;

use crate::ClientError;

/// Process-wide request id counter. Ids are never reused, even across links.
static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Allocates a fresh request id.
pub(crate) fn next_request_id() -> RequestId {
    RequestId(NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed))
}

/// Runs inside the dispatch loop when the response arrives, before any
/// later frame is processed.
pub(crate) type ResponseHook = Box<dyn FnOnce(&Result<Value, RpcErrorObject>) + Send>;

pub(crate) type ResponseSink = oneshot::Receiver<Result<Value, ClientError>>;

struct Pending {
    method: String,
    sink: oneshot::Sender<Result<Value, ClientError>>,
    hook: Option<ResponseHook>,
}

#[derive(Default)]
struct PendingMap {
    entries: HashMap<RequestId, Pending>,
    /// Set by [`Multiplexer::fail_all`]; no entry can be added afterwards.
    closed: bool,
}

/// Pending-request table for one link.
#[derive(Default)]
pub(crate) struct Multiplexer {
    pending: Mutex<PendingMap>,
}

impl Multiplexer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, PendingMap> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Builds a request under a fresh id and creates its pending entry.
    ///
    /// # Errors
    /// [`ClientError::Closed`] once the link has been torn down.
    pub(crate) fn register<F>(
        &self,
        build: F,
        hook: Option<ResponseHook>,
    ) -> Result<(RpcRequest, ResponseSink), ClientError>
    where
        F: FnOnce(RequestId) -> RpcRequest,
    {
        let mut pending = self.lock();
        if pending.closed {
            return Err(ClientError::Closed);
        }
        let request = build(next_request_id());
        let (sink, rx) = oneshot::channel();
        pending.entries.insert(
            request.id,
            Pending {
                method: request.method.clone(),
                sink,
                hook,
            },
        );
        Ok((request, rx))
    }

    /// Completes the entry for `response.id`. Returns `false` for an
    /// unknown id (already timed out, or never sent).
    pub(crate) fn resolve(&self, response: RpcResponse) -> bool {
        let Some(entry) = self.lock().entries.remove(&response.id) else {
            return false;
        };
        if let Some(hook) = entry.hook {
            hook(&response.outcome);
        }
        tracing::trace!(id = %response.id, method = %entry.method, "response matched");
        // The caller may have stopped waiting; that is not an error here.
        let _ = entry.sink.send(response.outcome.map_err(ClientError::from));
        true
    }

    /// Drops the entry for `id` without completing it.
    pub(crate) fn cancel(&self, id: RequestId) {
        self.lock().entries.remove(&id);
    }

    /// Fails every pending entry with [`ClientError::Closed`] and refuses
    /// new ones. Returns how many were failed.
    pub(crate) fn fail_all(&self) -> usize {
        let drained: Vec<Pending> = {
            let mut pending = self.lock();
            pending.closed = true;
            pending.entries.drain().map(|(_, p)| p).collect()
        };
        let count = drained.len();
        for entry in drained {
            let _ = entry.sink.send(Err(ClientError::Closed));
        }
        count
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.lock().closed
    }
}
