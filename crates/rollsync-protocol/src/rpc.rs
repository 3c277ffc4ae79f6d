//! JSON-RPC 2.0 envelopes and inbound frame classification.
//!
//! Outbound traffic is always an [`RpcRequest`]. Inbound traffic is decided
//! once, at the parse boundary, into an [`Inbound`]: a response to one of
//! our requests, a subscription notification, or a malformed frame. Nothing
//! past [`classify`] ever looks at an untyped JSON object again.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::{AccountConfig, Commitment, EntityKey, RemoteSubscriptionId, RequestId};

/// Method names used by the client.
pub mod methods {
    pub const ACCOUNT_SUBSCRIBE: &str = "accountSubscribe";
    pub const ACCOUNT_UNSUBSCRIBE: &str = "accountUnsubscribe";
    pub const ACCOUNT_NOTIFICATION: &str = "accountNotification";
    pub const GET_ACCOUNT_INFO: &str = "getAccountInfo";
    pub const GET_SLOT: &str = "getSlot";
}

const JSONRPC_VERSION: &str = "2.0";

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

/// An outbound JSON-RPC request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub id: RequestId,
    pub method: String,
    pub params: Value,
}

impl RpcRequest {
    /// Builds a request with the `"2.0"` version tag.
    pub fn new(id: RequestId, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.into(),
            params,
        }
    }

    /// `accountSubscribe [key, {encoding, commitment}]`.
    pub fn account_subscribe(id: RequestId, key: &EntityKey, config: AccountConfig) -> Self {
        Self::new(id, methods::ACCOUNT_SUBSCRIBE, json!([key, config]))
    }

    /// `accountUnsubscribe [subscriptionId]`.
    pub fn account_unsubscribe(id: RequestId, subscription: RemoteSubscriptionId) -> Self {
        Self::new(id, methods::ACCOUNT_UNSUBSCRIBE, json!([subscription]))
    }

    /// `getAccountInfo [key, {encoding, commitment}]`, the unary fetch used
    /// while a key is being polled.
    pub fn get_account_info(id: RequestId, key: &EntityKey, config: AccountConfig) -> Self {
        Self::new(id, methods::GET_ACCOUNT_INFO, json!([key, config]))
    }

    /// `getSlot [{commitment}]`, a cheap round trip for latency probing.
    pub fn get_slot(id: RequestId, commitment: Commitment) -> Self {
        Self::new(id, methods::GET_SLOT, json!([{ "commitment": commitment }]))
    }
}

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

/// The `error` member of a failed JSON-RPC response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl fmt::Display for RpcErrorObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

/// A response correlated to one of our requests by id.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcResponse {
    pub id: RequestId,
    pub outcome: Result<Value, RpcErrorObject>,
}

/// A push notification for a remote subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcNotification {
    pub method: String,
    pub subscription: RemoteSubscriptionId,
    pub result: Value,
}

/// Every inbound frame, classified.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Response(RpcResponse),
    Notification(RpcNotification),
    /// Unparseable or unrecognized. Carries a short diagnostic; callers log
    /// it and move on.
    Malformed(String),
}

/// Classifies one inbound frame.
///
/// Never fails: anything that is not a well-formed response or
/// notification comes back as [`Inbound::Malformed`].
pub fn classify(data: &[u8]) -> Inbound {
    let value: Value = match serde_json::from_slice(data) {
        Ok(value) => value,
        Err(e) => return Inbound::Malformed(format!("not JSON: {e}")),
    };
    let Value::Object(mut obj) = value else {
        return Inbound::Malformed("frame is not a JSON object".into());
    };

    if obj.contains_key("result") || obj.contains_key("error") {
        return classify_response(obj);
    }

    match obj.remove("method") {
        Some(Value::String(method)) => classify_notification(method, &mut obj),
        _ => Inbound::Malformed("frame has neither result, error, nor method".into()),
    }
}

fn classify_response(mut obj: Map<String, Value>) -> Inbound {
    let Some(id) = obj.get("id").and_then(Value::as_u64) else {
        // Servers answer unparseable requests with `"id": null`; we cannot
        // correlate those with anything.
        return Inbound::Malformed(format!(
            "response without a numeric id: {}",
            obj.get("id").unwrap_or(&Value::Null)
        ));
    };

    let outcome = match obj.remove("error") {
        Some(error) => match serde_json::from_value::<RpcErrorObject>(error) {
            Ok(error) => Err(error),
            Err(e) => return Inbound::Malformed(format!("bad error object: {e}")),
        },
        None => Ok(obj.remove("result").unwrap_or(Value::Null)),
    };

    Inbound::Response(RpcResponse {
        id: RequestId(id),
        outcome,
    })
}

fn classify_notification(method: String, obj: &mut Map<String, Value>) -> Inbound {
    let Some(Value::Object(mut params)) = obj.remove("params") else {
        return Inbound::Malformed(format!("{method} without params object"));
    };
    let Some(subscription) = params.get("subscription").and_then(Value::as_u64) else {
        return Inbound::Malformed(format!("{method} without subscription id"));
    };
    let Some(result) = params.remove("result") else {
        return Inbound::Malformed(format!("{method} without result"));
    };

    Inbound::Notification(RpcNotification {
        method,
        subscription: RemoteSubscriptionId(subscription),
        result,
    })
}

/// Decodes a unary (HTTP) response body, which must be a response object.
///
/// # Errors
/// [`ProtocolError::InvalidMessage`](crate::ProtocolError::InvalidMessage)
/// when the body is malformed or is a notification.
pub fn decode_response(data: &[u8]) -> Result<RpcResponse, crate::ProtocolError> {
    match classify(data) {
        Inbound::Response(response) => Ok(response),
        Inbound::Notification(n) => Err(crate::ProtocolError::InvalidMessage(format!(
            "expected a response, got {} notification",
            n.method
        ))),
        Inbound::Malformed(reason) => Err(crate::ProtocolError::InvalidMessage(reason)),
    }
}
