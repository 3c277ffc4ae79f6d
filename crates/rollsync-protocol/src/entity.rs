//! Typed payloads for watched entities.
//!
//! The streaming path (`accountNotification`) and the unary path
//! (`getAccountInfo`) both return `{ context: { slot }, value: <account> }`.
//! Both decode into the same [`EntityState`], which is all a subscription
//! callback ever sees.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Encoding, ProtocolError};

/// The `{context, value}` wrapper the endpoint puts around account results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcEnvelope<T> {
    pub context: RpcContext,
    pub value: T,
}

/// Slot at which the endpoint evaluated a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcContext {
    pub slot: u64,
}

/// Raw account data as delivered by the endpoint.
///
/// Binary encodings arrive as `["<data>", "<encoding>"]`; `jsonParsed`
/// arrives as an arbitrary object, kept as JSON because its schema belongs
/// to the on-chain program, not to this client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AccountData {
    Encoded(String, Encoding),
    Parsed(Value),
}

/// One account's state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountInfo {
    pub lamports: u64,
    pub owner: String,
    pub data: AccountData,
    pub executable: bool,
    pub rent_epoch: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub space: Option<u64>,
}

/// The state of a watched entity, as handed to subscription callbacks.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityState {
    /// Slot the state was observed at.
    pub slot: u64,
    pub account: AccountInfo,
}

impl EntityState {
    /// Decodes the `result` of an `accountNotification`.
    ///
    /// # Errors
    /// [`ProtocolError::Decode`] if the payload is not an account envelope.
    pub fn from_notification(result: Value) -> Result<Self, ProtocolError> {
        let envelope: RpcEnvelope<AccountInfo> =
            serde_json::from_value(result).map_err(ProtocolError::Decode)?;
        Ok(Self::from(envelope))
    }

    /// Decodes the `result` of a `getAccountInfo` call.
    ///
    /// `Ok(None)` means the account does not exist (the endpoint returned
    /// `"value": null`), which pollers treat as "no data" rather than an
    /// error.
    ///
    /// # Errors
    /// [`ProtocolError::Decode`] if the payload is not an account envelope.
    pub fn from_account_info(result: Value) -> Result<Option<Self>, ProtocolError> {
        let envelope: RpcEnvelope<Option<AccountInfo>> =
            serde_json::from_value(result).map_err(ProtocolError::Decode)?;
        Ok(envelope.value.map(|account| Self {
            slot: envelope.context.slot,
            account,
        }))
    }
}

impl From<RpcEnvelope<AccountInfo>> for EntityState {
    fn from(envelope: RpcEnvelope<AccountInfo>) -> Self {
        Self {
            slot: envelope.context.slot,
            account: envelope.value,
        }
    }
}
