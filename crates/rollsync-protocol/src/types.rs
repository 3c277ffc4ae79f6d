//! Identity and configuration types shared by every rollsync layer.
//!
//! These are the small values that travel inside JSON-RPC envelopes: the
//! request ids the client picks, the subscription ids the remote side picks,
//! the keys of the entities being watched, and the per-request account
//! options.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ProtocolError;

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// A client-chosen JSON-RPC request id.
///
/// Newtype over `u64` so a request id can never be confused with a
/// [`RemoteSubscriptionId`], which is also an integer on the wire.
/// `#[serde(transparent)]` keeps it a bare number in JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

/// The id the remote endpoint assigns to a subscription.
///
/// Returned as the `result` of `accountSubscribe` and echoed in every
/// `accountNotification` for that subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteSubscriptionId(pub u64);

impl RemoteSubscriptionId {
    /// Reads the id out of an `accountSubscribe` result.
    ///
    /// # Errors
    /// [`ProtocolError::InvalidMessage`] when the result is not a
    /// non-negative integer.
    pub fn from_result(result: &Value) -> Result<Self, ProtocolError> {
        result.as_u64().map(Self).ok_or_else(|| {
            ProtocolError::InvalidMessage(format!(
                "subscribe result is not a subscription id: {result}"
            ))
        })
    }
}

impl fmt::Display for RemoteSubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Opaque identifier of a remote state object (an account address).
///
/// Comparable and hashable so it can key the subscription registry. The
/// client never interprets its contents.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityKey(String);

impl EntityKey {
    /// Wraps an address string.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// The address as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for EntityKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

// ---------------------------------------------------------------------------
// Account options
// ---------------------------------------------------------------------------

/// How far along the remote's confirmation pipeline a state must be before
/// it is reported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Commitment {
    /// Latest state seen by the node. Lowest latency.
    #[default]
    Processed,
    /// Voted on by a supermajority.
    Confirmed,
    /// Rooted.
    Finalized,
}

impl FromStr for Commitment {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processed" => Ok(Self::Processed),
            "confirmed" => Ok(Self::Confirmed),
            "finalized" => Ok(Self::Finalized),
            other => Err(ProtocolError::InvalidMessage(format!(
                "unknown commitment level: {other}"
            ))),
        }
    }
}

/// Encoding requested for account data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Encoding {
    #[serde(rename = "base58")]
    Base58,
    #[default]
    #[serde(rename = "base64")]
    Base64,
    #[serde(rename = "base64+zstd")]
    Base64Zstd,
    #[serde(rename = "jsonParsed")]
    JsonParsed,
}

impl FromStr for Encoding {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "base58" => Ok(Self::Base58),
            "base64" => Ok(Self::Base64),
            "base64+zstd" => Ok(Self::Base64Zstd),
            "jsonParsed" => Ok(Self::JsonParsed),
            other => Err(ProtocolError::InvalidMessage(format!(
                "unknown account encoding: {other}"
            ))),
        }
    }
}

/// The `{encoding, commitment}` object passed with subscribe and fetch calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountConfig {
    pub encoding: Encoding,
    pub commitment: Commitment,
}
