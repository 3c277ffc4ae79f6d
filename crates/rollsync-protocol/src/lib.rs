//! Wire protocol for rollsync.
//!
//! This crate defines what travels between the client and the rollup
//! endpoint:
//!
//! - **Types** ([`RequestId`], [`RemoteSubscriptionId`], [`EntityKey`],
//!   [`AccountConfig`]): identities and per-call options.
//! - **RPC** ([`RpcRequest`], [`Inbound`], [`classify`]): JSON-RPC 2.0
//!   envelopes and the one place inbound frames are parsed.
//! - **Entities** ([`EntityState`]): typed account payloads shared by the
//!   streaming and unary paths.
//! - **Codec** ([`Codec`], [`JsonCodec`]): bytes in, bytes out.
//!
//! # Architecture
//!
//! ```text
//! Transport (bytes) → Protocol (Inbound / EntityState) → Client (registry, multiplexer)
//! ```
//!
//! The protocol layer knows nothing about connections or reconnects.

mod codec;
mod entity;
mod error;
mod rpc;
mod types;

pub use codec::{Codec, JsonCodec};
pub use entity::{AccountData, AccountInfo, EntityState, RpcContext, RpcEnvelope};
pub use error::ProtocolError;
pub use rpc::{
    Inbound, RpcErrorObject, RpcNotification, RpcRequest, RpcResponse, classify,
    decode_response, methods,
};
pub use types::{
    AccountConfig, Commitment, Encoding, EntityKey, RemoteSubscriptionId, RequestId,
};
