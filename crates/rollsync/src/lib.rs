//! # Rollsync
//!
//! Real-time account sync for low-latency rollup endpoints.
//!
//! A [`Client`] keeps one streaming JSON-RPC link open, multiplexes
//! requests over it, and delivers account updates for every watched key to
//! a caller-supplied callback. When the link drops, each key is served by
//! periodic unary fetches until the supervisor reconnects, then quietly
//! moves back to streaming. Callers never see the switch.
//!
//! The outbound side lives in [`rollsync_pacing`] and is re-exported here:
//! an adaptive send interval driven by measured latency, and a recycler
//! that replaces the outbound connection pool on a fixed period.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rollsync::prelude::*;
//!
//! # async fn run() -> Result<(), ClientError> {
//! let client = Client::builder()
//!     .config(ClientConfig::from_env()?)
//!     .start()
//!     .await?;
//!
//! client
//!     .watch("Vote111111111111111111111111111111111111111", |state| {
//!         println!("slot {} lamports {}", state.slot, state.account.lamports);
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

mod client;
mod config;
mod error;
mod link;
mod multiplexer;
mod pipeline;
mod poller;
mod probe;
mod registry;

pub use client::{Client, ClientBuilder, ClientEvent};
pub use config::ClientConfig;
pub use error::ClientError;
pub use pipeline::{HttpPipeline, HttpPipelineFactory, PipelineContext};
pub use poller::{EntityFetcher, HttpEntityFetcher};
pub use probe::{HttpSlotProbe, LatencyProbe, LatencySource};
pub use registry::{Callback, DeliveryMode, SubscriptionHandle, SubscriptionInfo};

/// Everything needed to build a client and a paced sender.
pub mod prelude {
    pub use crate::{
        Client, ClientBuilder, ClientConfig, ClientError, ClientEvent, DeliveryMode,
        EntityFetcher, HttpPipeline, HttpPipelineFactory, LatencyProbe, PipelineContext,
        SubscriptionHandle, SubscriptionInfo,
    };
    pub use rollsync_pacing::{
        ConnectionRecycler, PacingConfig, PacingController, PacingTier, PipelineFactory,
        SendConfig, SendScheduler,
    };
    pub use rollsync_protocol::{
        AccountConfig, AccountData, AccountInfo, Commitment, Encoding, EntityKey, EntityState,
    };
    pub use rollsync_reconnect::{ReconnectConfig, TransportState};
}
