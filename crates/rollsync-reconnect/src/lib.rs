//! Transport lifecycle management for rollsync.
//!
//! This crate decides *when* the client should (re)connect:
//!
//! 1. **State** ([`TransportState`]): disconnected, connecting, connected,
//!    reconnecting, gave up
//! 2. **Backoff** ([`ReconnectConfig::backoff_delay`]): exponential from a
//!    base delay, capped
//! 3. **Control** ([`ReconnectController`]): the single authority that
//!    turns connect outcomes into the next action
//! 4. **Time** ([`Clock`]): injected so transitions are testable without
//!    real timers
//!
//! # How it fits in the stack
//!
//! ```text
//! Client supervisor (above)  ← drives the controller, owns the actual link
//!     ↕
//! Reconnect layer (this crate)  ← pure state machine, no I/O
//! ```

mod clock;
mod controller;
mod error;
mod state;

pub use clock::{Clock, ManualClock, SystemClock};
pub use controller::{ReconnectController, ReconnectStats, Transition};
pub use error::ReconnectError;
pub use state::{ReconnectConfig, TransportState};
