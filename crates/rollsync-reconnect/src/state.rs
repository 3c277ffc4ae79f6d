//! Reconnection configuration and the transport lifecycle states.

use std::fmt;
use std::time::Duration;

// ---------------------------------------------------------------------------
// ReconnectConfig
// ---------------------------------------------------------------------------

/// Backoff and retry limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Delay before the first retry. Each further retry doubles it.
    ///
    /// Default: 1 second.
    pub base_delay: Duration,

    /// Upper bound on any single backoff delay.
    ///
    /// Default: 30 seconds.
    pub max_delay: Duration,

    /// Retries allowed after a failure before the controller gives up.
    ///
    /// Default: 10.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts: 10,
        }
    }
}

impl ReconnectConfig {
    /// Fixes out-of-range values: `max_delay` is raised to at least
    /// `base_delay`.
    pub fn validated(mut self) -> Self {
        if self.max_delay < self.base_delay {
            tracing::warn!(
                base_ms = self.base_delay.as_millis() as u64,
                max_ms = self.max_delay.as_millis() as u64,
                "max reconnect delay below base delay, raising it"
            );
            self.max_delay = self.base_delay;
        }
        self
    }

    /// Backoff before retry number `attempt` (1-based):
    /// `base_delay * 2^(attempt - 1)`, capped at `max_delay`.
    ///
    /// Non-decreasing in `attempt`; attempt 0 is treated as 1.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }
}

// ---------------------------------------------------------------------------
// TransportState
// ---------------------------------------------------------------------------

/// Lifecycle of the streaming transport.
///
/// ```text
///   Disconnected ──→ Connecting ──→ Connected
///                        ↑  │           │
///                        │  └─(fail)─┐  │ (unexpected close)
///                        │           ▼  ▼
///                        └──(timer)── Reconnecting { attempt }
///                                        │ (attempt > ceiling)
///                                        ▼
///                                     GaveUp ──(restart)──→ Connecting
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    /// No link and none wanted (initial state, or closed by the client).
    Disconnected,
    /// A connect attempt is in flight.
    Connecting,
    /// The link is up.
    Connected,
    /// Waiting out the backoff before retry number `attempt`.
    Reconnecting { attempt: u32 },
    /// Retry ceiling exceeded. Terminal until an explicit restart.
    GaveUp { attempts: u32 },
}

impl TransportState {
    /// Returns `true` only while the link is up.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Reconnecting { attempt } => write!(f, "Reconnecting({attempt})"),
            Self::GaveUp { attempts } => write!(f, "GaveUp({attempts})"),
        }
    }
}
