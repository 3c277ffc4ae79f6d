//! Error types for the reconnection layer.

use crate::TransportState;

/// Errors returned by [`ReconnectController`](crate::ReconnectController).
///
/// Neither variant changes controller state: a rejected event leaves the
/// machine exactly where it was.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReconnectError {
    /// The event is not valid in the current state, e.g. reporting a
    /// successful connect while no connect attempt is in flight.
    #[error("cannot {event} while {from}")]
    InvalidTransition {
        /// State the controller was in.
        from: TransportState,
        /// Event that was rejected.
        event: &'static str,
    },

    /// The attempt ceiling was exceeded. Only an explicit
    /// [`restart`](crate::ReconnectController::restart) leaves this state.
    #[error("gave up after {attempts} reconnect attempts")]
    GaveUp {
        /// Number of retries that were made before giving up.
        attempts: u32,
    },
}
