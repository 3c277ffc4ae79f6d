//! The reconnection controller: the single authority on transport state.
//!
//! The controller is a plain state machine. It performs no I/O and owns no
//! timers; the task that drives it reports what happened (`begin_connect`,
//! `on_connected`, `on_failure`) and is told what to do next (retry after a
//! delay, or give up). That keeps every transition unit-testable with a
//! [`ManualClock`](crate::ManualClock).
//!
//! # Concurrency note
//!
//! `ReconnectController` takes `&mut self` for every transition and is not
//! shared directly. The client's supervisor task owns it behind a mutex, so
//! no two transitions can ever run at once.

use std::time::{Duration, Instant};

use crate::{Clock, ReconnectConfig, ReconnectError, SystemClock, TransportState};

/// What the driver should do after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Wait `delay`, then call
    /// [`begin_connect`](ReconnectController::begin_connect) again.
    Retry { attempt: u32, delay: Duration },
    /// The ceiling was exceeded. Returned exactly once per give-up.
    GaveUp { attempts: u32 },
}

/// Lifetime counters, for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconnectStats {
    /// Successful connects.
    pub connects: u64,
    /// Failed connects plus unexpected closes.
    pub failures: u64,
}

/// Governs the transport lifecycle with exponential backoff.
///
/// ## Lifecycle
///
/// ```text
/// begin_connect() ──→ on_connected() ──→ on_failure() ──→ begin_connect() ...
///   [Connecting]        [Connected]     [Reconnecting n]     [Connecting]
///                                              │
///                                              ▼ n > max_attempts
///                                          [GaveUp] ──→ restart()
/// ```
#[derive(Debug)]
pub struct ReconnectController<C: Clock = SystemClock> {
    config: ReconnectConfig,
    clock: C,
    state: TransportState,
    /// Consecutive failures since the last successful connect.
    attempts: u32,
    next_retry_at: Option<Instant>,
    stats: ReconnectStats,
}

impl ReconnectController<SystemClock> {
    /// Creates a controller on the real clock.
    pub fn new(config: ReconnectConfig) -> Self {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock> ReconnectController<C> {
    /// Creates a controller that reads time from `clock`.
    pub fn with_clock(config: ReconnectConfig, clock: C) -> Self {
        Self {
            config: config.validated(),
            clock,
            state: TransportState::Disconnected,
            attempts: 0,
            next_retry_at: None,
            stats: ReconnectStats::default(),
        }
    }

    /// A connect attempt is starting.
    ///
    /// Valid from `Disconnected` and `Reconnecting`.
    ///
    /// # Errors
    /// - [`ReconnectError::GaveUp`] after giving up; use [`restart`](Self::restart).
    /// - [`ReconnectError::InvalidTransition`] while connecting or connected.
    pub fn begin_connect(&mut self) -> Result<(), ReconnectError> {
        match self.state {
            TransportState::Disconnected | TransportState::Reconnecting { .. } => {
                self.state = TransportState::Connecting;
                self.next_retry_at = None;
                tracing::debug!(attempt = self.attempts, "connect attempt started");
                Ok(())
            }
            TransportState::GaveUp { attempts } => Err(ReconnectError::GaveUp { attempts }),
            from => Err(ReconnectError::InvalidTransition {
                from,
                event: "begin connect",
            }),
        }
    }

    /// The in-flight connect attempt succeeded. Resets the attempt counter.
    ///
    /// # Errors
    /// [`ReconnectError::InvalidTransition`] unless `Connecting`.
    pub fn on_connected(&mut self) -> Result<(), ReconnectError> {
        if self.state != TransportState::Connecting {
            return Err(ReconnectError::InvalidTransition {
                from: self.state,
                event: "report connected",
            });
        }
        if self.attempts > 0 {
            tracing::info!(after_attempts = self.attempts, "transport reconnected");
        }
        self.state = TransportState::Connected;
        self.attempts = 0;
        self.next_retry_at = None;
        self.stats.connects += 1;
        Ok(())
    }

    /// A connect attempt failed, or an established link closed unexpectedly.
    ///
    /// Returns the backoff for the next retry, or [`Transition::GaveUp`]
    /// once the attempt count exceeds `max_attempts`.
    ///
    /// # Errors
    /// [`ReconnectError::InvalidTransition`] unless `Connecting` or
    /// `Connected`.
    pub fn on_failure(&mut self) -> Result<Transition, ReconnectError> {
        if !matches!(
            self.state,
            TransportState::Connecting | TransportState::Connected
        ) {
            return Err(ReconnectError::InvalidTransition {
                from: self.state,
                event: "report failure",
            });
        }

        self.stats.failures += 1;
        let attempt = self.attempts + 1;

        if attempt > self.config.max_attempts {
            let attempts = self.attempts;
            self.state = TransportState::GaveUp { attempts };
            self.next_retry_at = None;
            tracing::warn!(attempts, "reconnect ceiling reached, giving up");
            return Ok(Transition::GaveUp { attempts });
        }

        self.attempts = attempt;
        let delay = self.config.backoff_delay(attempt);
        self.state = TransportState::Reconnecting { attempt };
        self.next_retry_at = Some(self.clock.now() + delay);
        tracing::info!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            "transport down, retry scheduled"
        );
        Ok(Transition::Retry { attempt, delay })
    }

    /// Explicit application request for a fresh connection attempt.
    ///
    /// Valid from `GaveUp`, `Disconnected`, `Reconnecting` (skipping the
    /// rest of the backoff) and `Connecting` (the driver abandons the dial in
    /// flight). Resets the attempt counter and enters `Connecting`.
    ///
    /// # Errors
    /// [`ReconnectError::InvalidTransition`] while connected.
    pub fn restart(&mut self) -> Result<(), ReconnectError> {
        match self.state {
            TransportState::GaveUp { .. }
            | TransportState::Disconnected
            | TransportState::Connecting
            | TransportState::Reconnecting { .. } => {
                self.attempts = 0;
                self.state = TransportState::Disconnected;
                self.begin_connect()
            }
            from => Err(ReconnectError::InvalidTransition {
                from,
                event: "restart",
            }),
        }
    }

    /// The client is shutting the transport down on purpose. Valid from any
    /// state; no retry follows.
    pub fn on_closed_by_client(&mut self) {
        self.state = TransportState::Disconnected;
        self.attempts = 0;
        self.next_retry_at = None;
    }

    /// Current state.
    pub fn state(&self) -> TransportState {
        self.state
    }

    /// Consecutive failures since the last successful connect.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// When the pending retry is due, if one is scheduled.
    pub fn next_retry_at(&self) -> Option<Instant> {
        self.next_retry_at
    }

    /// Whether the pending retry's backoff has elapsed.
    pub fn is_retry_due(&self) -> bool {
        self.next_retry_at
            .is_some_and(|at| self.clock.now() >= at)
    }

    /// Lifetime counters.
    pub fn stats(&self) -> ReconnectStats {
        self.stats
    }

    /// The (validated) configuration in use.
    pub fn config(&self) -> &ReconnectConfig {
        &self.config
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    //! Unit tests for `ReconnectController`.
    //!
    //! Naming: `test_{function}_{scenario}_{expected}`. Time only moves via
    //! `ManualClock::advance`, so nothing here sleeps.

    use super::*;
    use crate::ManualClock;

    // -- Helpers ----------------------------------------------------------

    fn controller(max_attempts: u32) -> (ReconnectController<ManualClock>, ManualClock) {
        let clock = ManualClock::new();
        let config = ReconnectConfig {
            max_attempts,
            ..ReconnectConfig::default()
        };
        (ReconnectController::with_clock(config, clock.clone()), clock)
    }

    /// Drives the controller into `Connected`.
    fn connected(max_attempts: u32) -> (ReconnectController<ManualClock>, ManualClock) {
        let (mut ctl, clock) = controller(max_attempts);
        ctl.begin_connect().unwrap();
        ctl.on_connected().unwrap();
        (ctl, clock)
    }

    // =====================================================================
    // Happy path
    // =====================================================================

    #[test]
    fn test_new_controller_starts_disconnected() {
        let (ctl, _) = controller(10);
        assert_eq!(ctl.state(), TransportState::Disconnected);
        assert_eq!(ctl.attempts(), 0);
        assert!(ctl.next_retry_at().is_none());
    }

    #[test]
    fn test_begin_connect_then_on_connected_reaches_connected() {
        let (ctl, _) = connected(10);
        assert_eq!(ctl.state(), TransportState::Connected);
        assert!(ctl.state().is_connected());
        assert_eq!(ctl.stats().connects, 1);
    }

    // =====================================================================
    // Failures and backoff
    // =====================================================================

    #[test]
    fn test_on_failure_backoff_is_1s_2s_4s() {
        let (mut ctl, _) = controller(10);
        let mut delays = Vec::new();
        for _ in 0..3 {
            ctl.begin_connect().unwrap();
            match ctl.on_failure().unwrap() {
                Transition::Retry { delay, .. } => delays.push(delay),
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(
            delays,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4)
            ]
        );
        assert_eq!(ctl.state(), TransportState::Reconnecting { attempt: 3 });
    }

    #[test]
    fn test_on_failure_from_connected_schedules_first_retry() {
        let (mut ctl, _) = connected(10);

        let transition = ctl.on_failure().unwrap();

        assert_eq!(
            transition,
            Transition::Retry {
                attempt: 1,
                delay: Duration::from_secs(1)
            }
        );
        assert_eq!(ctl.stats().failures, 1);
    }

    #[test]
    fn test_is_retry_due_follows_the_clock() {
        let (mut ctl, clock) = controller(10);
        ctl.begin_connect().unwrap();
        ctl.on_failure().unwrap();

        assert!(!ctl.is_retry_due());
        clock.advance(Duration::from_millis(999));
        assert!(!ctl.is_retry_due());
        clock.advance(Duration::from_millis(1));
        assert!(ctl.is_retry_due());
    }

    #[test]
    fn test_on_connected_resets_attempt_counter() {
        let (mut ctl, _) = controller(10);
        for _ in 0..4 {
            ctl.begin_connect().unwrap();
            ctl.on_failure().unwrap();
        }
        assert_eq!(ctl.attempts(), 4);

        ctl.begin_connect().unwrap();
        ctl.on_connected().unwrap();
        assert_eq!(ctl.attempts(), 0);

        // The next outage starts again from the base delay.
        let transition = ctl.on_failure().unwrap();
        assert_eq!(
            transition,
            Transition::Retry {
                attempt: 1,
                delay: Duration::from_secs(1)
            }
        );
    }

    // =====================================================================
    // Giving up
    // =====================================================================

    #[test]
    fn test_on_failure_past_ceiling_gives_up_once() {
        let (mut ctl, _) = controller(3);
        for _ in 0..3 {
            ctl.begin_connect().unwrap();
            assert!(matches!(ctl.on_failure().unwrap(), Transition::Retry { .. }));
        }

        ctl.begin_connect().unwrap();
        assert_eq!(ctl.on_failure().unwrap(), Transition::GaveUp { attempts: 3 });
        assert_eq!(ctl.state(), TransportState::GaveUp { attempts: 3 });

        // A second failure report is rejected; the give-up is not repeated.
        assert!(matches!(
            ctl.on_failure(),
            Err(ReconnectError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_begin_connect_after_give_up_is_refused() {
        let (mut ctl, _) = controller(0);
        ctl.begin_connect().unwrap();
        ctl.on_failure().unwrap();

        assert_eq!(
            ctl.begin_connect(),
            Err(ReconnectError::GaveUp { attempts: 0 })
        );
    }

    #[test]
    fn test_restart_after_give_up_resets_to_connecting() {
        let (mut ctl, _) = controller(1);
        ctl.begin_connect().unwrap();
        ctl.on_failure().unwrap();
        ctl.begin_connect().unwrap();
        ctl.on_failure().unwrap();
        assert!(matches!(ctl.state(), TransportState::GaveUp { .. }));

        ctl.restart().unwrap();

        assert_eq!(ctl.state(), TransportState::Connecting);
        assert_eq!(ctl.attempts(), 0);
    }

    #[test]
    fn test_restart_while_connecting_resets_attempt_counter() {
        let (mut ctl, _) = controller(3);
        for _ in 0..2 {
            ctl.begin_connect().unwrap();
            ctl.on_failure().unwrap();
        }
        ctl.begin_connect().unwrap();
        assert_eq!(ctl.attempts(), 2);

        ctl.restart().unwrap();

        assert_eq!(ctl.state(), TransportState::Connecting);
        assert_eq!(ctl.attempts(), 0);
        assert_eq!(
            ctl.on_failure().unwrap(),
            Transition::Retry {
                attempt: 1,
                delay: Duration::from_secs(1)
            }
        );
    }

    #[test]
    fn test_restart_while_connected_is_invalid() {
        let (mut ctl, _) = connected(10);
        assert!(matches!(
            ctl.restart(),
            Err(ReconnectError::InvalidTransition { .. })
        ));
        assert_eq!(ctl.state(), TransportState::Connected);
    }

    // =====================================================================
    // Invalid transitions leave state untouched
    // =====================================================================

    #[test]
    fn test_on_connected_without_attempt_is_invalid() {
        let (mut ctl, _) = controller(10);
        let err = ctl.on_connected().unwrap_err();
        assert_eq!(
            err,
            ReconnectError::InvalidTransition {
                from: TransportState::Disconnected,
                event: "report connected"
            }
        );
        assert_eq!(ctl.state(), TransportState::Disconnected);
    }

    #[test]
    fn test_begin_connect_twice_is_invalid() {
        let (mut ctl, _) = controller(10);
        ctl.begin_connect().unwrap();
        assert!(ctl.begin_connect().is_err());
        assert_eq!(ctl.state(), TransportState::Connecting);
    }

    #[test]
    fn test_on_closed_by_client_from_any_state() {
        let (mut ctl, _) = controller(10);
        ctl.begin_connect().unwrap();
        ctl.on_failure().unwrap();

        ctl.on_closed_by_client();

        assert_eq!(ctl.state(), TransportState::Disconnected);
        assert!(ctl.next_retry_at().is_none());
    }
}
