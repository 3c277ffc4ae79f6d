//! Paced send loop driven by the [`PacingController`].
//!
//! The scheduler is meant to sit inside a sender's `tokio::select!` loop:
//!
//! ```ignore
//! loop {
//!     tokio::select! {
//!         _ = shutdown.changed() => break,
//!         slot = scheduler.wait_for_send() => {
//!             let pipeline = recycler.current();
//!             pipeline.send(next_update()).await?;
//!         }
//!     }
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::time::{self, Instant};
use tracing::{debug, trace, warn};

use crate::PacingController;

/// Scheduler settings. The send interval itself comes from the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendConfig {
    /// Random delay (0..max) before the first send, so senders started
    /// together do not fire in lockstep. Default: 2 ms.
    pub initial_jitter: Duration,
}

impl Default for SendConfig {
    fn default() -> Self {
        Self {
            initial_jitter: Duration::from_millis(2),
        }
    }
}

/// Returned by [`SendScheduler::wait_for_send`] for each slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendSlot {
    /// Monotonically increasing slot number (starts at 1).
    pub seq: u64,
    /// Interval that scheduled this slot.
    pub interval: Duration,
    /// `true` if the slot fired more than 10% of its interval late.
    pub late: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendMetrics {
    pub total_sends: u64,
    pub total_late: u64,
}

/// Yields send slots spaced by the current pacing interval.
///
/// The interval is read when a slot is scheduled, so a tier change shortens
/// or lengthens the *next* wait, never one already in progress. A late slot
/// schedules the following one from now rather than bursting to catch up.
pub struct SendScheduler {
    pacing: Arc<PacingController>,
    next_send: Instant,
    /// Interval used to schedule `next_send`.
    scheduled_interval: Duration,
    send_count: u64,
    paused: bool,
    metrics: SendMetrics,
}

impl SendScheduler {
    pub fn new(pacing: Arc<PacingController>, config: SendConfig) -> Self {
        let jitter = if config.initial_jitter.is_zero() {
            Duration::ZERO
        } else {
            let max_us = u64::try_from(config.initial_jitter.as_micros()).unwrap_or(u64::MAX);
            Duration::from_micros(rand::rng().random_range(0..max_us))
        };
        let interval = pacing.current_interval();

        debug!(
            interval_ms = interval.as_millis() as u64,
            jitter_us = jitter.as_micros() as u64,
            "send scheduler created"
        );

        Self {
            pacing,
            next_send: Instant::now() + jitter,
            scheduled_interval: interval,
            send_count: 0,
            paused: false,
            metrics: SendMetrics::default(),
        }
    }

    /// Waits until the next send slot is due.
    ///
    /// While paused this future pends forever; other `select!` branches
    /// keep running.
    pub async fn wait_for_send(&mut self) -> SendSlot {
        if self.paused {
            std::future::pending::<()>().await;
        }

        let due = self.next_send;
        let interval = self.scheduled_interval;
        time::sleep_until(due).await;

        let now = Instant::now();
        self.send_count += 1;

        let late_by = now.saturating_duration_since(due);
        let late = late_by > interval / 10;
        if late {
            self.metrics.total_late += 1;
            warn!(
                seq = self.send_count,
                late_ms = late_by.as_secs_f64() * 1000.0,
                "send slot fired late, rescheduling from now"
            );
        }

        let next_interval = self.pacing.current_interval();
        let base = if late { now } else { due };
        self.next_send = base + next_interval;
        self.scheduled_interval = next_interval;
        self.metrics.total_sends += 1;

        trace!(seq = self.send_count, late, "send slot");

        SendSlot {
            seq: self.send_count,
            interval,
            late,
        }
    }

    /// Stops yielding slots until [`resume`](Self::resume). Idempotent.
    pub fn pause(&mut self) {
        if !self.paused {
            self.paused = true;
            debug!(seq = self.send_count, "send scheduler paused");
        }
    }

    /// Resumes after a pause. The next slot is one current interval from
    /// now, so time spent paused does not cause a burst.
    pub fn resume(&mut self) {
        if self.paused {
            self.paused = false;
            let interval = self.pacing.current_interval();
            self.next_send = Instant::now() + interval;
            self.scheduled_interval = interval;
            debug!(seq = self.send_count, "send scheduler resumed");
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn send_count(&self) -> u64 {
        self.send_count
    }

    pub fn metrics(&self) -> &SendMetrics {
        &self.metrics
    }

    /// Controller this scheduler reads its interval from.
    pub fn pacing(&self) -> &Arc<PacingController> {
        &self.pacing
    }
}
