//! Latency-driven choice of the outbound send interval.

use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::LatencyWindow;

// ---------------------------------------------------------------------------
// Tiers
// ---------------------------------------------------------------------------

/// One of the four send rates. The interval is always exactly one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PacingTier {
    /// Mean latency at most 100 ms: send every 50 ms.
    #[default]
    Fast,
    /// Mean latency above 150 ms: send every 75 ms.
    Normal,
    /// Mean latency above 300 ms: send every 100 ms.
    Slow,
    /// Mean latency above 500 ms: send every 150 ms.
    VerySlow,
}

impl PacingTier {
    /// Send interval for this tier.
    pub fn interval(self) -> Duration {
        match self {
            Self::Fast => Duration::from_millis(50),
            Self::Normal => Duration::from_millis(75),
            Self::Slow => Duration::from_millis(100),
            Self::VerySlow => Duration::from_millis(150),
        }
    }

    /// Tier for a mean latency in milliseconds.
    ///
    /// Means in `(100, 150]` fall between the `Fast` and `Normal` bands and
    /// keep `previous`.
    pub fn for_mean(mean_ms: f64, previous: Self) -> Self {
        if mean_ms > 500.0 {
            Self::VerySlow
        } else if mean_ms > 300.0 {
            Self::Slow
        } else if mean_ms > 150.0 {
            Self::Normal
        } else if mean_ms <= 100.0 {
            Self::Fast
        } else {
            previous
        }
    }
}

impl fmt::Display for PacingTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Fast => "fast",
            Self::Normal => "normal",
            Self::Slow => "slow",
            Self::VerySlow => "very-slow",
        };
        write!(f, "{name}")
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacingConfig {
    /// Number of recent samples averaged. Default: 10.
    pub window_size: usize,
    /// Tier before any sample arrives. Default: [`PacingTier::Fast`].
    pub initial_tier: PacingTier,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            window_size: 10,
            initial_tier: PacingTier::Fast,
        }
    }
}

impl PacingConfig {
    /// Raises a zero `window_size` to 1.
    pub fn validated(mut self) -> Self {
        if self.window_size == 0 {
            tracing::warn!("latency window size of 0, using 1");
            self.window_size = 1;
        }
        self
    }
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

/// Snapshot of the controller state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PacingState {
    pub tier: PacingTier,
    /// When the tier last changed; `None` until the first change.
    pub last_adjusted_at: Option<Instant>,
    /// Current window mean, `None` before the first sample.
    pub mean_ms: Option<f64>,
    pub samples: usize,
}

#[derive(Debug)]
struct Inner {
    window: LatencyWindow,
    tier: PacingTier,
    last_adjusted_at: Option<Instant>,
}

/// Picks the send interval from a moving mean of observed latency.
///
/// Shared between the task that measures latency and the sender that reads
/// the interval, so every method takes `&self`. The lock is held only for
/// the arithmetic.
#[derive(Debug)]
pub struct PacingController {
    inner: Mutex<Inner>,
}

impl Default for PacingController {
    fn default() -> Self {
        Self::new(PacingConfig::default())
    }
}

impl PacingController {
    pub fn new(config: PacingConfig) -> Self {
        let config = config.validated();
        Self {
            inner: Mutex::new(Inner {
                window: LatencyWindow::new(config.window_size),
                tier: config.initial_tier,
                last_adjusted_at: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records one round-trip measurement and re-evaluates the tier.
    ///
    /// Returns the tier in effect afterwards. A change applies to the next
    /// scheduled send, not one already waiting.
    pub fn record_latency_sample(&self, latency: Duration) -> PacingTier {
        let mut inner = self.lock();
        inner.window.push(latency);
        let Some(mean_ms) = inner.window.mean_ms() else {
            return inner.tier;
        };

        let next = PacingTier::for_mean(mean_ms, inner.tier);
        if next != inner.tier {
            debug!(
                from = %inner.tier,
                to = %next,
                mean_ms = format!("{mean_ms:.1}"),
                interval_ms = next.interval().as_millis() as u64,
                "pacing tier changed"
            );
            inner.tier = next;
            inner.last_adjusted_at = Some(Instant::now());
        }
        next
    }

    /// Interval between sends for the current tier.
    pub fn current_interval(&self) -> Duration {
        self.lock().tier.interval()
    }

    pub fn tier(&self) -> PacingTier {
        self.lock().tier
    }

    pub fn mean_ms(&self) -> Option<f64> {
        self.lock().window.mean_ms()
    }

    pub fn last_adjusted_at(&self) -> Option<Instant> {
        self.lock().last_adjusted_at
    }

    pub fn state(&self) -> PacingState {
        let inner = self.lock();
        PacingState {
            tier: inner.tier,
            last_adjusted_at: inner.last_adjusted_at,
            mean_ms: inner.window.mean_ms(),
            samples: inner.window.len(),
        }
    }
}
