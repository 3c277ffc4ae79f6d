//! Periodic replacement of the outbound transport.
//!
//! Long-lived outbound connections degrade silently (stale pools, half-open
//! sockets, server-side throttling keyed to a connection). The recycler
//! swaps in a freshly built pipeline on a fixed period without interrupting
//! requests already in flight.
//!
//! # Swap protocol
//!
//! 1. Build the new pipeline with no lock held.
//! 2. Take the write lock, replace the `Arc`, release.
//!
//! Callers hold their own `Arc` from [`ConnectionRecycler::current`], so a
//! request that started on the old pipeline finishes on it and the old
//! pipeline is dropped when the last such request completes.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::PacingError;

/// Builds outbound pipelines.
///
/// Implementations bind whatever context a pipeline needs (endpoint,
/// identity, headers) at build time.
pub trait PipelineFactory: Send + Sync + 'static {
    type Pipeline: Send + Sync + 'static;
    type Error: std::error::Error + Send + Sync + 'static;

    fn build(&self) -> impl Future<Output = Result<Self::Pipeline, Self::Error>> + Send;
}

#[derive(Debug)]
struct Installed<P> {
    pipeline: Arc<P>,
    installed_at: Instant,
}

/// Holds the current outbound pipeline and replaces it every `period`.
pub struct ConnectionRecycler<F: PipelineFactory> {
    factory: F,
    period: Duration,
    current: RwLock<Installed<F::Pipeline>>,
    /// Serializes refreshes so two builds never race to be installed.
    refreshing: Mutex<()>,
    generation: AtomicU64,
    sends: AtomicU64,
}

impl<F: PipelineFactory> ConnectionRecycler<F> {
    /// Builds the first pipeline and starts the recycle clock.
    ///
    /// # Errors
    /// [`PacingError::PipelineBuild`] if the factory fails.
    pub async fn new(factory: F, period: Duration) -> Result<Self, PacingError> {
        let pipeline = factory
            .build()
            .await
            .map_err(|e| PacingError::PipelineBuild(Box::new(e)))?;
        debug!(period_ms = period.as_millis() as u64, "connection recycler started");
        Ok(Self {
            factory,
            period,
            current: RwLock::new(Installed {
                pipeline: Arc::new(pipeline),
                installed_at: Instant::now(),
            }),
            refreshing: Mutex::new(()),
            generation: AtomicU64::new(0),
            sends: AtomicU64::new(0),
        })
    }

    /// The pipeline new requests should use.
    pub fn current(&self) -> Arc<F::Pipeline> {
        let installed = self.current.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&installed.pipeline)
    }

    /// Whether the current pipeline has been in service for a full period.
    pub fn should_refresh(&self, now: Instant) -> bool {
        let installed = self.current.read().unwrap_or_else(PoisonError::into_inner);
        now.saturating_duration_since(installed.installed_at) >= self.period
    }

    /// Builds a new pipeline and swaps it in.
    ///
    /// On failure the old pipeline stays in service and the error is
    /// returned; the next period check will try again.
    pub async fn refresh(&self) -> Result<Arc<F::Pipeline>, PacingError> {
        let _guard = self.refreshing.lock().await;
        self.rebuild().await
    }

    /// Refreshes if the period has elapsed. Returns whether a swap happened.
    ///
    /// The period is checked again once the refresh lock is held, so callers
    /// racing on the same expired period produce a single swap.
    pub async fn refresh_if_due(&self) -> Result<bool, PacingError> {
        if !self.should_refresh(Instant::now()) {
            return Ok(false);
        }
        let _guard = self.refreshing.lock().await;
        if !self.should_refresh(Instant::now()) {
            return Ok(false);
        }
        self.rebuild().await.map(|_| true)
    }

    /// Builds and installs a new pipeline. Callers hold `refreshing`.
    async fn rebuild(&self) -> Result<Arc<F::Pipeline>, PacingError> {
        let pipeline = match self.factory.build().await {
            Ok(p) => Arc::new(p),
            Err(e) => {
                warn!(error = %e, "pipeline rebuild failed, keeping current pipeline");
                return Err(PacingError::PipelineBuild(Box::new(e)));
            }
        };

        {
            let mut installed = self.current.write().unwrap_or_else(PoisonError::into_inner);
            installed.pipeline = Arc::clone(&pipeline);
            installed.installed_at = Instant::now();
        }

        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let sends = self.sends.swap(0, Ordering::AcqRel);
        info!(generation, sends_on_previous = sends, "outbound pipeline recycled");
        Ok(pipeline)
    }

    /// Counts one send on the current pipeline.
    pub fn note_send(&self) -> u64 {
        self.sends.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Sends counted since the last swap.
    pub fn sends_since_refresh(&self) -> u64 {
        self.sends.load(Ordering::Acquire)
    }

    /// Number of completed swaps.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }
}
