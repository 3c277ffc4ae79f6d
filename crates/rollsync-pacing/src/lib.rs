//! Outbound rate control for rollsync.
//!
//! Two independent concerns live here:
//!
//! - **Pacing**: [`PacingController`] keeps a moving mean of round-trip
//!   latency and maps it onto one of four send intervals (50, 75, 100 or
//!   150 ms). [`SendScheduler`] turns that interval into send slots for a
//!   high-frequency sender.
//! - **Recycling**: [`ConnectionRecycler`] replaces the outbound pipeline
//!   on a fixed period, building the replacement before swapping it in so
//!   in-flight requests are never interrupted.
//!
//! # Integration
//!
//! ```ignore
//! let pacing = Arc::new(PacingController::default());
//! let recycler = ConnectionRecycler::new(factory, Duration::from_secs(60)).await?;
//! let mut scheduler = SendScheduler::new(Arc::clone(&pacing), SendConfig::default());
//!
//! loop {
//!     scheduler.wait_for_send().await;
//!     recycler.refresh_if_due().await.ok();
//!     recycler.current().send(update).await?;
//!     recycler.note_send();
//! }
//! ```

mod controller;
mod error;
mod recycler;
mod scheduler;
mod window;

pub use controller::{PacingConfig, PacingController, PacingState, PacingTier};
pub use error::PacingError;
pub use recycler::{ConnectionRecycler, PipelineFactory};
pub use scheduler::{SendConfig, SendMetrics, SendScheduler, SendSlot};
pub use window::LatencyWindow;
