//! Periodic round-trip measurement feeding the pacing controller.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use rollsync_pacing::PacingController;
use rollsync_protocol::{Codec, Commitment, JsonCodec, RpcRequest, decode_response};
use rollsync_transport::HttpTransport;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, trace};

use crate::ClientError;
use crate::multiplexer::next_request_id;

/// Something whose round trip can be timed.
pub trait LatencySource: Send + Sync + 'static {
    fn measure(&self) -> BoxFuture<'_, Result<Duration, ClientError>>;
}

/// Times a `getSlot` POST against the unary endpoint.
#[derive(Debug, Clone)]
pub struct HttpSlotProbe {
    http: HttpTransport,
    codec: JsonCodec,
    commitment: Commitment,
}

impl HttpSlotProbe {
    pub fn new(
        url: impl Into<String>,
        timeout: Duration,
        commitment: Commitment,
    ) -> Result<Self, ClientError> {
        Ok(Self {
            http: HttpTransport::with_timeout(url, timeout)?,
            codec: JsonCodec,
            commitment,
        })
    }
}

impl LatencySource for HttpSlotProbe {
    fn measure(&self) -> BoxFuture<'_, Result<Duration, ClientError>> {
        Box::pin(async move {
            let body = self
                .codec
                .encode(&RpcRequest::get_slot(next_request_id(), self.commitment))?;
            let started = Instant::now();
            let response = self.http.post(body).await?;
            let elapsed = started.elapsed();
            // An error object still proves the round trip, but it is not a
            // healthy sample.
            decode_response(&response)?.outcome?;
            Ok(elapsed)
        })
    }
}

/// Background task that samples a [`LatencySource`] on a fixed period and
/// records each success with the pacing controller.
///
/// Failed measurements are logged and skipped. Dropping the probe stops it.
pub struct LatencyProbe {
    task: JoinHandle<()>,
}

impl LatencyProbe {
    pub fn spawn(
        source: Arc<dyn LatencySource>,
        pacing: Arc<PacingController>,
        interval: Duration,
    ) -> Self {
        let interval = interval.max(Duration::from_millis(1));
        let task = tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match source.measure().await {
                    Ok(latency) => {
                        let tier = pacing.record_latency_sample(latency);
                        trace!(latency_ms = latency.as_millis() as u64, %tier, "latency sample");
                    }
                    Err(e) => debug!(error = %e, "latency probe failed"),
                }
            }
        });
        Self { task }
    }

    /// Stops sampling. The pacing controller keeps its last state.
    pub fn stop(&self) {
        self.task.abort();
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for LatencyProbe {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use rollsync_pacing::{PacingConfig, PacingTier};
    use rollsync_transport::TransportError;

    use super::*;

    /// Returns scripted latencies, then repeats the last one.
    struct ScriptedSource {
        script: Mutex<VecDeque<Result<Duration, ClientError>>>,
        fallback: Duration,
    }

    impl ScriptedSource {
        fn new(script: Vec<Result<Duration, ClientError>>, fallback: Duration) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                fallback,
            })
        }
    }

    impl LatencySource for ScriptedSource {
        fn measure(&self) -> BoxFuture<'_, Result<Duration, ClientError>> {
            let next = self.script.lock().unwrap().pop_front();
            let fallback = self.fallback;
            Box::pin(async move { next.unwrap_or(Ok(fallback)) })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_slow_samples_move_pacing_to_very_slow() {
        let pacing = Arc::new(PacingController::new(PacingConfig::default()));
        let source = ScriptedSource::new(vec![], Duration::from_millis(600));

        let probe = LatencyProbe::spawn(source, Arc::clone(&pacing), Duration::from_millis(100));
        time::sleep(Duration::from_millis(50)).await;

        assert_eq!(pacing.tier(), PacingTier::VerySlow);
        assert_eq!(pacing.current_interval(), Duration::from_millis(150));
        probe.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_failures_are_not_recorded() {
        let pacing = Arc::new(PacingController::new(PacingConfig::default()));
        let source = ScriptedSource::new(
            vec![
                Err(TransportError::Http("refused".into()).into()),
                Err(ClientError::NotConnected),
                Ok(Duration::from_millis(20)),
            ],
            Duration::from_millis(20),
        );

        let _probe = LatencyProbe::spawn(source, Arc::clone(&pacing), Duration::from_millis(100));
        time::sleep(Duration::from_millis(150)).await;

        // Two failures, then a single 20 ms sample at t=200 has not run yet.
        assert_eq!(pacing.state().samples, 0);
        time::sleep(Duration::from_millis(100)).await;
        assert_eq!(pacing.state().samples, 1);
        assert_eq!(pacing.tier(), PacingTier::Fast);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_drop_stops_sampling() {
        let pacing = Arc::new(PacingController::new(PacingConfig::default()));
        let source = ScriptedSource::new(vec![], Duration::from_millis(10));

        let probe = LatencyProbe::spawn(source, Arc::clone(&pacing), Duration::from_millis(100));
        time::sleep(Duration::from_millis(250)).await;
        drop(probe);
        let samples = pacing.state().samples;
        time::sleep(Duration::from_millis(500)).await;

        assert_eq!(samples, 3);
        assert_eq!(pacing.state().samples, samples);
    }
}
