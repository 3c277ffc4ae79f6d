//! Fallback poller: fixed-period unary fetches while streaming is down.
//!
//! Each polled key gets its own task. The task only fetches and hands the
//! result to its subscription; whether the result is still wanted is
//! decided at delivery time under the subscription lock, so a fetch that
//! completes after a switch back to streaming is simply discarded.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use rollsync_protocol::{
    AccountConfig, Codec, EntityKey, EntityState, JsonCodec, RpcRequest, decode_response,
};
use rollsync_transport::HttpTransport;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{trace, warn};

use crate::ClientError;
use crate::multiplexer::next_request_id;
use crate::registry::{DeliveryMode, Subscription};

/// Fetches the current state of one entity over a request-oriented path.
///
/// `Ok(None)` means "no data" (the entity does not exist yet) and is not an
/// error.
pub trait EntityFetcher: Send + Sync + 'static {
    fn fetch<'a>(
        &'a self,
        key: &'a EntityKey,
        config: AccountConfig,
    ) -> BoxFuture<'a, Result<Option<EntityState>, ClientError>>;
}

/// [`EntityFetcher`] that posts `getAccountInfo` over HTTP.
#[derive(Debug, Clone)]
pub struct HttpEntityFetcher {
    http: HttpTransport,
    codec: JsonCodec,
}

impl HttpEntityFetcher {
    /// Creates a fetcher for `url` whose round trips fail after `timeout`.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, ClientError> {
        Ok(Self {
            http: HttpTransport::with_timeout(url, timeout)?,
            codec: JsonCodec,
        })
    }

    pub fn url(&self) -> &str {
        self.http.url()
    }
}

impl EntityFetcher for HttpEntityFetcher {
    fn fetch<'a>(
        &'a self,
        key: &'a EntityKey,
        config: AccountConfig,
    ) -> BoxFuture<'a, Result<Option<EntityState>, ClientError>> {
        Box::pin(async move {
            let request = RpcRequest::get_account_info(next_request_id(), key, config);
            let body = self.http.post(self.codec.encode(&request)?).await?;
            let value = decode_response(&body)?.outcome?;
            Ok(EntityState::from_account_info(value)?)
        })
    }
}

/// Spawns poll tasks with shared settings.
#[derive(Clone)]
pub(crate) struct Poller {
    fetcher: Arc<dyn EntityFetcher>,
    interval: Duration,
    account: AccountConfig,
}

impl Poller {
    pub(crate) fn new(
        fetcher: Arc<dyn EntityFetcher>,
        interval: Duration,
        account: AccountConfig,
    ) -> Self {
        Self {
            fetcher,
            interval: interval.max(Duration::from_millis(1)),
            account,
        }
    }

    /// Starts polling for `sub`. The first fetch is immediate.
    pub(crate) fn spawn(&self, sub: Arc<Subscription>) -> JoinHandle<()> {
        tokio::spawn(poll_loop(
            sub,
            Arc::clone(&self.fetcher),
            self.interval,
            self.account,
        ))
    }
}

async fn poll_loop(
    sub: Arc<Subscription>,
    fetcher: Arc<dyn EntityFetcher>,
    interval: Duration,
    account: AccountConfig,
) {
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tracing::debug!(key = %sub.key(), handle = %sub.handle(), "polling started");

    loop {
        ticker.tick().await;
        match fetcher.fetch(sub.key(), account).await {
            Ok(Some(state)) => {
                if !sub.deliver(DeliveryMode::Polling, state) {
                    trace!(key = %sub.key(), "stale poll result discarded");
                }
            }
            Ok(None) => trace!(key = %sub.key(), "poll returned no data"),
            Err(e) => warn!(key = %sub.key(), error = %e, "poll failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use rollsync_protocol::{AccountData, AccountInfo, Encoding};

    use super::*;
    use crate::registry::Callback;

    fn state(slot: u64) -> EntityState {
        EntityState {
            slot,
            account: AccountInfo {
                lamports: 1,
                owner: "11111111111111111111111111111111".into(),
                data: AccountData::Encoded(String::new(), Encoding::Base64),
                executable: false,
                rent_epoch: 0,
                space: Some(0),
            },
        }
    }

    /// Replays scripted outcomes, then returns slot 100 + call number.
    struct ScriptedFetcher {
        script: Mutex<VecDeque<Result<Option<EntityState>, ClientError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedFetcher {
        fn new(script: Vec<Result<Option<EntityState>, ClientError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl EntityFetcher for ScriptedFetcher {
        fn fetch<'a>(
            &'a self,
            _key: &'a EntityKey,
            _config: AccountConfig,
        ) -> BoxFuture<'a, Result<Option<EntityState>, ClientError>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) as u64;
            let next = self.script.lock().unwrap().pop_front();
            Box::pin(async move { next.unwrap_or_else(|| Ok(Some(state(100 + n)))) })
        }
    }

    fn recording() -> (Callback, Arc<Mutex<Vec<u64>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: Callback = Arc::new(move |s: EntityState| sink.lock().unwrap().push(s.slot));
        (callback, seen)
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_loop_fetches_every_interval() {
        let fetcher = ScriptedFetcher::new(vec![]);
        let poller = Poller::new(fetcher.clone(), Duration::from_millis(100), AccountConfig::default());
        let (callback, seen) = recording();
        let sub = Subscription::new_polling("k".into(), callback);

        let task = poller.spawn(Arc::clone(&sub));
        time::sleep(Duration::from_millis(350)).await;
        task.abort();

        // Ticks at 0, 100, 200 and 300 ms.
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 4);
        assert_eq!(seen.lock().unwrap().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_loop_skips_no_data_and_errors_and_keeps_going() {
        let fetcher = ScriptedFetcher::new(vec![
            Ok(None),
            Err(ClientError::NotConnected),
            Ok(Some(state(7))),
        ]);
        let poller = Poller::new(fetcher.clone(), Duration::from_millis(100), AccountConfig::default());
        let (callback, seen) = recording();
        let sub = Subscription::new_polling("k".into(), callback);

        let task = poller.spawn(Arc::clone(&sub));
        time::sleep(Duration::from_millis(250)).await;
        task.abort();

        assert_eq!(*seen.lock().unwrap(), vec![7]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_loop_result_after_switch_to_streaming_is_discarded() {
        let fetcher = ScriptedFetcher::new(vec![]);
        let poller = Poller::new(fetcher.clone(), Duration::from_millis(100), AccountConfig::default());
        let (callback, seen) = recording();
        let sub = Subscription::new_polling("k".into(), callback);
        sub.set_mode_for_test(DeliveryMode::Streaming);

        let task = poller.spawn(Arc::clone(&sub));
        time::sleep(Duration::from_millis(150)).await;
        task.abort();

        assert!(fetcher.calls.load(Ordering::SeqCst) > 0);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_abort_stops_fetching() {
        let fetcher = ScriptedFetcher::new(vec![]);
        let poller = Poller::new(fetcher.clone(), Duration::from_millis(5), AccountConfig::default());
        let (callback, _seen) = recording();
        let sub = Subscription::new_polling("k".into(), callback);

        let task = poller.spawn(sub);
        time::sleep(Duration::from_millis(20)).await;
        task.abort();
        let _ = task.await;
        let after_abort = fetcher.calls.load(Ordering::SeqCst);
        time::sleep(Duration::from_millis(20)).await;

        assert_eq!(fetcher.calls.load(Ordering::SeqCst), after_abort);
    }
}
