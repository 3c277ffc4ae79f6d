//! [`Client`] builder, public API and the supervisor task.
//!
//! The supervisor is the only task that changes the transport state. It
//! dials, installs the link, re-arms subscriptions, waits for the link to
//! die, demotes everything to polling and backs off, over and over until
//! the client is closed or the retry ceiling is reached.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use futures_util::future::join_all;
use rollsync_pacing::PacingController;
use rollsync_protocol::{
    EntityKey, EntityState, RemoteSubscriptionId, RpcErrorObject, RpcRequest,
};
use rollsync_reconnect::{ReconnectConfig, ReconnectController, Transition, TransportState};
use rollsync_transport::WebSocketConnector;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::link::Link;
use crate::multiplexer::ResponseHook;
use crate::pipeline::HttpPipelineFactory;
use crate::poller::Poller;
use crate::probe::{HttpSlotProbe, LatencyProbe};
use crate::registry::{
    DeliveryMode, Registry, Subscription, SubscriptionHandle, SubscriptionInfo,
};
use crate::{ClientConfig, ClientError, EntityFetcher, HttpEntityFetcher};

const EVENT_CAPACITY: usize = 64;

/// Lifecycle notifications, broadcast to every [`Client::events`] receiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// The streaming link is up.
    Connected,
    /// The streaming link went away; watched keys are now polled.
    Disconnected { reason: String },
    /// Retry `attempt` will start after `delay`.
    Reconnecting { attempt: u32, delay: Duration },
    /// The retry ceiling was exceeded. Sent once per give-up; only
    /// [`Client::reconnect`] starts trying again.
    GaveUp { attempts: u32 },
}

enum Command {
    Reconnect,
    Shutdown,
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Configures and starts a [`Client`].
///
/// # Example
///
/// ```rust,no_run
/// # async fn run() -> Result<(), rollsync::ClientError> {
/// let client = rollsync::Client::builder()
///     .ws_url("ws://127.0.0.1:8900")
///     .http_url("http://127.0.0.1:8899")
///     .connect()
///     .await?;
/// let handle = client
///     .watch("Vote111111111111111111111111111111111111111", |state| {
///         println!("slot {}", state.slot);
///     })
///     .await?;
/// client.unwatch(handle).await;
/// client.close().await;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct ClientBuilder {
    config: ClientConfig,
    fetcher: Option<Arc<dyn EntityFetcher>>,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn ws_url(mut self, url: impl Into<String>) -> Self {
        self.config.ws_url = url.into();
        self
    }

    pub fn http_url(mut self, url: impl Into<String>) -> Self {
        self.config.http_url = url.into();
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    pub fn reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.config.reconnect = reconnect;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    pub fn subscribe_timeout(mut self, timeout: Duration) -> Self {
        self.config.subscribe_timeout = timeout;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Overrides how polled keys are fetched. Defaults to
    /// [`HttpEntityFetcher`] against `http_url`.
    pub fn fetcher(mut self, fetcher: Arc<dyn EntityFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Starts the client without waiting for the streaming link.
    ///
    /// Watches made before the link is up are served by polling and move to
    /// streaming once it connects.
    pub async fn start(self) -> Result<Client, ClientError> {
        self.launch(None)
    }

    /// Starts the client and waits for the first connect attempt.
    ///
    /// # Errors
    /// The first attempt's error. The client is shut down in that case.
    pub async fn connect(self) -> Result<Client, ClientError> {
        let (tx, rx) = oneshot::channel();
        let client = self.launch(Some(tx))?;
        match rx.await {
            Ok(Ok(())) => Ok(client),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(ClientError::Closed),
        }
    }

    fn launch(self, first: Option<FirstAttempt>) -> Result<Client, ClientError> {
        let config = self.config.validated();
        let fetcher = match self.fetcher {
            Some(fetcher) => fetcher,
            None => Arc::new(HttpEntityFetcher::new(
                config.http_url.clone(),
                config.request_timeout,
            )?),
        };
        let poller = Poller::new(fetcher, config.poll_interval, config.account);
        let connector =
            WebSocketConnector::new(config.ws_url.clone()).with_connect_timeout(config.connect_timeout);
        let (commands, rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let inner = Arc::new(Inner {
            controller: Mutex::new(ReconnectController::new(config.reconnect.clone())),
            registry: Arc::new(Registry::new(poller)),
            link: RwLock::new(None),
            arm: tokio::sync::Mutex::new(()),
            connector,
            events,
            commands,
            config,
        });

        let supervisor = tokio::spawn(supervise(Arc::clone(&inner), rx, first));
        Ok(Client {
            inner,
            supervisor: Mutex::new(Some(supervisor)),
        })
    }
}

type FirstAttempt = oneshot::Sender<Result<(), ClientError>>;

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Handle to a running sync client.
///
/// Dropping it stops the supervisor and every poll task; prefer
/// [`close`](Self::close) to also wait for the link to shut down.
pub struct Client {
    inner: Arc<Inner>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl Client {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Starts delivering state for `key` to `callback`.
    ///
    /// The key is polled right away. If the link is up, a streaming
    /// subscribe is attempted, bounded by the subscribe timeout; on failure
    /// the key simply stays on polling. Watching a key that is already
    /// watched returns the existing handle and drops `callback`.
    ///
    /// # Errors
    /// [`ClientError::Closed`] after [`close`](Self::close).
    pub async fn watch<F>(
        &self,
        key: impl Into<EntityKey>,
        callback: F,
    ) -> Result<SubscriptionHandle, ClientError>
    where
        F: Fn(EntityState) + Send + Sync + 'static,
    {
        let (sub, created) = self.inner.registry.insert(key.into(), Arc::new(callback))?;
        if !created {
            return Ok(sub.handle());
        }

        if let Some(link) = self.inner.current_link() {
            let wait = self.inner.config.subscribe_timeout;
            match tokio::time::timeout(wait, self.inner.arm.lock()).await {
                Ok(_arm) => {
                    if let Err(e) = self.inner.subscribe(&link, &sub).await {
                        debug!(key = %sub.key(), error = %e, "streaming subscribe failed, polling");
                    }
                }
                // The next re-arm picks the key up.
                Err(_) => debug!(key = %sub.key(), "subscribe queue busy, polling"),
            }
        }
        Ok(sub.handle())
    }

    /// Stops a watch. Returns `false` if the handle was already released.
    ///
    /// Once this returns the callback never runs again. A streaming
    /// subscription is also unsubscribed on the server, best effort.
    pub async fn unwatch(&self, handle: SubscriptionHandle) -> bool {
        let Some((key, remote)) = self.inner.registry.remove(handle) else {
            return false;
        };
        if let (Some(remote), Some(link)) = (remote, self.inner.current_link()) {
            if let Err(e) = self.inner.unsubscribe(&link, remote).await {
                debug!(%key, %remote, error = %e, "remote unsubscribe failed");
            }
        }
        true
    }

    /// Sends a request over the streaming link and waits for its result.
    ///
    /// # Errors
    /// [`ClientError::NotConnected`] while the link is down,
    /// [`ClientError::GaveUp`] once the retry ceiling was exceeded, otherwise
    /// the request's own failure.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value, ClientError> {
        self.inner.live_link()?.request(method, params).await
    }

    /// Sends a message that expects no response.
    pub async fn notify(&self, method: &str, params: Value) -> Result<(), ClientError> {
        self.inner.live_link()?.notify(method, params).await
    }

    /// Requests still waiting for a response on the current link.
    pub fn pending_requests(&self) -> usize {
        self.inner.current_link().map_or(0, |link| link.pending())
    }

    /// Asks the supervisor for a fresh connect attempt with the retry
    /// counter reset. This is the way out of [`ClientEvent::GaveUp`]; while
    /// backing off it skips the rest of the delay.
    pub fn reconnect(&self) -> Result<(), ClientError> {
        self.inner
            .commands
            .send(Command::Reconnect)
            .map_err(|_| ClientError::Closed)
    }

    /// Closes the link, stops every poll task and refuses new watches.
    pub async fn close(&self) {
        let _ = self.inner.commands.send(Command::Shutdown);
        let supervisor = self
            .supervisor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = supervisor {
            if let Err(e) = task.await {
                warn!(error = %e, "supervisor task failed");
            }
        }
        self.inner.registry.shutdown();
    }

    pub fn state(&self) -> TransportState {
        self.inner.controller().state()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.current_link().is_some()
    }

    /// Subscribes to lifecycle events from now on.
    pub fn events(&self) -> broadcast::Receiver<ClientEvent> {
        self.inner.events.subscribe()
    }

    pub fn subscriptions(&self) -> Vec<SubscriptionInfo> {
        self.inner.registry.snapshot()
    }

    pub fn subscription_count(&self) -> usize {
        self.inner.registry.len()
    }

    pub fn delivery_mode(&self, handle: SubscriptionHandle) -> Option<DeliveryMode> {
        self.inner.registry.get(handle).map(|sub| sub.mode())
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Starts timing `getSlot` against the unary endpoint and feeding the
    /// results to `pacing`.
    pub fn spawn_latency_probe(
        &self,
        pacing: Arc<PacingController>,
    ) -> Result<LatencyProbe, ClientError> {
        let config = &self.inner.config;
        let source = HttpSlotProbe::new(
            config.http_url.clone(),
            config.request_timeout,
            config.account.commitment,
        )?;
        Ok(LatencyProbe::spawn(
            Arc::new(source),
            pacing,
            config.latency_probe_interval,
        ))
    }

    /// Pipeline factory for the unary endpoint, for use with a
    /// [`ConnectionRecycler`](rollsync_pacing::ConnectionRecycler).
    pub fn pipeline_factory(&self) -> HttpPipelineFactory {
        HttpPipelineFactory::new(
            self.inner.config.http_url.clone(),
            self.inner.config.request_timeout,
        )
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        let _ = self.inner.commands.send(Command::Shutdown);
        self.inner.registry.shutdown();
    }
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

struct Inner {
    config: ClientConfig,
    connector: WebSocketConnector,
    registry: Arc<Registry>,
    link: RwLock<Option<Arc<Link>>>,
    controller: Mutex<ReconnectController>,
    /// Serializes streaming subscribes so a watch and a re-arm never
    /// subscribe the same key twice.
    arm: tokio::sync::Mutex<()>,
    events: broadcast::Sender<ClientEvent>,
    commands: mpsc::UnboundedSender<Command>,
}

impl Inner {
    fn controller(&self) -> MutexGuard<'_, ReconnectController> {
        self.controller.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn current_link(&self) -> Option<Arc<Link>> {
        self.link
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The current link, or why there is none.
    fn live_link(&self) -> Result<Arc<Link>, ClientError> {
        if let Some(link) = self.current_link() {
            return Ok(link);
        }
        match self.controller().state() {
            TransportState::GaveUp { attempts } => Err(ClientError::GaveUp { attempts }),
            _ => Err(ClientError::NotConnected),
        }
    }

    fn set_link(&self, link: Option<Arc<Link>>) {
        *self.link.write().unwrap_or_else(PoisonError::into_inner) = link;
    }

    fn emit(&self, event: ClientEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    /// Subscribes `sub` on `link` if it is still polling. Returns whether
    /// it is now streaming.
    ///
    /// The binding happens in the dispatch loop as the response is read, so
    /// no notification can race ahead of it. If the watch was dropped while
    /// the subscribe was in flight, the fresh remote subscription is
    /// released again.
    async fn subscribe(&self, link: &Link, sub: &Arc<Subscription>) -> Result<bool, ClientError> {
        if !sub.is_active() || sub.mode() != DeliveryMode::Polling {
            return Ok(false);
        }

        let bound = Arc::new(AtomicBool::new(false));
        let hook: ResponseHook = {
            let registry = Arc::clone(&self.registry);
            let sub = Arc::clone(sub);
            let bound = Arc::clone(&bound);
            Box::new(move |outcome: &Result<Value, RpcErrorObject>| {
                let Ok(result) = outcome else { return };
                if let Ok(remote) = RemoteSubscriptionId::from_result(result) {
                    bound.store(registry.bind_remote(&sub, remote), Ordering::SeqCst);
                }
            })
        };

        let account = self.config.account;
        let result = link
            .call(
                |id| RpcRequest::account_subscribe(id, sub.key(), account),
                self.config.subscribe_timeout,
                Some(hook),
            )
            .await?;

        if bound.load(Ordering::SeqCst) {
            return Ok(true);
        }
        let remote = RemoteSubscriptionId::from_result(&result)?;
        debug!(key = %sub.key(), %remote, "watch gone before subscribe completed, releasing");
        self.unsubscribe(link, remote).await?;
        Ok(false)
    }

    async fn unsubscribe(&self, link: &Link, remote: RemoteSubscriptionId) -> Result<(), ClientError> {
        link.call(
            |id| RpcRequest::account_unsubscribe(id, remote),
            self.config.request_timeout,
            None,
        )
        .await?;
        Ok(())
    }

    /// Moves every polled key onto a freshly connected link.
    async fn rearm(&self, link: &Link) {
        let _arm = self.arm.lock().await;
        let subs = self.registry.polling();
        if subs.is_empty() {
            return;
        }

        let results = join_all(subs.iter().map(|sub| self.subscribe(link, sub))).await;
        let mut streaming = 0;
        for (sub, result) in subs.iter().zip(results) {
            match result {
                Ok(true) => streaming += 1,
                Ok(false) => {}
                Err(e) => debug!(key = %sub.key(), error = %e, "re-arm failed, staying on polling"),
            }
        }
        info!(conn = %link.id(), streaming, total = subs.len(), "subscriptions re-armed");
    }

    /// Records a failed attempt or lost link and waits out whatever comes
    /// next. Returns `false` if the client is shutting down.
    async fn back_off(&self, commands: &mut mpsc::UnboundedReceiver<Command>) -> bool {
        let transition = self.controller().on_failure();
        match transition {
            Ok(Transition::Retry { attempt, delay }) => {
                self.emit(ClientEvent::Reconnecting { attempt, delay });
                tokio::select! {
                    _ = tokio::time::sleep(delay) => true,
                    command = commands.recv() => match command {
                        Some(Command::Reconnect) => self.restart(),
                        Some(Command::Shutdown) | None => false,
                    },
                }
            }
            Ok(Transition::GaveUp { attempts }) => {
                self.emit(ClientEvent::GaveUp { attempts });
                match commands.recv().await {
                    Some(Command::Reconnect) => self.restart(),
                    Some(Command::Shutdown) | None => false,
                }
            }
            Err(e) => {
                warn!(error = %e, "unexpected transport state, resetting");
                self.controller().on_closed_by_client();
                true
            }
        }
    }

    fn restart(&self) -> bool {
        if let Err(e) = self.controller().restart() {
            warn!(error = %e, "restart refused");
        }
        info!("reconnect requested");
        true
    }
}

// ---------------------------------------------------------------------------
// Supervisor
// ---------------------------------------------------------------------------

async fn supervise(
    inner: Arc<Inner>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    mut first: Option<FirstAttempt>,
) {
    loop {
        {
            let mut controller = inner.controller();
            // A restart already moved the controller to Connecting.
            if controller.state() != TransportState::Connecting {
                if let Err(e) = controller.begin_connect() {
                    warn!(error = %e, "cannot begin connect");
                }
            }
        }

        let opened = tokio::select! {
            opened = Link::open(&inner.connector, Arc::clone(&inner.registry), inner.config.request_timeout) => opened,
            command = commands.recv() => match command {
                Some(Command::Reconnect) => {
                    inner.restart();
                    continue;
                }
                Some(Command::Shutdown) | None => break,
            },
        };

        let (link, mut dispatch) = match opened {
            Ok(pair) => pair,
            Err(e) => {
                warn!(url = %inner.config.ws_url, error = %e, "connect failed");
                if let Some(tx) = first.take() {
                    let _ = tx.send(Err(e));
                }
                if inner.back_off(&mut commands).await {
                    continue;
                }
                break;
            }
        };

        if let Err(e) = inner.controller().on_connected() {
            warn!(error = %e, "unexpected transport state on connect");
        }
        inner.set_link(Some(Arc::clone(&link)));
        info!(conn = %link.id(), url = %inner.config.ws_url, "streaming link up");
        inner.emit(ClientEvent::Connected);
        if let Some(tx) = first.take() {
            let _ = tx.send(Ok(()));
        }

        let rearm = {
            let inner = Arc::clone(&inner);
            let link = Arc::clone(&link);
            tokio::spawn(async move { inner.rearm(&link).await })
        };

        let lost = loop {
            tokio::select! {
                reason = &mut dispatch => {
                    break Some(reason.unwrap_or_else(|e| format!("dispatch task failed: {e}")));
                }
                command = commands.recv() => match command {
                    Some(Command::Reconnect) => debug!("already connected, reconnect ignored"),
                    Some(Command::Shutdown) | None => break None,
                },
            }
        };

        rearm.abort();
        inner.set_link(None);

        let Some(reason) = lost else {
            link.close().await;
            let _ = dispatch.await;
            break;
        };

        let demoted = inner.registry.demote_all();
        warn!(conn = %link.id(), %reason, demoted, "streaming link lost");
        inner.emit(ClientEvent::Disconnected { reason });
        drop(link);

        if !inner.back_off(&mut commands).await {
            break;
        }
    }

    inner.set_link(None);
    inner.controller().on_closed_by_client();
    debug!("supervisor stopped");
}
