//! Shared fixtures: a scriptable JSON-RPC WebSocket server and a fetcher
//! that stands in for the unary endpoint.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use rollsync::prelude::*;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

/// Slot carried by every polled state, so tests can tell polled
/// deliveries from pushed ones.
pub const POLLED_SLOT: u64 = 1;

const OWNER: &str = "11111111111111111111111111111111";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// =========================================================================
// Mock server
// =========================================================================

enum Outbound {
    Frame(String),
    Kill,
}

struct Subscribed {
    conn: u64,
    key: String,
}

#[derive(Default)]
struct ServerState {
    accepting: AtomicBool,
    next_conn: AtomicU64,
    next_remote: AtomicU64,
    connections: AtomicUsize,
    subscribe_calls: AtomicUsize,
    conns: Mutex<HashMap<u64, mpsc::UnboundedSender<Outbound>>>,
    subscriptions: Mutex<HashMap<u64, Subscribed>>,
    unsubscribed: Mutex<Vec<u64>>,
    silent: Mutex<HashSet<String>>,
    delayed: Mutex<HashMap<String, Duration>>,
}

/// JSON-RPC server on `127.0.0.1:0` speaking just enough of the account
/// subscription protocol: `accountSubscribe`, `accountUnsubscribe` and
/// `getSlot`. Anything else gets "method not found" unless marked silent.
pub struct MockServer {
    url: String,
    state: Arc<ServerState>,
    task: JoinHandle<()>,
}

impl MockServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("should bind");
        let url = format!("ws://{}", listener.local_addr().expect("should have addr"));
        let state = Arc::new(ServerState {
            accepting: AtomicBool::new(true),
            next_remote: AtomicU64::new(100),
            ..ServerState::default()
        });

        let task = tokio::spawn(accept_loop(listener, Arc::clone(&state)));
        Self { url, state, task }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// While `false`, new TCP connections are dropped before the handshake.
    pub fn set_accepting(&self, accepting: bool) {
        self.state.accepting.store(accepting, Ordering::SeqCst);
    }

    /// Requests with this method are read and never answered.
    pub fn silence(&self, method: &str) {
        self.state.silent.lock().unwrap().insert(method.to_owned());
    }

    /// Requests with this method are handled at once but answered only
    /// after `delay`.
    pub fn delay(&self, method: &str, delay: Duration) {
        self.state
            .delayed
            .lock()
            .unwrap()
            .insert(method.to_owned(), delay);
    }

    /// Drops every open connection without a close handshake.
    pub fn kill_all(&self) {
        let conns: Vec<_> = self.state.conns.lock().unwrap().drain().collect();
        for (_, tx) in conns {
            let _ = tx.send(Outbound::Kill);
        }
    }

    /// Pushes an `accountNotification` for `key` to every subscriber.
    /// Returns how many subscriptions it went to.
    pub fn push(&self, key: &str, slot: u64) -> usize {
        let targets: Vec<(u64, u64)> = self
            .state
            .subscriptions
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, s)| s.key == key)
            .map(|(remote, s)| (*remote, s.conn))
            .collect();

        let conns = self.state.conns.lock().unwrap();
        let mut sent = 0;
        for (remote, conn) in targets {
            let frame = json!({
                "jsonrpc": "2.0",
                "method": "accountNotification",
                "params": { "subscription": remote, "result": account_result(slot) }
            });
            if let Some(tx) = conns.get(&conn) {
                if tx.send(Outbound::Frame(frame.to_string())).is_ok() {
                    sent += 1;
                }
            }
        }
        sent
    }

    /// Successful WebSocket handshakes so far.
    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    pub fn subscribe_calls(&self) -> usize {
        self.state.subscribe_calls.load(Ordering::SeqCst)
    }

    /// Live subscriptions on open connections.
    pub fn active_subscriptions(&self) -> usize {
        self.state.subscriptions.lock().unwrap().len()
    }

    pub fn unsubscribed(&self) -> Vec<u64> {
        self.state.unsubscribed.lock().unwrap().clone()
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.task.abort();
        self.kill_all();
    }
}

async fn accept_loop(listener: TcpListener, state: Arc<ServerState>) {
    loop {
        let Ok((stream, _)) = listener.accept().await else {
            return;
        };
        if !state.accepting.load(Ordering::SeqCst) {
            drop(stream);
            continue;
        }
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
                return;
            };
            serve(ws, state).await;
        });
    }
}

async fn serve(
    ws: tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>,
    state: Arc<ServerState>,
) {
    let conn = state.next_conn.fetch_add(1, Ordering::SeqCst);
    let (tx, mut rx) = mpsc::unbounded_channel();
    state.conns.lock().unwrap().insert(conn, tx.clone());
    state.connections.fetch_add(1, Ordering::SeqCst);
    let (mut sink, mut stream) = ws.split();

    loop {
        tokio::select! {
            inbound = stream.next() => {
                let Some(Ok(msg)) = inbound else { break };
                if !msg.is_text() {
                    continue;
                }
                let Ok(text) = msg.into_text() else { continue };
                let Ok(request) = serde_json::from_str::<Value>(text.as_str()) else { continue };
                let Some(reply) = handle(&state, conn, &request) else { continue };
                let delay = request
                    .get("method")
                    .and_then(Value::as_str)
                    .and_then(|method| state.delayed.lock().unwrap().get(method).copied());
                match delay {
                    Some(delay) => {
                        let tx = tx.clone();
                        tokio::spawn(async move {
                            tokio::time::sleep(delay).await;
                            let _ = tx.send(Outbound::Frame(reply.to_string()));
                        });
                    }
                    None => {
                        let _ = tx.send(Outbound::Frame(reply.to_string()));
                    }
                }
            }
            outbound = rx.recv() => match outbound {
                Some(Outbound::Frame(frame)) => {
                    if sink.send(Message::text(frame)).await.is_err() {
                        break;
                    }
                }
                Some(Outbound::Kill) | None => break,
            },
        }
    }

    state.conns.lock().unwrap().remove(&conn);
    state.subscriptions.lock().unwrap().retain(|_, s| s.conn != conn);
}

fn handle(state: &ServerState, conn: u64, request: &Value) -> Option<Value> {
    let id = request.get("id")?.clone();
    let method = request.get("method")?.as_str()?;
    if state.silent.lock().unwrap().contains(method) {
        return None;
    }

    let result = match method {
        "accountSubscribe" => {
            let key = request["params"][0].as_str()?.to_owned();
            let remote = state.next_remote.fetch_add(1, Ordering::SeqCst);
            state.subscribe_calls.fetch_add(1, Ordering::SeqCst);
            state
                .subscriptions
                .lock()
                .unwrap()
                .insert(remote, Subscribed { conn, key });
            json!(remote)
        }
        "accountUnsubscribe" => {
            let remote = request["params"][0].as_u64()?;
            let removed = state.subscriptions.lock().unwrap().remove(&remote).is_some();
            state.unsubscribed.lock().unwrap().push(remote);
            json!(removed)
        }
        "getSlot" => json!(4242),
        _ => {
            return Some(json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": { "code": -32601, "message": "Method not found" }
            }));
        }
    };
    Some(json!({ "jsonrpc": "2.0", "id": id, "result": result }))
}

// =========================================================================
// Stalled endpoint
// =========================================================================

/// Accepts TCP connections and never answers the WebSocket upgrade, so
/// every dial hangs until the client's connect timeout.
pub struct StalledServer {
    url: String,
    task: JoinHandle<()>,
}

impl StalledServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("should bind");
        let url = format!("ws://{}", listener.local_addr().expect("should have addr"));
        let task = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });
        Self { url, task }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Drop for StalledServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// `{context, value}` result shared by notifications and `getAccountInfo`.
pub fn account_result(slot: u64) -> Value {
    json!({
        "context": { "slot": slot },
        "value": {
            "lamports": 1_000_000,
            "owner": OWNER,
            "data": ["", "base64"],
            "executable": false,
            "rentEpoch": 0,
            "space": 0
        }
    })
}

// =========================================================================
// Fetcher and callbacks
// =========================================================================

/// Unary stand-in: every fetch returns [`POLLED_SLOT`].
#[derive(Default)]
pub struct MockFetcher {
    calls: AtomicUsize,
}

impl MockFetcher {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl EntityFetcher for MockFetcher {
    fn fetch<'a>(
        &'a self,
        _key: &'a EntityKey,
        _config: AccountConfig,
    ) -> BoxFuture<'a, Result<Option<EntityState>, ClientError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async {
            Ok(EntityState::from_account_info(account_result(POLLED_SLOT))?)
        })
    }
}

/// Records the slot of every delivered state.
#[derive(Clone, Default)]
pub struct Recorder {
    seen: Arc<Mutex<Vec<u64>>>,
}

impl Recorder {
    pub fn callback(&self) -> impl Fn(EntityState) + Send + Sync + use<> {
        let seen = Arc::clone(&self.seen);
        move |state| seen.lock().unwrap().push(state.slot)
    }

    pub fn slots(&self) -> Vec<u64> {
        self.seen.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub fn clear(&self) {
        self.seen.lock().unwrap().clear();
    }

    pub fn saw(&self, slot: u64) -> bool {
        self.seen.lock().unwrap().contains(&slot)
    }
}

/// Checks `condition` every 5 ms until it holds or `timeout` passes.
pub async fn eventually<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Builder preset for tests: fast polling, fast retries, mock fetcher.
pub fn builder(url: &str, fetcher: Arc<MockFetcher>) -> ClientBuilder {
    Client::builder()
        .ws_url(url)
        .http_url("http://127.0.0.1:1")
        .poll_interval(Duration::from_millis(20))
        .request_timeout(Duration::from_secs(2))
        .subscribe_timeout(Duration::from_secs(1))
        .reconnect(ReconnectConfig {
            base_delay: Duration::from_millis(20),
            max_delay: Duration::from_millis(100),
            max_attempts: 10,
        })
        .fetcher(fetcher)
}
