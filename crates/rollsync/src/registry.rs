//! Subscription registry: which keys are watched, and how each is served.
//!
//! Every watched key is served by exactly one delivery mechanism at a time,
//! either the streaming link ([`DeliveryMode::Streaming`]) or a poll task
//! ([`DeliveryMode::Polling`]). The mode lives in the subscription's own
//! lock together with an `active` flag, and every delivery checks both
//! under that lock. That gives three guarantees:
//!
//! - a stale poll result arriving after the switch to streaming is dropped
//! - a stale notification arriving after demotion to polling is dropped
//! - once `unwatch` returns, no callback for that subscription runs
//!
//! # Lock order
//!
//! A subscription lock may be held while taking the registry maps lock,
//! never the other way round. The one exception is a subscription that is
//! still being created and is not yet reachable by anyone else.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rollsync_protocol::{EntityKey, EntityState, RemoteSubscriptionId};
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::ClientError;
use crate::poller::Poller;

/// Receives state updates for one watched key.
///
/// Runs on the dispatch loop or a poll task while the subscription lock is
/// held. Keep it short, and do not `unwatch` from inside a callback.
pub type Callback = Arc<dyn Fn(EntityState) + Send + Sync>;

/// Identifies one active watch. Returned by `watch`, consumed by `unwatch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionHandle(u64);

impl SubscriptionHandle {
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "watch-{}", self.0)
    }
}

/// How a subscription is currently being served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeliveryMode {
    /// Push notifications over the streaming link.
    Streaming,
    /// Periodic unary fetches.
    Polling,
}

impl fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Streaming => write!(f, "streaming"),
            Self::Polling => write!(f, "polling"),
        }
    }
}

/// Point-in-time view of one subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionInfo {
    pub handle: SubscriptionHandle,
    pub key: EntityKey,
    pub mode: DeliveryMode,
    /// Remote id while streaming.
    pub remote: Option<RemoteSubscriptionId>,
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

struct Cell {
    active: bool,
    mode: DeliveryMode,
    remote: Option<RemoteSubscriptionId>,
    poll_task: Option<JoinHandle<()>>,
}

impl Cell {
    fn stop_polling(&mut self) {
        if let Some(task) = self.poll_task.take() {
            task.abort();
        }
    }
}

/// One watched key and its callback.
pub(crate) struct Subscription {
    handle: SubscriptionHandle,
    key: EntityKey,
    callback: Callback,
    cell: Mutex<Cell>,
}

impl Subscription {
    fn new(handle: SubscriptionHandle, key: EntityKey, callback: Callback) -> Self {
        Self {
            handle,
            key,
            callback,
            cell: Mutex::new(Cell {
                active: true,
                mode: DeliveryMode::Polling,
                remote: None,
                poll_task: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Cell> {
        self.cell.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn handle(&self) -> SubscriptionHandle {
        self.handle
    }

    pub(crate) fn key(&self) -> &EntityKey {
        &self.key
    }

    pub(crate) fn mode(&self) -> DeliveryMode {
        self.lock().mode
    }

    pub(crate) fn is_active(&self) -> bool {
        self.lock().active
    }

    /// Runs the callback if the subscription is active and served `via`.
    /// Returns whether the callback ran.
    pub(crate) fn deliver(&self, via: DeliveryMode, state: EntityState) -> bool {
        let cell = self.lock();
        if !cell.active || cell.mode != via {
            return false;
        }
        (self.callback)(state);
        drop(cell);
        true
    }

    /// Marks the subscription dead, stops its poller and hands back the
    /// remote id if it was streaming.
    fn deactivate(&self) -> Option<RemoteSubscriptionId> {
        let mut cell = self.lock();
        cell.active = false;
        cell.stop_polling();
        cell.remote.take()
    }

    fn info(&self) -> SubscriptionInfo {
        let cell = self.lock();
        SubscriptionInfo {
            handle: self.handle,
            key: self.key.clone(),
            mode: cell.mode,
            remote: cell.remote,
        }
    }
}

#[cfg(test)]
impl Subscription {
    pub(crate) fn new_polling(key: EntityKey, callback: Callback) -> Arc<Self> {
        Arc::new(Self::new(SubscriptionHandle(0), key, callback))
    }

    pub(crate) fn set_mode_for_test(&self, mode: DeliveryMode) {
        self.lock().mode = mode;
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Maps {
    by_handle: HashMap<SubscriptionHandle, Arc<Subscription>>,
    by_key: HashMap<EntityKey, SubscriptionHandle>,
    by_remote: HashMap<RemoteSubscriptionId, Arc<Subscription>>,
    closed: bool,
}

/// All subscriptions of one client. Survives reconnects.
pub(crate) struct Registry {
    next_handle: AtomicU64,
    maps: Mutex<Maps>,
    poller: Poller,
}

impl Registry {
    pub(crate) fn new(poller: Poller) -> Self {
        Self {
            next_handle: AtomicU64::new(1),
            maps: Mutex::new(Maps::default()),
            poller,
        }
    }

    fn maps(&self) -> MutexGuard<'_, Maps> {
        self.maps.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers `key`, starting in polling mode.
    ///
    /// If the key is already watched the existing subscription is returned
    /// with `false` and `callback` is dropped.
    ///
    /// # Errors
    /// [`ClientError::Closed`] after [`shutdown`](Self::shutdown).
    pub(crate) fn insert(
        &self,
        key: EntityKey,
        callback: Callback,
    ) -> Result<(Arc<Subscription>, bool), ClientError> {
        let mut maps = self.maps();
        if maps.closed {
            return Err(ClientError::Closed);
        }
        if let Some(existing) = maps
            .by_key
            .get(&key)
            .and_then(|handle| maps.by_handle.get(handle))
        {
            debug!(%key, handle = %existing.handle, "key already watched");
            return Ok((Arc::clone(existing), false));
        }

        let handle = SubscriptionHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        let sub = Arc::new(Subscription::new(handle, key.clone(), callback));
        // Not yet reachable from the maps, so taking its lock here is safe.
        sub.lock().poll_task = Some(self.poller.spawn(Arc::clone(&sub)));

        maps.by_key.insert(key.clone(), handle);
        maps.by_handle.insert(handle, Arc::clone(&sub));
        debug!(%key, %handle, "watch registered");
        Ok((sub, true))
    }

    /// Removes a subscription. After this returns its callback never runs
    /// again. Returns `None` if the handle is unknown (already removed).
    pub(crate) fn remove(
        &self,
        handle: SubscriptionHandle,
    ) -> Option<(EntityKey, Option<RemoteSubscriptionId>)> {
        let sub = {
            let mut maps = self.maps();
            let sub = maps.by_handle.remove(&handle)?;
            maps.by_key.remove(sub.key());
            sub
        };

        let remote = sub.deactivate();
        if let Some(remote) = remote {
            self.maps().by_remote.remove(&remote);
        }
        debug!(key = %sub.key(), %handle, "watch removed");
        Some((sub.key().clone(), remote))
    }

    /// Switches `sub` to streaming under `remote`. Refused (returns `false`)
    /// if the subscription was removed in the meantime.
    pub(crate) fn bind_remote(&self, sub: &Arc<Subscription>, remote: RemoteSubscriptionId) -> bool {
        let mut cell = sub.lock();
        if !cell.active {
            return false;
        }
        cell.stop_polling();
        cell.mode = DeliveryMode::Streaming;
        cell.remote = Some(remote);
        self.maps().by_remote.insert(remote, Arc::clone(sub));
        debug!(key = %sub.key(), %remote, "subscription streaming");
        true
    }

    /// Routes an `accountNotification` to its subscription.
    pub(crate) fn dispatch_notification(&self, remote: RemoteSubscriptionId, result: Value) {
        let Some(sub) = self.maps().by_remote.get(&remote).cloned() else {
            warn!(%remote, "notification for unknown subscription dropped");
            return;
        };
        let state = match EntityState::from_notification(result) {
            Ok(state) => state,
            Err(e) => {
                warn!(key = %sub.key(), %remote, error = %e, "undecodable notification dropped");
                return;
            }
        };
        if !sub.deliver(DeliveryMode::Streaming, state) {
            trace!(key = %sub.key(), %remote, "stale notification discarded");
        }
    }

    /// Moves every streaming subscription to polling. Called once the link
    /// is known to be gone. Returns how many were demoted.
    pub(crate) fn demote_all(&self) -> usize {
        let subs: Vec<Arc<Subscription>> = {
            let mut maps = self.maps();
            maps.by_remote.clear();
            maps.by_handle.values().cloned().collect()
        };

        let mut demoted = 0;
        for sub in subs {
            let mut cell = sub.lock();
            if !cell.active || cell.mode == DeliveryMode::Polling {
                continue;
            }
            cell.mode = DeliveryMode::Polling;
            cell.remote = None;
            cell.poll_task = Some(self.poller.spawn(Arc::clone(&sub)));
            demoted += 1;
        }
        if demoted > 0 {
            info!(demoted, "streaming lost, subscriptions moved to polling");
        }
        demoted
    }

    /// Active subscriptions currently served by polling.
    pub(crate) fn polling(&self) -> Vec<Arc<Subscription>> {
        let subs: Vec<Arc<Subscription>> = self.maps().by_handle.values().cloned().collect();
        subs.into_iter()
            .filter(|sub| {
                let cell = sub.lock();
                cell.active && cell.mode == DeliveryMode::Polling
            })
            .collect()
    }

    pub(crate) fn get(&self, handle: SubscriptionHandle) -> Option<Arc<Subscription>> {
        self.maps().by_handle.get(&handle).cloned()
    }

    /// Snapshot of every subscription, ordered by handle.
    pub(crate) fn snapshot(&self) -> Vec<SubscriptionInfo> {
        let subs: Vec<Arc<Subscription>> = self.maps().by_handle.values().cloned().collect();
        let mut infos: Vec<SubscriptionInfo> = subs.iter().map(|sub| sub.info()).collect();
        infos.sort_by_key(|info| info.handle);
        infos
    }

    pub(crate) fn len(&self) -> usize {
        self.maps().by_handle.len()
    }

    /// Removes every subscription and refuses new ones.
    pub(crate) fn shutdown(&self) {
        let subs: Vec<Arc<Subscription>> = {
            let mut maps = self.maps();
            maps.closed = true;
            maps.by_key.clear();
            maps.by_remote.clear();
            maps.by_handle.drain().map(|(_, sub)| sub).collect()
        };
        for sub in &subs {
            sub.deactivate();
        }
        if !subs.is_empty() {
            debug!(count = subs.len(), "registry shut down");
        }
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        self.shutdown();
    }
}
