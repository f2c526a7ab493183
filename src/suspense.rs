//! The suspense query registry.
//!
//! A keyed table of in-flight and settled query entries shared by every
//! consumer of the owning [`DataClient`](crate::client::DataClient). A
//! lookup for a key either:
//!
//! - starts a store registration and returns [`SuspenseLookup::Pending`]
//!   with a settle signal the caller can await (the suspension),
//! - returns the *same* signal instance while the entry is still pending,
//!   so concurrent lookups for one key collapse into exactly one store
//!   registration,
//! - returns [`SuspenseLookup::Failed`] synchronously once the entry
//!   settled with an error, for the caller's error boundary, or
//! - returns [`SuspenseLookup::Ready`] with a live
//!   [`SuspenseQueryObserver`] seeded from the settled data.
//!
//! Entry lifetime: an entry persists after settlement so later lookups read
//! it synchronously. A mounted consumer's unmount removes the entry (and
//! its store registration) immediately. An entry that settles while no
//! consumer ever mounted is swept after the store's
//! `suspense_query_mount_timeout`, tolerating a subtree that mounts moments
//! after the fetch completes (e.g. a route transition racing the network).
//!
//! `refetch`/`fetch_more` on a ready observer never re-suspend; they drive
//! the overlay booleans of [`SuspenseState`] while delegating the fetch to
//! the operations stashed on the entry at registration time.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use serde_json::Value;
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::DataError;
use crate::observer::query::resolve_continuation;
use crate::query::{FetchMoreOptions, Query, QueryOptions, ResolvedQuery};
use crate::store::{QueryCallbacks, QuerySubscription, Store};

/// A cloneable signal that resolves when a pending entry settles.
///
/// All clones share one underlying future; [`ptr_eq`](Self::ptr_eq) tells
/// whether two signals came from the same pending entry.
#[derive(Clone)]
pub struct SettleSignal {
    inner: Shared<BoxFuture<'static, ()>>,
}

impl SettleSignal {
    fn new() -> (oneshot::Sender<()>, Self) {
        let (tx, rx) = oneshot::channel::<()>();
        // A dropped sender also resolves the signal: waiters re-run their
        // lookup and find either a settled entry or none at all.
        let inner = rx.map(|_| ()).boxed().shared();
        (tx, Self { inner })
    }

    /// Waits until the entry settles.
    pub async fn wait(&self) {
        self.inner.clone().await;
    }

    /// Returns `true` if both signals belong to the same pending entry.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.inner.ptr_eq(&other.inner)
    }
}

impl fmt::Debug for SettleSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SettleSignal")
    }
}

/// Outcome of a registry lookup.
pub enum SuspenseLookup {
    /// The request is in flight; await the signal and look up again.
    Pending(SettleSignal),
    /// Settled data, served synchronously with a live view.
    Ready(SuspenseQueryObserver),
    /// Settled error, re-surfaced synchronously.
    Failed(DataError),
}

impl SuspenseLookup {
    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }
}

impl fmt::Debug for SuspenseLookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending(_) => "Pending",
            Self::Ready(_) => "Ready",
            Self::Failed(_) => "Failed",
        };
        f.write_str(name)
    }
}

/// Observable snapshot of a settled suspense entry.
///
/// The primary phase is over by construction (the entry settled with data);
/// only the refetch/fetch-more overlays and data pushes remain.
#[derive(Clone, Debug)]
pub struct SuspenseState {
    pub data: Value,
    pub fetching_more: bool,
    pub fetch_more_error: Option<DataError>,
    pub refetching: bool,
    pub refetch_error: Option<DataError>,
}

impl Default for SuspenseState {
    fn default() -> Self {
        Self {
            data: Value::Null,
            fetching_more: false,
            fetch_more_error: None,
            refetching: false,
            refetch_error: None,
        }
    }
}

/// Events folded into [`SuspenseState`].
#[derive(Clone, Debug)]
pub enum SuspenseEvent {
    Data(Value),
    FetchMoreRequest,
    FetchMoreFailure(DataError),
    FetchMoreSuccess,
    RefetchRequest,
    RefetchFailure(DataError),
    RefetchSuccess,
}

/// Pure transition function of the settled-entry state machine.
#[must_use]
pub fn suspense_transition(state: SuspenseState, event: SuspenseEvent) -> SuspenseState {
    match event {
        SuspenseEvent::Data(data) => SuspenseState { data, ..state },
        SuspenseEvent::FetchMoreRequest => SuspenseState {
            fetching_more: true,
            fetch_more_error: None,
            ..state
        },
        SuspenseEvent::FetchMoreFailure(error) => SuspenseState {
            fetching_more: false,
            fetch_more_error: Some(error),
            ..state
        },
        SuspenseEvent::FetchMoreSuccess => SuspenseState {
            fetching_more: false,
            ..state
        },
        SuspenseEvent::RefetchRequest => SuspenseState {
            refetching: true,
            refetch_error: None,
            ..state
        },
        SuspenseEvent::RefetchFailure(error) => SuspenseState {
            refetching: false,
            refetch_error: Some(error),
            ..state
        },
        SuspenseEvent::RefetchSuccess => SuspenseState {
            refetching: false,
            ..state
        },
    }
}

struct Entry {
    /// Present while pending; cleared at settlement.
    signal: Option<SettleSignal>,
    settle: Option<oneshot::Sender<()>>,
    data: Option<Value>,
    error: Option<DataError>,
    subscription: Option<QuerySubscription>,
    mounted: bool,
    /// Owned by the most recently mounted consumer for this key.
    on_data: Option<Arc<dyn Fn(Value) + Send + Sync>>,
    sweep: Option<CancellationToken>,
}

/// The registry. One per [`DataClient`](crate::client::DataClient), scoped
/// to its store; never process-wide.
pub struct SuspenseRegistry {
    store: Arc<dyn Store>,
    entries: DashMap<String, Entry>,
    closed: AtomicBool,
}

impl SuspenseRegistry {
    pub(crate) fn new(store: Arc<dyn Store>) -> Arc<Self> {
        Arc::new(Self {
            store,
            entries: DashMap::new(),
            closed: AtomicBool::new(false),
        })
    }

    /// Looks up (or starts) the entry for the resolved form of `query`.
    pub fn lookup(self: &Arc<Self>, query: &Query, options: QueryOptions) -> SuspenseLookup {
        if self.closed.load(Ordering::SeqCst) {
            return SuspenseLookup::Failed(DataError::registration(
                "suspense registry has been shut down",
            ));
        }

        let resolved = query.resolve(options);
        let key = resolved.key();

        let signal = match self.entries.entry(key.clone()) {
            MapEntry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                if let Some(signal) = &entry.signal {
                    trace!(%key, "pending entry reused");
                    return SuspenseLookup::Pending(signal.clone());
                }
                if let Some(error) = &entry.error {
                    return SuspenseLookup::Failed(error.clone());
                }

                // Settled data: mount a live view against this entry.
                entry.mounted = true;
                if let Some(token) = entry.sweep.take() {
                    token.cancel();
                }
                let data = entry.data.clone().unwrap_or(Value::Null);
                let observer =
                    SuspenseQueryObserver::new(Arc::downgrade(self), key.clone(), resolved, data);
                entry.on_data = Some(observer.data_callback());
                return SuspenseLookup::Ready(observer);
            }
            MapEntry::Vacant(vacant) => {
                let (settle, signal) = SettleSignal::new();
                vacant.insert(Entry {
                    signal: Some(signal.clone()),
                    settle: Some(settle),
                    data: None,
                    error: None,
                    subscription: None,
                    mounted: false,
                    on_data: None,
                    sweep: None,
                });
                signal
            }
        };

        // Register outside the map guard: a synchronous store may call back
        // into the registry during registration.
        debug!(%key, "registering suspense query");
        let weak = Arc::downgrade(self);
        let callbacks = QueryCallbacks::new()
            .on_data({
                let weak = weak.clone();
                let key = key.clone();
                move |value| {
                    if let Some(registry) = weak.upgrade() {
                        registry.deliver_data(&key, value);
                    }
                }
            })
            .on_error({
                let weak = weak.clone();
                let key = key.clone();
                move |err| {
                    if let Some(registry) = weak.upgrade() {
                        registry.settle(&key, Err(err));
                    }
                }
            });
        let subscription = self.store.register_query(resolved, callbacks);

        // Re-read by key: the entry's fields may have been updated (or the
        // entry removed) while registration ran.
        match self.entries.get_mut(&key) {
            Some(mut entry) => entry.subscription = Some(subscription),
            None => (subscription.unregister)(),
        }

        SuspenseLookup::Pending(signal)
    }

    /// Convenience driver for integrations without a real suspension
    /// mechanism: awaits pending signals until the lookup settles.
    ///
    /// # Errors
    ///
    /// Returns the entry's settled error.
    pub async fn resolve(
        self: &Arc<Self>,
        query: &Query,
        options: QueryOptions,
    ) -> Result<SuspenseQueryObserver, DataError> {
        loop {
            match self.lookup(query, options.clone()) {
                SuspenseLookup::Pending(signal) => signal.wait().await,
                SuspenseLookup::Ready(observer) => return Ok(observer),
                SuspenseLookup::Failed(err) => return Err(err),
            }
        }
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Removes every entry, tearing down their store registrations.
    pub fn clear(&self) {
        let keys: Vec<String> = self.entries.iter().map(|entry| entry.key().clone()).collect();
        for key in keys {
            self.remove(&key);
        }
    }

    /// Teardown: clears the registry and rejects all future lookups.
    pub(crate) fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.clear();
    }

    fn subscription_for(&self, key: &str) -> Option<QuerySubscription> {
        self.entries.get(key).and_then(|entry| entry.subscription.clone())
    }

    /// A data push from the store: forwarded to the mounted consumer when
    /// one owns the entry, otherwise it settles the entry.
    fn deliver_data(self: &Arc<Self>, key: &str, value: Value) {
        let forward = self.entries.get(key).and_then(|entry| entry.on_data.clone());
        match forward {
            Some(on_data) => on_data(value),
            None => self.settle(key, Ok(value)),
        }
    }

    fn settle(self: &Arc<Self>, key: &str, outcome: Result<Value, DataError>) {
        let token = CancellationToken::new();
        let settle = {
            let Some(mut entry) = self.entries.get_mut(key) else {
                // Removed while the request was in flight; nothing to do.
                return;
            };
            entry.signal = None;
            match outcome {
                Ok(data) => entry.data = Some(data),
                Err(err) => entry.error = Some(err),
            }
            entry.sweep = Some(token.clone());
            entry.settle.take()
        };
        trace!(%key, "suspense entry settled");
        if let Some(settle) = settle {
            let _ = settle.send(());
        }
        // A consumer might never mount against this entry (the view that
        // asked for it may be gone by now); sweep it after the timeout.
        self.schedule_sweep(key.to_string(), token);
    }

    fn schedule_sweep(self: &Arc<Self>, key: String, token: CancellationToken) {
        let timeout = self.store.options().suspense_query_mount_timeout;
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                () = tokio::time::sleep(timeout) => {
                    if let Some(registry) = weak.upgrade() {
                        registry.remove_if_never_mounted(&key);
                    }
                }
            }
        });
    }

    fn remove_if_never_mounted(&self, key: &str) {
        if let Some((_, entry)) = self.entries.remove_if(key, |_, entry| !entry.mounted) {
            debug!(%key, "sweeping never-mounted suspense entry");
            if let Some(subscription) = entry.subscription {
                (subscription.unregister)();
            }
        }
    }

    /// Explicit removal (mounted consumer unmounted).
    pub(crate) fn remove(&self, key: &str) {
        if let Some((_, entry)) = self.entries.remove(key) {
            debug!(%key, "removing suspense entry");
            if let Some(token) = entry.sweep {
                token.cancel();
            }
            if let Some(subscription) = entry.subscription {
                (subscription.unregister)();
            }
            // Dropping a pending settle sender wakes any waiters.
        }
    }
}

struct SuspenseObserverInner {
    registry: Weak<SuspenseRegistry>,
    key: String,
    resolved: ResolvedQuery,
    tx: watch::Sender<SuspenseState>,
    mounted: AtomicBool,
}

impl SuspenseObserverInner {
    fn dispatch(&self, event: SuspenseEvent) {
        if !self.mounted.load(Ordering::SeqCst) {
            trace!(key = %self.key, ?event, "dropping event for unmounted suspense view");
            return;
        }
        self.tx
            .send_modify(|state| *state = suspense_transition(std::mem::take(state), event));
    }
}

fn overlay_callbacks(
    weak: &Weak<SuspenseObserverInner>,
    request: SuspenseEvent,
    failure: fn(DataError) -> SuspenseEvent,
    success: SuspenseEvent,
) -> QueryCallbacks {
    let on_request = {
        let weak = weak.clone();
        move || {
            if let Some(inner) = weak.upgrade() {
                inner.dispatch(request.clone());
            }
        }
    };
    let on_error = {
        let weak = weak.clone();
        move |err: DataError| {
            if let Some(inner) = weak.upgrade() {
                inner.dispatch(failure(err));
            }
        }
    };
    let on_complete = {
        let weak = weak.clone();
        move || {
            if let Some(inner) = weak.upgrade() {
                inner.dispatch(success.clone());
            }
        }
    };
    QueryCallbacks::new()
        .on_request(on_request)
        .on_error(on_error)
        .on_complete(on_complete)
}

/// Live view over a settled suspense entry.
///
/// Created by [`SuspenseRegistry::lookup`] when the entry holds data. The
/// most recently created view owns the entry's data pushes; dropping (or
/// unmounting) the view removes the entry and its store registration.
pub struct SuspenseQueryObserver {
    inner: Arc<SuspenseObserverInner>,
}

impl SuspenseQueryObserver {
    fn new(
        registry: Weak<SuspenseRegistry>,
        key: String,
        resolved: ResolvedQuery,
        data: Value,
    ) -> Self {
        let initial = SuspenseState {
            data,
            ..SuspenseState::default()
        };
        Self {
            inner: Arc::new(SuspenseObserverInner {
                registry,
                key,
                resolved,
                tx: watch::channel(initial).0,
                mounted: AtomicBool::new(true),
            }),
        }
    }

    /// The entry callback receiving subsequent data pushes (merge results,
    /// related-query updates). Unmounted views drop pushes silently.
    fn data_callback(&self) -> Arc<dyn Fn(Value) + Send + Sync> {
        let weak = Arc::downgrade(&self.inner);
        Arc::new(move |value| {
            if let Some(inner) = weak.upgrade() {
                inner.dispatch(SuspenseEvent::Data(value));
            }
        })
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.inner.key
    }

    #[must_use]
    pub fn state(&self) -> SuspenseState {
        self.inner.tx.borrow().clone()
    }

    #[must_use]
    pub fn watch(&self) -> watch::Receiver<SuspenseState> {
        self.inner.tx.subscribe()
    }

    /// Re-runs the entry's request without re-suspending: progress is
    /// reported through `refetching`/`refetch_error`.
    ///
    /// # Errors
    ///
    /// Fails with [`DataError::Registration`] when the owning registry is
    /// gone, or [`DataError::NotReady`] when the entry has no registration.
    pub fn refetch(&self) -> Result<(), DataError> {
        let registry = self
            .inner
            .registry
            .upgrade()
            .ok_or_else(|| DataError::registration("suspense registry dropped"))?;
        let subscription = registry
            .subscription_for(&self.inner.key)
            .ok_or(DataError::NotReady("refetch"))?;
        let callbacks = overlay_callbacks(
            &Arc::downgrade(&self.inner),
            SuspenseEvent::RefetchRequest,
            SuspenseEvent::RefetchFailure,
            SuspenseEvent::RefetchSuccess,
        );
        (subscription.refetch)(callbacks);
        Ok(())
    }

    /// Fetches a continuation without re-suspending: progress is reported
    /// through `fetching_more`/`fetch_more_error`, merged data arrives as a
    /// data push.
    ///
    /// # Errors
    ///
    /// Same conditions as [`refetch`](Self::refetch).
    pub fn fetch_more(&self, options: FetchMoreOptions) -> Result<(), DataError> {
        let registry = self
            .inner
            .registry
            .upgrade()
            .ok_or_else(|| DataError::registration("suspense registry dropped"))?;
        let subscription = registry
            .subscription_for(&self.inner.key)
            .ok_or(DataError::NotReady("fetch_more"))?;
        let next = resolve_continuation(&self.inner.resolved, options);
        let callbacks = overlay_callbacks(
            &Arc::downgrade(&self.inner),
            SuspenseEvent::FetchMoreRequest,
            SuspenseEvent::FetchMoreFailure,
            SuspenseEvent::FetchMoreSuccess,
        );
        (subscription.fetch_more)(next, callbacks);
        Ok(())
    }

    /// Removes the entry and its store registration.
    pub fn unmount(&self) {
        self.inner.mounted.store(false, Ordering::SeqCst);
        if let Some(registry) = self.inner.registry.upgrade() {
            registry.remove(&self.inner.key);
        }
    }
}

impl Drop for SuspenseQueryObserver {
    fn drop(&mut self) {
        self.unmount();
    }
}
