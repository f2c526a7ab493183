//! Standing query observer and the registration bridge.
//!
//! [`QueryObserver`] opens exactly one store registration for a resolved
//! query and keeps it in sync with the consumer's inputs: when the store,
//! the query identity, or the structural value of the arguments changes,
//! the old registration is torn down before a new one is opened. Context
//! changes alone never re-register (see [`crate::deps`]).
//!
//! The bridge converts the store's standing callbacks into
//! [`LoadingEvent`]s:
//!
//! - `on_request` → `Request`
//! - `on_data(payload)` → `Data(payload)`
//! - `on_error(err)` → `Failure(err)`
//! - `on_complete` → `Success`, arming `refetch`/`fetch_more` delegates
//!   that drive the overlay sub-states through the store's on-demand
//!   operations.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::trace;

use crate::deps::DepSnapshot;
use crate::error::DataError;
use crate::loading::{transition, LoadingEvent, LoadingState};
use crate::query::{FetchMoreOptions, Query, QueryOptions, ResolvedQuery};
use crate::store::{QueryCallbacks, QuerySubscription, Store};

pub(crate) struct QueryObserverInner {
    pub(crate) store: Arc<dyn Store>,
    pub(crate) tx: watch::Sender<LoadingState>,
    pub(crate) mounted: AtomicBool,
    pub(crate) subscription: Mutex<Option<QuerySubscription>>,
    pub(crate) resolved: Mutex<ResolvedQuery>,
    pub(crate) deps: Mutex<DepSnapshot>,
}

impl QueryObserverInner {
    pub(crate) fn new(store: Arc<dyn Store>, resolved: ResolvedQuery) -> Arc<Self> {
        let deps = DepSnapshot::new(store.clone(), resolved.query().clone(), resolved.arguments.clone());
        Arc::new(Self {
            store,
            tx: watch::channel(LoadingState::default()).0,
            mounted: AtomicBool::new(true),
            subscription: Mutex::new(None),
            resolved: Mutex::new(resolved),
            deps: Mutex::new(deps),
        })
    }

    pub(crate) fn dispatch(&self, event: LoadingEvent) {
        if !self.mounted.load(Ordering::SeqCst) {
            trace!(?event, "dropping event for unmounted observer");
            return;
        }
        self.tx
            .send_modify(|state| *state = transition(std::mem::take(state), event));
    }

    /// Idempotent teardown of the current registration.
    pub(crate) fn unregister(&self) {
        if let Some(subscription) = self.subscription.lock().take() {
            (subscription.unregister)();
        }
    }

    pub(crate) fn unmount(&self) {
        self.mounted.store(false, Ordering::SeqCst);
        self.unregister();
    }
}

/// Builds the delegates armed by `Success`. They read the live subscription
/// by key at call time rather than capturing it, so a registration replaced
/// in place is always the one driven.
fn make_delegates(
    inner: &Arc<QueryObserverInner>,
) -> (Arc<dyn Fn() + Send + Sync>, Arc<dyn Fn(FetchMoreOptions) + Send + Sync>) {
    let refetch = {
        let weak = Arc::downgrade(inner);
        Arc::new(move || {
            let Some(inner) = weak.upgrade() else { return };
            let Some(subscription) = inner.subscription.lock().clone() else {
                return;
            };
            let callbacks = overlay_callbacks(
                &weak,
                LoadingEvent::RefetchRequest,
                LoadingEvent::RefetchFailure,
                LoadingEvent::RefetchSuccess,
            );
            (subscription.refetch)(callbacks);
        }) as Arc<dyn Fn() + Send + Sync>
    };

    let fetch_more = {
        let weak = Arc::downgrade(inner);
        Arc::new(move |options: FetchMoreOptions| {
            let Some(inner) = weak.upgrade() else { return };
            let Some(subscription) = inner.subscription.lock().clone() else {
                return;
            };
            let base = inner.resolved.lock().clone();
            let next = resolve_continuation(&base, options);
            let callbacks = overlay_callbacks(
                &weak,
                LoadingEvent::FetchMoreRequest,
                LoadingEvent::FetchMoreFailure,
                LoadingEvent::FetchMoreSuccess,
            );
            (subscription.fetch_more)(next, callbacks);
        }) as Arc<dyn Fn(FetchMoreOptions) + Send + Sync>
    };

    (refetch, fetch_more)
}

/// Resolves the next page's request: an explicit query override (or the
/// registered query) with the continuation's arguments/context applied.
pub(crate) fn resolve_continuation(base: &ResolvedQuery, options: FetchMoreOptions) -> ResolvedQuery {
    let query = options.query.unwrap_or_else(|| base.query().clone());
    let mut next = QueryOptions::new();
    next.arguments = options.arguments;
    next.context = options.context;
    query.resolve(next)
}

fn overlay_callbacks(
    weak: &Weak<QueryObserverInner>,
    request: LoadingEvent,
    failure: fn(DataError) -> LoadingEvent,
    success: LoadingEvent,
) -> QueryCallbacks {
    let on_request = {
        let weak = weak.clone();
        let event = Mutex::new(Some(request));
        move || {
            if let (Some(inner), Some(event)) = (weak.upgrade(), event.lock().take()) {
                inner.dispatch(event);
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
        let event = Mutex::new(Some(success));
        move || {
            if let (Some(inner), Some(event)) = (weak.upgrade(), event.lock().take()) {
                inner.dispatch(event);
            }
        }
    };
    QueryCallbacks::new()
        .on_request(on_request)
        .on_error(on_error)
        .on_complete(on_complete)
}

/// Opens the store registration for `query` and wires its callbacks into
/// the observer's state machine. Shared by the standing and lazy observers.
pub(crate) fn register_query(inner: &Arc<QueryObserverInner>, query: ResolvedQuery) {
    let weak = Arc::downgrade(inner);

    let on_request = {
        let weak = weak.clone();
        move || {
            if let Some(inner) = weak.upgrade() {
                inner.dispatch(LoadingEvent::Request);
            }
        }
    };
    let on_data = {
        let weak = weak.clone();
        move |data| {
            if let Some(inner) = weak.upgrade() {
                inner.dispatch(LoadingEvent::Data(data));
            }
        }
    };
    let on_error = {
        let weak = weak.clone();
        move |err| {
            if let Some(inner) = weak.upgrade() {
                inner.dispatch(LoadingEvent::Failure(err));
            }
        }
    };
    let on_complete = {
        let weak = weak.clone();
        move || {
            let Some(inner) = weak.upgrade() else { return };
            let (refetch, fetch_more) = make_delegates(&inner);
            inner.dispatch(LoadingEvent::Success { refetch, fetch_more });
        }
    };

    let callbacks = QueryCallbacks::new()
        .on_request(on_request)
        .on_data(on_data)
        .on_error(on_error)
        .on_complete(on_complete);

    let subscription = inner.store.register_query(query, callbacks);
    *inner.subscription.lock() = Some(subscription);
}

/// A standing, observable query registration (`run_query`).
///
/// Dropping the observer unmounts it.
pub struct QueryObserver {
    inner: Arc<QueryObserverInner>,
}

impl QueryObserver {
    pub(crate) fn new(store: Arc<dyn Store>, query: &Query, options: QueryOptions) -> Self {
        let resolved = query.resolve(options);
        let inner = QueryObserverInner::new(store, resolved.clone());
        register_query(&inner, resolved);
        Self { inner }
    }

    /// Current state snapshot.
    #[must_use]
    pub fn state(&self) -> LoadingState {
        self.inner.tx.borrow().clone()
    }

    /// A receiver that observes every state change.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<LoadingState> {
        self.inner.tx.subscribe()
    }

    /// Applies new options for the same query, re-registering only when
    /// the dependency snapshot semantically changed.
    pub fn set_options(&self, options: QueryOptions) {
        let query = self.inner.resolved.lock().query().clone();
        let resolved = query.resolve(options);
        let next = DepSnapshot::new(
            self.inner.store.clone(),
            query,
            resolved.arguments.clone(),
        );

        let changed = self.inner.deps.lock().changed(&next);
        if !changed {
            trace!("options unchanged, keeping registration");
            return;
        }

        // Tear down before re-registering so two subscriptions never
        // coexist for this observer.
        self.inner.unregister();
        *self.inner.deps.lock() = next;
        *self.inner.resolved.lock() = resolved.clone();
        register_query(&self.inner, resolved);
    }

    /// Re-runs the primary request.
    ///
    /// # Errors
    ///
    /// Fails with [`DataError::NotReady`] before the first successful load.
    pub fn refetch(&self) -> Result<(), DataError> {
        self.state().refetch()
    }

    /// Fetches a paginated continuation.
    ///
    /// # Errors
    ///
    /// Fails with [`DataError::NotReady`] before the first successful load.
    pub fn fetch_more(&self, options: FetchMoreOptions) -> Result<(), DataError> {
        self.state().fetch_more(options)
    }

    /// Tears down the registration and suppresses any late settlement.
    pub fn unmount(&self) {
        self.inner.unmount();
    }
}

impl Drop for QueryObserver {
    fn drop(&mut self) {
        self.inner.unmount();
    }
}
