//! Local query observer: store-resident data, no fetching.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::watch;

use crate::query::LocalQuery;
use crate::store::{LocalQueryCallbacks, LocalQuerySubscription, Store};

struct LocalObserverInner {
    tx: watch::Sender<Option<Value>>,
    mounted: AtomicBool,
    subscription: Mutex<Option<LocalQuerySubscription>>,
}

/// Observes a slice of the store's local state (`run_local_query`).
///
/// The store pushes the current value on registration and again on every
/// local-state change. Dropping the observer unregisters it.
pub struct LocalQueryObserver {
    inner: Arc<LocalObserverInner>,
}

impl LocalQueryObserver {
    pub(crate) fn new(store: Arc<dyn Store>, query: &LocalQuery) -> Self {
        let inner = Arc::new(LocalObserverInner {
            tx: watch::channel(None).0,
            mounted: AtomicBool::new(true),
            subscription: Mutex::new(None),
        });

        let weak = Arc::downgrade(&inner);
        let callbacks = LocalQueryCallbacks::new(move |data| {
            let Some(inner) = weak.upgrade() else { return };
            if inner.mounted.load(Ordering::SeqCst) {
                inner.tx.send_replace(Some(data));
            }
        });
        let subscription = store.register_local_query(query.clone(), callbacks);
        *inner.subscription.lock() = Some(subscription);

        Self { inner }
    }

    /// The most recently delivered value, if any.
    #[must_use]
    pub fn data(&self) -> Option<Value> {
        self.inner.tx.borrow().clone()
    }

    #[must_use]
    pub fn watch(&self) -> watch::Receiver<Option<Value>> {
        self.inner.tx.subscribe()
    }

    pub fn unmount(&self) {
        self.inner.mounted.store(false, Ordering::SeqCst);
        if let Some(subscription) = self.inner.subscription.lock().take() {
            (subscription.unregister)();
        }
    }
}

impl Drop for LocalQueryObserver {
    fn drop(&mut self) {
        self.unmount();
    }
}
