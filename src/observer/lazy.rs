//! Lazy query observer: registration deferred until an explicit trigger.

use std::sync::Arc;

use tokio::sync::watch;

use crate::deps::DepSnapshot;
use crate::error::DataError;
use crate::loading::LoadingState;
use crate::observer::query::{register_query, QueryObserverInner};
use crate::query::{FetchMoreOptions, Query, QueryOptions};
use crate::store::Store;

/// A query observer that stays idle until [`load`](Self::load) is called
/// (`run_lazy_query`).
///
/// Calling `load` again before the previous registration was torn down
/// unregisters it first: last call wins, two subscriptions never overlap.
pub struct LazyQueryObserver {
    inner: Arc<QueryObserverInner>,
    query: Query,
}

impl LazyQueryObserver {
    pub(crate) fn new(store: Arc<dyn Store>, query: &Query) -> Self {
        let resolved = query.resolve(QueryOptions::new());
        Self {
            inner: QueryObserverInner::new(store, resolved),
            query: query.clone(),
        }
    }

    /// Resolves the query with the given options and registers it with the
    /// store, tearing down any still-pending previous registration first.
    pub fn load(&self, options: QueryOptions) {
        self.inner.unregister();

        let resolved = self.query.resolve(options);
        *self.inner.deps.lock() = DepSnapshot::new(
            self.inner.store.clone(),
            self.query.clone(),
            resolved.arguments.clone(),
        );
        *self.inner.resolved.lock() = resolved.clone();
        register_query(&self.inner, resolved);
    }

    #[must_use]
    pub fn state(&self) -> LoadingState {
        self.inner.tx.borrow().clone()
    }

    #[must_use]
    pub fn watch(&self) -> watch::Receiver<LoadingState> {
        self.inner.tx.subscribe()
    }

    /// Re-runs the loaded request.
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

    pub fn unmount(&self) {
        self.inner.unmount();
    }
}

impl Drop for LazyQueryObserver {
    fn drop(&mut self) {
        self.inner.unmount();
    }
}
