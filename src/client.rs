//! The client facade.
//!
//! [`DataClient`] wraps a [`Store`] and hands out observers for every kind
//! of operation. It owns the suspense registry for its store, so suspense
//! entries are scoped to the client and torn down with it.

use std::sync::Arc;

use serde_json::Value;

use crate::error::DataError;
use crate::mutation::{LocalMutation, Mutation, MutationOptions};
use crate::observer::lazy::LazyQueryObserver;
use crate::observer::local::LocalQueryObserver;
use crate::observer::local_mutation::LocalMutationObserver;
use crate::observer::mutation::MutationObserver;
use crate::observer::query::QueryObserver;
use crate::query::{LocalQuery, Query, QueryOptions};
use crate::store::Store;
use crate::suspense::{SuspenseLookup, SuspenseQueryObserver, SuspenseRegistry};

/// Entry point for consumers: one client per store.
pub struct DataClient {
    store: Arc<dyn Store>,
    suspense: Arc<SuspenseRegistry>,
}

impl DataClient {
    pub fn new(store: Arc<dyn Store>) -> Self {
        let suspense = SuspenseRegistry::new(store.clone());
        Self { store, suspense }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Opens a standing query registration that loads immediately.
    #[must_use]
    pub fn run_query(&self, query: &Query, options: QueryOptions) -> QueryObserver {
        QueryObserver::new(self.store.clone(), query, options)
    }

    /// Creates a query observer that stays idle until `load` is called.
    #[must_use]
    pub fn run_lazy_query(&self, query: &Query) -> LazyQueryObserver {
        LazyQueryObserver::new(self.store.clone(), query)
    }

    /// Observes a slice of the store's local state.
    #[must_use]
    pub fn run_local_query(&self, query: &LocalQuery) -> LocalQueryObserver {
        LocalQueryObserver::new(self.store.clone(), query)
    }

    /// One lookup against the suspense registry: pending, ready, or failed.
    #[must_use]
    pub fn run_suspense_query(&self, query: &Query, options: QueryOptions) -> SuspenseLookup {
        self.suspense.lookup(query, options)
    }

    /// Awaits the suspense entry until it settles with data or an error.
    ///
    /// # Errors
    ///
    /// Returns the entry's settled error.
    pub async fn suspense_query(
        &self,
        query: &Query,
        options: QueryOptions,
    ) -> Result<SuspenseQueryObserver, DataError> {
        self.suspense.resolve(query, options).await
    }

    #[must_use]
    pub fn suspense_registry(&self) -> &Arc<SuspenseRegistry> {
        &self.suspense
    }

    /// Creates a one-shot mutation executor.
    #[must_use]
    pub fn run_mutation(&self, mutation: &Mutation, options: MutationOptions) -> MutationObserver {
        MutationObserver::new(self.store.clone(), mutation, options)
    }

    /// Creates an executor for store-only mutations.
    #[must_use]
    pub fn run_local_mutation(&self, mutation: &LocalMutation) -> LocalMutationObserver {
        LocalMutationObserver::new(self.store.clone(), mutation)
    }

    /// Writes a query result directly into the store.
    pub fn set_query_data(&self, query: &Query, options: QueryOptions, data: Value) {
        let resolved = query.resolve(options);
        self.store.set_query_data(&resolved, data);
    }

    /// Clears store data and the suspense registry, re-running whatever is
    /// still registered.
    pub fn reset(&self) {
        self.suspense.clear();
        self.store.reset();
    }
}

impl Drop for DataClient {
    fn drop(&mut self) {
        self.suspense.shutdown();
    }
}
