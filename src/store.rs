//! The external store collaborator contract.
//!
//! The crate orchestrates request lifecycles; the normalized object store
//! itself (identity resolution, merge-on-write, invalidation of related
//! queries, persistence) lives behind the [`Store`] trait. The store
//! drives registrations through standing callbacks and hands back
//! on-demand `refetch`/`fetch_more` operations.
//!
//! Delivery contract: `on_request` may fire inline during registration;
//! all other callbacks are delivered asynchronously from store tasks and
//! may arrive after the registering consumer has gone away (consumers gate
//! on their own mounted flag).

pub mod mock;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::error::DataError;
use crate::mutation::{ResolvedLocalMutation, ResolvedMutation};
use crate::query::{LocalQuery, ResolvedQuery};

/// Store-level configuration consumed by this crate.
#[derive(Clone, Debug)]
pub struct StoreOptions {
    /// How long a settled suspense registry entry waits for a consumer to
    /// mount before it is swept.
    pub suspense_query_mount_timeout: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            suspense_query_mount_timeout: Duration::from_secs(5),
        }
    }
}

/// Standing callbacks for a query registration.
///
/// All callbacks default to no-ops; set only the ones a registration cares
/// about. The same shape is reused for the `refetch`/`fetch_more`
/// sub-operations, which only ever drive `on_request`/`on_error`/
/// `on_complete` (new data flows through the registration's `on_data`).
#[derive(Clone)]
pub struct QueryCallbacks {
    pub on_request: Arc<dyn Fn() + Send + Sync>,
    pub on_data: Arc<dyn Fn(Value) + Send + Sync>,
    pub on_error: Arc<dyn Fn(DataError) + Send + Sync>,
    pub on_complete: Arc<dyn Fn() + Send + Sync>,
}

impl Default for QueryCallbacks {
    fn default() -> Self {
        Self {
            on_request: Arc::new(|| {}),
            on_data: Arc::new(|_| {}),
            on_error: Arc::new(|_| {}),
            on_complete: Arc::new(|| {}),
        }
    }
}

impl QueryCallbacks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn on_request(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_request = Arc::new(f);
        self
    }

    #[must_use]
    pub fn on_data(mut self, f: impl Fn(Value) + Send + Sync + 'static) -> Self {
        self.on_data = Arc::new(f);
        self
    }

    #[must_use]
    pub fn on_error(mut self, f: impl Fn(DataError) + Send + Sync + 'static) -> Self {
        self.on_error = Arc::new(f);
        self
    }

    #[must_use]
    pub fn on_complete(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_complete = Arc::new(f);
        self
    }
}

impl fmt::Debug for QueryCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("QueryCallbacks")
    }
}

/// Handle returned by [`Store::register_query`].
#[derive(Clone)]
pub struct QuerySubscription {
    /// Tears down the registration. Must be idempotent.
    pub unregister: Arc<dyn Fn() + Send + Sync>,
    /// Re-runs the registered request; progress is reported through the
    /// supplied callbacks, new data through the registration's `on_data`.
    pub refetch: Arc<dyn Fn(QueryCallbacks) + Send + Sync>,
    /// Fetches a continuation described by the given resolved query and
    /// merges it into the registered request's data.
    pub fetch_more: Arc<dyn Fn(ResolvedQuery, QueryCallbacks) + Send + Sync>,
}

impl fmt::Debug for QuerySubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("QuerySubscription")
    }
}

/// Callbacks for a local (store-resident) query registration.
#[derive(Clone)]
pub struct LocalQueryCallbacks {
    pub on_data: Arc<dyn Fn(Value) + Send + Sync>,
}

impl LocalQueryCallbacks {
    pub fn new(on_data: impl Fn(Value) + Send + Sync + 'static) -> Self {
        Self {
            on_data: Arc::new(on_data),
        }
    }
}

/// Handle returned by [`Store::register_local_query`].
#[derive(Clone)]
pub struct LocalQuerySubscription {
    pub unregister: Arc<dyn Fn() + Send + Sync>,
}

/// Callbacks for a one-shot mutation execution.
///
/// `on_request` receives the mutation's optimistic response when one was
/// supplied, so consumers can show the provisional result while the effect
/// is still in flight.
#[derive(Clone)]
pub struct MutationCallbacks {
    pub on_request: Arc<dyn Fn(Option<Value>) + Send + Sync>,
    pub on_error: Arc<dyn Fn(DataError) + Send + Sync>,
    pub on_complete: Arc<dyn Fn(Value) + Send + Sync>,
}

impl Default for MutationCallbacks {
    fn default() -> Self {
        Self {
            on_request: Arc::new(|_| {}),
            on_error: Arc::new(|_| {}),
            on_complete: Arc::new(|_| {}),
        }
    }
}

impl MutationCallbacks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn on_request(mut self, f: impl Fn(Option<Value>) + Send + Sync + 'static) -> Self {
        self.on_request = Arc::new(f);
        self
    }

    #[must_use]
    pub fn on_error(mut self, f: impl Fn(DataError) + Send + Sync + 'static) -> Self {
        self.on_error = Arc::new(f);
        self
    }

    #[must_use]
    pub fn on_complete(mut self, f: impl Fn(Value) + Send + Sync + 'static) -> Self {
        self.on_complete = Arc::new(f);
        self
    }
}

/// Callbacks for a local mutation. Fired only after store-side side effects
/// (`after_query_updates`) have completed or rejected.
#[derive(Clone)]
pub struct LocalMutationCallbacks {
    pub on_error: Arc<dyn Fn(DataError) + Send + Sync>,
    pub on_complete: Arc<dyn Fn() + Send + Sync>,
}

impl Default for LocalMutationCallbacks {
    fn default() -> Self {
        Self {
            on_error: Arc::new(|_| {}),
            on_complete: Arc::new(|| {}),
        }
    }
}

impl LocalMutationCallbacks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn on_error(mut self, f: impl Fn(DataError) + Send + Sync + 'static) -> Self {
        self.on_error = Arc::new(f);
        self
    }

    #[must_use]
    pub fn on_complete(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_complete = Arc::new(f);
        self
    }
}

/// The normalized object store this crate orchestrates against.
pub trait Store: Send + Sync {
    /// Opens a standing registration for a resolved query. The store fetches
    /// (or serves from cache, per the query's fetch policy) and drives the
    /// callbacks; the returned handle carries teardown and the on-demand
    /// `refetch`/`fetch_more` operations.
    fn register_query(&self, query: ResolvedQuery, callbacks: QueryCallbacks)
        -> QuerySubscription;

    /// Opens a registration for a store-resident query. `on_data` fires with
    /// the current value immediately and again on every local-state change.
    fn register_local_query(
        &self,
        query: LocalQuery,
        callbacks: LocalQueryCallbacks,
    ) -> LocalQuerySubscription;

    /// Executes a mutation. One-shot: the callbacks fire exactly once for
    /// request and once for settlement.
    fn process_mutation(&self, mutation: ResolvedMutation, callbacks: MutationCallbacks);

    /// Executes a mutation purely against local state. When the store can
    /// run it synchronously, the callbacks fire before this returns.
    fn process_local_mutation(
        &self,
        mutation: ResolvedLocalMutation,
        callbacks: LocalMutationCallbacks,
    );

    /// Writes a query result directly, notifying active registrations for
    /// the same key.
    fn set_query_data(&self, query: &ResolvedQuery, data: Value);

    /// Clears all cached data and re-runs active registrations.
    fn reset(&self);

    /// Snapshot of the store's state, for debugging and tests.
    fn state(&self) -> Value;

    fn options(&self) -> StoreOptions;
}
