//! In-memory store for testing and demos.
//!
//! `MockStore` implements just enough of the [`Store`] contract to exercise
//! the orchestration layer: a keyed result cache with per-query expiry, a
//! local-state map with change notification, and asynchronous delivery of
//! fetch results through spawned tasks. It is designed to be shared between
//! application code and test code, and exposes counters so tests can assert
//! on registration behavior (e.g. request deduplication).
//!
//! Delivery ordering follows the store contract: `on_request` fires inline
//! during `register_query`; `on_data`/`on_error`/`on_complete` always
//! arrive from a spawned task.
//!
//! # Example
//!
//! ```rust,ignore
//! use loadstone::store::mock::MockStore;
//!
//! let store = Arc::new(MockStore::new());
//! let client = DataClient::new(store.clone());
//! // ... run queries ...
//! assert_eq!(store.register_count(), 1);
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::mutation::{ResolvedLocalMutation, ResolvedMutation};
use crate::query::{FetchPolicy, LocalQuery, ResolvedQuery};
use crate::store::{
    LocalMutationCallbacks, LocalQueryCallbacks, LocalQuerySubscription, MutationCallbacks,
    QueryCallbacks, QuerySubscription, Store, StoreOptions,
};

/// A cached query result with its write timestamp.
#[derive(Clone, Debug)]
struct CachedValue {
    data: Value,
    stored_at: Instant,
}

impl CachedValue {
    fn new(data: Value) -> Self {
        Self {
            data,
            stored_at: Instant::now(),
        }
    }

    fn is_expired(&self, expiry: Option<Duration>) -> bool {
        expiry.is_some_and(|expiry| self.stored_at.elapsed() > expiry)
    }
}

struct Registration {
    id: u64,
    query: ResolvedQuery,
    callbacks: QueryCallbacks,
    cancelled: AtomicBool,
}

impl Registration {
    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

struct LocalWatcher {
    id: u64,
    query: LocalQuery,
    callbacks: LocalQueryCallbacks,
}

struct MockInner {
    cache: DashMap<String, CachedValue>,
    local_state: Mutex<Map<String, Value>>,
    local_watchers: Mutex<Vec<LocalWatcher>>,
    active: Mutex<Vec<Arc<Registration>>>,
    register_count: AtomicUsize,
    next_id: AtomicU64,
    options: StoreOptions,
}

/// An in-memory [`Store`] with asynchronous result delivery.
#[derive(Clone)]
pub struct MockStore {
    inner: Arc<MockInner>,
}

impl MockStore {
    #[must_use]
    pub fn new() -> Self {
        Self::with_options(StoreOptions::default())
    }

    #[must_use]
    pub fn with_options(options: StoreOptions) -> Self {
        Self {
            inner: Arc::new(MockInner {
                cache: DashMap::new(),
                local_state: Mutex::new(Map::new()),
                local_watchers: Mutex::new(Vec::new()),
                active: Mutex::new(Vec::new()),
                register_count: AtomicUsize::new(0),
                next_id: AtomicU64::new(0),
                options,
            }),
        }
    }

    /// Total number of `register_query` calls this store has seen.
    #[must_use]
    pub fn register_count(&self) -> usize {
        self.inner.register_count.load(Ordering::SeqCst)
    }

    /// Number of registrations that have not been unregistered yet.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.inner
            .active
            .lock()
            .iter()
            .filter(|reg| !reg.is_cancelled())
            .count()
    }

    /// The cached result for a dedup key, if any.
    #[must_use]
    pub fn cached(&self, key: &str) -> Option<Value> {
        self.inner.cache.get(key).map(|entry| entry.data.clone())
    }
}

impl Default for MockStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MockInner {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Delivers the result of a registration's primary fetch, honoring the
    /// query's fetch policy and cache expiry.
    fn spawn_resolve(self: &Arc<Self>, reg: Arc<Registration>) {
        let inner = self.clone();
        tokio::spawn(async move {
            let key = reg.query.key();
            let cached = inner
                .cache
                .get(&key)
                .filter(|entry| !entry.is_expired(reg.query.expiry))
                .map(|entry| entry.data.clone());

            match (reg.query.fetch_policy, cached) {
                (FetchPolicy::CacheFirst, Some(data)) => {
                    if !reg.is_cancelled() {
                        (reg.callbacks.on_data)(data);
                        (reg.callbacks.on_complete)();
                    }
                    return;
                }
                (FetchPolicy::CacheAndNetwork, Some(data)) => {
                    if !reg.is_cancelled() {
                        (reg.callbacks.on_data)(data);
                    }
                }
                _ => {}
            }

            match reg.query.fetch().await {
                Ok(data) => {
                    inner.cache.insert(key, CachedValue::new(data.clone()));
                    if !reg.is_cancelled() {
                        (reg.callbacks.on_data)(data);
                        (reg.callbacks.on_complete)();
                    }
                }
                Err(err) => {
                    if !reg.is_cancelled() {
                        (reg.callbacks.on_error)(err);
                    }
                }
            }
        });
    }

    fn notify_local_watchers(&self) {
        let watchers = self.local_watchers.lock();
        let state = self.local_state.lock().clone();
        for watcher in watchers.iter() {
            (watcher.callbacks.on_data)(local_value(&state, &watcher.query));
        }
    }
}

fn local_value(state: &Map<String, Value>, query: &LocalQuery) -> Value {
    state
        .get(query.name())
        .cloned()
        .or_else(|| query.initial().cloned())
        .unwrap_or(Value::Null)
}

impl Store for MockStore {
    fn register_query(
        &self,
        query: ResolvedQuery,
        callbacks: QueryCallbacks,
    ) -> QuerySubscription {
        let inner = &self.inner;
        inner.register_count.fetch_add(1, Ordering::SeqCst);
        debug!(key = %query.key(), "register query");

        let reg = Arc::new(Registration {
            id: inner.next_id(),
            query,
            callbacks,
            cancelled: AtomicBool::new(false),
        });
        inner.active.lock().push(reg.clone());

        (reg.callbacks.on_request)();
        inner.spawn_resolve(reg.clone());

        let unregister = {
            let inner = inner.clone();
            let reg = reg.clone();
            Arc::new(move || {
                if !reg.cancelled.swap(true, Ordering::SeqCst) {
                    debug!(key = %reg.query.key(), "unregister query");
                    inner.active.lock().retain(|active| active.id != reg.id);
                }
            })
        };

        let refetch = {
            let inner = inner.clone();
            let reg = reg.clone();
            Arc::new(move |cb: QueryCallbacks| {
                (cb.on_request)();
                let inner = inner.clone();
                let reg = reg.clone();
                tokio::spawn(async move {
                    match reg.query.fetch().await {
                        Ok(data) => {
                            inner
                                .cache
                                .insert(reg.query.key(), CachedValue::new(data.clone()));
                            if !reg.is_cancelled() {
                                (reg.callbacks.on_data)(data);
                                (cb.on_complete)();
                            }
                        }
                        Err(err) => {
                            if !reg.is_cancelled() {
                                (cb.on_error)(err);
                            }
                        }
                    }
                });
            })
        };

        let fetch_more = {
            let inner = inner.clone();
            let reg = reg.clone();
            Arc::new(move |next: ResolvedQuery, cb: QueryCallbacks| {
                (cb.on_request)();
                let inner = inner.clone();
                let reg = reg.clone();
                tokio::spawn(async move {
                    match next.fetch().await {
                        Ok(incoming) => {
                            let key = reg.query.key();
                            let existing = inner
                                .cache
                                .get(&key)
                                .map(|entry| entry.data.clone())
                                .unwrap_or(Value::Null);
                            let merged = next.merge(existing, incoming);
                            inner.cache.insert(key, CachedValue::new(merged.clone()));
                            if !reg.is_cancelled() {
                                (reg.callbacks.on_data)(merged);
                                (cb.on_complete)();
                            }
                        }
                        Err(err) => {
                            if !reg.is_cancelled() {
                                (cb.on_error)(err);
                            }
                        }
                    }
                });
            })
        };

        QuerySubscription {
            unregister,
            refetch,
            fetch_more,
        }
    }

    fn register_local_query(
        &self,
        query: LocalQuery,
        callbacks: LocalQueryCallbacks,
    ) -> LocalQuerySubscription {
        let inner = &self.inner;
        let id = inner.next_id();
        let current = local_value(&inner.local_state.lock(), &query);
        (callbacks.on_data)(current);
        inner.local_watchers.lock().push(LocalWatcher {
            id,
            query,
            callbacks,
        });

        let unregister = {
            let inner = inner.clone();
            Arc::new(move || {
                inner.local_watchers.lock().retain(|w| w.id != id);
            })
        };
        LocalQuerySubscription { unregister }
    }

    fn process_mutation(&self, mutation: ResolvedMutation, callbacks: MutationCallbacks) {
        (callbacks.on_request)(mutation.optimistic_response.clone());
        tokio::spawn(async move {
            match mutation.effect().await {
                Ok(data) => (callbacks.on_complete)(data),
                Err(err) => (callbacks.on_error)(err),
            }
        });
    }

    fn process_local_mutation(
        &self,
        mutation: ResolvedLocalMutation,
        callbacks: LocalMutationCallbacks,
    ) {
        let inner = &self.inner;
        {
            let mut state = inner.local_state.lock();
            mutation.update(&mut state);
        }
        inner.notify_local_watchers();
        match mutation.after_query_updates() {
            Ok(()) => (callbacks.on_complete)(),
            Err(err) => (callbacks.on_error)(err),
        }
    }

    fn set_query_data(&self, query: &ResolvedQuery, data: Value) {
        let key = query.key();
        self.inner
            .cache
            .insert(key.clone(), CachedValue::new(data.clone()));
        let active = self.inner.active.lock().clone();
        for reg in active {
            if !reg.is_cancelled() && reg.query.key() == key {
                (reg.callbacks.on_data)(data.clone());
            }
        }
    }

    fn reset(&self) {
        debug!("reset store");
        self.inner.cache.clear();
        self.inner.local_state.lock().clear();
        self.inner.notify_local_watchers();
        let active = self.inner.active.lock().clone();
        for reg in active {
            if !reg.is_cancelled() {
                (reg.callbacks.on_request)();
                self.inner.spawn_resolve(reg);
            }
        }
    }

    fn state(&self) -> Value {
        let queries: Map<String, Value> = self
            .inner
            .cache
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().data.clone()))
            .collect();
        json!({
            "queries": queries,
            "locals": Value::Object(self.inner.local_state.lock().clone()),
        })
    }

    fn options(&self) -> StoreOptions {
        self.inner.options.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{Query, QueryOptions};

    #[test]
    fn test_cached_value_expiry() {
        let entry = CachedValue::new(json!(1));
        assert!(!entry.is_expired(None));
        assert!(!entry.is_expired(Some(Duration::from_secs(60))));
        std::thread::sleep(Duration::from_millis(5));
        assert!(entry.is_expired(Some(Duration::from_millis(1))));
    }

    #[test]
    fn test_local_value_falls_back_to_initial_then_null() {
        let state = Map::new();
        let bare = LocalQuery::new("Counter");
        assert_eq!(local_value(&state, &bare), Value::Null);

        let seeded = LocalQuery::new("Counter").with_initial(json!(0));
        assert_eq!(local_value(&state, &seeded), json!(0));

        let mut state = Map::new();
        state.insert("Counter".into(), json!(3));
        assert_eq!(local_value(&state, &seeded), json!(3));
    }

    #[tokio::test]
    async fn test_register_query_fetches_and_caches() {
        let store = MockStore::new();
        let query = Query::new("GetNumber", |_args, _ctx| async { Ok(json!(7)) });
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        let callbacks = QueryCallbacks::new().on_data(move |data| {
            let _ = tx.send(data);
        });
        let _sub = store.register_query(query.resolve(QueryOptions::new()), callbacks);

        let data = rx.recv().await.expect("should deliver data");
        assert_eq!(data, json!(7));
        assert_eq!(store.cached("GetNumber"), Some(json!(7)));
        assert_eq!(store.register_count(), 1);
        assert_eq!(store.active_count(), 1);
    }

    #[tokio::test]
    async fn test_unregister_is_idempotent_and_suppresses_delivery() {
        let store = MockStore::new();
        let query = Query::new("Slow", |_args, _ctx| async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(json!("late"))
        });
        let delivered = Arc::new(AtomicBool::new(false));
        let flag = delivered.clone();
        let callbacks = QueryCallbacks::new().on_data(move |_| {
            flag.store(true, Ordering::SeqCst);
        });

        let sub = store.register_query(query.resolve(QueryOptions::new()), callbacks);
        (sub.unregister)();
        (sub.unregister)();
        assert_eq!(store.active_count(), 0);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!delivered.load(Ordering::SeqCst));
    }
}
