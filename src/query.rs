//! Query descriptors and their resolution into deduplicatable requests.
//!
//! A [`Query`] is an immutable description of a fetchable piece of data:
//! a name (its identity), an async fetch function, optional default
//! arguments/context and an optional merge function for paginated
//! continuations. Applying [`QueryOptions`] on top of a query produces a
//! [`ResolvedQuery`], whose [`key`](ResolvedQuery::key) is the identity
//! used for request deduplication: two resolved queries with the same name
//! and structurally equal arguments denote the same logical request,
//! regardless of argument key order.
//!
//! # Example
//!
//! ```rust,ignore
//! use loadstone::{Query, QueryOptions};
//! use serde_json::json;
//!
//! let todos = Query::new("todos", |args, _ctx| async move {
//!     fetch_todos(args).await
//! })
//! .with_merge(|existing, incoming| merge_pages(existing, incoming));
//!
//! let resolved = todos.resolve(QueryOptions::new().arguments(json!({ "page": 1 })));
//! assert_eq!(resolved.key(), r#"todos--{"page":1}"#);
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;

use crate::error::DataError;

/// Async fetch function of a query. Receives the resolved arguments and
/// context of the request.
pub type FetchFn = Arc<
    dyn Fn(Option<Value>, Option<Value>) -> BoxFuture<'static, Result<Value, DataError>>
        + Send
        + Sync,
>;

/// Merges an existing result with a newly fetched continuation
/// (`fetch_more`). The merged value replaces the existing one.
pub type MergeFn = Arc<dyn Fn(Value, Value) -> Value + Send + Sync>;

/// Controls how the store may satisfy a query registration from its cache.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FetchPolicy {
    /// Serve a fresh cached value without fetching; fetch on miss.
    #[default]
    CacheFirst,
    /// Always fetch, ignoring cached values.
    NetworkOnly,
    /// Serve a cached value immediately, then revalidate over the network.
    CacheAndNetwork,
}

/// Options overlaid on a [`Query`] to produce a [`ResolvedQuery`].
///
/// Every field is optional; unset fields fall back to the query's defaults.
#[derive(Clone, Default)]
pub struct QueryOptions {
    pub arguments: Option<Value>,
    pub context: Option<Value>,
    pub expiry: Option<Duration>,
    pub fetch_policy: Option<FetchPolicy>,
    /// Explicit dedup key override, used by the suspense registry.
    pub key: Option<String>,
}

impl QueryOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn arguments(mut self, arguments: Value) -> Self {
        self.arguments = Some(arguments);
        self
    }

    #[must_use]
    pub fn context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }

    #[must_use]
    pub fn expiry(mut self, expiry: Duration) -> Self {
        self.expiry = Some(expiry);
        self
    }

    #[must_use]
    pub fn fetch_policy(mut self, policy: FetchPolicy) -> Self {
        self.fetch_policy = Some(policy);
        self
    }

    #[must_use]
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }
}

struct QueryInner {
    name: String,
    fetch: FetchFn,
    merge: Option<MergeFn>,
    defaults: QueryOptions,
}

/// An immutable query description.
///
/// Cloning is cheap; clones share identity (see [`Query::ptr_eq`]).
#[derive(Clone)]
pub struct Query {
    inner: Arc<QueryInner>,
}

impl Query {
    /// Creates a query with the given name and fetch function.
    pub fn new<F, Fut>(name: impl Into<String>, fetch: F) -> Self
    where
        F: Fn(Option<Value>, Option<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, DataError>> + Send + 'static,
    {
        Self {
            inner: Arc::new(QueryInner {
                name: name.into(),
                fetch: Arc::new(move |args, ctx| fetch(args, ctx).boxed()),
                merge: None,
                defaults: QueryOptions::default(),
            }),
        }
    }

    /// Returns a copy of this query with default options applied.
    #[must_use]
    pub fn with_defaults(self, defaults: QueryOptions) -> Self {
        let inner = &self.inner;
        Self {
            inner: Arc::new(QueryInner {
                name: inner.name.clone(),
                fetch: inner.fetch.clone(),
                merge: inner.merge.clone(),
                defaults,
            }),
        }
    }

    /// Returns a copy of this query with a merge function for
    /// `fetch_more` continuations.
    #[must_use]
    pub fn with_merge<F>(self, merge: F) -> Self
    where
        F: Fn(Value, Value) -> Value + Send + Sync + 'static,
    {
        let inner = &self.inner;
        Self {
            inner: Arc::new(QueryInner {
                name: inner.name.clone(),
                fetch: inner.fetch.clone(),
                merge: Some(Arc::new(merge)),
                defaults: inner.defaults.clone(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Applies options on top of this query's defaults, producing a
    /// concrete request. Call-site options win over defaults.
    #[must_use]
    pub fn resolve(&self, options: QueryOptions) -> ResolvedQuery {
        let defaults = &self.inner.defaults;
        ResolvedQuery {
            query: self.clone(),
            arguments: options.arguments.or_else(|| defaults.arguments.clone()),
            context: options.context.or_else(|| defaults.context.clone()),
            expiry: options.expiry.or(defaults.expiry),
            fetch_policy: options
                .fetch_policy
                .or(defaults.fetch_policy)
                .unwrap_or_default(),
            key_override: options.key.or_else(|| defaults.key.clone()),
        }
    }

    /// Identity comparison. Two handles denote the same query only when
    /// they share the same underlying description.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query").field("name", &self.inner.name).finish()
    }
}

/// A query with concrete arguments, context and options applied.
///
/// This is the value handed to the store collaborator, and its
/// [`key`](Self::key) is the dedup identity across concurrent consumers.
#[derive(Clone)]
pub struct ResolvedQuery {
    query: Query,
    pub arguments: Option<Value>,
    pub context: Option<Value>,
    pub expiry: Option<Duration>,
    pub fetch_policy: FetchPolicy,
    key_override: Option<String>,
}

impl ResolvedQuery {
    pub fn name(&self) -> &str {
        self.query.name()
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    /// The deduplication identity of this request: the explicit key
    /// override when present, otherwise the query name, suffixed with the
    /// JSON-stable serialization of the arguments when there are any.
    ///
    /// Serialization goes through [`serde_json::Value`], whose object keys
    /// are sorted, so structurally equal arguments yield equal keys no
    /// matter the insertion order at the call site.
    #[must_use]
    pub fn key(&self) -> String {
        if let Some(key) = &self.key_override {
            return key.clone();
        }
        match &self.arguments {
            None => self.query.name().to_string(),
            Some(args) => format!("{}--{}", self.query.name(), args),
        }
    }

    /// Runs the query's fetch function with this request's arguments and
    /// context.
    pub fn fetch(&self) -> BoxFuture<'static, Result<Value, DataError>> {
        (self.query.inner.fetch)(self.arguments.clone(), self.context.clone())
    }

    /// Merges an existing result with a newly fetched continuation. Without
    /// a merge function the incoming value replaces the existing one.
    #[must_use]
    pub fn merge(&self, existing: Value, incoming: Value) -> Value {
        match &self.query.inner.merge {
            Some(merge) => merge(existing, incoming),
            None => incoming,
        }
    }
}

impl fmt::Debug for ResolvedQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedQuery")
            .field("name", &self.query.inner.name)
            .field("arguments", &self.arguments)
            .field("fetch_policy", &self.fetch_policy)
            .finish()
    }
}

/// Overrides accepted by `fetch_more`: new arguments/context for the next
/// page, optionally against a different query.
#[derive(Clone, Default)]
pub struct FetchMoreOptions {
    pub arguments: Option<Value>,
    pub context: Option<Value>,
    pub query: Option<Query>,
}

impl FetchMoreOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn arguments(mut self, arguments: Value) -> Self {
        self.arguments = Some(arguments);
        self
    }

    #[must_use]
    pub fn context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }

    #[must_use]
    pub fn query(mut self, query: Query) -> Self {
        self.query = Some(query);
        self
    }
}

/// Structural equality over optional argument values.
///
/// Absent arguments and JSON `null` compare equal to each other and to
/// nothing else; any other pair compares by recursive structural equality
/// with order-independent object keys. Values of different JSON types are
/// never equal (so `0` and `""` are distinct).
#[must_use]
pub fn arguments_equal(a: Option<&Value>, b: Option<&Value>) -> bool {
    match (a, b) {
        (None, None) => true,
        (None, Some(v)) | (Some(v), None) => v.is_null(),
        (Some(a), Some(b)) => a == b,
    }
}

/// A store-resident query that never fetches; reads a slice of the store's
/// local state by name.
#[derive(Clone)]
pub struct LocalQuery {
    inner: Arc<LocalQueryInner>,
}

struct LocalQueryInner {
    name: String,
    initial: Option<Value>,
}

impl LocalQuery {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(LocalQueryInner {
                name: name.into(),
                initial: None,
            }),
        }
    }

    /// Returns a copy with an initial value delivered before any store
    /// state exists for this name.
    #[must_use]
    pub fn with_initial(self, initial: Value) -> Self {
        Self {
            inner: Arc::new(LocalQueryInner {
                name: self.inner.name.clone(),
                initial: Some(initial),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn initial(&self) -> Option<&Value> {
        self.inner.initial.as_ref()
    }
}

impl fmt::Debug for LocalQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalQuery")
            .field("name", &self.inner.name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn query() -> Query {
        Query::new("GetItems", |_args, _ctx| async { Ok(json!([])) })
    }

    #[test]
    fn test_key_without_arguments_is_name() {
        let resolved = query().resolve(QueryOptions::new());
        assert_eq!(resolved.key(), "GetItems");
    }

    #[test]
    fn test_key_is_insensitive_to_argument_order() {
        let a = query().resolve(QueryOptions::new().arguments(json!({ "b": 2, "a": 1 })));
        let b = query().resolve(QueryOptions::new().arguments(json!({ "a": 1, "b": 2 })));
        assert_eq!(a.key(), b.key());
    }

    #[test]
    fn test_key_override_wins() {
        let resolved = query().resolve(
            QueryOptions::new()
                .arguments(json!({ "page": 3 }))
                .key("explicit"),
        );
        assert_eq!(resolved.key(), "explicit");
    }

    #[test]
    fn test_resolve_call_site_options_win_over_defaults() {
        let q = query().with_defaults(
            QueryOptions::new()
                .arguments(json!({ "page": 1 }))
                .fetch_policy(FetchPolicy::NetworkOnly),
        );

        let resolved = q.resolve(QueryOptions::new().arguments(json!({ "page": 2 })));
        assert_eq!(resolved.arguments, Some(json!({ "page": 2 })));
        assert_eq!(resolved.fetch_policy, FetchPolicy::NetworkOnly);

        let defaulted = q.resolve(QueryOptions::new());
        assert_eq!(defaulted.arguments, Some(json!({ "page": 1 })));
    }

    #[test]
    fn test_arguments_equal_structural_and_order_independent() {
        let a = json!({ "x": [1, 2], "y": { "b": 2, "a": 1 } });
        let b = json!({ "y": { "a": 1, "b": 2 }, "x": [1, 2] });
        assert!(arguments_equal(Some(&a), Some(&b)));
        assert!(!arguments_equal(Some(&a), Some(&json!({ "x": [1, 2] }))));
    }

    #[test]
    fn test_arguments_equal_loose_null_handling() {
        assert!(arguments_equal(None, None));
        assert!(arguments_equal(None, Some(&Value::Null)));
        assert!(arguments_equal(Some(&Value::Null), None));
        assert!(!arguments_equal(None, Some(&json!(0))));
        // Different JSON types are never equal.
        assert!(!arguments_equal(Some(&json!(0)), Some(&json!(""))));
    }

    #[test]
    fn test_merge_defaults_to_replace() {
        let resolved = query().resolve(QueryOptions::new());
        assert_eq!(resolved.merge(json!([1]), json!([2])), json!([2]));

        let merging = query()
            .with_merge(|existing, incoming| {
                let mut items = existing.as_array().cloned().unwrap_or_default();
                items.extend(incoming.as_array().cloned().unwrap_or_default());
                Value::Array(items)
            })
            .resolve(QueryOptions::new());
        assert_eq!(merging.merge(json!([1]), json!([2])), json!([1, 2]));
    }

    #[test]
    fn test_query_identity_is_by_handle_not_name() {
        let a = query();
        let b = a.clone();
        assert!(a.ptr_eq(&b));
        assert!(!a.ptr_eq(&query()));
    }
}
