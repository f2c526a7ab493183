//! Dependency-change detection for re-subscription.
//!
//! Observers re-register with the store only when the (store, query,
//! arguments) tuple semantically changes: store and query compare by
//! identity, arguments by structural equality. Context and the remaining
//! option fields are deliberately excluded from the check: context
//! frequently carries unstable values (auth tokens and the like) that must
//! not force a re-fetch. This narrowing is policy, not an oversight.

use std::sync::Arc;

use serde_json::Value;

use crate::query::{arguments_equal, Query};
use crate::store::Store;

/// Snapshot of the inputs a query registration depends on.
#[derive(Clone)]
pub struct DepSnapshot {
    store: Arc<dyn Store>,
    query: Query,
    arguments: Option<Value>,
}

impl DepSnapshot {
    #[must_use]
    pub fn new(store: Arc<dyn Store>, query: Query, arguments: Option<Value>) -> Self {
        Self {
            store,
            query,
            arguments,
        }
    }

    /// Returns `true` iff a registration built from `self` must be torn
    /// down and re-opened for `next`.
    #[must_use]
    pub fn changed(&self, next: &Self) -> bool {
        !Arc::ptr_eq(&self.store, &next.store)
            || !self.query.ptr_eq(&next.query)
            || !arguments_equal(self.arguments.as_ref(), next.arguments.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::mock::MockStore;
    use serde_json::json;

    fn store() -> Arc<dyn Store> {
        Arc::new(MockStore::new())
    }

    fn query() -> Query {
        Query::new("GetData", |_args, _ctx| async { Ok(json!(null)) })
    }

    #[test]
    fn test_unchanged_for_reordered_argument_keys() {
        let store = store();
        let query = query();
        let a = DepSnapshot::new(store.clone(), query.clone(), Some(json!({ "a": 1, "b": 2 })));
        let b = DepSnapshot::new(store, query, Some(json!({ "b": 2, "a": 1 })));
        assert!(!a.changed(&b));
    }

    #[test]
    fn test_changed_when_arguments_differ() {
        let store = store();
        let query = query();
        let a = DepSnapshot::new(store.clone(), query.clone(), Some(json!({ "page": 1 })));
        let b = DepSnapshot::new(store, query, Some(json!({ "page": 2 })));
        assert!(a.changed(&b));
    }

    #[test]
    fn test_changed_when_store_or_query_identity_differs() {
        let store = store();
        let query = query();
        let base = DepSnapshot::new(store.clone(), query.clone(), None);

        assert!(base.changed(&DepSnapshot::new(store.clone(), self::query(), None)));
        assert!(base.changed(&DepSnapshot::new(self::store(), query.clone(), None)));
        assert!(!base.changed(&DepSnapshot::new(store, query, None)));
    }
}
