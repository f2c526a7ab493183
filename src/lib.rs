//! # Loadstone - Client-Side Data Loading Orchestration
//!
//! Loadstone sits between data-consuming views and a normalized object
//! store, orchestrating request lifecycles the store itself does not model:
//! observable loading state machines, registration lifecycles keyed to
//! semantic dependency changes, one-shot mutation state, and a suspense
//! registry that deduplicates concurrent first loads.
//!
//! The store is a collaborator behind the [`Store`](store::Store) trait;
//! this crate never normalizes, caches, or invalidates data itself.
//!
//! ## Core Components
//!
//! - [`DataClient`](client::DataClient): the entry point, one per store
//! - [`QueryObserver`](observer::query::QueryObserver): a standing query
//!   registration with an observable [`LoadingState`](loading::LoadingState)
//! - [`LazyQueryObserver`](observer::lazy::LazyQueryObserver): the same,
//!   deferred until an explicit `load`
//! - [`MutationObserver`](observer::mutation::MutationObserver): one-shot
//!   mutation execution with observable state
//! - [`SuspenseRegistry`](suspense::SuspenseRegistry): keyed entries that
//!   collapse concurrent lookups into one registration and serve settled
//!   results synchronously
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use serde_json::json;
//! use loadstone::client::DataClient;
//! use loadstone::query::{Query, QueryOptions};
//! use loadstone::store::mock::MockStore;
//!
//! # async fn run() {
//! let client = DataClient::new(Arc::new(MockStore::new()));
//!
//! let articles = Query::new("articles", |args, _ctx| async move {
//!     let _page = args;
//!     Ok(json!([{"id": 1}]))
//! });
//!
//! let observer = client.run_query(
//!     &articles,
//!     QueryOptions::new().arguments(json!({"page": 1})),
//! );
//! let mut changes = observer.watch();
//! while changes.changed().await.is_ok() {
//!     let state = changes.borrow_and_update().clone();
//!     if state.is_ready() {
//!         break;
//!     }
//! }
//! # }
//! ```

pub mod client;
pub mod deps;
pub mod error;
pub mod loading;
pub mod mutation;
pub mod observer;
pub mod query;
pub mod store;
pub mod suspense;
