//! Consumer-facing observers.
//!
//! Each observer is the Rust analogue of one hook-style entry point: it
//! owns a registration (or a one-shot execution) against the store, folds
//! the store's callbacks into a state machine, and publishes snapshots
//! through a `tokio::sync::watch` channel so any number of consumers can
//! await changes. Dropping an observer unmounts it: the registration is
//! torn down and late settlements are suppressed, while the store itself
//! still observes completion.

pub mod lazy;
pub mod local;
pub mod local_mutation;
pub mod mutation;
pub mod query;

pub use lazy::LazyQueryObserver;
pub use local::LocalQueryObserver;
pub use local_mutation::{LocalMutateOptions, LocalMutationObserver};
pub use mutation::{mutation_transition, MutationEvent, MutationObserver, MutationState};
pub use query::QueryObserver;
