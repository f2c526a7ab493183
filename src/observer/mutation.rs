//! Mutation observer and its one-shot state machine.
//!
//! Each [`mutate`](MutationObserver::mutate) call builds a concrete request
//! (call-site options taking precedence over the observer's base options),
//! hands it to the store's mutation executor, and folds the settlement back
//! into [`MutationState`]. `called` latches true at the first settlement and
//! stays true: a mutation is never restartable into "uncalled".
//!
//! Settlements arriving after [`unmount`](MutationObserver::unmount) are
//! suppressed; the underlying mutation still completes inside the store.
//! Cancellation here is cooperative and UI-only, not operation abort.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::watch;
use tracing::trace;

use crate::error::DataError;
use crate::mutation::{Mutation, MutationOptions};
use crate::store::{MutationCallbacks, Store};

/// Observable snapshot of a mutation's execution.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MutationState {
    pub loading: bool,
    pub error: Option<DataError>,
    pub data: Option<Value>,
    pub called: bool,
}

/// Lifecycle events of a one-shot mutation. `Request` carries the
/// optimistic response, if any, as provisional data.
#[derive(Clone, Debug)]
pub enum MutationEvent {
    Request(Option<Value>),
    Failure(DataError),
    Success(Option<Value>),
}

/// Pure transition function of the mutation state machine.
#[must_use]
pub fn mutation_transition(state: MutationState, event: MutationEvent) -> MutationState {
    match event {
        MutationEvent::Request(provisional) => MutationState {
            loading: true,
            error: None,
            data: provisional,
            // Latches at the first settlement; a new request does not
            // un-call the mutation.
            called: state.called,
        },
        MutationEvent::Failure(error) => MutationState {
            loading: false,
            called: true,
            error: Some(error),
            data: None,
        },
        MutationEvent::Success(data) => MutationState {
            loading: false,
            called: true,
            error: None,
            data,
        },
    }
}

pub(crate) struct MutationObserverInner {
    pub(crate) tx: watch::Sender<MutationState>,
    pub(crate) mounted: AtomicBool,
}

impl MutationObserverInner {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            tx: watch::channel(MutationState::default()).0,
            mounted: AtomicBool::new(true),
        })
    }

    pub(crate) fn dispatch(&self, event: MutationEvent) {
        if !self.mounted.load(Ordering::SeqCst) {
            trace!(?event, "dropping mutation event for unmounted observer");
            return;
        }
        self.tx
            .send_modify(|state| *state = mutation_transition(std::mem::take(state), event));
    }
}

/// One-shot mutation executor with observable state (`run_mutation`).
pub struct MutationObserver {
    inner: Arc<MutationObserverInner>,
    store: Arc<dyn Store>,
    mutation: Mutation,
    base_options: MutationOptions,
}

impl MutationObserver {
    pub(crate) fn new(store: Arc<dyn Store>, mutation: &Mutation, options: MutationOptions) -> Self {
        Self {
            inner: MutationObserverInner::new(),
            store,
            mutation: mutation.clone(),
            base_options: options,
        }
    }

    /// Executes the mutation. Call-site `overrides` take precedence over
    /// the options the observer was created with.
    pub fn mutate(&self, overrides: MutationOptions) {
        let resolved = self.mutation.resolve(&self.base_options, overrides);
        let weak = Arc::downgrade(&self.inner);

        let on_request = {
            let weak = weak.clone();
            move |provisional| {
                if let Some(inner) = weak.upgrade() {
                    inner.dispatch(MutationEvent::Request(provisional));
                }
            }
        };
        let on_error = {
            let weak = weak.clone();
            move |err| {
                if let Some(inner) = weak.upgrade() {
                    inner.dispatch(MutationEvent::Failure(err));
                }
            }
        };
        let on_complete = {
            let weak = weak.clone();
            move |data| {
                if let Some(inner) = weak.upgrade() {
                    inner.dispatch(MutationEvent::Success(Some(data)));
                }
            }
        };

        self.store.process_mutation(
            resolved,
            MutationCallbacks::new()
                .on_request(on_request)
                .on_error(on_error)
                .on_complete(on_complete),
        );
    }

    #[must_use]
    pub fn state(&self) -> MutationState {
        self.inner.tx.borrow().clone()
    }

    #[must_use]
    pub fn watch(&self) -> watch::Receiver<MutationState> {
        self.inner.tx.subscribe()
    }

    /// Suppresses future state updates. The in-flight mutation, if any,
    /// still completes inside the store.
    pub fn unmount(&self) {
        self.inner.mounted.store(false, Ordering::SeqCst);
    }
}

impl Drop for MutationObserver {
    fn drop(&mut self) {
        self.unmount();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_clears_settlement_but_keeps_called_latch() {
        let state = mutation_transition(MutationState::default(), MutationEvent::Request(None));
        assert!(state.loading);
        assert!(!state.called);

        let settled = mutation_transition(state, MutationEvent::Success(Some(json!("ok"))));
        assert!(settled.called);
        assert_eq!(settled.data, Some(json!("ok")));

        let restarted = mutation_transition(settled, MutationEvent::Request(None));
        assert!(restarted.loading);
        assert!(restarted.called);
        assert!(restarted.data.is_none());
        assert!(restarted.error.is_none());
    }

    #[test]
    fn test_request_carries_the_optimistic_response_as_provisional_data() {
        let state = mutation_transition(
            MutationState::default(),
            MutationEvent::Request(Some(json!({ "id": 1, "name": "draft" }))),
        );
        assert!(state.loading);
        assert_eq!(state.data, Some(json!({ "id": 1, "name": "draft" })));

        let settled = mutation_transition(state, MutationEvent::Success(Some(json!({ "id": 1 }))));
        assert_eq!(settled.data, Some(json!({ "id": 1 })));
    }

    #[test]
    fn test_failure_settles_with_error() {
        let state = mutation_transition(MutationState::default(), MutationEvent::Request(None));
        let state = mutation_transition(state, MutationEvent::Failure(DataError::request("bad input")));
        assert_eq!(
            state,
            MutationState {
                loading: false,
                called: true,
                error: Some(DataError::request("bad input")),
                data: None,
            }
        );
    }
}
