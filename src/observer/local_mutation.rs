//! Local mutation observer: store-only mutations, optionally synchronous.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::watch;

use crate::error::DataError;
use crate::mutation::LocalMutation;
use crate::observer::mutation::{MutationEvent, MutationObserverInner, MutationState};
use crate::store::{LocalMutationCallbacks, Store};

/// Call-site options for [`LocalMutationObserver::mutate`].
#[derive(Clone, Default)]
pub struct LocalMutateOptions {
    pub input: Option<Value>,
    /// Ask the store to execute synchronously when it can. Either way the
    /// mutation settles only after `after_query_updates` has completed or
    /// rejected.
    pub sync_mode: bool,
}

impl LocalMutateOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn input(mut self, input: Value) -> Self {
        self.input = Some(input);
        self
    }

    #[must_use]
    pub fn sync_mode(mut self, sync_mode: bool) -> Self {
        self.sync_mode = sync_mode;
        self
    }
}

/// Executes mutations against the store's in-memory state only
/// (`run_local_mutation`). Shares the one-shot mutation state machine.
pub struct LocalMutationObserver {
    inner: Arc<MutationObserverInner>,
    store: Arc<dyn Store>,
    mutation: LocalMutation,
}

impl LocalMutationObserver {
    pub(crate) fn new(store: Arc<dyn Store>, mutation: &LocalMutation) -> Self {
        Self {
            inner: MutationObserverInner::new(),
            store,
            mutation: mutation.clone(),
        }
    }

    /// Executes the local mutation.
    ///
    /// When the store runs synchronously, the returned result carries the
    /// settlement (including `after_query_updates` rejections); with an
    /// asynchronous store it is `Ok(())` and the settlement arrives through
    /// the observed state instead.
    ///
    /// # Errors
    ///
    /// Returns the store-side rejection, typically
    /// [`DataError::LocalMutationValidation`].
    pub fn mutate(&self, options: LocalMutateOptions) -> Result<(), DataError> {
        let resolved = self.mutation.resolve(options.input, options.sync_mode);
        self.inner.dispatch(MutationEvent::Request(None));

        let outcome: Arc<Mutex<Option<Result<(), DataError>>>> = Arc::new(Mutex::new(None));
        let weak = Arc::downgrade(&self.inner);

        let on_error = {
            let weak = weak.clone();
            let outcome = outcome.clone();
            move |err: DataError| {
                *outcome.lock() = Some(Err(err.clone()));
                if let Some(inner) = weak.upgrade() {
                    inner.dispatch(MutationEvent::Failure(err));
                }
            }
        };
        let on_complete = {
            let weak = weak.clone();
            let outcome = outcome.clone();
            move || {
                *outcome.lock() = Some(Ok(()));
                if let Some(inner) = weak.upgrade() {
                    inner.dispatch(MutationEvent::Success(None));
                }
            }
        };

        self.store.process_local_mutation(
            resolved,
            LocalMutationCallbacks::new()
                .on_error(on_error)
                .on_complete(on_complete),
        );

        let settled = outcome.lock().take();
        settled.unwrap_or(Ok(()))
    }

    #[must_use]
    pub fn state(&self) -> MutationState {
        self.inner.tx.borrow().clone()
    }

    #[must_use]
    pub fn watch(&self) -> watch::Receiver<MutationState> {
        self.inner.tx.subscribe()
    }

    /// Suppresses future state updates; the store still completes the
    /// mutation.
    pub fn unmount(&self) {
        self.inner
            .mounted
            .store(false, std::sync::atomic::Ordering::SeqCst);
    }
}

impl Drop for LocalMutationObserver {
    fn drop(&mut self) {
        self.unmount();
    }
}
