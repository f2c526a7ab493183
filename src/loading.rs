//! The data-loading state machine.
//!
//! A pure reducer over the lifecycle of a registered query: a primary
//! request phase (`loading`/`data`/`error`) plus two independent overlay
//! phases for paginated continuation (`fetching_more`) and refetching
//! (`refetching`). The machine is UI-agnostic: the registration bridge
//! folds store callbacks into [`LoadingEvent`]s and every consumer just
//! observes the resulting [`LoadingState`] snapshots.
//!
//! `Success` carries the live `refetch`/`fetch_more` delegates supplied by
//! the bridge; before the first `Success` those operations fail with
//! [`DataError::NotReady`], so paging can never start before the first page
//! has loaded.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::error::DataError;
use crate::query::FetchMoreOptions;

/// Re-runs the primary request, driving the `refetching` overlay.
pub type RefetchDelegate = Arc<dyn Fn() + Send + Sync>;

/// Fetches a continuation, driving the `fetching_more` overlay.
pub type FetchMoreDelegate = Arc<dyn Fn(FetchMoreOptions) + Send + Sync>;

/// Lifecycle events folded into [`LoadingState`] by [`transition`].
pub enum LoadingEvent {
    /// A brand-new primary fetch. Supersedes all previous state.
    Request,
    /// The primary fetch failed.
    Failure(DataError),
    /// The primary fetch completed; delegates become live.
    Success {
        refetch: RefetchDelegate,
        fetch_more: FetchMoreDelegate,
    },
    FetchMoreRequest,
    FetchMoreFailure(DataError),
    FetchMoreSuccess,
    RefetchRequest,
    RefetchFailure(DataError),
    RefetchSuccess,
    /// A data push: the initial result, a merge result, or an out-of-band
    /// update from the store (e.g. a related-query write).
    Data(Value),
}

impl fmt::Debug for LoadingEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Request => "Request",
            Self::Failure(_) => "Failure",
            Self::Success { .. } => "Success",
            Self::FetchMoreRequest => "FetchMoreRequest",
            Self::FetchMoreFailure(_) => "FetchMoreFailure",
            Self::FetchMoreSuccess => "FetchMoreSuccess",
            Self::RefetchRequest => "RefetchRequest",
            Self::RefetchFailure(_) => "RefetchFailure",
            Self::RefetchSuccess => "RefetchSuccess",
            Self::Data(_) => "Data",
        };
        f.write_str(name)
    }
}

#[derive(Clone)]
struct Delegates {
    refetch: RefetchDelegate,
    fetch_more: FetchMoreDelegate,
}

/// Observable snapshot of a query's loading lifecycle.
#[derive(Clone, Default)]
pub struct LoadingState {
    pub loading: bool,
    pub data: Option<Value>,
    pub error: Option<DataError>,
    pub fetching_more: bool,
    pub fetch_more_error: Option<DataError>,
    pub refetching: bool,
    pub refetch_error: Option<DataError>,
    delegates: Option<Delegates>,
}

impl LoadingState {
    /// Returns `true` once the primary fetch has completed and
    /// `refetch`/`fetch_more` are live.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.delegates.is_some()
    }

    /// Re-runs the primary request.
    ///
    /// # Errors
    ///
    /// Fails with [`DataError::NotReady`] before the first successful load;
    /// no store call is issued in that case.
    pub fn refetch(&self) -> Result<(), DataError> {
        match &self.delegates {
            Some(delegates) => {
                (delegates.refetch)();
                Ok(())
            }
            None => Err(DataError::NotReady("refetch")),
        }
    }

    /// Fetches a paginated continuation, merged into the existing data via
    /// the query's merge function.
    ///
    /// # Errors
    ///
    /// Fails with [`DataError::NotReady`] before the first successful load;
    /// no store call is issued in that case.
    pub fn fetch_more(&self, options: FetchMoreOptions) -> Result<(), DataError> {
        match &self.delegates {
            Some(delegates) => {
                (delegates.fetch_more)(options);
                Ok(())
            }
            None => Err(DataError::NotReady("fetch_more")),
        }
    }
}

impl fmt::Debug for LoadingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadingState")
            .field("loading", &self.loading)
            .field("data", &self.data)
            .field("error", &self.error)
            .field("fetching_more", &self.fetching_more)
            .field("fetch_more_error", &self.fetch_more_error)
            .field("refetching", &self.refetching)
            .field("refetch_error", &self.refetch_error)
            .field("ready", &self.is_ready())
            .finish()
    }
}

/// Pure transition function of the data-loading state machine.
#[must_use]
pub fn transition(state: LoadingState, event: LoadingEvent) -> LoadingState {
    match event {
        LoadingEvent::Request => LoadingState {
            loading: true,
            ..LoadingState::default()
        },
        LoadingEvent::Failure(error) => LoadingState {
            loading: false,
            data: None,
            error: Some(error),
            ..state
        },
        LoadingEvent::Success { refetch, fetch_more } => LoadingState {
            loading: false,
            delegates: Some(Delegates { refetch, fetch_more }),
            ..state
        },
        LoadingEvent::FetchMoreRequest => LoadingState {
            fetching_more: true,
            fetch_more_error: None,
            ..state
        },
        LoadingEvent::FetchMoreFailure(error) => LoadingState {
            fetching_more: false,
            fetch_more_error: Some(error),
            ..state
        },
        LoadingEvent::FetchMoreSuccess => LoadingState {
            fetching_more: false,
            ..state
        },
        LoadingEvent::RefetchRequest => LoadingState {
            refetching: true,
            refetch_error: None,
            ..state
        },
        LoadingEvent::RefetchFailure(error) => LoadingState {
            refetching: false,
            refetch_error: Some(error),
            ..state
        },
        LoadingEvent::RefetchSuccess => LoadingState {
            refetching: false,
            ..state
        },
        LoadingEvent::Data(data) => LoadingState {
            data: Some(data),
            ..state
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn success_event() -> LoadingEvent {
        LoadingEvent::Success {
            refetch: Arc::new(|| {}),
            fetch_more: Arc::new(|_| {}),
        }
    }

    fn loaded_state() -> LoadingState {
        let state = transition(LoadingState::default(), LoadingEvent::Request);
        let state = transition(state, LoadingEvent::Data(json!({ "items": [1] })));
        transition(state, success_event())
    }

    #[test]
    fn test_request_resets_everything() {
        let mut state = loaded_state();
        state = transition(state, LoadingEvent::FetchMoreFailure(DataError::request("x")));
        state = transition(state, LoadingEvent::RefetchRequest);

        let state = transition(state, LoadingEvent::Request);
        assert!(state.loading);
        assert!(state.data.is_none());
        assert!(state.error.is_none());
        assert!(!state.fetching_more);
        assert!(state.fetch_more_error.is_none());
        assert!(!state.refetching);
        assert!(state.refetch_error.is_none());
        assert!(!state.is_ready());
    }

    #[test]
    fn test_failure_clears_data() {
        let state = transition(loaded_state(), LoadingEvent::Failure(DataError::request("boom")));
        assert!(!state.loading);
        assert!(state.data.is_none());
        assert_eq!(state.error, Some(DataError::request("boom")));
    }

    #[test]
    fn test_success_keeps_data_and_arms_delegates() {
        let state = loaded_state();
        assert!(!state.loading);
        assert_eq!(state.data, Some(json!({ "items": [1] })));
        assert!(state.is_ready());
        assert!(state.refetch().is_ok());
        assert!(state.fetch_more(FetchMoreOptions::new()).is_ok());
    }

    #[test]
    fn test_delegates_fail_before_first_success() {
        let state = transition(LoadingState::default(), LoadingEvent::Request);
        assert_eq!(state.refetch(), Err(DataError::NotReady("refetch")));
        assert_eq!(
            state.fetch_more(FetchMoreOptions::new()),
            Err(DataError::NotReady("fetch_more"))
        );
    }

    #[test]
    fn test_overlays_do_not_touch_primary_state() {
        let mut state = loaded_state();
        state = transition(state, LoadingEvent::FetchMoreRequest);
        assert!(state.fetching_more);
        assert!(!state.loading);
        assert_eq!(state.data, Some(json!({ "items": [1] })));

        state = transition(state, LoadingEvent::Data(json!({ "items": [1, 2] })));
        state = transition(state, LoadingEvent::FetchMoreSuccess);
        assert!(!state.fetching_more);
        assert_eq!(state.data, Some(json!({ "items": [1, 2] })));

        state = transition(state, LoadingEvent::RefetchRequest);
        assert!(state.refetching);
        state = transition(state, LoadingEvent::RefetchFailure(DataError::request("nope")));
        assert!(!state.refetching);
        assert_eq!(state.refetch_error, Some(DataError::request("nope")));
        assert_eq!(state.data, Some(json!({ "items": [1, 2] })));
    }

    #[test]
    fn test_overlay_request_clears_previous_overlay_error() {
        let mut state = loaded_state();
        state = transition(state, LoadingEvent::FetchMoreFailure(DataError::request("x")));
        state = transition(state, LoadingEvent::FetchMoreRequest);
        assert!(state.fetch_more_error.is_none());
        assert!(state.fetching_more);
    }
}
