use thiserror::Error;

/// Error type for query and mutation operations.
///
/// Errors are cloneable so they can settle into observable state snapshots
/// and be re-read by any number of consumers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DataError {
    /// A fetch or mutation effect rejected. Wraps the rejection reason.
    #[error("{0}")]
    Request(String),

    /// No usable store/registry behind this operation. Fatal, not
    /// recoverable by retry.
    #[error("data store not available: {0}")]
    Registration(String),

    /// A store-side hook (e.g. `after_query_updates`) rejected a local
    /// mutation. Surfaced the same way as a request error.
    #[error("{0}")]
    LocalMutationValidation(String),

    /// `refetch()`/`fetch_more()` invoked before the first successful load.
    #[error("{0}() can only be called after successful data loading")]
    NotReady(&'static str),
}

impl DataError {
    /// Creates a request error, coercing any displayable reason into
    /// an error value.
    pub fn request(reason: impl ToString) -> Self {
        Self::Request(reason.to_string())
    }

    /// Creates a registration error.
    pub fn registration(reason: impl ToString) -> Self {
        Self::Registration(reason.to_string())
    }

    /// Creates a local mutation validation error.
    pub fn local_mutation(reason: impl ToString) -> Self {
        Self::LocalMutationValidation(reason.to_string())
    }

    /// Returns `true` if this error came from a rejected fetch or
    /// mutation effect.
    pub const fn is_request(&self) -> bool {
        matches!(self, Self::Request(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_error_displays_raw_reason() {
        let err = DataError::request("bad input");
        assert_eq!(err.to_string(), "bad input");
        assert!(err.is_request());
    }

    #[test]
    fn test_not_ready_error_names_operation() {
        let err = DataError::NotReady("fetch_more");
        assert_eq!(
            err.to_string(),
            "fetch_more() can only be called after successful data loading"
        );
    }
}
