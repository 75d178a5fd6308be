//! Coordinator error types.

use thiserror::Error;

use crate::metadata::MetadataError;
use crate::state::ConnectionState;
use crate::store::ProviderError;

/// Errors returned by [`Connection`](crate::Connection) operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// No store connection was supplied, so there is nothing to open.
    #[error("connection not configured: a store connection is required before this operation")]
    NotConfigured,

    /// Open was called on a connection that is not closed.
    #[error("connection already open (state: {state})")]
    AlreadyOpen {
        /// State the connection was in.
        state: ConnectionState,
    },

    /// The operation needs an open connection.
    #[error("connection is not open (state: {state})")]
    NotOpen {
        /// State the connection was in.
        state: ConnectionState,
    },

    /// Metadata initialization failed. Passed through unchanged.
    #[error(transparent)]
    Metadata(#[from] MetadataError),

    /// The store connection failed. Passed through unchanged.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// The underlying provider failed on `operation`.
    ///
    /// Only produced when an asynchronous store call reported its failure
    /// through [`ProviderError::Aggregate`].
    #[error("the underlying provider failed on {operation}")]
    ProviderSpecific {
        /// Operation that failed.
        operation: &'static str,
        /// The unwrapped provider failure.
        #[source]
        source: ProviderError,
    },
}

impl Error {
    /// Check if this is a configuration error.
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::NotConfigured)
    }

    /// Check if the operation was rejected because of the connection state.
    #[must_use]
    pub fn is_invalid_state(&self) -> bool {
        matches!(self, Self::AlreadyOpen { .. } | Self::NotOpen { .. })
    }

    /// Check if retrying the same call may succeed.
    ///
    /// Only transient IO failures from the provider qualify. Configuration
    /// and state errors need the caller to change something first.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Provider(ProviderError::Io(_)) => true,
            Self::ProviderSpecific { source, .. } => matches!(source, ProviderError::Io(_)),
            _ => false,
        }
    }
}

/// Translate a failure from an awaited store open.
///
/// A failure wrapped by asynchronous aggregation is unwrapped one level and
/// re-kinded as [`Error::ProviderSpecific`]. Anything else passes through as
/// [`Error::Provider`], exactly as the blocking path would report it.
pub(crate) fn translate_async_open_failure(error: ProviderError) -> Error {
    match error {
        ProviderError::Aggregate(inner) => {
            let source = match <[ProviderError; 1]>::try_from(inner) {
                Ok([single]) => single,
                Err(several) => ProviderError::Aggregate(several),
            };
            Error::ProviderSpecific {
                operation: "open",
                source,
            }
        }
        other => Error::Provider(other),
    }
}

/// Result type for coordinator operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_aggregate_is_unwrapped_and_rekinded() {
        let err = translate_async_open_failure(ProviderError::aggregate(ProviderError::Refused {
            data_source: "db01".into(),
            reason: "login failed".into(),
        }));

        assert_eq!(err.to_string(), "the underlying provider failed on open");
        match &err {
            Error::ProviderSpecific { operation, source } => {
                assert_eq!(*operation, "open");
                assert!(matches!(source, ProviderError::Refused { .. }));
            }
            other => panic!("expected ProviderSpecific, got {other:?}"),
        }
        let source = err.source().unwrap();
        assert_eq!(source.to_string(), "connection refused by db01: login failed");
    }

    #[test]
    fn test_multi_aggregate_kept_whole() {
        let err = translate_async_open_failure(ProviderError::Aggregate(vec![
            ProviderError::Closed,
            ProviderError::Cancelled,
        ]));

        match err {
            Error::ProviderSpecific { source, .. } => {
                assert!(matches!(source, ProviderError::Aggregate(ref v) if v.len() == 2));
            }
            other => panic!("expected ProviderSpecific, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_aggregate_kept_whole() {
        let err = translate_async_open_failure(ProviderError::Aggregate(Vec::new()));
        match err {
            Error::ProviderSpecific { source, .. } => {
                assert!(matches!(source, ProviderError::Aggregate(ref v) if v.is_empty()));
            }
            other => panic!("expected ProviderSpecific, got {other:?}"),
        }
    }

    #[test]
    fn test_plain_failure_passes_through() {
        let err = translate_async_open_failure(ProviderError::Cancelled);
        assert!(matches!(err, Error::Provider(ProviderError::Cancelled)));
        assert_eq!(err.to_string(), "open cancelled");
    }

    #[test]
    fn test_classification() {
        assert!(Error::NotConfigured.is_configuration());
        assert!(!Error::NotConfigured.is_retryable());

        let already = Error::AlreadyOpen {
            state: ConnectionState::Open,
        };
        assert!(already.is_invalid_state());
        assert_eq!(already.to_string(), "connection already open (state: open)");

        let io = Error::Provider(ProviderError::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset",
        )));
        assert!(io.is_retryable());
        assert!(!io.is_invalid_state());
    }
}
