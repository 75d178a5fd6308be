//! Provider-level store connection contract.
//!
//! The coordinator never talks to a network itself. It drives whatever
//! implements [`StoreConnection`]: something that can be opened (blocking or
//! asynchronously), closed, and asked for its live [`StoreState`].

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::state::StoreState;

/// Boxed error type for provider failures that have no better home.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised by a store connection.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProviderError {
    /// IO error while establishing or tearing down the link.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The data source refused the connection.
    #[error("connection refused by {data_source}: {reason}")]
    Refused {
        /// Data source that refused.
        data_source: String,
        /// Reason given by the data source.
        reason: String,
    },

    /// The open was cancelled through its cancellation token.
    #[error("open cancelled")]
    Cancelled,

    /// Operation requires an open connection.
    #[error("store connection is closed")]
    Closed,

    /// One or more failures collected by an asynchronous call.
    ///
    /// Providers that drive their open through spawned tasks or joined
    /// futures report failures in this wrapper.
    #[error("{} asynchronous failure(s)", .0.len())]
    Aggregate(Vec<ProviderError>),

    /// Any other provider-specific failure.
    #[error(transparent)]
    Other(BoxError),
}

impl ProviderError {
    /// Wrap an arbitrary provider error.
    pub fn other(error: impl Into<BoxError>) -> Self {
        Self::Other(error.into())
    }

    /// Wrap a single failure the way an asynchronous call aggregates it.
    #[must_use]
    pub fn aggregate(inner: ProviderError) -> Self {
        Self::Aggregate(vec![inner])
    }

    /// Check if this failure arrived through asynchronous aggregation.
    #[must_use]
    pub fn is_aggregate(&self) -> bool {
        matches!(self, Self::Aggregate(_))
    }
}

impl From<tokio::task::JoinError> for ProviderError {
    fn from(error: tokio::task::JoinError) -> Self {
        if error.is_cancelled() {
            return Self::Aggregate(vec![Self::Cancelled]);
        }
        Self::Aggregate(vec![Self::other(error.to_string())])
    }
}

/// A provider-level connection to a data source.
///
/// Implementations must tolerate `close()` on an already-closed connection.
#[async_trait]
pub trait StoreConnection: Send {
    /// Live state of the connection.
    fn state(&self) -> StoreState;

    /// Open the connection, blocking the caller.
    fn open(&mut self) -> Result<(), ProviderError>;

    /// Open the connection asynchronously.
    ///
    /// Cancellation is entirely the implementation's business: it decides
    /// how (and whether) to observe `cancel`.
    async fn open_async(&mut self, cancel: CancellationToken) -> Result<(), ProviderError>;

    /// Close the connection.
    fn close(&mut self) -> Result<(), ProviderError>;

    /// Name of the data source (server, file, ...).
    fn data_source(&self) -> Option<&str> {
        None
    }

    /// Current database or catalog.
    fn database(&self) -> Option<&str> {
        None
    }

    /// Server version string, known once the connection is open.
    fn server_version(&self) -> Option<&str> {
        None
    }
}

#[async_trait]
impl<T: StoreConnection + ?Sized> StoreConnection for Box<T> {
    fn state(&self) -> StoreState {
        (**self).state()
    }

    fn open(&mut self) -> Result<(), ProviderError> {
        (**self).open()
    }

    async fn open_async(&mut self, cancel: CancellationToken) -> Result<(), ProviderError> {
        (**self).open_async(cancel).await
    }

    fn close(&mut self) -> Result<(), ProviderError> {
        (**self).close()
    }

    fn data_source(&self) -> Option<&str> {
        (**self).data_source()
    }

    fn database(&self) -> Option<&str> {
        (**self).database()
    }

    fn server_version(&self) -> Option<&str> {
        (**self).server_version()
    }
}

/// A store connection trait object.
pub type DynStoreConnection = Box<dyn StoreConnection>;
