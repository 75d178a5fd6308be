//! # tether-testing
//!
//! Test infrastructure for the tether connection coordinator.
//!
//! Provides a scripted [`MockStoreConnection`] and [`MockMetadata`] that
//! record every call, so tests can assert exactly how often the coordinator
//! opened or closed the store connection and consulted metadata.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tether_client::Connection;
//! use tether_testing::{MockMetadata, MockStoreConnection};
//!
//! let store = MockStoreConnection::closed();
//! let mut conn = Connection::new(Arc::new(MockMetadata::loaded()), Some(store.clone()), true);
//! conn.open()?;
//! assert_eq!(store.open_calls(), 1);
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod metadata;
pub mod store;

use std::sync::Arc;

use tether_client::Connection;
use thiserror::Error;

pub use metadata::{MetadataBehavior, MockMetadata};
pub use store::{MockStoreConnection, OpenBehavior};

/// Failure raised by the mocks.
#[derive(Debug, Clone, Error)]
#[error("simulated {operation} failure")]
pub struct SimulatedError {
    /// Operation that was made to fail.
    pub operation: &'static str,
}

impl SimulatedError {
    /// Create a simulated failure for `operation`.
    #[must_use]
    pub fn new(operation: &'static str) -> Self {
        Self { operation }
    }
}

/// Coordinator type used throughout the tests.
pub type MockConnection = Connection<MockStoreConnection, MockMetadata>;

/// Build a coordinator over clones of `store` and `metadata`.
///
/// Returns the coordinator; the caller keeps `store` as its handle.
#[must_use]
pub fn coordinator(
    metadata: &Arc<MockMetadata>,
    store: &MockStoreConnection,
    owns_store_connection: bool,
) -> MockConnection {
    Connection::new(
        Arc::clone(metadata),
        Some(store.clone()),
        owns_store_connection,
    )
}
