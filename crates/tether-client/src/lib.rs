//! # tether-client
//!
//! A logical connection that coordinates a provider-level store connection
//! with one-time schema metadata initialization.
//!
//! The [`Connection`] coordinator owns (or borrows the lifecycle of) a
//! [`StoreConnection`], makes sure the metadata for its data space is
//! loaded before it reports itself open, and never leaves a store
//! connection it opened dangling after a failed open.
//!
//! ## Features
//!
//! - **Explicit state machine**: `Closed`, `Connecting`, `Open`, `Broken`
//! - **Blocking and async opens**: identical state rules, with provider
//!   failures from the async path translated at the await boundary
//! - **Ownership-aware close**: a store connection the coordinator did not
//!   open, or does not own, is never closed by it
//! - **Ambient transactions**: detected through [`TransactionScope`], read
//!   but never driven
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tether_client::{Connection, ConnectionState, DataSpace, MetadataWorkspace};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let metadata = Arc::new(
//!         MetadataWorkspace::new().with_loader(DataSpace::Store, |_| Ok(())),
//!     );
//!
//!     let mut conn = Connection::new(metadata, Some(my_store_connection()), true);
//!     conn.open_async().await?;
//!     assert_eq!(conn.state(), ConnectionState::Open);
//!
//!     conn.close()?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod connection;
pub mod error;
pub mod instrumentation;
pub mod metadata;
pub mod options;
pub mod state;
pub mod store;
pub mod transaction;

// Re-export commonly used types
pub use connection::Connection;
pub use error::{Error, Result};
pub use metadata::{DataSpace, MetadataError, MetadataProvider, MetadataWorkspace};
pub use options::ConnectionOptions;
pub use state::{ConnectionState, StoreState};
pub use store::{BoxError, DynStoreConnection, ProviderError, StoreConnection};
pub use tokio_util::sync::CancellationToken;
pub use transaction::{AmbientTransaction, IsolationLevel, TransactionScope};
