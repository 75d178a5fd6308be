//! The connection coordinator.
//!
//! [`Connection`] presents one logical connection while owning three things
//! with independent lifecycles: its own logical state, a provider-level
//! [`StoreConnection`], and the one-time load of schema metadata. An ambient
//! transaction may also be present; the coordinator reads it but never acts
//! on it.
//!
//! The coordinator updates its state only in response to calls made on it.
//! Changes made directly on the store connection (or by a transaction
//! manager) are not pushed back. When the coordinator does not own the store
//! connection, its reported state is computed from the store's live state on
//! every read, which is how an out-of-band close shows up as
//! [`ConnectionState::Broken`].
//!
//! The coordinator is not synchronized: every lifecycle method takes
//! `&mut self`, so at most one open or close is ever in flight.

use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span};

use crate::error::{Error, Result, translate_async_open_failure};
use crate::instrumentation::{OperationTimer, operation_span, span_names};
use crate::metadata::{MetadataError, MetadataProvider};
use crate::options::ConnectionOptions;
use crate::state::ConnectionState;
use crate::store::StoreConnection;
use crate::transaction::{self, AmbientTransaction};

/// A logical connection coordinating a store connection and its metadata.
///
/// # Example
///
/// ```rust,ignore
/// use std::sync::Arc;
/// use tether_client::{Connection, DataSpace, MetadataWorkspace};
///
/// let metadata = Arc::new(
///     MetadataWorkspace::new().with_loader(DataSpace::Store, load_store_schema),
/// );
/// let mut conn = Connection::new(metadata, Some(store), true);
///
/// conn.open_async().await?;
/// // ... issue commands through conn.store_connection_mut() ...
/// conn.close()?;
/// ```
pub struct Connection<S, M = dyn MetadataProvider>
where
    S: StoreConnection,
    M: MetadataProvider + ?Sized,
{
    store: Option<S>,
    metadata: Arc<M>,
    options: ConnectionOptions,
    state: ConnectionState,
    metadata_loaded: bool,
    /// Set while the store connection is open because this coordinator
    /// opened it. Only such a connection is ever closed by `close()`.
    store_opened_here: bool,
    ambient: Option<AmbientTransaction>,
}

impl<S, M> Connection<S, M>
where
    S: StoreConnection,
    M: MetadataProvider + ?Sized,
{
    /// Create a coordinator.
    ///
    /// `store` may be `None`, in which case every open fails with
    /// [`Error::NotConfigured`]. `owns_store_connection` decides whether
    /// `close()` may close the store connection.
    ///
    /// The coordinator starts [`ConnectionState::Closed`] even when `store`
    /// is already open. To adopt an open, externally owned store connection
    /// as an open coordinator, use [`Connection::attach`].
    pub fn new(metadata: Arc<M>, store: Option<S>, owns_store_connection: bool) -> Self {
        Self::with_options(
            metadata,
            store,
            ConnectionOptions::new().owns_store_connection(owns_store_connection),
        )
    }

    /// Create a coordinator with explicit options.
    ///
    /// The coordinator starts closed, even when handed a store connection
    /// that is already open. Use [`Connection::attach`] to adopt an open
    /// store connection as an open coordinator.
    pub fn with_options(metadata: Arc<M>, store: Option<S>, options: ConnectionOptions) -> Self {
        tracing::trace!(
            configured = store.is_some(),
            owns_store = options.owns_store_connection,
            metadata_space = %options.metadata_space,
            "coordinator created"
        );
        Self {
            store,
            metadata,
            options,
            state: ConnectionState::Closed,
            metadata_loaded: false,
            store_opened_here: false,
            ambient: None,
        }
    }

    /// Adopt an externally owned store connection.
    ///
    /// If the store connection is already open, metadata is ensured right
    /// away and the coordinator starts [`ConnectionState::Open`]. The store
    /// connection is never closed by this coordinator, including when the
    /// metadata load fails here.
    pub fn attach(metadata: Arc<M>, store: S) -> Result<Self> {
        let already_open = store.state().is_open();
        let mut conn = Self::with_options(
            metadata,
            Some(store),
            ConnectionOptions::new().owns_store_connection(false),
        );
        if already_open {
            conn.ensure_metadata()?;
            conn.state = ConnectionState::Open;
            tracing::debug!("attached to open store connection");
        }
        Ok(conn)
    }

    /// Current state of the connection.
    ///
    /// When the coordinator owns the store connection this is its own
    /// bookkeeping. Otherwise it is recomputed from the store connection's
    /// live state: an open coordinator whose store connection is no longer
    /// open reports [`ConnectionState::Broken`].
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        if self.options.owns_store_connection {
            return self.state;
        }
        match &self.store {
            Some(store) => ConnectionState::resolve_external(self.state, store.state()),
            None => self.state,
        }
    }

    /// Open the connection, blocking on the store connection's open.
    ///
    /// The store connection is opened only if it is not already open. If the
    /// metadata load then fails, a store connection opened by this call is
    /// closed again before the failure is returned; one that was open
    /// beforehand is left alone.
    pub fn open(&mut self) -> Result<()> {
        let timer = OperationTimer::start(span_names::OPEN);
        let span = self.operation_span(span_names::OPEN);
        let result = span.in_scope(|| self.open_blocking());
        timer.finish(&result);
        result
    }

    fn open_blocking(&mut self) -> Result<()> {
        let was_already_open = self.begin_open()?;

        if !was_already_open {
            let store = self.store.as_mut().ok_or(Error::NotConfigured)?;
            self.store_opened_here = true;
            if let Err(error) = store.open() {
                self.abandon_open();
                return Err(Error::Provider(error));
            }
        }

        self.complete_open(was_already_open)
    }

    /// Open the connection asynchronously.
    ///
    /// Same state rules as [`open`](Self::open). Provider failures that the
    /// store connection reports through [`ProviderError::Aggregate`] are
    /// unwrapped and returned as [`Error::ProviderSpecific`]; metadata
    /// failures are returned unchanged.
    ///
    /// [`ProviderError::Aggregate`]: crate::ProviderError::Aggregate
    pub async fn open_async(&mut self) -> Result<()> {
        self.open_async_with_cancellation(CancellationToken::new())
            .await
    }

    /// Open the connection asynchronously, passing `cancel` to the store.
    ///
    /// The coordinator defines no timeout of its own. If the returned future
    /// is dropped while the store open is pending, the coordinator stays
    /// [`ConnectionState::Connecting`] and must be closed by the caller.
    pub async fn open_async_with_cancellation(&mut self, cancel: CancellationToken) -> Result<()> {
        let timer = OperationTimer::start(span_names::OPEN_ASYNC);
        let span = self.operation_span(span_names::OPEN_ASYNC);
        let result = self.open_awaiting(cancel).instrument(span).await;
        timer.finish(&result);
        result
    }

    async fn open_awaiting(&mut self, cancel: CancellationToken) -> Result<()> {
        let was_already_open = self.begin_open()?;

        if !was_already_open {
            let store = self.store.as_mut().ok_or(Error::NotConfigured)?;
            self.store_opened_here = true;
            if let Err(error) = store.open_async(cancel).await {
                self.abandon_open();
                return Err(translate_async_open_failure(error));
            }
        }

        self.complete_open(was_already_open)
    }

    /// Check preconditions and enter `Connecting`.
    ///
    /// Returns whether the store connection was already open.
    fn begin_open(&mut self) -> Result<bool> {
        let Some(store) = self.store.as_ref() else {
            return Err(Error::NotConfigured);
        };
        if !self.state.is_closed() {
            return Err(Error::AlreadyOpen {
                state: self.state(),
            });
        }

        let was_already_open = store.state().is_open();
        self.ambient = transaction::current();
        if let Some(txn) = &self.ambient {
            tracing::debug!(
                transaction_id = %txn.id,
                isolation_level = txn.isolation_level.as_str(),
                claims_connection = txn.claims_connection,
                "opening inside ambient transaction"
            );
        }
        tracing::debug!(was_already_open, "opening connection");
        self.state = ConnectionState::Connecting;
        Ok(was_already_open)
    }

    /// The store open failed: nothing was opened, so nothing is rolled back.
    fn abandon_open(&mut self) {
        self.store_opened_here = false;
        self.ambient = None;
        self.state = ConnectionState::Closed;
    }

    /// Ensure metadata with the store connection open, rolling back on failure.
    fn complete_open(&mut self, was_already_open: bool) -> Result<()> {
        if let Err(error) = self.ensure_metadata() {
            if !was_already_open {
                self.rollback_store_open();
            }
            self.ambient = None;
            self.state = ConnectionState::Closed;
            return Err(Error::Metadata(error));
        }

        self.state = ConnectionState::Open;
        tracing::info!(
            data_source = self.data_source(),
            database = self.database(),
            opened_store = !was_already_open,
            "connection opened"
        );
        Ok(())
    }

    fn rollback_store_open(&mut self) {
        self.store_opened_here = false;
        if let Some(store) = self.store.as_mut() {
            tracing::debug!("closing store connection after failed metadata initialization");
            if let Err(error) = store.close() {
                // The metadata failure is what the caller sees.
                tracing::warn!(error = %error, "failed to close store connection during rollback");
            }
        }
    }

    fn ensure_metadata(&mut self) -> std::result::Result<(), MetadataError> {
        if self.metadata_loaded {
            return Ok(());
        }
        let space = self.options.metadata_space;
        if !self.metadata.is_already_loaded(space)? {
            tracing::debug!(space = %space, "metadata not loaded, loading");
            self.metadata.load(space)?;
        }
        self.metadata_loaded = true;
        Ok(())
    }

    /// Close the connection.
    ///
    /// Closing a closed connection does nothing. Otherwise the coordinator
    /// becomes [`ConnectionState::Closed`] and, if it owns the store
    /// connection and opened it, closes the store connection too. A store
    /// connection claimed by the ambient transaction present at open is
    /// left for that transaction to release.
    ///
    /// The state is `Closed` afterwards even if the store close fails.
    pub fn close(&mut self) -> Result<()> {
        if self.state.is_closed() {
            tracing::trace!("close on closed connection ignored");
            return Ok(());
        }

        let timer = OperationTimer::start(span_names::CLOSE);
        let span = self.operation_span(span_names::CLOSE);
        let result = span.in_scope(|| self.close_store());
        timer.finish(&result);
        result
    }

    fn close_store(&mut self) -> Result<()> {
        let release = self.should_release_store();
        let prior = self.state();
        self.state = ConnectionState::Closed;
        // Stays set while a claiming transaction holds the store open.
        self.store_opened_here &= !release;
        self.ambient = None;

        match self.store.as_mut() {
            Some(store) if release => {
                tracing::debug!(prior = %prior, "closing store connection");
                store.close()?;
            }
            _ => tracing::debug!(prior = %prior, "store connection left open"),
        }
        Ok(())
    }

    fn should_release_store(&self) -> bool {
        let claimed = self
            .ambient
            .as_ref()
            .is_some_and(|txn| txn.claims_connection);
        self.options.owns_store_connection && self.store_opened_here && !claimed
    }

    fn operation_span(&self, operation: &'static str) -> Span {
        operation_span(
            operation,
            self.data_source(),
            self.database(),
            self.options.owns_store_connection,
            transaction::current().as_ref(),
        )
    }

    /// The wrapped store connection.
    #[must_use]
    pub fn store_connection(&self) -> Option<&S> {
        self.store.as_ref()
    }

    /// Mutable access to the wrapped store connection.
    ///
    /// Opening or closing it directly bypasses the coordinator, which does
    /// not notice.
    pub fn store_connection_mut(&mut self) -> Option<&mut S> {
        self.store.as_mut()
    }

    /// Give up the store connection without closing it.
    pub fn into_store_connection(mut self) -> Option<S> {
        self.state = ConnectionState::Closed;
        self.store_opened_here = false;
        self.store.take()
    }

    /// The metadata provider.
    #[must_use]
    pub fn metadata(&self) -> &Arc<M> {
        &self.metadata
    }

    /// Whether this coordinator has seen its metadata loaded.
    #[must_use]
    pub fn metadata_loaded(&self) -> bool {
        self.metadata_loaded
    }

    /// Whether the coordinator owns the store connection's lifecycle.
    #[must_use]
    pub fn owns_store_connection(&self) -> bool {
        self.options.owns_store_connection
    }

    /// The ambient transaction observed by the last successful open.
    #[must_use]
    pub fn ambient_transaction(&self) -> Option<&AmbientTransaction> {
        self.ambient.as_ref()
    }

    /// Options the coordinator was built with.
    #[must_use]
    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    /// Data source of the store connection.
    #[must_use]
    pub fn data_source(&self) -> Option<&str> {
        self.store.as_ref().and_then(|store| store.data_source())
    }

    /// Database of the store connection.
    #[must_use]
    pub fn database(&self) -> Option<&str> {
        self.store.as_ref().and_then(|store| store.database())
    }

    /// Server version of the store connection. Requires an open connection.
    pub fn server_version(&self) -> Result<Option<&str>> {
        let state = self.state();
        if state != ConnectionState::Open {
            return Err(Error::NotOpen { state });
        }
        Ok(self.store.as_ref().and_then(|store| store.server_version()))
    }
}

impl<S, M> Drop for Connection<S, M>
where
    S: StoreConnection,
    M: MetadataProvider + ?Sized,
{
    fn drop(&mut self) {
        if !self.options.close_on_drop || self.state.is_closed() || !self.should_release_store() {
            return;
        }
        if let Some(store) = self.store.as_mut() {
            tracing::debug!("closing store connection on drop");
            if let Err(error) = store.close() {
                tracing::warn!(error = %error, "failed to close store connection on drop");
            }
        }
    }
}

impl<S, M> fmt::Debug for Connection<S, M>
where
    S: StoreConnection,
    M: MetadataProvider + ?Sized,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state())
            .field("data_source", &self.data_source())
            .field("database", &self.database())
            .field("owns_store_connection", &self.options.owns_store_connection)
            .field("metadata_loaded", &self.metadata_loaded)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::metadata::{DataSpace, MetadataWorkspace};
    use crate::state::StoreState;
    use crate::store::ProviderError;
    use async_trait::async_trait;

    #[derive(Debug, Default)]
    struct FakeStore {
        state: StoreState,
        opens: u32,
        closes: u32,
    }

    #[async_trait]
    impl StoreConnection for FakeStore {
        fn state(&self) -> StoreState {
            self.state
        }

        fn open(&mut self) -> std::result::Result<(), ProviderError> {
            self.opens += 1;
            self.state = StoreState::Open;
            Ok(())
        }

        async fn open_async(
            &mut self,
            _cancel: CancellationToken,
        ) -> std::result::Result<(), ProviderError> {
            self.open()
        }

        fn close(&mut self) -> std::result::Result<(), ProviderError> {
            self.closes += 1;
            self.state = StoreState::Closed;
            Ok(())
        }

        fn server_version(&self) -> Option<&str> {
            Some("16.0")
        }
    }

    fn loaded_workspace() -> Arc<MetadataWorkspace> {
        let workspace = MetadataWorkspace::new();
        workspace.register_loaded(DataSpace::Store);
        Arc::new(workspace)
    }

    #[test]
    fn test_unconfigured_open_fails() {
        let mut conn: Connection<FakeStore, MetadataWorkspace> =
            Connection::new(loaded_workspace(), None, true);

        let err = conn.open().unwrap_err();
        assert!(err.is_configuration());
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[test]
    fn test_metadata_checked_once() {
        let workspace = Arc::new(
            MetadataWorkspace::new().with_loader(DataSpace::Store, |_| Ok(())),
        );
        let mut conn = Connection::new(Arc::clone(&workspace), Some(FakeStore::default()), true);

        conn.open().unwrap();
        conn.close().unwrap();
        conn.open().unwrap();

        assert!(conn.metadata_loaded());
        assert_eq!(workspace.load_count(DataSpace::Store), 1);
        assert_eq!(conn.store_connection().unwrap().opens, 2);
    }

    #[test]
    fn test_server_version_requires_open() {
        let mut conn = Connection::new(loaded_workspace(), Some(FakeStore::default()), true);
        assert!(conn.server_version().unwrap_err().is_invalid_state());

        conn.open().unwrap();
        assert_eq!(conn.server_version().unwrap(), Some("16.0"));
    }

    #[test]
    fn test_dyn_metadata_provider() {
        let metadata: Arc<dyn MetadataProvider> = loaded_workspace();
        let mut conn: Connection<FakeStore> = Connection::new(metadata, Some(FakeStore::default()), true);

        conn.open().unwrap();
        assert_eq!(conn.state(), ConnectionState::Open);
    }

    #[test]
    fn test_into_store_connection_keeps_it_open() {
        let mut conn = Connection::new(loaded_workspace(), Some(FakeStore::default()), true);
        conn.open().unwrap();

        let store = conn.into_store_connection().unwrap();
        assert_eq!(store.state, StoreState::Open);
        assert_eq!(store.closes, 0);
    }

    #[test]
    fn test_open_async_through_fake() {
        let mut conn = Connection::new(loaded_workspace(), Some(FakeStore::default()), true);
        tokio_test::block_on(conn.open_async()).unwrap();
        assert_eq!(conn.state(), ConnectionState::Open);
        assert_eq!(conn.store_connection().unwrap().opens, 1);
    }
}
