//! Coordinator configuration.

use crate::metadata::DataSpace;

/// Options fixed when a [`Connection`](crate::Connection) is constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionOptions {
    /// Whether the coordinator owns the store connection's lifecycle.
    ///
    /// When false, the coordinator never closes the store connection on its
    /// own `close()` or on drop, and its reported state is computed from the
    /// store connection's live state.
    pub owns_store_connection: bool,

    /// Metadata space that must be loaded before the connection opens.
    pub metadata_space: DataSpace,

    /// Whether dropping an open coordinator closes the store connection.
    ///
    /// Has no effect unless the coordinator owns the store connection.
    pub close_on_drop: bool,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            owns_store_connection: true,
            metadata_space: DataSpace::Store,
            close_on_drop: true,
        }
    }
}

impl ConnectionOptions {
    /// Create options with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set whether the coordinator owns the store connection.
    #[must_use]
    pub fn owns_store_connection(mut self, owns: bool) -> Self {
        self.owns_store_connection = owns;
        self
    }

    /// Set the metadata space to ensure on open.
    #[must_use]
    pub fn metadata_space(mut self, space: DataSpace) -> Self {
        self.metadata_space = space;
        self
    }

    /// Set whether drop closes an owned, open store connection.
    #[must_use]
    pub fn close_on_drop(mut self, enabled: bool) -> Self {
        self.close_on_drop = enabled;
        self
    }
}
