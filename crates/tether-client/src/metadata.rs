//! Schema metadata contract and a shared, load-once workspace.
//!
//! The coordinator needs exactly one thing from metadata: a guarantee that
//! the schema for a [`DataSpace`] is loaded before it reports itself open.
//! Parsing schema definitions is left to the registered loaders.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

use crate::store::BoxError;

/// Metadata space a schema belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataSpace {
    /// Application object types.
    Object,
    /// Conceptual model.
    Conceptual,
    /// Storage (provider) model.
    Store,
    /// Object to conceptual mapping.
    ObjectConceptual,
    /// Conceptual to storage mapping.
    ConceptualStore,
}

impl fmt::Display for DataSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Object => "object",
            Self::Conceptual => "conceptual",
            Self::Store => "store",
            Self::ObjectConceptual => "object-conceptual",
            Self::ConceptualStore => "conceptual-store",
        };
        f.write_str(name)
    }
}

/// Errors raised while checking or loading metadata.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum MetadataError {
    /// Nothing knows how to load this space.
    #[error("no metadata loader registered for the {space} space")]
    LoaderMissing {
        /// The space that was requested.
        space: DataSpace,
    },

    /// The metadata itself is not valid.
    #[error("invalid metadata: {0}")]
    Invalid(String),

    /// A loader failed.
    #[error("failed to load {space} metadata")]
    Load {
        /// The space being loaded.
        space: DataSpace,
        /// Underlying failure.
        #[source]
        source: BoxError,
    },
}

/// Supplies schema metadata to coordinators.
///
/// Implementations shared between coordinators synchronize internally; the
/// coordinator calls these methods without holding any lock.
pub trait MetadataProvider: Send + Sync {
    /// Check whether `space` is already loaded.
    fn is_already_loaded(&self, space: DataSpace) -> Result<bool, MetadataError>;

    /// Load `space`. Loading an already loaded space is a no-op.
    fn load(&self, space: DataSpace) -> Result<(), MetadataError>;
}

impl<T: MetadataProvider + ?Sized> MetadataProvider for Arc<T> {
    fn is_already_loaded(&self, space: DataSpace) -> Result<bool, MetadataError> {
        (**self).is_already_loaded(space)
    }

    fn load(&self, space: DataSpace) -> Result<(), MetadataError> {
        (**self).load(space)
    }
}

type Loader = Box<dyn Fn(DataSpace) -> Result<(), MetadataError> + Send + Sync>;

/// A metadata provider that runs a registered loader at most once per space.
///
/// Failed loads are not cached, so a later attempt runs the loader again.
/// The loader runs under the workspace lock, so concurrent first loads
/// from several coordinators are serialized.
pub struct MetadataWorkspace {
    loaders: HashMap<DataSpace, Loader>,
    loaded: Mutex<HashMap<DataSpace, u64>>,
}

impl MetadataWorkspace {
    /// Create an empty workspace with no loaders.
    #[must_use]
    pub fn new() -> Self {
        Self {
            loaders: HashMap::new(),
            loaded: Mutex::new(HashMap::new()),
        }
    }

    /// Register the loader for a space, replacing any previous one.
    #[must_use]
    pub fn with_loader<F>(mut self, space: DataSpace, loader: F) -> Self
    where
        F: Fn(DataSpace) -> Result<(), MetadataError> + Send + Sync + 'static,
    {
        self.loaders.insert(space, Box::new(loader));
        self
    }

    /// Mark a space as loaded without running a loader.
    ///
    /// Useful when the schema was built elsewhere and handed over complete.
    pub fn register_loaded(&self, space: DataSpace) {
        self.loaded.lock().entry(space).or_insert(0);
    }

    /// Number of times the loader for `space` ran successfully.
    #[must_use]
    pub fn load_count(&self, space: DataSpace) -> u64 {
        self.loaded.lock().get(&space).copied().unwrap_or(0)
    }
}

impl Default for MetadataWorkspace {
    fn default() -> Self {
        Self::new()
    }
}

impl MetadataProvider for MetadataWorkspace {
    fn is_already_loaded(&self, space: DataSpace) -> Result<bool, MetadataError> {
        Ok(self.loaded.lock().contains_key(&space))
    }

    fn load(&self, space: DataSpace) -> Result<(), MetadataError> {
        let mut loaded = self.loaded.lock();
        if loaded.contains_key(&space) {
            return Ok(());
        }

        let loader = self
            .loaders
            .get(&space)
            .ok_or(MetadataError::LoaderMissing { space })?;

        tracing::debug!(space = %space, "loading metadata");
        loader(space)?;
        *loaded.entry(space).or_insert(0) += 1;
        Ok(())
    }
}

impl fmt::Debug for MetadataWorkspace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut spaces: Vec<DataSpace> = self.loaders.keys().copied().collect();
        spaces.sort_by_key(|space| space.to_string());
        f.debug_struct("MetadataWorkspace")
            .field("loaders", &spaces)
            .field("loaded", &self.loaded.lock().len())
            .finish()
    }
}
