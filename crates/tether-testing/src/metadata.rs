//! Scripted metadata provider.

use parking_lot::Mutex;
use tether_client::{DataSpace, MetadataError, MetadataProvider};

use crate::SimulatedError;

/// How the mock answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataBehavior {
    /// Already loaded; `load` is never needed.
    Loaded,
    /// Not loaded; `load` succeeds.
    Loadable,
    /// The loaded check itself fails.
    FailCheck,
    /// Not loaded; `load` fails.
    FailLoad,
}

#[derive(Debug)]
struct Inner {
    behavior: MetadataBehavior,
    checks: Vec<DataSpace>,
    loads: Vec<DataSpace>,
}

/// A metadata provider with scripted answers and a call log.
#[derive(Debug)]
pub struct MockMetadata {
    inner: Mutex<Inner>,
}

impl MockMetadata {
    /// A provider answering with `behavior`.
    #[must_use]
    pub fn new(behavior: MetadataBehavior) -> Self {
        Self {
            inner: Mutex::new(Inner {
                behavior,
                checks: Vec::new(),
                loads: Vec::new(),
            }),
        }
    }

    /// Metadata that is already loaded.
    #[must_use]
    pub fn loaded() -> Self {
        Self::new(MetadataBehavior::Loaded)
    }

    /// Metadata whose loaded check fails.
    #[must_use]
    pub fn failing() -> Self {
        Self::new(MetadataBehavior::FailCheck)
    }

    /// Change the behavior for subsequent calls.
    pub fn set_behavior(&self, behavior: MetadataBehavior) {
        self.inner.lock().behavior = behavior;
    }

    /// Number of loaded checks.
    #[must_use]
    pub fn check_calls(&self) -> usize {
        self.inner.lock().checks.len()
    }

    /// Number of loads.
    #[must_use]
    pub fn load_calls(&self) -> usize {
        self.inner.lock().loads.len()
    }

    /// Spaces that were checked, in order.
    #[must_use]
    pub fn checked_spaces(&self) -> Vec<DataSpace> {
        self.inner.lock().checks.clone()
    }
}

impl MetadataProvider for MockMetadata {
    fn is_already_loaded(&self, space: DataSpace) -> Result<bool, MetadataError> {
        let mut inner = self.inner.lock();
        inner.checks.push(space);
        match inner.behavior {
            MetadataBehavior::Loaded => Ok(true),
            MetadataBehavior::Loadable | MetadataBehavior::FailLoad => Ok(false),
            MetadataBehavior::FailCheck => Err(MetadataError::Invalid(format!(
                "{space} item collection is not registered"
            ))),
        }
    }

    fn load(&self, space: DataSpace) -> Result<(), MetadataError> {
        let mut inner = self.inner.lock();
        inner.loads.push(space);
        match inner.behavior {
            MetadataBehavior::FailLoad => Err(MetadataError::Load {
                space,
                source: Box::new(SimulatedError::new("load")),
            }),
            MetadataBehavior::Loadable => {
                inner.behavior = MetadataBehavior::Loaded;
                Ok(())
            }
            _ => Ok(()),
        }
    }
}
