//! Scripted store connection.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tether_client::{CancellationToken, ProviderError, StoreConnection, StoreState};

use crate::SimulatedError;

/// What a scripted open does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenBehavior {
    /// Succeed and move the mock to `Open`.
    Succeed,
    /// Succeed without touching the reported state.
    SucceedSilently,
    /// Fail with a plain provider error.
    Fail,
    /// Fail with a provider error wrapped in [`ProviderError::Aggregate`].
    FailAggregated,
    /// Wait for the cancellation token, then fail with `Cancelled`.
    ///
    /// The blocking open treats this like `Succeed`.
    WaitForCancel,
}

#[derive(Debug)]
struct Inner {
    state: StoreState,
    track_state: bool,
    open_behavior: OpenBehavior,
    open_async_behavior: OpenBehavior,
    close_fails: bool,
    open_calls: u32,
    open_async_calls: u32,
    close_calls: u32,
}

/// A store connection whose behavior is scripted by the test.
///
/// Clones share state, so a test keeps one clone as a handle for inspecting
/// call counts and flipping the state behind the coordinator's back.
#[derive(Debug, Clone)]
pub struct MockStoreConnection {
    inner: Arc<Mutex<Inner>>,
    data_source: Option<String>,
    database: Option<String>,
}

impl MockStoreConnection {
    /// A mock that starts closed and opens successfully.
    #[must_use]
    pub fn closed() -> Self {
        Self::with_state(StoreState::Closed)
    }

    /// A mock that starts open.
    #[must_use]
    pub fn opened() -> Self {
        Self::with_state(StoreState::Open)
    }

    /// A mock that starts in `state`.
    #[must_use]
    pub fn with_state(state: StoreState) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                state,
                track_state: true,
                open_behavior: OpenBehavior::Succeed,
                open_async_behavior: OpenBehavior::Succeed,
                close_fails: false,
                open_calls: 0,
                open_async_calls: 0,
                close_calls: 0,
            })),
            data_source: None,
            database: None,
        }
    }

    /// Keep reporting the initial state no matter what is called.
    #[must_use]
    pub fn fixed_state(self) -> Self {
        self.inner.lock().track_state = false;
        self
    }

    /// Script the blocking open.
    #[must_use]
    pub fn on_open(self, behavior: OpenBehavior) -> Self {
        self.inner.lock().open_behavior = behavior;
        self
    }

    /// Script the asynchronous open.
    #[must_use]
    pub fn on_open_async(self, behavior: OpenBehavior) -> Self {
        self.inner.lock().open_async_behavior = behavior;
        self
    }

    /// Make close fail (after recording the call and closing).
    #[must_use]
    pub fn failing_close(self) -> Self {
        self.inner.lock().close_fails = true;
        self
    }

    /// Set the reported data source and database.
    #[must_use]
    pub fn named(mut self, data_source: &str, database: &str) -> Self {
        self.data_source = Some(data_source.to_string());
        self.database = Some(database.to_string());
        self
    }

    /// Change the reported state directly.
    pub fn set_state(&self, state: StoreState) {
        self.inner.lock().state = state;
    }

    /// Number of blocking opens.
    #[must_use]
    pub fn open_calls(&self) -> u32 {
        self.inner.lock().open_calls
    }

    /// Number of asynchronous opens.
    #[must_use]
    pub fn open_async_calls(&self) -> u32 {
        self.inner.lock().open_async_calls
    }

    /// Number of closes.
    #[must_use]
    pub fn close_calls(&self) -> u32 {
        self.inner.lock().close_calls
    }

    fn finish_open(&self, behavior: OpenBehavior) -> Result<(), ProviderError> {
        let mut inner = self.inner.lock();
        match behavior {
            OpenBehavior::Succeed | OpenBehavior::WaitForCancel => {
                if inner.track_state {
                    inner.state = StoreState::Open;
                }
                Ok(())
            }
            OpenBehavior::SucceedSilently => Ok(()),
            OpenBehavior::Fail => Err(self.refused()),
            OpenBehavior::FailAggregated => Err(ProviderError::aggregate(self.refused())),
        }
    }

    fn refused(&self) -> ProviderError {
        ProviderError::Refused {
            data_source: self
                .data_source
                .clone()
                .unwrap_or_else(|| "mock".to_string()),
            reason: "simulated refusal".to_string(),
        }
    }
}

#[async_trait]
impl StoreConnection for MockStoreConnection {
    fn state(&self) -> StoreState {
        self.inner.lock().state
    }

    fn open(&mut self) -> Result<(), ProviderError> {
        let behavior = {
            let mut inner = self.inner.lock();
            inner.open_calls += 1;
            inner.open_behavior
        };
        tracing::trace!(?behavior, "mock store open");
        self.finish_open(behavior)
    }

    async fn open_async(&mut self, cancel: CancellationToken) -> Result<(), ProviderError> {
        let behavior = {
            let mut inner = self.inner.lock();
            inner.open_async_calls += 1;
            inner.open_async_behavior
        };
        tracing::trace!(?behavior, "mock store open_async");

        if behavior == OpenBehavior::WaitForCancel {
            cancel.cancelled().await;
            return Err(ProviderError::Cancelled);
        }
        tokio::task::yield_now().await;
        self.finish_open(behavior)
    }

    fn close(&mut self) -> Result<(), ProviderError> {
        let mut inner = self.inner.lock();
        inner.close_calls += 1;
        if inner.track_state {
            inner.state = StoreState::Closed;
        }
        if inner.close_fails {
            return Err(ProviderError::other(SimulatedError::new("close")));
        }
        Ok(())
    }

    fn data_source(&self) -> Option<&str> {
        self.data_source.as_deref()
    }

    fn database(&self) -> Option<&str> {
        self.database.as_deref()
    }

    fn server_version(&self) -> Option<&str> {
        Some("mock-1.0")
    }
}
