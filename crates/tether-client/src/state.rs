//! Connection state types.
//!
//! Two enums live here: [`ConnectionState`] is what the coordinator reports
//! to its callers, and [`StoreState`] is what a provider-level connection
//! reports about itself. The coordinator only updates its own state in
//! response to calls made on it, so the two can disagree.
//!
//! ## State Transitions
//!
//! ```text
//! Closed -> Connecting (via open() / open_async())
//! Connecting -> Open (store connection open, metadata loaded)
//! Connecting -> Closed (store open failed or metadata load failed)
//! Open -> Closed (via close())
//! Open -> Broken (store closed out-of-band, externally owned only)
//! Broken -> Closed (via close())
//! ```

use std::fmt;

/// Logical state of a coordinator connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// Not open. The initial state.
    #[default]
    Closed,
    /// An open attempt is in flight.
    ///
    /// Only observable after an asynchronous open was cancelled mid-way.
    Connecting,
    /// Open and usable.
    Open,
    /// Previously open, but the store connection went away underneath.
    Broken,
}

impl ConnectionState {
    /// Whether an open attempt is permitted from this state.
    #[must_use]
    pub fn is_closed(self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Resolve the reported state for an externally owned store connection.
    ///
    /// `stored` is the coordinator's own bookkeeping. A store connection that
    /// opens behind the coordinator's back does not make the coordinator
    /// open; one that closes (or breaks) behind its back makes an open
    /// coordinator broken.
    #[must_use]
    pub fn resolve_external(stored: Self, store: StoreState) -> Self {
        match stored {
            Self::Open if !store.is_open() => Self::Broken,
            other => other,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Closed => "closed",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Broken => "broken",
        };
        f.write_str(name)
    }
}

/// Live state reported by a provider-level store connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[non_exhaustive]
pub enum StoreState {
    /// Closed.
    #[default]
    Closed,
    /// Handshake in progress.
    Connecting,
    /// Open and idle.
    Open,
    /// Open and executing a command.
    Executing,
    /// Open and fetching rows.
    Fetching,
    /// The link failed.
    Broken,
}

impl StoreState {
    /// Whether the connection is usable (open, executing, or fetching).
    #[must_use]
    pub fn is_open(self) -> bool {
        matches!(self, Self::Open | Self::Executing | Self::Fetching)
    }
}

impl fmt::Display for StoreState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Closed => "closed",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Executing => "executing",
            Self::Fetching => "fetching",
            Self::Broken => "broken",
        };
        f.write_str(name)
    }
}
