//! Tracing instrumentation for coordinator operations.
//!
//! Every lifecycle operation runs inside a span named after it, carrying
//! the attributes below. No subscriber is installed here; applications
//! choose their own.
//!
//! ## Attributes
//!
//! - `db.system`: "tether"
//! - `server.address`: store connection data source
//! - `db.name`: store connection database
//! - `tether.owns_store`: whether the coordinator owns the store connection
//! - `tether.transaction_id`: ambient transaction, when one is active

use std::time::Instant;

use tracing::Span;

use crate::transaction::AmbientTransaction;

/// Database system identifier.
pub const DB_SYSTEM: &str = "tether";

/// Span names for coordinator operations.
pub mod span_names {
    /// Span name for a blocking open.
    pub const OPEN: &str = "tether.open";
    /// Span name for an asynchronous open.
    pub const OPEN_ASYNC: &str = "tether.open_async";
    /// Span name for close.
    pub const CLOSE: &str = "tether.close";
}

/// Attribute keys.
pub mod attributes {
    /// Database system type.
    pub const DB_SYSTEM: &str = "db.system";
    /// Database name.
    pub const DB_NAME: &str = "db.name";
    /// Server hostname or data source.
    pub const SERVER_ADDRESS: &str = "server.address";
    /// Whether the coordinator owns the store connection.
    pub const OWNS_STORE: &str = "tether.owns_store";
    /// Ambient transaction id.
    pub const TRANSACTION_ID: &str = "tether.transaction_id";
    /// Error type.
    pub const ERROR_TYPE: &str = "error.type";
}

/// Build the span for a lifecycle operation.
pub(crate) fn operation_span(
    operation: &'static str,
    data_source: Option<&str>,
    database: Option<&str>,
    owns_store: bool,
    ambient: Option<&AmbientTransaction>,
) -> Span {
    let span = tracing::debug_span!(
        "tether.operation",
        otel.name = operation,
        db.system = DB_SYSTEM,
        server.address = tracing::field::Empty,
        db.name = tracing::field::Empty,
        tether.owns_store = owns_store,
        tether.transaction_id = tracing::field::Empty,
    );
    if let Some(data_source) = data_source {
        span.record(attributes::SERVER_ADDRESS, data_source);
    }
    if let Some(database) = database {
        span.record(attributes::DB_NAME, database);
    }
    if let Some(txn) = ambient {
        span.record(attributes::TRANSACTION_ID, tracing::field::display(txn.id));
    }
    span
}

/// Short label for an error, suitable for an `error.type` field.
#[must_use]
pub fn error_type(error: &crate::Error) -> &'static str {
    use crate::Error;
    match error {
        Error::NotConfigured => "not_configured",
        Error::AlreadyOpen { .. } => "already_open",
        Error::NotOpen { .. } => "not_open",
        Error::Metadata(_) => "metadata",
        Error::Provider(_) => "provider",
        Error::ProviderSpecific { .. } => "provider_specific",
    }
}

/// Times one operation and reports it through `tracing` when finished.
#[derive(Debug, Clone)]
pub struct OperationTimer {
    operation: &'static str,
    started: Instant,
}

impl OperationTimer {
    /// Start timing `operation`.
    #[must_use]
    pub fn start(operation: &'static str) -> Self {
        Self {
            operation,
            started: Instant::now(),
        }
    }

    /// Seconds elapsed since start.
    #[must_use]
    pub fn elapsed_seconds(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    /// The operation being timed.
    #[must_use]
    pub fn operation(&self) -> &'static str {
        self.operation
    }

    /// Report the outcome.
    pub fn finish<T>(self, outcome: &crate::Result<T>) {
        let elapsed = self.elapsed_seconds();
        match outcome {
            Ok(_) => tracing::debug!(
                operation = self.operation,
                elapsed_seconds = elapsed,
                "operation completed"
            ),
            Err(error) => tracing::debug!(
                operation = self.operation,
                elapsed_seconds = elapsed,
                error_type = error_type(error),
                error = %error,
                "operation failed"
            ),
        }
    }
}
