//! Ambient transaction detection.
//!
//! An ambient transaction is one the caller never passes in: it is active
//! because the calling code runs inside a [`TransactionScope`]. The
//! coordinator only ever reads it. It does not enlist, commit, or roll back.
//!
//! Synchronous code uses the RAII guard, which is per thread. Async code
//! uses [`TransactionScope::run_async`], which binds the transaction to the
//! task so it survives awaits that resume on another worker.

use std::cell::RefCell;
use std::future::Future;

use uuid::Uuid;

/// Transaction isolation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    /// Read uncommitted (dirty reads allowed).
    ReadUncommitted,
    /// Read committed.
    ReadCommitted,
    /// Repeatable read.
    RepeatableRead,
    /// Serializable (highest isolation, default for distributed scopes).
    #[default]
    Serializable,
    /// Snapshot isolation.
    Snapshot,
}

impl IsolationLevel {
    /// Short name used in log fields.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReadUncommitted => "read_uncommitted",
            Self::ReadCommitted => "read_committed",
            Self::RepeatableRead => "repeatable_read",
            Self::Serializable => "serializable",
            Self::Snapshot => "snapshot",
        }
    }
}

/// A transaction that wraps the calling code without being passed to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmbientTransaction {
    /// Transaction identifier.
    pub id: Uuid,
    /// Isolation level of the scope.
    pub isolation_level: IsolationLevel,
    /// Whether the transaction takes over the store connection's close.
    ///
    /// When set, a coordinator opened inside this transaction leaves its
    /// store connection open on close; the transaction manager releases it
    /// when the scope completes.
    pub claims_connection: bool,
}

impl AmbientTransaction {
    /// Create a transaction with a fresh id and default settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            isolation_level: IsolationLevel::default(),
            claims_connection: false,
        }
    }

    /// Set the isolation level.
    #[must_use]
    pub fn isolation_level(mut self, level: IsolationLevel) -> Self {
        self.isolation_level = level;
        self
    }

    /// Set whether the transaction claims the store connection's close.
    #[must_use]
    pub fn claims_connection(mut self, claims: bool) -> Self {
        self.claims_connection = claims;
        self
    }
}

impl Default for AmbientTransaction {
    fn default() -> Self {
        Self::new()
    }
}

thread_local! {
    static SCOPES: RefCell<Vec<AmbientTransaction>> = const { RefCell::new(Vec::new()) };
}

tokio::task_local! {
    static TASK_SCOPE: AmbientTransaction;
}

/// Get the innermost ambient transaction, if any.
///
/// A task-scoped transaction wins over the thread's stack.
#[must_use]
pub fn current() -> Option<AmbientTransaction> {
    if let Ok(txn) = TASK_SCOPE.try_with(AmbientTransaction::clone) {
        return Some(txn);
    }
    SCOPES.with(|scopes| scopes.borrow().last().cloned())
}

/// Check whether any ambient transaction is active.
#[must_use]
pub fn is_active() -> bool {
    current().is_some()
}

/// Guard that keeps an ambient transaction active on this thread.
///
/// Scopes nest; dropping a guard deactivates its transaction and reveals the
/// enclosing one.
#[derive(Debug)]
#[must_use = "the transaction is only ambient while the scope is alive"]
pub struct TransactionScope {
    id: Uuid,
    // Thread-local stack: the guard must be dropped on the thread that made it.
    _not_send: std::marker::PhantomData<*const ()>,
}

impl TransactionScope {
    /// Enter a new scope with default settings.
    pub fn new() -> Self {
        Self::enter(AmbientTransaction::new())
    }

    /// Enter a scope for the given transaction.
    pub fn enter(txn: AmbientTransaction) -> Self {
        let id = txn.id;
        tracing::trace!(transaction_id = %id, "entering transaction scope");
        SCOPES.with(|scopes| scopes.borrow_mut().push(txn));
        Self {
            id,
            _not_send: std::marker::PhantomData,
        }
    }

    /// Id of the transaction this scope made ambient.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Run a future with `txn` as the ambient transaction of the task.
    pub async fn run_async<F>(txn: AmbientTransaction, future: F) -> F::Output
    where
        F: Future,
    {
        TASK_SCOPE.scope(txn, future).await
    }
}

impl Default for TransactionScope {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TransactionScope {
    fn drop(&mut self) {
        SCOPES.with(|scopes| {
            let mut scopes = scopes.borrow_mut();
            if let Some(pos) = scopes.iter().rposition(|txn| txn.id == self.id) {
                scopes.remove(pos);
            }
        });
        tracing::trace!(transaction_id = %self.id, "left transaction scope");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_no_scope() {
        assert!(current().is_none());
        assert!(!is_active());
    }

    #[test]
    fn test_scope_nesting() {
        let outer = TransactionScope::new();
        assert_eq!(current().unwrap().id, outer.id());

        {
            let inner = TransactionScope::enter(
                AmbientTransaction::new().isolation_level(IsolationLevel::Snapshot),
            );
            let txn = current().unwrap();
            assert_eq!(txn.id, inner.id());
            assert_eq!(txn.isolation_level, IsolationLevel::Snapshot);
        }

        assert_eq!(current().unwrap().id, outer.id());
        drop(outer);
        assert!(!is_active());
    }

    #[tokio::test]
    async fn test_task_scope() {
        let txn = AmbientTransaction::new().claims_connection(true);
        let id = txn.id;

        let seen = TransactionScope::run_async(txn, async {
            tokio::task::yield_now().await;
            current()
        })
        .await
        .unwrap();

        assert_eq!(seen.id, id);
        assert!(seen.claims_connection);
        assert!(current().is_none());
    }

    #[test]
    fn test_isolation_level_names() {
        assert_eq!(IsolationLevel::default(), IsolationLevel::Serializable);
        assert_eq!(IsolationLevel::ReadCommitted.as_str(), "read_committed");
    }
}
