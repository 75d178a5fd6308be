//! Asynchronous open: same state rules, plus failure translation at the
//! await boundary and cancellation.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use std::error::Error as _;
use std::sync::Arc;
use std::time::Duration;

use tether_client::{
    AmbientTransaction, CancellationToken, Connection, ConnectionState, Error, MetadataError,
    ProviderError, StoreConnection, StoreState, TransactionScope,
};
use tether_testing::{
    MetadataBehavior, MockConnection, MockMetadata, MockStoreConnection, OpenBehavior, coordinator,
};
use tokio_test::{assert_pending, task};

#[tokio::test]
async fn test_open_async_without_store_connection_fails() {
    common::init_tracing();
    let mut conn: MockConnection = Connection::new(Arc::new(MockMetadata::loaded()), None, true);

    let err = conn.open_async().await.unwrap_err();

    assert!(err.is_configuration());
    assert_eq!(conn.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn test_open_async_sets_state_to_open() {
    let store = MockStoreConnection::closed();
    let mut conn = coordinator(&Arc::new(MockMetadata::loaded()), &store, true);

    conn.open_async().await.unwrap();

    assert_eq!(conn.state(), ConnectionState::Open);
    assert_eq!(store.state(), StoreState::Open);
}

#[tokio::test]
async fn test_open_async_twice_fails_with_invalid_state() {
    let store = MockStoreConnection::closed();
    let mut conn = coordinator(&Arc::new(MockMetadata::loaded()), &store, true);

    conn.open_async().await.unwrap();
    let err = conn.open_async().await.unwrap_err();

    assert!(matches!(
        err,
        Error::AlreadyOpen {
            state: ConnectionState::Open
        }
    ));
    assert_eq!(store.open_async_calls(), 1);
}

#[tokio::test]
async fn test_store_connection_opened_asynchronously_once() {
    let store = MockStoreConnection::closed();
    let mut conn = coordinator(&Arc::new(MockMetadata::loaded()), &store, true);

    conn.open_async().await.unwrap();

    assert_eq!(store.open_async_calls(), 1);
    assert_eq!(store.open_calls(), 0);
}

#[tokio::test]
async fn test_store_connection_not_reopened_when_initially_open() {
    let store = MockStoreConnection::opened();
    let mut conn = coordinator(&Arc::new(MockMetadata::loaded()), &store, true);

    conn.open_async().await.unwrap();

    assert_eq!(store.open_async_calls(), 0);
    assert_eq!(store.state(), StoreState::Open);
}

#[tokio::test]
async fn test_store_connection_closed_when_metadata_fails_after_opening_it() {
    let store = MockStoreConnection::closed();
    let mut conn = coordinator(&Arc::new(MockMetadata::failing()), &store, true);

    let err = conn.open_async().await.unwrap_err();

    // Metadata failures are not re-kinded on the async path.
    assert!(matches!(err, Error::Metadata(MetadataError::Invalid(_))));
    assert_eq!(store.close_calls(), 1);
    assert_eq!(conn.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn test_store_connection_closed_when_metadata_fails_without_ownership() {
    let store = MockStoreConnection::closed();
    let mut conn = coordinator(&Arc::new(MockMetadata::failing()), &store, false);

    let err = conn.open_async().await.unwrap_err();

    assert!(matches!(err, Error::Metadata(_)));
    assert_eq!(store.open_async_calls(), 1);
    assert_eq!(store.close_calls(), 1);
    assert_eq!(conn.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn test_store_connection_left_open_when_metadata_fails_and_it_was_open() {
    let store = MockStoreConnection::opened();
    let mut conn = coordinator(&Arc::new(MockMetadata::failing()), &store, true);

    conn.open_async().await.unwrap_err();

    assert_eq!(store.close_calls(), 0);
    assert_eq!(store.state(), StoreState::Open);
    assert_eq!(conn.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn test_aggregated_provider_failure_is_unwrapped_and_wrapped() {
    let store = MockStoreConnection::closed()
        .named("db01", "inventory")
        .on_open_async(OpenBehavior::FailAggregated);
    let mut conn = coordinator(&Arc::new(MockMetadata::loaded()), &store, true);

    let err = conn.open_async().await.unwrap_err();

    assert_eq!(err.to_string(), "the underlying provider failed on open");
    match &err {
        Error::ProviderSpecific { operation, source } => {
            assert_eq!(*operation, "open");
            assert!(matches!(source, ProviderError::Refused { data_source, .. } if data_source == "db01"));
        }
        other => panic!("expected ProviderSpecific, got {other:?}"),
    }
    assert!(err.source().is_some());
    assert_eq!(store.open_async_calls(), 1);
    assert_eq!(store.close_calls(), 0);
    assert_eq!(conn.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn test_plain_provider_failure_is_left_unchanged() {
    let store = MockStoreConnection::closed().on_open_async(OpenBehavior::Fail);
    let mut conn = coordinator(&Arc::new(MockMetadata::loaded()), &store, true);

    let err = conn.open_async().await.unwrap_err();

    assert!(matches!(err, Error::Provider(ProviderError::Refused { .. })));
    assert_eq!(conn.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn test_cancellation_is_delegated_to_store_connection() {
    let store = MockStoreConnection::closed().on_open_async(OpenBehavior::WaitForCancel);
    let mut conn = coordinator(&Arc::new(MockMetadata::loaded()), &store, true);
    let token = CancellationToken::new();

    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        canceller.cancel();
    });

    let err = conn.open_async_with_cancellation(token).await.unwrap_err();

    assert!(matches!(err, Error::Provider(ProviderError::Cancelled)));
    assert_eq!(conn.state(), ConnectionState::Closed);
    assert_eq!(store.close_calls(), 0);
}

#[test]
fn test_dropped_open_leaves_connecting_until_closed() {
    let store = MockStoreConnection::closed().on_open_async(OpenBehavior::WaitForCancel);
    let mut conn = coordinator(&Arc::new(MockMetadata::loaded()), &store, true);

    {
        let mut open = task::spawn(conn.open_async());
        assert_pending!(open.poll());
    }

    assert_eq!(conn.state(), ConnectionState::Connecting);
    assert!(conn.open().unwrap_err().is_invalid_state());

    conn.close().unwrap();
    assert_eq!(conn.state(), ConnectionState::Closed);
    assert_eq!(store.close_calls(), 1);
}

#[tokio::test]
async fn test_metadata_loaded_once_across_async_opens() {
    let store = MockStoreConnection::closed();
    let metadata = Arc::new(MockMetadata::new(MetadataBehavior::Loadable));
    let mut conn = coordinator(&metadata, &store, true);

    conn.open_async().await.unwrap();
    conn.close().unwrap();
    conn.open_async().await.unwrap();

    assert_eq!(metadata.load_calls(), 1);
    assert_eq!(store.open_async_calls(), 2);
}

#[tokio::test]
async fn test_task_scoped_transaction_is_observed() {
    let store = MockStoreConnection::closed();
    let metadata = Arc::new(MockMetadata::loaded());
    let txn = AmbientTransaction::new();
    let id = txn.id;

    let conn = TransactionScope::run_async(txn, async {
        let mut conn = coordinator(&metadata, &store, true);
        tokio::task::yield_now().await;
        conn.open_async().await.unwrap();
        conn
    })
    .await;

    assert_eq!(conn.ambient_transaction().unwrap().id, id);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_open_async_runs_on_spawned_task() {
    let store = MockStoreConnection::closed();
    let mut conn = coordinator(&Arc::new(MockMetadata::loaded()), &store, true);

    let conn = tokio::spawn(async move {
        conn.open_async().await.unwrap();
        conn
    })
    .await
    .unwrap();

    assert_eq!(conn.state(), ConnectionState::Open);
}
