#![cfg(feature = "integration-pg")]

use uuid::Uuid;

use agrs::repository::{Repository, RepositoryError, StoreRepository};
use agrs::sqlx;
use agrs::sqlx::{Pool, Postgres};
use agrs::store::postgres::{PgStore, PgStoreBuilder, PgStoreError};
use agrs::store::{ChangeFeed, EventStore, StreamCursor};
use agrs::{AggregateState, Metadata};

use crate::common::{Wallet, WalletEvent};

mod common;

#[sqlx::test]
async fn migrations_create_the_event_table(pool: Pool<Postgres>) {
    let store: PgStore<Wallet> = PgStoreBuilder::new(pool.clone()).try_build().await.unwrap();

    let rows = sqlx::query("SELECT table_name FROM information_schema.columns WHERE table_name = $1")
        .bind(store.table_name())
        .fetch_all(&pool)
        .await
        .unwrap();

    assert!(!rows.is_empty());
    assert_eq!(store.table_name(), "wallet_events");
}

#[sqlx::test]
async fn append_and_fetch_round_trip(pool: Pool<Postgres>) {
    let store: PgStore<Wallet> = PgStoreBuilder::new(pool).try_build().await.unwrap();
    let aggregate_id: Uuid = Uuid::new_v4();

    let events = vec![
        (WalletEvent::Created { owner: "ada".to_string() }, Metadata::correlated()),
        (WalletEvent::Funded { amount: 100 }, Metadata::correlated()),
    ];

    let version = store.append_to_stream(aggregate_id, 0, events).await.unwrap();
    assert_eq!(version, 2);

    let stream = store.fetch_stream(aggregate_id, StreamCursor::Start).await.unwrap();
    assert_eq!(stream.len(), 2);
    assert_eq!(stream[0].version, 1);
    assert_eq!(stream[1].version, 2);
    assert_eq!(stream[1].payload, WalletEvent::Funded { amount: 100 });

    let state = store.fetch_stream_state(aggregate_id).await.unwrap().unwrap();
    assert_eq!(state.version, 2);
}

#[sqlx::test]
async fn stale_precondition_conflicts(pool: Pool<Postgres>) {
    let store: PgStore<Wallet> = PgStoreBuilder::new(pool).try_build().await.unwrap();
    let aggregate_id: Uuid = Uuid::new_v4();

    store
        .append_to_stream(
            aggregate_id,
            0,
            vec![(WalletEvent::Created { owner: "ada".to_string() }, Metadata::correlated())],
        )
        .await
        .unwrap();

    let result = store
        .append_to_stream(
            aggregate_id,
            0,
            vec![(WalletEvent::Funded { amount: 10 }, Metadata::correlated())],
        )
        .await;

    assert!(matches!(result, Err(PgStoreError::Conflict(conflict)) if conflict.actual == 1));
}

#[sqlx::test]
async fn repository_replays_committed_streams(pool: Pool<Postgres>) {
    let store: PgStore<Wallet> = PgStoreBuilder::new(pool).try_build().await.unwrap();
    let repository: StoreRepository<PgStore<Wallet>> = StoreRepository::new(store);
    let id: Uuid = Uuid::new_v4();

    let mut state: AggregateState<Wallet> = AggregateState::with_id(id);
    state.raise(WalletEvent::Created { owner: "ada".to_string() }).unwrap();
    state.raise(WalletEvent::Funded { amount: 100 }).unwrap();
    state.raise(WalletEvent::Withdrawn { amount: 40 }).unwrap();
    repository.add(id, &mut state).await.unwrap();

    let replayed: AggregateState<Wallet> = repository.find(id).await.unwrap().unwrap();
    assert_eq!(replayed.version(), 3);
    assert_eq!(replayed.inner().balance, 60);

    let window = repository.get_events_between(id, 2, 3).await.unwrap();
    let versions: Vec<i64> = window.iter().map(|event| event.version).collect();
    assert_eq!(versions, vec![2, 3]);

    let absent = repository.find(Uuid::new_v4()).await.unwrap();
    assert!(absent.is_none());

    let conflict = repository
        .append_events(id, vec![WalletEvent::Funded { amount: 1 }], Some(0))
        .await;
    assert!(matches!(conflict, Err(RepositoryError::Store(PgStoreError::Conflict(_)))));
}

#[sqlx::test]
async fn change_feed_pages_in_commit_order(pool: Pool<Postgres>) {
    let store: PgStore<Wallet> = PgStoreBuilder::new(pool).try_build().await.unwrap();

    let first: Uuid = Uuid::new_v4();
    let second: Uuid = Uuid::new_v4();

    store
        .append_to_stream(
            first,
            0,
            vec![(WalletEvent::Created { owner: "ada".to_string() }, Metadata::correlated())],
        )
        .await
        .unwrap();
    store
        .append_to_stream(
            second,
            0,
            vec![(WalletEvent::Created { owner: "eve".to_string() }, Metadata::correlated())],
        )
        .await
        .unwrap();
    store
        .append_to_stream(first, 1, vec![(WalletEvent::Funded { amount: 10 }, Metadata::correlated())])
        .await
        .unwrap();

    let range = store.range_after(0, 2).await.unwrap();
    assert_eq!(range.events.len(), 2);
    assert_eq!(range.events[0].aggregate_id, first);
    assert_eq!(range.events[1].aggregate_id, second);

    let rest = store.range_after(range.ceiling, 10).await.unwrap();
    assert_eq!(rest.events.len(), 1);
    assert_eq!(rest.events[0].event_type, "wallet.funded");

    let empty = store.range_after(rest.ceiling, 10).await.unwrap();
    assert!(empty.is_empty());
    assert_eq!(empty.ceiling, rest.ceiling);
}
