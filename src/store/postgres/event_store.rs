use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use sqlx::types::Json;
use sqlx::{Pool, Postgres, Row, Transaction};
use uuid::Uuid;

use crate::aggregate::Aggregate;
use crate::event::Event;
use crate::metadata::Metadata;
use crate::sql::event::DbEvent;
use crate::sql::statements::Statements;
use crate::store::postgres::PgStoreError;
use crate::store::{
    ChangeFeed, EventRange, EventStore, FeedEvent, StoreEvent, StreamAppend, StreamCursor, StreamState,
    VersionConflict,
};
use crate::types::{Position, Version};

/// Postgres unique-violation SQLSTATE. A violation of the `(aggregate_id, version)`
/// constraint means a concurrent append claimed the slot first.
const UNIQUE_VIOLATION: &str = "23505";

/// Postgres implementation of the [`EventStore`].
///
/// Each aggregate type gets its own `{name}_events` table. The store is protected by an
/// [`Arc`] so it is cheaply cloneable while sharing the same pool and statements.
pub struct PgStore<A>
where
    A: Aggregate,
{
    pub(super) inner: Arc<InnerPgStore>,
    pub(super) _aggregate: PhantomData<A>,
}

pub(super) struct InnerPgStore {
    pub(super) pool: Pool<Postgres>,
    pub(super) statements: Statements,
}

impl<A> PgStore<A>
where
    A: Aggregate,
{
    /// Returns the name of the event store table.
    pub fn table_name(&self) -> &str {
        self.inner.statements.table_name()
    }

    /// Appends `events` inside the given transaction, enforcing the version precondition.
    ///
    /// The precondition is checked against the version read in this transaction; the
    /// unique `(aggregate_id, version)` constraint settles the race between two appends
    /// that both read the same current version.
    async fn append_in_tx(
        &self,
        transaction: &mut Transaction<'_, Postgres>,
        aggregate_id: Uuid,
        expected_version: Version,
        events: &[(A::Event, Metadata)],
        occurred_on: DateTime<Utc>,
    ) -> Result<Version, PgStoreError> {
        let actual: Version = sqlx::query_scalar(self.inner.statements.current_version())
            .bind(aggregate_id)
            .fetch_one(&mut **transaction)
            .await?;

        if actual != expected_version {
            return Err(VersionConflict {
                aggregate_id,
                expected: expected_version,
                actual,
            }
            .into());
        }

        for (offset, (event, metadata)) in events.iter().enumerate() {
            sqlx::query(self.inner.statements.insert())
                .bind(Uuid::new_v4())
                .bind(aggregate_id)
                .bind(expected_version + 1 + offset as Version)
                .bind(event.event_type())
                .bind(Json(event))
                .bind(Json(metadata))
                .bind(occurred_on)
                .execute(&mut **transaction)
                .await
                .map_err(|error| conflict_on_unique_violation(error, aggregate_id, expected_version, actual))?;
        }

        Ok(expected_version + events.len() as Version)
    }
}

fn conflict_on_unique_violation(
    error: sqlx::Error,
    aggregate_id: Uuid,
    expected: Version,
    actual: Version,
) -> PgStoreError {
    if let sqlx::Error::Database(database_error) = &error {
        if database_error.code().as_deref() == Some(UNIQUE_VIOLATION) {
            return VersionConflict {
                aggregate_id,
                expected,
                actual,
            }
            .into();
        }
    }
    error.into()
}

#[async_trait]
impl<A> EventStore for PgStore<A>
where
    A: Aggregate + 'static,
{
    type Aggregate = A;
    type Error = PgStoreError;

    #[tracing::instrument(skip_all, fields(aggregate = A::NAME, aggregate_id = %aggregate_id, expected_version), err)]
    async fn append_to_stream(
        &self,
        aggregate_id: Uuid,
        expected_version: Version,
        events: Vec<(A::Event, Metadata)>,
    ) -> Result<Version, Self::Error> {
        let mut transaction: Transaction<Postgres> = self.inner.pool.begin().await?;
        let occurred_on: DateTime<Utc> = Utc::now();

        let new_version: Version = self
            .append_in_tx(&mut transaction, aggregate_id, expected_version, &events, occurred_on)
            .await?;

        transaction.commit().await?;

        Ok(new_version)
    }

    #[tracing::instrument(skip_all, fields(aggregate = A::NAME, streams = appends.len()), err)]
    async fn append_to_streams(&self, appends: Vec<StreamAppend<A::Event>>) -> Result<u64, Self::Error> {
        let mut transaction: Transaction<Postgres> = self.inner.pool.begin().await?;
        let occurred_on: DateTime<Utc> = Utc::now();
        let mut total: u64 = 0;

        // One transaction for the whole batch: a precondition failure anywhere rolls back
        // every stream's appends.
        for append in &appends {
            self.append_in_tx(
                &mut transaction,
                append.aggregate_id,
                append.expected_version,
                &append.events,
                occurred_on,
            )
            .await?;
            total += append.events.len() as u64;
        }

        transaction.commit().await?;

        Ok(total)
    }

    async fn fetch_stream(
        &self,
        aggregate_id: Uuid,
        cursor: StreamCursor,
    ) -> Result<Vec<StoreEvent<A::Event>>, Self::Error> {
        let query = match cursor {
            StreamCursor::Start => sqlx::query_as::<_, DbEvent>(self.inner.statements.by_aggregate_id()).bind(aggregate_id),
            StreamCursor::FromVersion(from) => sqlx::query_as::<_, DbEvent>(self.inner.statements.from_version())
                .bind(aggregate_id)
                .bind(from),
            StreamCursor::FromTimestamp(from) => sqlx::query_as::<_, DbEvent>(self.inner.statements.from_timestamp())
                .bind(aggregate_id)
                .bind(from),
        };

        query
            .fetch(&self.inner.pool)
            .map_err(PgStoreError::from)
            .and_then(|row| std::future::ready(row.try_into_store_event::<A::Event>().map_err(PgStoreError::from)))
            .try_collect()
            .await
    }

    async fn fetch_stream_state(&self, aggregate_id: Uuid) -> Result<Option<StreamState>, Self::Error> {
        let row = sqlx::query(self.inner.statements.stream_state())
            .bind(aggregate_id)
            .fetch_one(&self.inner.pool)
            .await?;

        let version: Option<Version> = row.try_get("version")?;
        let last_modified: Option<DateTime<Utc>> = row.try_get("last_modified")?;

        Ok(version.zip(last_modified).map(|(version, last_modified)| StreamState {
            version,
            last_modified,
        }))
    }
}

#[async_trait]
impl<A> ChangeFeed for PgStore<A>
where
    A: Aggregate + 'static,
{
    type Error = PgStoreError;

    async fn range_after(&self, position: Position, limit: usize) -> Result<EventRange, Self::Error> {
        let events: Vec<FeedEvent> = sqlx::query_as::<_, DbEvent>(self.inner.statements.after_position())
            .bind(position)
            .bind(limit as i64)
            .fetch(&self.inner.pool)
            .map_err(PgStoreError::from)
            .and_then(|row| std::future::ready(row.try_into_feed_event().map_err(PgStoreError::from)))
            .try_collect()
            .await?;

        let ceiling: Position = events.last().map(|event| event.position).unwrap_or(position);

        Ok(EventRange {
            floor: position,
            ceiling,
            events,
        })
    }
}

/// Debug implementation for [`PgStore`]. It just shows the statements, that are the only
/// thing that might be useful to debug.
impl<A: Aggregate> std::fmt::Debug for PgStore<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgStore")
            .field("statements", &self.inner.statements)
            .finish()
    }
}

impl<A> Clone for PgStore<A>
where
    A: Aggregate,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            _aggregate: PhantomData,
        }
    }
}
