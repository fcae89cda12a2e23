use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::aggregate::{Aggregate, DispatchError, HandlerTable};
use crate::metadata::Metadata;
use crate::state::AggregateState;
use crate::store::{EventStore, StoreEvent, StreamAppend, StreamCursor};
use crate::types::Version;

pub mod ext;
mod traced;

pub use traced::TracedRepository;

/// Failure of a repository operation.
///
/// Store-level errors (version conflicts, serialization failures, I/O) propagate through
/// [`RepositoryError::Store`] unmodified, so callers can distinguish "not found" from
/// "conflict" from "corrupt data" and choose a retry strategy per kind.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError<E> {
    /// A required read found no stream for the id.
    #[error("aggregate `{0}` not found")]
    NotFound(Uuid),
    /// Replayed history contained an event no handler accepts.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    /// The underlying store failed.
    #[error(transparent)]
    Store(E),
}

/// CRUD-style operations over event-sourced aggregates.
///
/// Mutations drain the aggregate's uncommitted queue and append it under an optimistic
/// version precondition. Version semantics are uniform across every operation: the
/// precondition is the stream version *before* the batch, and the returned version is
/// `precondition + appended`.
///
/// Implementors translate these calls onto an [`EventStore`]; decorators (such as
/// [`TracedRepository`]) wrap another implementation and delegate.
#[async_trait]
pub trait Repository<A>: Send + Sync
where
    A: Aggregate + 'static,
{
    type StoreError: std::error::Error + Send + Sync + 'static;

    /// Replays the full stream; `None` if no stream exists for the id.
    async fn find(&self, id: Uuid) -> Result<Option<AggregateState<A>>, RepositoryError<Self::StoreError>>;

    async fn get_by_id(&self, id: Uuid) -> Result<Option<AggregateState<A>>, RepositoryError<Self::StoreError>> {
        self.find(id).await
    }

    /// Drains the aggregate's pending events and starts a brand-new stream with them, in
    /// one round trip. Returns the number of appended events. Fails with a conflict if
    /// the stream already exists, even when the drain is empty.
    async fn add(&self, id: Uuid, state: &mut AggregateState<A>) -> Result<u64, RepositoryError<Self::StoreError>>;

    /// Drains the aggregate's pending events and appends them after `expected_version`
    /// (defaulting to the aggregate's version before the drained batch). A drain that
    /// yields no events is a no-op returning the aggregate's current version, with no
    /// store round trip.
    async fn update(
        &self,
        id: Uuid,
        state: &mut AggregateState<A>,
        expected_version: Option<Version>,
    ) -> Result<Version, RepositoryError<Self::StoreError>>;

    /// Identical to [`Repository::update`]: deletion is modeled as an ordinary appended
    /// event, never a physical removal.
    async fn delete(
        &self,
        id: Uuid,
        state: &mut AggregateState<A>,
        expected_version: Option<Version>,
    ) -> Result<Version, RepositoryError<Self::StoreError>> {
        self.update(id, state, expected_version).await
    }

    /// Replays each id independently; ids with no stream are silently omitted.
    async fn find_many(&self, ids: &[Uuid]) -> Result<Vec<AggregateState<A>>, RepositoryError<Self::StoreError>>;

    /// Starts a stream per pair and commits all starts as a single atomic unit of work.
    /// Returns the total number of appended events.
    async fn add_many(
        &self,
        pairs: &mut [(Uuid, AggregateState<A>)],
    ) -> Result<u64, RepositoryError<Self::StoreError>>;

    /// Appends each aggregate's pending events as a single atomic unit of work.
    /// Aggregates with no pending events are skipped without affecting the others.
    async fn update_many(
        &self,
        triples: &mut [(Uuid, AggregateState<A>, Option<Version>)],
    ) -> Result<u64, RepositoryError<Self::StoreError>>;

    /// The full stream, in version order.
    async fn get_events(&self, id: Uuid) -> Result<Vec<StoreEvent<A::Event>>, RepositoryError<Self::StoreError>>;

    async fn get_events_from(
        &self,
        id: Uuid,
        from_version: Version,
    ) -> Result<Vec<StoreEvent<A::Event>>, RepositoryError<Self::StoreError>>;

    /// Events with `from_version <= version <= to_version`. The store only supports the
    /// lower bound natively; the upper bound is applied here, after the fetch.
    async fn get_events_between(
        &self,
        id: Uuid,
        from_version: Version,
        to_version: Version,
    ) -> Result<Vec<StoreEvent<A::Event>>, RepositoryError<Self::StoreError>>;

    async fn get_events_since(
        &self,
        id: Uuid,
        from_timestamp: DateTime<Utc>,
    ) -> Result<Vec<StoreEvent<A::Event>>, RepositoryError<Self::StoreError>>;

    /// Events with `from_timestamp <= occurred_on <= to_timestamp`, upper bound applied
    /// after the lower-bound-only fetch.
    async fn get_events_during(
        &self,
        id: Uuid,
        from_timestamp: DateTime<Utc>,
        to_timestamp: DateTime<Utc>,
    ) -> Result<Vec<StoreEvent<A::Event>>, RepositoryError<Self::StoreError>>;

    /// Replays the stream truncated at `version`; `None` if the stream is absent or does
    /// not reach that version.
    async fn get_at_version(
        &self,
        id: Uuid,
        version: Version,
    ) -> Result<Option<AggregateState<A>>, RepositoryError<Self::StoreError>>;

    /// Low-level append bypassing the aggregate core, for externally produced events.
    /// The precondition is `expected_version.unwrap_or(0)`; an empty input returns it
    /// without a store round trip.
    async fn append_events(
        &self,
        id: Uuid,
        events: Vec<A::Event>,
        expected_version: Option<Version>,
    ) -> Result<Version, RepositoryError<Self::StoreError>>;

    /// Like [`Repository::append_events`], but each event carries independent metadata
    /// (headers, correlation and causation ids) used for trace propagation on replay.
    async fn append_events_with_metadata(
        &self,
        id: Uuid,
        events: Vec<(A::Event, Metadata)>,
        expected_version: Option<Version>,
    ) -> Result<Version, RepositoryError<Self::StoreError>>;

    /// Stream existence is the sole source of truth for "does this aggregate exist".
    async fn stream_exists(&self, id: Uuid) -> Result<bool, RepositoryError<Self::StoreError>>;

    /// The stream's current version, or 0 if absent. No replay.
    async fn current_version(&self, id: Uuid) -> Result<Version, RepositoryError<Self::StoreError>>;

    /// When the stream was last appended to; `None` if absent. No replay.
    async fn last_modified(&self, id: Uuid) -> Result<Option<DateTime<Utc>>, RepositoryError<Self::StoreError>>;
}

/// Store-backed [`Repository`] implementation.
///
/// Owns one [`HandlerTable`] per repository instance, built once at construction and
/// shared across every replay.
pub struct StoreRepository<E>
where
    E: EventStore,
{
    store: E,
    handlers: Arc<HandlerTable<E::Aggregate>>,
}

impl<E> StoreRepository<E>
where
    E: EventStore,
{
    pub fn new(store: E) -> Self {
        Self {
            store,
            handlers: Arc::new(HandlerTable::new()),
        }
    }

    /// Returns the underlying event store.
    pub fn store(&self) -> &E {
        &self.store
    }

    fn fold(
        &self,
        id: Uuid,
        events: &[StoreEvent<<E::Aggregate as Aggregate>::Event>],
    ) -> Result<AggregateState<E::Aggregate>, DispatchError> {
        AggregateState::with_handlers(id, Arc::clone(&self.handlers)).apply_store_events(events)
    }
}

/// The stream version before the events still queued on `state` were raised.
fn version_before_pending<A>(state: &AggregateState<A>) -> Version
where
    A: Aggregate,
{
    state.version() - state.uncommitted_count() as Version
}

fn with_commit_metadata<E>(events: Vec<E>) -> Vec<(E, Metadata)> {
    // Every event of one commit shares one fresh correlation id.
    let metadata: Metadata = Metadata::correlated();
    events.into_iter().map(|event| (event, metadata.clone())).collect()
}

#[async_trait]
impl<E> Repository<E::Aggregate> for StoreRepository<E>
where
    E: EventStore + Send + Sync,
    E::Aggregate: 'static,
{
    type StoreError = E::Error;

    async fn find(
        &self,
        id: Uuid,
    ) -> Result<Option<AggregateState<E::Aggregate>>, RepositoryError<Self::StoreError>> {
        let events = self
            .store
            .fetch_stream(id, StreamCursor::Start)
            .await
            .map_err(RepositoryError::Store)?;

        if events.is_empty() {
            return Ok(None);
        }

        Ok(Some(self.fold(id, &events)?))
    }

    async fn add(
        &self,
        id: Uuid,
        state: &mut AggregateState<E::Aggregate>,
    ) -> Result<u64, RepositoryError<Self::StoreError>> {
        let events = state.take_uncommitted();
        let count: u64 = events.len() as u64;

        // An empty drain still goes to the store: the precondition of 0 must hold, so
        // adding to an existing stream conflicts regardless of the queue.
        self.store
            .append_to_stream(id, 0, with_commit_metadata(events))
            .await
            .map_err(RepositoryError::Store)?;

        Ok(count)
    }

    async fn update(
        &self,
        id: Uuid,
        state: &mut AggregateState<E::Aggregate>,
        expected_version: Option<Version>,
    ) -> Result<Version, RepositoryError<Self::StoreError>> {
        if state.uncommitted_count() == 0 {
            return Ok(state.version());
        }

        let expected: Version = expected_version.unwrap_or_else(|| version_before_pending(state));
        let events = state.take_uncommitted();

        self.store
            .append_to_stream(id, expected, with_commit_metadata(events))
            .await
            .map_err(RepositoryError::Store)
    }

    async fn find_many(
        &self,
        ids: &[Uuid],
    ) -> Result<Vec<AggregateState<E::Aggregate>>, RepositoryError<Self::StoreError>> {
        let mut results: Vec<AggregateState<E::Aggregate>> = Vec::with_capacity(ids.len());

        for id in ids {
            if let Some(state) = self.find(*id).await? {
                results.push(state);
            }
        }

        Ok(results)
    }

    async fn add_many(
        &self,
        pairs: &mut [(Uuid, AggregateState<E::Aggregate>)],
    ) -> Result<u64, RepositoryError<Self::StoreError>> {
        let mut appends: Vec<StreamAppend<<E::Aggregate as Aggregate>::Event>> = Vec::with_capacity(pairs.len());

        for (id, state) in pairs.iter_mut() {
            if state.uncommitted_count() == 0 {
                continue;
            }

            appends.push(StreamAppend {
                aggregate_id: *id,
                expected_version: 0,
                events: with_commit_metadata(state.take_uncommitted()),
            });
        }

        if appends.is_empty() {
            return Ok(0);
        }

        self.store.append_to_streams(appends).await.map_err(RepositoryError::Store)
    }

    async fn update_many(
        &self,
        triples: &mut [(Uuid, AggregateState<E::Aggregate>, Option<Version>)],
    ) -> Result<u64, RepositoryError<Self::StoreError>> {
        let mut appends: Vec<StreamAppend<<E::Aggregate as Aggregate>::Event>> = Vec::with_capacity(triples.len());

        for (id, state, expected_version) in triples.iter_mut() {
            if state.uncommitted_count() == 0 {
                continue;
            }

            let expected: Version = expected_version.unwrap_or_else(|| version_before_pending(state));
            appends.push(StreamAppend {
                aggregate_id: *id,
                expected_version: expected,
                events: with_commit_metadata(state.take_uncommitted()),
            });
        }

        if appends.is_empty() {
            return Ok(0);
        }

        self.store.append_to_streams(appends).await.map_err(RepositoryError::Store)
    }

    async fn get_events(
        &self,
        id: Uuid,
    ) -> Result<Vec<StoreEvent<<E::Aggregate as Aggregate>::Event>>, RepositoryError<Self::StoreError>> {
        self.store
            .fetch_stream(id, StreamCursor::Start)
            .await
            .map_err(RepositoryError::Store)
    }

    async fn get_events_from(
        &self,
        id: Uuid,
        from_version: Version,
    ) -> Result<Vec<StoreEvent<<E::Aggregate as Aggregate>::Event>>, RepositoryError<Self::StoreError>> {
        self.store
            .fetch_stream(id, StreamCursor::FromVersion(from_version))
            .await
            .map_err(RepositoryError::Store)
    }

    async fn get_events_between(
        &self,
        id: Uuid,
        from_version: Version,
        to_version: Version,
    ) -> Result<Vec<StoreEvent<<E::Aggregate as Aggregate>::Event>>, RepositoryError<Self::StoreError>> {
        let mut events = self.get_events_from(id, from_version).await?;
        events.retain(|event| event.version <= to_version);
        Ok(events)
    }

    async fn get_events_since(
        &self,
        id: Uuid,
        from_timestamp: DateTime<Utc>,
    ) -> Result<Vec<StoreEvent<<E::Aggregate as Aggregate>::Event>>, RepositoryError<Self::StoreError>> {
        self.store
            .fetch_stream(id, StreamCursor::FromTimestamp(from_timestamp))
            .await
            .map_err(RepositoryError::Store)
    }

    async fn get_events_during(
        &self,
        id: Uuid,
        from_timestamp: DateTime<Utc>,
        to_timestamp: DateTime<Utc>,
    ) -> Result<Vec<StoreEvent<<E::Aggregate as Aggregate>::Event>>, RepositoryError<Self::StoreError>> {
        let mut events = self.get_events_since(id, from_timestamp).await?;
        events.retain(|event| event.occurred_on <= to_timestamp);
        Ok(events)
    }

    async fn get_at_version(
        &self,
        id: Uuid,
        version: Version,
    ) -> Result<Option<AggregateState<E::Aggregate>>, RepositoryError<Self::StoreError>> {
        let mut events = self
            .store
            .fetch_stream(id, StreamCursor::Start)
            .await
            .map_err(RepositoryError::Store)?;

        events.retain(|event| event.version <= version);

        if events.is_empty() {
            return Ok(None);
        }

        let state = self.fold(id, &events)?;

        // A stream shorter than the requested version has no state "at" that version.
        if state.version() < version {
            return Ok(None);
        }

        Ok(Some(state))
    }

    async fn append_events(
        &self,
        id: Uuid,
        events: Vec<<E::Aggregate as Aggregate>::Event>,
        expected_version: Option<Version>,
    ) -> Result<Version, RepositoryError<Self::StoreError>> {
        self.append_events_with_metadata(id, with_commit_metadata(events), expected_version)
            .await
    }

    async fn append_events_with_metadata(
        &self,
        id: Uuid,
        events: Vec<(<E::Aggregate as Aggregate>::Event, Metadata)>,
        expected_version: Option<Version>,
    ) -> Result<Version, RepositoryError<Self::StoreError>> {
        let expected: Version = expected_version.unwrap_or(0);

        if events.is_empty() {
            return Ok(expected);
        }

        self.store
            .append_to_stream(id, expected, events)
            .await
            .map_err(RepositoryError::Store)
    }

    async fn stream_exists(&self, id: Uuid) -> Result<bool, RepositoryError<Self::StoreError>> {
        Ok(self
            .store
            .fetch_stream_state(id)
            .await
            .map_err(RepositoryError::Store)?
            .is_some())
    }

    async fn current_version(&self, id: Uuid) -> Result<Version, RepositoryError<Self::StoreError>> {
        Ok(self
            .store
            .fetch_stream_state(id)
            .await
            .map_err(RepositoryError::Store)?
            .map(|state| state.version)
            .unwrap_or(0))
    }

    async fn last_modified(&self, id: Uuid) -> Result<Option<DateTime<Utc>>, RepositoryError<Self::StoreError>> {
        Ok(self
            .store
            .fetch_stream_state(id)
            .await
            .map_err(RepositoryError::Store)?
            .map(|state| state.last_modified))
    }
}
