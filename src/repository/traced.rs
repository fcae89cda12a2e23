use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{info_span, Instrument};
use uuid::Uuid;

use crate::aggregate::Aggregate;
use crate::metadata::Metadata;
use crate::repository::{Repository, RepositoryError};
use crate::state::AggregateState;
use crate::store::StoreEvent;
use crate::types::Version;

/// Decorates any [`Repository`] with a span per operation, tagged with the entity type,
/// id and version. Pure instrumentation: behavior is delegated untouched, so wrapping (or
/// not wrapping) a repository only changes observability.
pub struct TracedRepository<R> {
    inner: R,
}

impl<R> TracedRepository<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Returns the decorated repository.
    pub fn inner(&self) -> &R {
        &self.inner
    }
}

#[async_trait]
impl<A, R> Repository<A> for TracedRepository<R>
where
    A: Aggregate + 'static,
    R: Repository<A>,
{
    type StoreError = R::StoreError;

    async fn find(&self, id: Uuid) -> Result<Option<AggregateState<A>>, RepositoryError<Self::StoreError>> {
        let span = info_span!("repository.find", entity = A::NAME, entity_id = %id);
        self.inner.find(id).instrument(span).await
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<AggregateState<A>>, RepositoryError<Self::StoreError>> {
        let span = info_span!("repository.get_by_id", entity = A::NAME, entity_id = %id);
        self.inner.get_by_id(id).instrument(span).await
    }

    async fn add(&self, id: Uuid, state: &mut AggregateState<A>) -> Result<u64, RepositoryError<Self::StoreError>> {
        let span = info_span!(
            "repository.add",
            entity = A::NAME,
            entity_id = %id,
            entity_version = state.version(),
        );
        self.inner.add(id, state).instrument(span).await
    }

    async fn update(
        &self,
        id: Uuid,
        state: &mut AggregateState<A>,
        expected_version: Option<Version>,
    ) -> Result<Version, RepositoryError<Self::StoreError>> {
        let span = info_span!(
            "repository.update",
            entity = A::NAME,
            entity_id = %id,
            entity_version = state.version(),
            expected_version = expected_version,
        );
        self.inner.update(id, state, expected_version).instrument(span).await
    }

    async fn delete(
        &self,
        id: Uuid,
        state: &mut AggregateState<A>,
        expected_version: Option<Version>,
    ) -> Result<Version, RepositoryError<Self::StoreError>> {
        let span = info_span!(
            "repository.delete",
            entity = A::NAME,
            entity_id = %id,
            entity_version = state.version(),
            expected_version = expected_version,
        );
        self.inner.delete(id, state, expected_version).instrument(span).await
    }

    async fn find_many(&self, ids: &[Uuid]) -> Result<Vec<AggregateState<A>>, RepositoryError<Self::StoreError>> {
        let span = info_span!("repository.find_many", entity = A::NAME, entities = ids.len());
        self.inner.find_many(ids).instrument(span).await
    }

    async fn add_many(
        &self,
        pairs: &mut [(Uuid, AggregateState<A>)],
    ) -> Result<u64, RepositoryError<Self::StoreError>> {
        let span = info_span!("repository.add_many", entity = A::NAME, entities = pairs.len());
        self.inner.add_many(pairs).instrument(span).await
    }

    async fn update_many(
        &self,
        triples: &mut [(Uuid, AggregateState<A>, Option<Version>)],
    ) -> Result<u64, RepositoryError<Self::StoreError>> {
        let span = info_span!("repository.update_many", entity = A::NAME, entities = triples.len());
        self.inner.update_many(triples).instrument(span).await
    }

    async fn get_events(&self, id: Uuid) -> Result<Vec<StoreEvent<A::Event>>, RepositoryError<Self::StoreError>> {
        let span = info_span!("repository.get_events", entity = A::NAME, entity_id = %id);
        self.inner.get_events(id).instrument(span).await
    }

    async fn get_events_from(
        &self,
        id: Uuid,
        from_version: Version,
    ) -> Result<Vec<StoreEvent<A::Event>>, RepositoryError<Self::StoreError>> {
        let span = info_span!(
            "repository.get_events_from",
            entity = A::NAME,
            entity_id = %id,
            from_version = from_version,
        );
        self.inner.get_events_from(id, from_version).instrument(span).await
    }

    async fn get_events_between(
        &self,
        id: Uuid,
        from_version: Version,
        to_version: Version,
    ) -> Result<Vec<StoreEvent<A::Event>>, RepositoryError<Self::StoreError>> {
        let span = info_span!(
            "repository.get_events_between",
            entity = A::NAME,
            entity_id = %id,
            from_version = from_version,
            to_version = to_version,
        );
        self.inner
            .get_events_between(id, from_version, to_version)
            .instrument(span)
            .await
    }

    async fn get_events_since(
        &self,
        id: Uuid,
        from_timestamp: DateTime<Utc>,
    ) -> Result<Vec<StoreEvent<A::Event>>, RepositoryError<Self::StoreError>> {
        let span = info_span!(
            "repository.get_events_since",
            entity = A::NAME,
            entity_id = %id,
            from_timestamp = %from_timestamp,
        );
        self.inner.get_events_since(id, from_timestamp).instrument(span).await
    }

    async fn get_events_during(
        &self,
        id: Uuid,
        from_timestamp: DateTime<Utc>,
        to_timestamp: DateTime<Utc>,
    ) -> Result<Vec<StoreEvent<A::Event>>, RepositoryError<Self::StoreError>> {
        let span = info_span!(
            "repository.get_events_during",
            entity = A::NAME,
            entity_id = %id,
            from_timestamp = %from_timestamp,
            to_timestamp = %to_timestamp,
        );
        self.inner
            .get_events_during(id, from_timestamp, to_timestamp)
            .instrument(span)
            .await
    }

    async fn get_at_version(
        &self,
        id: Uuid,
        version: Version,
    ) -> Result<Option<AggregateState<A>>, RepositoryError<Self::StoreError>> {
        let span = info_span!(
            "repository.get_at_version",
            entity = A::NAME,
            entity_id = %id,
            at_version = version,
        );
        self.inner.get_at_version(id, version).instrument(span).await
    }

    async fn append_events(
        &self,
        id: Uuid,
        events: Vec<A::Event>,
        expected_version: Option<Version>,
    ) -> Result<Version, RepositoryError<Self::StoreError>> {
        let span = info_span!(
            "repository.append_events",
            entity = A::NAME,
            entity_id = %id,
            events = events.len(),
            expected_version = expected_version,
        );
        self.inner.append_events(id, events, expected_version).instrument(span).await
    }

    async fn append_events_with_metadata(
        &self,
        id: Uuid,
        events: Vec<(A::Event, Metadata)>,
        expected_version: Option<Version>,
    ) -> Result<Version, RepositoryError<Self::StoreError>> {
        let span = info_span!(
            "repository.append_events_with_metadata",
            entity = A::NAME,
            entity_id = %id,
            events = events.len(),
            expected_version = expected_version,
        );
        self.inner
            .append_events_with_metadata(id, events, expected_version)
            .instrument(span)
            .await
    }

    async fn stream_exists(&self, id: Uuid) -> Result<bool, RepositoryError<Self::StoreError>> {
        let span = info_span!("repository.stream_exists", entity = A::NAME, entity_id = %id);
        self.inner.stream_exists(id).instrument(span).await
    }

    async fn current_version(&self, id: Uuid) -> Result<Version, RepositoryError<Self::StoreError>> {
        let span = info_span!("repository.current_version", entity = A::NAME, entity_id = %id);
        self.inner.current_version(id).instrument(span).await
    }

    async fn last_modified(&self, id: Uuid) -> Result<Option<DateTime<Utc>>, RepositoryError<Self::StoreError>> {
        let span = info_span!("repository.last_modified", entity = A::NAME, entity_id = %id);
        self.inner.last_modified(id).instrument(span).await
    }
}
