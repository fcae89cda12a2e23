use std::ops::Deref;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::aggregate::Aggregate;
use crate::metadata::Metadata;
use crate::types::{Position, Version};

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

/// A `StoreEvent` contains the payload (the original event) alongside the event's
/// storage-assigned envelope fields.
#[derive(Debug)]
pub struct StoreEvent<E> {
    /// Uniquely identifies an event among all events of all streams.
    pub id: Uuid,
    /// The stream (aggregate instance) the event belongs to.
    pub aggregate_id: Uuid,
    /// The original, emitted, event.
    pub payload: E,
    /// Correlation/causation ids and free-form headers attached at commit time.
    pub metadata: Metadata,
    /// When the event was persisted.
    pub occurred_on: DateTime<Utc>,
    /// The 1-based slot of the event within its stream.
    pub version: Version,
}

impl<E> StoreEvent<E> {
    pub const fn payload(&self) -> &E {
        &self.payload
    }

    pub const fn version(&self) -> Version {
        self.version
    }
}

/// `(currentVersion, lastModified)` of a stream, queried without replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamState {
    pub version: Version,
    pub last_modified: DateTime<Utc>,
}

/// Lower bound for a stream fetch.
///
/// Stores only support lower bounds natively; upper bounds (version or timestamp
/// ceilings) are applied by the caller after the fetch. Repositories rely on this.
#[derive(Debug, Clone, Copy)]
pub enum StreamCursor {
    Start,
    FromVersion(Version),
    FromTimestamp(DateTime<Utc>),
}

/// One stream's contribution to an atomic multi-stream append.
pub struct StreamAppend<E> {
    pub aggregate_id: Uuid,
    /// The stream's current version before this batch. 0 means the stream must not exist.
    pub expected_version: Version,
    pub events: Vec<(E, Metadata)>,
}

/// An append's version precondition did not hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("version conflict on stream `{aggregate_id}`: expected version {expected}, actual {actual}")]
pub struct VersionConflict {
    pub aggregate_id: Uuid,
    pub expected: Version,
    /// The stream version observed while the append was attempted. Under a lost race this
    /// is the last value read inside the failed transaction.
    pub actual: Version,
}

/// Durable, ordered, per-stream append log with per-stream version counters.
///
/// Version slot assignment within one stream is exclusive: no gaps, no duplicates. The
/// version precondition is the only coordination mechanism between concurrent writers;
/// exactly one of two racing appends succeeds, the other fails with a conflict.
#[async_trait]
pub trait EventStore {
    type Aggregate: Aggregate;
    type Error: std::error::Error + Send + Sync + 'static;

    /// Appends `events` at slots `expected_version + 1 ..= expected_version + len`,
    /// atomically, and returns the stream's new current version
    /// (`expected_version + len`).
    ///
    /// Fails with a conflict when the stream's actual current version differs from
    /// `expected_version`. An `expected_version` of 0 demands a brand-new stream.
    async fn append_to_stream(
        &self,
        aggregate_id: Uuid,
        expected_version: Version,
        events: Vec<(<Self::Aggregate as Aggregate>::Event, Metadata)>,
    ) -> Result<Version, Self::Error>;

    /// Appends to multiple streams as a single unit of work: either every stream's events
    /// land, or none do. Returns the total number of appended events.
    async fn append_to_streams(
        &self,
        appends: Vec<StreamAppend<<Self::Aggregate as Aggregate>::Event>>,
    ) -> Result<u64, Self::Error>;

    /// Loads the events of one stream, in version order, from the given lower bound.
    async fn fetch_stream(
        &self,
        aggregate_id: Uuid,
        cursor: StreamCursor,
    ) -> Result<Vec<StoreEvent<<Self::Aggregate as Aggregate>::Event>>, Self::Error>;

    /// Returns the stream's current version and last-modified timestamp without replay,
    /// or `None` if no stream exists for the id.
    async fn fetch_stream_state(&self, aggregate_id: Uuid) -> Result<Option<StreamState>, Self::Error>;
}

/// Blanket implementation making an [`EventStore`] out of every (smart) pointer to an
/// [`EventStore`], e.g. `&Store`, `Box<Store>`, `Arc<Store>`.
#[async_trait]
impl<A, E, T, S> EventStore for T
where
    A: Aggregate + 'static,
    E: std::error::Error + Send + Sync + 'static,
    S: EventStore<Aggregate = A, Error = E> + Sync + ?Sized,
    T: Deref<Target = S> + Send + Sync,
{
    type Aggregate = A;
    type Error = E;

    async fn append_to_stream(
        &self,
        aggregate_id: Uuid,
        expected_version: Version,
        events: Vec<(A::Event, Metadata)>,
    ) -> Result<Version, Self::Error> {
        self.deref().append_to_stream(aggregate_id, expected_version, events).await
    }

    async fn append_to_streams(&self, appends: Vec<StreamAppend<A::Event>>) -> Result<u64, Self::Error> {
        self.deref().append_to_streams(appends).await
    }

    async fn fetch_stream(
        &self,
        aggregate_id: Uuid,
        cursor: StreamCursor,
    ) -> Result<Vec<StoreEvent<A::Event>>, Self::Error> {
        self.deref().fetch_stream(aggregate_id, cursor).await
    }

    async fn fetch_stream_state(&self, aggregate_id: Uuid) -> Result<Option<StreamState>, Self::Error> {
        self.deref().fetch_stream_state(aggregate_id).await
    }
}

/// A committed event as delivered by the change feed: untyped payload, explicit type tag
/// and a global commit-order position.
#[derive(Debug, Clone, Serialize)]
pub struct FeedEvent {
    pub id: Uuid,
    pub aggregate_id: Uuid,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub metadata: Metadata,
    pub occurred_on: DateTime<Utc>,
    pub version: Version,
    pub position: Position,
}

/// A contiguous slice of the change feed.
///
/// `floor` is the position the range was requested after; `ceiling` is the position of
/// the last event in the range (equal to `floor` when the range is empty).
#[derive(Debug)]
pub struct EventRange {
    pub floor: Position,
    pub ceiling: Position,
    pub events: Vec<FeedEvent>,
}

impl EventRange {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// An ordered, resumable, commit-order feed of events across all streams of a store.
#[async_trait]
pub trait ChangeFeed {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Returns the next range of at most `limit` committed events strictly after
    /// `position`.
    async fn range_after(&self, position: Position, limit: usize) -> Result<EventRange, Self::Error>;
}
