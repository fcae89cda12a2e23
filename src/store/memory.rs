use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::aggregate::Aggregate;
use crate::event::Event;
use crate::metadata::Metadata;
use crate::store::{
    ChangeFeed, EventRange, EventStore, FeedEvent, StoreEvent, StreamAppend, StreamCursor, StreamState,
    VersionConflict,
};
use crate::types::{Position, Version};

/// In-memory [`EventStore`] and [`ChangeFeed`].
///
/// Payloads are stored serialized, so the (de)serialization path behaves exactly like a
/// durable store's: corrupt or incompatible history surfaces as a JSON error, never as a
/// silently skipped event. Cloning shares the underlying log.
pub struct InMemoryStore<A> {
    inner: Arc<Mutex<Inner>>,
    _aggregate: PhantomData<A>,
}

struct Inner {
    // Current version per stream. Stream existence is exactly "has an entry here".
    streams: HashMap<Uuid, Version>,
    // Commit-ordered log across all streams; position = index + 1.
    log: Vec<Row>,
}

#[derive(Clone)]
struct Row {
    id: Uuid,
    aggregate_id: Uuid,
    event_type: String,
    payload: serde_json::Value,
    metadata: Metadata,
    occurred_on: DateTime<Utc>,
    version: Version,
}

#[derive(Debug, thiserror::Error)]
pub enum InMemoryStoreError {
    #[error(transparent)]
    Conflict(#[from] VersionConflict),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl<A> Default for InMemoryStore<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> Clone for InMemoryStore<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            _aggregate: PhantomData,
        }
    }
}

impl<A> InMemoryStore<A> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                streams: HashMap::new(),
                log: Vec::new(),
            })),
            _aggregate: PhantomData,
        }
    }
}

impl<A> InMemoryStore<A>
where
    A: Aggregate,
{
    fn append_rows(
        inner: &mut Inner,
        aggregate_id: Uuid,
        expected_version: Version,
        events: &[(A::Event, Metadata)],
        occurred_on: DateTime<Utc>,
    ) -> Result<Version, InMemoryStoreError> {
        let actual: Version = inner.streams.get(&aggregate_id).copied().unwrap_or(0);

        if actual != expected_version {
            return Err(VersionConflict {
                aggregate_id,
                expected: expected_version,
                actual,
            }
            .into());
        }

        for (offset, (event, metadata)) in events.iter().enumerate() {
            inner.log.push(Row {
                id: Uuid::new_v4(),
                aggregate_id,
                event_type: event.event_type().to_string(),
                payload: serde_json::to_value(event)?,
                metadata: metadata.clone(),
                occurred_on,
                version: expected_version + 1 + offset as Version,
            });
        }

        let new_version: Version = expected_version + events.len() as Version;
        if new_version > 0 {
            inner.streams.insert(aggregate_id, new_version);
        }

        Ok(new_version)
    }
}

#[async_trait]
impl<A> EventStore for InMemoryStore<A>
where
    A: Aggregate + 'static,
{
    type Aggregate = A;
    type Error = InMemoryStoreError;

    async fn append_to_stream(
        &self,
        aggregate_id: Uuid,
        expected_version: Version,
        events: Vec<(A::Event, Metadata)>,
    ) -> Result<Version, Self::Error> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        Self::append_rows(&mut inner, aggregate_id, expected_version, &events, Utc::now())
    }

    async fn append_to_streams(&self, appends: Vec<StreamAppend<A::Event>>) -> Result<u64, Self::Error> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);

        // Validate every precondition before touching the log, so a failure anywhere
        // leaves no partial appends.
        for append in &appends {
            let actual: Version = inner.streams.get(&append.aggregate_id).copied().unwrap_or(0);
            if actual != append.expected_version {
                return Err(VersionConflict {
                    aggregate_id: append.aggregate_id,
                    expected: append.expected_version,
                    actual,
                }
                .into());
            }
        }

        let occurred_on: DateTime<Utc> = Utc::now();
        let checkpoint: usize = inner.log.len();
        let mut total: u64 = 0;

        for append in &appends {
            match Self::append_rows(
                &mut inner,
                append.aggregate_id,
                append.expected_version,
                &append.events,
                occurred_on,
            ) {
                Ok(_) => total += append.events.len() as u64,
                Err(error) => {
                    // Serialization failure mid-batch: roll the whole unit of work back.
                    inner.log.truncate(checkpoint);
                    for rolled_back in &appends {
                        match rolled_back.expected_version {
                            0 => inner.streams.remove(&rolled_back.aggregate_id),
                            version => inner.streams.insert(rolled_back.aggregate_id, version),
                        };
                    }
                    return Err(error);
                }
            }
        }

        Ok(total)
    }

    async fn fetch_stream(
        &self,
        aggregate_id: Uuid,
        cursor: StreamCursor,
    ) -> Result<Vec<StoreEvent<A::Event>>, Self::Error> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);

        inner
            .log
            .iter()
            .filter(|row| row.aggregate_id == aggregate_id)
            .filter(|row| match cursor {
                StreamCursor::Start => true,
                StreamCursor::FromVersion(from) => row.version >= from,
                StreamCursor::FromTimestamp(from) => row.occurred_on >= from,
            })
            .map(|row| {
                Ok(StoreEvent {
                    id: row.id,
                    aggregate_id: row.aggregate_id,
                    payload: serde_json::from_value::<A::Event>(row.payload.clone())?,
                    metadata: row.metadata.clone(),
                    occurred_on: row.occurred_on,
                    version: row.version,
                })
            })
            .collect()
    }

    async fn fetch_stream_state(&self, aggregate_id: Uuid) -> Result<Option<StreamState>, Self::Error> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);

        let version: Version = match inner.streams.get(&aggregate_id) {
            Some(version) => *version,
            None => return Ok(None),
        };

        let last_modified: Option<DateTime<Utc>> = inner
            .log
            .iter()
            .filter(|row| row.aggregate_id == aggregate_id)
            .map(|row| row.occurred_on)
            .max();

        Ok(last_modified.map(|last_modified| StreamState { version, last_modified }))
    }
}

#[async_trait]
impl<A> ChangeFeed for InMemoryStore<A>
where
    A: Aggregate + 'static,
{
    type Error = InMemoryStoreError;

    async fn range_after(&self, position: Position, limit: usize) -> Result<EventRange, Self::Error> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);

        let events: Vec<FeedEvent> = inner
            .log
            .iter()
            .enumerate()
            .map(|(index, row)| (index as Position + 1, row))
            .filter(|(row_position, _)| *row_position > position)
            .take(limit)
            .map(|(row_position, row)| FeedEvent {
                id: row.id,
                aggregate_id: row.aggregate_id,
                event_type: row.event_type.clone(),
                payload: row.payload.clone(),
                metadata: row.metadata.clone(),
                occurred_on: row.occurred_on,
                version: row.version,
                position: row_position,
            })
            .collect();

        let ceiling: Position = events.last().map(|event| event.position).unwrap_or(position);

        Ok(EventRange {
            floor: position,
            ceiling,
            events,
        })
    }
}
