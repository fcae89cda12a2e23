use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::event::Event;
use crate::metadata::Metadata;
use crate::store::{FeedEvent, StoreEvent};
use crate::types::{Position, Version};

/// Event row representation on the event store table.
#[derive(sqlx::FromRow, Debug)]
pub struct DbEvent {
    pub id: Uuid,
    pub aggregate_id: Uuid,
    pub version: Version,
    pub event_type: String,
    pub payload: Value,
    pub metadata: Value,
    pub occurred_on: DateTime<Utc>,
    pub position: Position,
}

impl DbEvent {
    /// Decodes the row into a typed [`StoreEvent`]. A payload that no longer decodes into
    /// its declared type signals corrupt or incompatible history and is always propagated.
    pub fn try_into_store_event<E>(self) -> Result<StoreEvent<E>, serde_json::Error>
    where
        E: Event,
    {
        Ok(StoreEvent {
            id: self.id,
            aggregate_id: self.aggregate_id,
            payload: serde_json::from_value::<E>(self.payload)?,
            metadata: serde_json::from_value::<Metadata>(self.metadata)?,
            occurred_on: self.occurred_on,
            version: self.version,
        })
    }

    /// Decodes the row into the untyped change-feed shape; the payload stays raw.
    pub fn try_into_feed_event(self) -> Result<FeedEvent, serde_json::Error> {
        Ok(FeedEvent {
            id: self.id,
            aggregate_id: self.aggregate_id,
            event_type: self.event_type,
            payload: self.payload,
            metadata: serde_json::from_value::<Metadata>(self.metadata)?,
            occurred_on: self.occurred_on,
            version: self.version,
            position: self.position,
        })
    }
}
