//! Forwards committed events from a store's change feed to a message bus.
//!
//! The publisher is fail-stop: events are published strictly in commit order and the
//! first publish failure halts the batch. The position of the last event that made it
//! out is reported to the [`FeedController`] so a resumed run re-reads from there and
//! retries the poisoned event first. The publisher itself never retries.

use async_trait::async_trait;
use tracing::Instrument;

use crate::bus::{MessageBus, PublishError};
use crate::metadata::Metadata;
use crate::store::{ChangeFeed, EventRange};
use crate::types::Position;

/// Owns the publisher's progress through the change feed.
///
/// Checkpoints are only advanced after every event of a range has been published, so a
/// crash between ranges re-delivers at most one range (at-least-once downstream).
#[async_trait]
pub trait FeedController: Send + Sync {
    /// The position the next range should be requested after.
    async fn load_checkpoint(&self) -> Position;

    /// Records that every event up to and including `position` has been published.
    async fn checkpoint(&self, position: Position);

    /// Invoked when a publish fails. `last_published` is the position of the last event
    /// that was successfully forwarded; the event right after it is the one that failed.
    async fn report_failure(&self, error: &PublishError, last_published: Position);
}

#[derive(Debug, thiserror::Error)]
pub enum PublisherError<FE> {
    #[error(transparent)]
    Feed(FE),
    #[error(transparent)]
    Publish(#[from] PublishError),
}

/// Drains a [`ChangeFeed`] into a [`MessageBus`], one bounded range at a time.
pub struct CommitPublisher<F, B, C> {
    feed: F,
    bus: B,
    controller: C,
    batch_size: usize,
}

const DEFAULT_BATCH_SIZE: usize = 100;

impl<F, B, C> CommitPublisher<F, B, C>
where
    F: ChangeFeed,
    B: MessageBus,
    C: FeedController,
{
    pub fn new(feed: F, bus: B, controller: C) -> Self {
        Self {
            feed,
            bus,
            controller,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn controller(&self) -> &C {
        &self.controller
    }

    /// Publishes one range of the feed. Returns `Ok(false)` when the feed had nothing
    /// new, `Ok(true)` when a non-empty range was published and checkpointed.
    pub async fn run_once(&self) -> Result<bool, PublisherError<F::Error>> {
        let checkpoint: Position = self.controller.load_checkpoint().await;
        let range: EventRange = self
            .feed
            .range_after(checkpoint, self.batch_size)
            .await
            .map_err(PublisherError::Feed)?;

        if range.is_empty() {
            return Ok(false);
        }

        let ceiling: Position = self.process_range(range).await?;
        self.controller.checkpoint(ceiling).await;
        Ok(true)
    }

    /// Publishes ranges until the feed is drained.
    pub async fn run(&self) -> Result<(), PublisherError<F::Error>> {
        while self.run_once().await? {}
        Ok(())
    }

    async fn process_range(&self, range: EventRange) -> Result<Position, PublishError> {
        let mut last_published: Position = range.floor;

        for event in &range.events {
            let span = tracing::info_span!(
                "publisher.publish",
                event_type = %event.event_type,
                aggregate_id = %event.aggregate_id,
                position = event.position,
                traceparent = tracing::field::Empty,
                correlation_id = tracing::field::Empty,
            );
            if let Some(traceparent) = event.metadata.header(Metadata::TRACEPARENT) {
                span.record("traceparent", traceparent);
            }
            if let Some(correlation_id) = event.metadata.correlation_id() {
                span.record("correlation_id", tracing::field::display(correlation_id));
            }

            if let Err(error) = self.bus.publish(event).instrument(span).await {
                tracing::error!(
                    position = event.position,
                    event_type = %event.event_type,
                    "publishing halted: {error}"
                );
                self.controller.report_failure(&error, last_published).await;
                return Err(error);
            }

            last_published = event.position;
        }

        Ok(range.ceiling)
    }
}

/// A [`FeedController`] holding its checkpoint in process memory. Suitable for tests
/// and for feeds that tolerate a full replay on restart.
#[derive(Debug, Default)]
pub struct InMemoryController {
    position: std::sync::atomic::AtomicI64,
    last_failure: std::sync::Mutex<Option<(String, Position)>>,
}

impl InMemoryController {
    pub fn new() -> Self {
        Self::default()
    }

    /// The failure most recently reported, as `(error message, last published position)`.
    pub fn last_failure(&self) -> Option<(String, Position)> {
        self.last_failure
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl FeedController for InMemoryController {
    async fn load_checkpoint(&self) -> Position {
        self.position.load(std::sync::atomic::Ordering::SeqCst)
    }

    async fn checkpoint(&self, position: Position) {
        self.position.store(position, std::sync::atomic::Ordering::SeqCst);
    }

    async fn report_failure(&self, error: &PublishError, last_published: Position) {
        let mut guard = self
            .last_failure
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *guard = Some((error.to_string(), last_published));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use chrono::Utc;
    use uuid::Uuid;

    use crate::store::FeedEvent;

    use super::*;

    fn feed_event(position: Position, event_type: &str) -> FeedEvent {
        FeedEvent {
            id: Uuid::new_v4(),
            aggregate_id: Uuid::new_v4(),
            event_type: event_type.to_string(),
            payload: serde_json::json!({}),
            metadata: Metadata::new(),
            occurred_on: Utc::now(),
            version: 1,
            position,
        }
    }

    struct FixedFeed {
        events: Vec<FeedEvent>,
    }

    #[async_trait]
    impl ChangeFeed for FixedFeed {
        type Error = std::convert::Infallible;

        async fn range_after(&self, position: Position, limit: usize) -> Result<EventRange, Self::Error> {
            let events: Vec<FeedEvent> = self
                .events
                .iter()
                .filter(|event| event.position > position)
                .take(limit)
                .cloned()
                .collect();
            let ceiling: Position = events.last().map_or(position, |event| event.position);
            Ok(EventRange {
                floor: position,
                ceiling,
                events,
            })
        }
    }

    /// Records every published event type; fails on the event type it is poisoned with.
    struct RecordingBus {
        poison: Option<String>,
        published: Mutex<Vec<String>>,
    }

    impl RecordingBus {
        fn new(poison: Option<&str>) -> Self {
            Self {
                poison: poison.map(str::to_string),
                published: Mutex::new(Vec::new()),
            }
        }

        fn published(&self) -> Vec<String> {
            self.published.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MessageBus for RecordingBus {
        async fn publish(&self, event: &FeedEvent) -> Result<(), PublishError> {
            if self.poison.as_deref() == Some(event.event_type.as_str()) {
                return Err(PublishError::bus(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "broker unavailable",
                )));
            }
            self.published.lock().unwrap().push(event.event_type.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn publishes_in_commit_order_and_checkpoints_ceiling() {
        let feed = FixedFeed {
            events: vec![feed_event(1, "a"), feed_event(2, "b"), feed_event(3, "c")],
        };
        let publisher = CommitPublisher::new(feed, RecordingBus::new(None), InMemoryController::new());

        publisher.run().await.unwrap();

        assert_eq!(publisher.bus.published(), vec!["a", "b", "c"]);
        assert_eq!(publisher.controller.load_checkpoint().await, 3);
        assert!(publisher.controller.last_failure().is_none());
    }

    #[tokio::test]
    async fn poison_event_halts_batch_and_reports_last_published() {
        let feed = FixedFeed {
            events: vec![feed_event(1, "a"), feed_event(2, "poison"), feed_event(3, "c")],
        };
        let publisher = CommitPublisher::new(feed, RecordingBus::new(Some("poison")), InMemoryController::new());

        let result = publisher.run().await;

        assert!(matches!(result, Err(PublisherError::Publish(_))));
        // Only the event before the poisoned one made it out.
        assert_eq!(publisher.bus.published(), vec!["a"]);
        // The checkpoint did not advance, so a resumed run retries from the start.
        assert_eq!(publisher.controller.load_checkpoint().await, 0);
        let (message, last_published) = publisher.controller.last_failure().unwrap();
        assert_eq!(last_published, 1);
        assert!(message.contains("broker unavailable"));
    }

    #[tokio::test]
    async fn resumes_after_the_reported_position() {
        let feed = FixedFeed {
            events: vec![feed_event(1, "a"), feed_event(2, "b"), feed_event(3, "c")],
        };
        let controller = InMemoryController::new();
        controller.checkpoint(2).await;
        let publisher = CommitPublisher::new(feed, RecordingBus::new(None), controller);

        publisher.run().await.unwrap();

        assert_eq!(publisher.bus.published(), vec!["c"]);
        assert_eq!(publisher.controller.load_checkpoint().await, 3);
    }

    #[tokio::test]
    async fn empty_feed_is_not_an_error() {
        let feed = FixedFeed { events: vec![] };
        let publisher = CommitPublisher::new(feed, RecordingBus::new(None), InMemoryController::new());

        assert!(!publisher.run_once().await.unwrap());
        assert_eq!(publisher.controller.load_checkpoint().await, 0);
    }

    #[tokio::test]
    async fn respects_batch_size() {
        let feed = FixedFeed {
            events: vec![feed_event(1, "a"), feed_event(2, "b"), feed_event(3, "c")],
        };
        let calls = AtomicUsize::new(0);

        struct CountingController<'a> {
            inner: InMemoryController,
            checkpoints: &'a AtomicUsize,
        }

        #[async_trait]
        impl FeedController for CountingController<'_> {
            async fn load_checkpoint(&self) -> Position {
                self.inner.load_checkpoint().await
            }

            async fn checkpoint(&self, position: Position) {
                self.checkpoints.fetch_add(1, Ordering::SeqCst);
                self.inner.checkpoint(position).await;
            }

            async fn report_failure(&self, error: &PublishError, last_published: Position) {
                self.inner.report_failure(error, last_published).await;
            }
        }

        let controller = CountingController {
            inner: InMemoryController::new(),
            checkpoints: &calls,
        };
        let publisher = CommitPublisher::new(feed, RecordingBus::new(None), controller).with_batch_size(2);

        publisher.run().await.unwrap();

        assert_eq!(publisher.bus.published(), vec!["a", "b", "c"]);
        // Two ranges: [1, 2] then [3].
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
