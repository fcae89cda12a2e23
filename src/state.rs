use std::sync::Arc;

use uuid::Uuid;

use crate::aggregate::{Aggregate, DispatchError, HandlerTable};
use crate::store::StoreEvent;
use crate::types::Version;

/// An in-memory projection of an aggregate's stream: identity, version, domain state and
/// the queue of events raised but not yet persisted.
///
/// The version always equals the number of events folded into the state since it was
/// constructed. The uncommitted queue is exclusively owned by this instance; draining it
/// is destructive and a drained event never reappears.
pub struct AggregateState<A>
where
    A: Aggregate,
{
    id: Uuid,
    version: Version,
    inner: A::State,
    uncommitted: Vec<A::Event>,
    handlers: Arc<HandlerTable<A>>,
}

impl<A> Default for AggregateState<A>
where
    A: Aggregate,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<A> AggregateState<A>
where
    A: Aggregate,
{
    /// A fresh aggregate with a random id, version 0 and no domain state.
    pub fn new() -> Self {
        Self::with_id(Uuid::new_v4())
    }

    pub fn with_id(id: Uuid) -> Self {
        Self::with_handlers(id, Arc::new(HandlerTable::new()))
    }

    /// Used by repositories to share one handler table across replays.
    pub(crate) fn with_handlers(id: Uuid, handlers: Arc<HandlerTable<A>>) -> Self {
        Self {
            id,
            version: 0,
            inner: A::State::default(),
            uncommitted: vec![],
            handlers,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn inner(&self) -> &A::State {
        &self.inner
    }

    pub fn into_inner(self) -> A::State {
        self.inner
    }

    /// Number of events raised but not yet drained.
    pub fn uncommitted_count(&self) -> usize {
        self.uncommitted.len()
    }

    /// Applies the event to the current state, queues it for persistence and advances the
    /// version. This is the mutation path: use it for new domain decisions.
    pub fn raise(&mut self, event: A::Event) -> Result<(), DispatchError> {
        self.handlers.dispatch(&mut self.inner, &event)?;
        self.uncommitted.push(event);
        self.version += 1;
        Ok(())
    }

    /// Applies the event and advances the version without queuing it. This is the replay
    /// path: the event is already part of history, no new commit is implied.
    pub fn apply(&mut self, event: &A::Event) -> Result<(), DispatchError> {
        self.handlers.dispatch(&mut self.inner, event)?;
        self.version += 1;
        Ok(())
    }

    /// Folds previously persisted events, in stream order, into this state.
    pub fn apply_store_events(mut self, events: &[StoreEvent<A::Event>]) -> Result<Self, DispatchError> {
        for event in events {
            self.apply(&event.payload)?;
        }
        Ok(self)
    }

    /// Atomically returns and clears the uncommitted queue. Called exactly once per
    /// persistence attempt; a second call returns an empty vector until new events are
    /// raised.
    pub fn take_uncommitted(&mut self) -> Vec<A::Event> {
        std::mem::take(&mut self.uncommitted)
    }
}
