use std::collections::HashMap;
use std::fmt::Debug;

use crate::event::Event;

/// An aggregate derives its state by folding its event stream.
///
/// Implementors declare their domain state, their event union and, through
/// [`Aggregate::register_handlers`], an explicit mapping from event tag to the function
/// that folds that event into the state. Handlers must be pure state transitions: they
/// never raise further events.
pub trait Aggregate: Send + Sync + Sized {
    /// Used to name the aggregate's event stream table and to tag telemetry.
    const NAME: &'static str;

    /// Internal aggregate state. Fully rebuilt by event replay; a fresh aggregate starts
    /// from `State::default()` at version 0.
    type State: Default + Clone + Debug + Send + Sync;

    /// The aggregate's event union.
    type Event: Event + Send + Sync;

    /// Registers one handler per event tag (or per fallback tag, for handlers shared by a
    /// family of events).
    fn register_handlers(registry: &mut HandlerRegistry<Self>);
}

/// Folds one event into the aggregate state.
pub type Handler<A> = fn(&mut <A as Aggregate>::State, &<A as Aggregate>::Event);

/// Collects the handlers an aggregate declares, before fallback resolution.
pub struct HandlerRegistry<A>
where
    A: Aggregate,
{
    handlers: HashMap<&'static str, Handler<A>>,
    strict: bool,
}

impl<A> HandlerRegistry<A>
where
    A: Aggregate,
{
    fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            strict: true,
        }
    }

    /// Registers `handler` for `tag`. The tag may be an event tag or a fallback tag.
    pub fn on(&mut self, tag: &'static str, handler: Handler<A>) -> &mut Self {
        self.handlers.insert(tag, handler);
        self
    }

    /// Makes dispatch treat events without a handler as no-op state transitions that
    /// still advance the aggregate version.
    ///
    /// The default is strict: dispatching an unhandled event fails with
    /// [`DispatchError::UnknownEventType`], since silently dropping state transitions is
    /// worse than failing the operation. Leniency has to be opted into here, explicitly.
    pub fn lenient(&mut self) -> &mut Self {
        self.strict = false;
        self
    }
}

/// The resolved tag-to-handler table for one aggregate type.
///
/// Fallback tags are resolved here, once, against the union's
/// [`EventDescriptor`](crate::EventDescriptor)s: an event tag without its own handler is
/// bound to the first of its fallback tags that has one. Dispatch is a single lookup.
pub struct HandlerTable<A>
where
    A: Aggregate,
{
    resolved: HashMap<&'static str, Option<Handler<A>>>,
    strict: bool,
}

impl<A> HandlerTable<A>
where
    A: Aggregate,
{
    pub fn new() -> Self {
        let mut registry: HandlerRegistry<A> = HandlerRegistry::new();
        A::register_handlers(&mut registry);

        let mut resolved: HashMap<&'static str, Option<Handler<A>>> =
            HashMap::with_capacity(A::Event::DESCRIPTORS.len());

        for descriptor in A::Event::DESCRIPTORS {
            let handler: Option<Handler<A>> = registry.handlers.get(descriptor.tag).copied().or_else(|| {
                descriptor
                    .fallbacks
                    .iter()
                    .find_map(|tag| registry.handlers.get(tag).copied())
            });

            resolved.insert(descriptor.tag, handler);
        }

        Self {
            resolved,
            strict: registry.strict,
        }
    }

    pub(crate) fn dispatch(&self, state: &mut A::State, event: &A::Event) -> Result<(), DispatchError> {
        let tag: &'static str = event.event_type();

        match self.resolved.get(tag).copied().flatten() {
            Some(handler) => {
                handler(state, event);
                Ok(())
            }
            None if self.strict => Err(DispatchError::UnknownEventType { tag }),
            None => Ok(()),
        }
    }
}

impl<A> Default for HandlerTable<A>
where
    A: Aggregate,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Event dispatch failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    /// No handler is registered for the event's tag or any of its fallback tags.
    #[error("no handler registered for event type `{tag}` or any of its fallback tags")]
    UnknownEventType { tag: &'static str },
}
