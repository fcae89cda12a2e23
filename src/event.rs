use serde::de::DeserializeOwned;
use serde::Serialize;

/// Registration-time description of one event type in an aggregate's event union.
///
/// The `tag` is the type discriminator stored alongside the payload and used for handler
/// lookup. `fallbacks` lists the tags a handler may be registered under instead, ordered
/// from most specific to least specific; they replace the runtime supertype walk of
/// inheritance-based designs and are resolved once when the handler table is built.
#[derive(Debug, Clone, Copy)]
pub struct EventDescriptor {
    pub tag: &'static str,
    pub fallbacks: &'static [&'static str],
}

/// An aggregate's event union.
///
/// Implementors are flat tagged unions: every value carries exactly one tag, and the full
/// set of tags the union can produce is declared up front through [`Self::DESCRIPTORS`].
pub trait Event: Serialize + DeserializeOwned {
    /// Every tag this union can produce, with its fallback chain.
    const DESCRIPTORS: &'static [EventDescriptor];

    /// The tag of this event value. Must match one of [`Self::DESCRIPTORS`].
    fn event_type(&self) -> &'static str;
}
