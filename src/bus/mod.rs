use async_trait::async_trait;

use crate::store::FeedEvent;

#[cfg(feature = "kafka")]
pub mod kafka;

/// Failure to forward a committed event to the message bus.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    /// The event envelope could not be serialized for the wire.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    /// The bus rejected or could not deliver the publication.
    #[error(transparent)]
    Bus(Box<dyn std::error::Error + Send + Sync>),
}

impl PublishError {
    pub fn bus(error: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Bus(Box::new(error))
    }
}

/// The responsibility of a [`MessageBus`] is to publish one committed event to a specific
/// bus implementation.
///
/// Publishing either succeeds or fails; the crate assumes nothing further about delivery
/// guarantees (downstream is expected to tolerate at-least-once).
#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish(&self, event: &FeedEvent) -> Result<(), PublishError>;
}
