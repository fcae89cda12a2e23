use rdkafka::error::KafkaError;
use rdkafka::message::OwnedMessage;

use crate::bus::PublishError;

/// The `KafkaMessageBusError` enum defines the following error types:
///
/// - `Json`: Indicates a failure in serializing the event envelope.
/// - `Kafka`: Indicates an error occurred while creating the producer or during the
///            publishing process.
#[derive(thiserror::Error, Debug)]
pub enum KafkaMessageBusError {
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Kafka(#[from] KafkaError),
}

impl From<(KafkaError, OwnedMessage)> for KafkaMessageBusError {
    fn from((error, _): (KafkaError, OwnedMessage)) -> Self {
        Self::Kafka(error)
    }
}

impl From<KafkaMessageBusError> for PublishError {
    fn from(error: KafkaMessageBusError) -> Self {
        match error {
            KafkaMessageBusError::Json(json) => PublishError::Json(json),
            KafkaMessageBusError::Kafka(kafka) => PublishError::bus(kafka),
        }
    }
}
