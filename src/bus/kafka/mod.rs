use std::time::Duration;

use async_trait::async_trait;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::ClientConfig;

pub use config::{KafkaMessageBusConfig, Security};
pub use error::KafkaMessageBusError;

use crate::bus::{MessageBus, PublishError};
use crate::store::FeedEvent;

mod config;
mod error;

/// The [`KafkaMessageBus`] provides an implementation of the `MessageBus` trait for publishing
/// committed events using Apache Kafka as the underlying messaging system.
///
/// Events are keyed by their aggregate id so that all events of one stream land on the same
/// partition and keep their commit order.
pub struct KafkaMessageBus {
    producer: FutureProducer,
    topic: String,
    request_timeout: Duration,
}

impl KafkaMessageBus {
    pub fn new(config: KafkaMessageBusConfig<'_>) -> Result<KafkaMessageBus, KafkaMessageBusError> {
        let mut client_config: ClientConfig = config.client_config.unwrap_or_default();
        client_config
            .set("metadata.broker.list", config.broker_url_list)
            .set("request.timeout.ms", config.request_timeout.to_string());

        if let Some(security) = config.security {
            client_config
                .set("security.protocol", "SASL_SSL")
                .set("sasl.mechanisms", security.sasl_mechanism)
                .set("sasl.username", security.username)
                .set("sasl.password", security.password);
        }

        Ok(Self {
            producer: client_config.create()?,
            topic: config.topic.to_string(),
            request_timeout: Duration::from_millis(config.request_timeout),
        })
    }

    async fn send(&self, event: &FeedEvent) -> Result<(), KafkaMessageBusError> {
        let key: String = event.aggregate_id.to_string();
        let bytes: Vec<u8> = serde_json::to_vec(event)?;

        let _ = self
            .producer
            .send(
                FutureRecord::<String, Vec<u8>>::to(self.topic.as_str())
                    .key(&key)
                    .payload(&bytes),
                self.request_timeout,
            )
            .await?;

        Ok(())
    }
}

#[async_trait]
impl MessageBus for KafkaMessageBus {
    async fn publish(&self, event: &FeedEvent) -> Result<(), PublishError> {
        Ok(self.send(event).await?)
    }
}
