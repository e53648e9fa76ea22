//! NATS client abstraction for production and testing.
//!
//! - [`JetStreamDelivery`] adapts a JetStream message to the [`Delivery`] trait
//! - [`NatsPublisher`] is the publish seam used for dead-lettering, with a
//!   real client implementation and a recording [`TestNats`] mock
//! - [`subscribe_work_queue`] sets up the stream and the shared durable
//!   consumer every worker in the group pulls from

use anyhow::Result;
use async_nats::jetstream::{self, consumer, stream, AckKind};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::RwLock;
use std::time::Duration;
use tracing::info;

use super::Delivery;
use crate::config::BrokerConfig;
use crate::error::{DeliveryError, StartupError};

// =============================================================================
// Deliveries
// =============================================================================

/// A JetStream message pulled from the work-queue consumer.
pub struct JetStreamDelivery {
    message: jetstream::Message,
    redelivery_delay: Option<Duration>,
}

impl JetStreamDelivery {
    pub fn new(message: jetstream::Message, redelivery_delay: Duration) -> Self {
        Self {
            message,
            redelivery_delay: (!redelivery_delay.is_zero()).then_some(redelivery_delay),
        }
    }
}

#[async_trait]
impl Delivery for JetStreamDelivery {
    fn payload(&self) -> &[u8] {
        &self.message.payload
    }

    fn subject(&self) -> &str {
        self.message.subject.as_str()
    }

    async fn ack(&self) -> Result<(), DeliveryError> {
        self.message
            .ack()
            .await
            .map_err(|source| DeliveryError { action: "ack", source })
    }

    async fn nack(&self) -> Result<(), DeliveryError> {
        self.message
            .ack_with(AckKind::Nak(self.redelivery_delay))
            .await
            .map_err(|source| DeliveryError { action: "nak", source })
    }

    async fn term(&self) -> Result<(), DeliveryError> {
        self.message
            .ack_with(AckKind::Term)
            .await
            .map_err(|source| DeliveryError { action: "term", source })
    }

    async fn in_progress(&self) -> Result<(), DeliveryError> {
        self.message
            .ack_with(AckKind::Progress)
            .await
            .map_err(|source| DeliveryError {
                action: "extend",
                source,
            })
    }
}

/// Make sure the work-queue stream and the group's durable pull consumer
/// exist, then open its message stream.
///
/// `batch` caps how many deliveries are pulled ahead of free slots.
pub async fn subscribe_work_queue(
    client: &async_nats::Client,
    config: &BrokerConfig,
    batch: usize,
) -> Result<consumer::pull::Stream, StartupError> {
    let context = jetstream::new(client.clone());

    let stream = context
        .get_or_create_stream(stream::Config {
            name: config.stream.clone(),
            subjects: vec![config.subject.clone()],
            retention: stream::RetentionPolicy::WorkQueue,
            ..Default::default()
        })
        .await
        .map_err(|e| StartupError::broker("creating stream", e))?;

    let consumer: consumer::PullConsumer = stream
        .get_or_create_consumer(
            &config.queue_group,
            consumer::pull::Config {
                durable_name: Some(config.queue_group.clone()),
                filter_subject: config.subject.clone(),
                ack_policy: consumer::AckPolicy::Explicit,
                ack_wait: config.ack_wait,
                max_deliver: config.max_deliver,
                ..Default::default()
            },
        )
        .await
        .map_err(|e| StartupError::broker("creating consumer", e))?;

    let messages = consumer
        .stream()
        .max_messages_per_batch(batch.max(1))
        .messages()
        .await
        .map_err(|e| StartupError::broker("opening message stream", e))?;

    info!(
        stream = %config.stream,
        subject = %config.subject,
        consumer = %config.queue_group,
        "subscribed to work queue"
    );

    Ok(messages)
}

// =============================================================================
// Publishing
// =============================================================================

/// A published message.
#[derive(Debug, Clone)]
pub struct PublishedMessage {
    pub subject: String,
    pub payload: Bytes,
}

/// Trait for NATS publish operations.
///
/// This allows swapping between real NATS and test mocks.
#[async_trait]
pub trait NatsPublisher: Send + Sync {
    /// Publish a message to a subject.
    async fn publish(&self, subject: String, payload: Bytes) -> Result<()>;
}

/// Real NATS client publisher.
pub struct NatsClientPublisher {
    client: async_nats::Client,
}

impl NatsClientPublisher {
    pub fn new(client: async_nats::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl NatsPublisher for NatsClientPublisher {
    async fn publish(&self, subject: String, payload: Bytes) -> Result<()> {
        self.client.publish(subject, payload).await?;
        Ok(())
    }
}

/// Mock NATS client that tracks published messages for testing.
#[derive(Default)]
pub struct TestNats {
    published: RwLock<Vec<PublishedMessage>>,
    fail_publish: bool,
}

impl TestNats {
    pub fn new() -> Self {
        Self::default()
    }

    /// A publisher whose every publish fails.
    pub fn failing() -> Self {
        Self {
            fail_publish: true,
            ..Self::default()
        }
    }

    /// Get published messages for a specific subject.
    pub fn messages_for_subject(&self, subject: &str) -> Vec<PublishedMessage> {
        self.published
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|m| m.subject == subject)
            .cloned()
            .collect()
    }

    /// Get the count of published messages.
    pub fn publish_count(&self) -> usize {
        self.published
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Deserialize a published message payload as JSON.
    pub fn deserialize_message<T: serde::de::DeserializeOwned>(
        &self,
        msg: &PublishedMessage,
    ) -> std::result::Result<T, serde_json::Error> {
        serde_json::from_slice(&msg.payload)
    }
}

#[async_trait]
impl NatsPublisher for TestNats {
    async fn publish(&self, subject: String, payload: Bytes) -> Result<()> {
        if self.fail_publish {
            anyhow::bail!("publish to {} failed: no connection", subject);
        }
        self.published
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(PublishedMessage { subject, payload });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_published_messages() {
        let nats = TestNats::new();

        nats.publish("urls.dead".to_string(), Bytes::from(r#"{"url":"x"}"#))
            .await
            .unwrap();
        nats.publish("other".to_string(), Bytes::new()).await.unwrap();

        assert_eq!(nats.publish_count(), 2);
        let dead = nats.messages_for_subject("urls.dead");
        assert_eq!(dead.len(), 1);
        let value: serde_json::Value = nats.deserialize_message(&dead[0]).unwrap();
        assert_eq!(value["url"], "x");
    }

    #[tokio::test]
    async fn test_failing_publisher() {
        let nats = TestNats::failing();
        assert!(nats.publish("x".to_string(), Bytes::new()).await.is_err());
        assert_eq!(nats.publish_count(), 0);
    }
}
