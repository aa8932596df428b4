// NATS JetStream topic transport

use crate::errors::QueueError;
use crate::queue::{AckHandle, MessageStream, MessageTopic, ReceivedMessage};
use async_nats::jetstream::{
    consumer::{pull, AckPolicy},
    stream::{Config as StreamConfig, RetentionPolicy},
    Context as JetStreamContext, Message,
};
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{error, info, instrument};

/// NATS transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NatsTopicConfig {
    /// NATS server URL (e.g., "nats://localhost:4222")
    pub url: String,
    /// JetStream stream holding all trigger topics
    pub stream_name: String,
    /// Subject prefix; topics are subjects beneath it
    pub subject_prefix: String,
    /// Maximum age for messages in the stream (in seconds)
    pub max_age_seconds: u64,
    /// Maximum number of messages to retain
    pub max_messages: i64,
    /// Durable consumer name prefix, one consumer per topic
    pub consumer_prefix: String,
    /// Maximum number of delivery attempts
    pub max_deliver: i64,
    /// How long a delivered message may stay unacked before redelivery
    pub ack_wait_seconds: u64,
    /// Publish acknowledgment timeout (in seconds)
    pub publish_timeout_seconds: u64,
}

impl Default for NatsTopicConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            stream_name: "TRIGGERS".to_string(),
            subject_prefix: "triggers".to_string(),
            max_age_seconds: 86400,
            max_messages: 1_000_000,
            consumer_prefix: "trigger-workers".to_string(),
            max_deliver: 10,
            ack_wait_seconds: 300,
            publish_timeout_seconds: 5,
        }
    }
}

/// JetStream-backed `MessageTopic`.
///
/// One work-queue stream covers every topic under the subject prefix; each
/// topic gets its own durable pull consumer filtered to its subject, so
/// provisioning is create-if-absent on both levels.
pub struct NatsTopic {
    jetstream: JetStreamContext,
    config: NatsTopicConfig,
}

impl NatsTopic {
    /// Connect to the NATS server and build the transport.
    #[instrument(skip(config), fields(url = %config.url))]
    pub async fn connect(config: NatsTopicConfig) -> Result<Self, QueueError> {
        info!("Connecting to NATS server");
        let client = async_nats::connect(&config.url)
            .await
            .map_err(|e| QueueError::Connection(format!("Failed to connect to NATS: {e}")))?;
        info!("Connected to NATS server");

        Ok(Self::from_client(client, config))
    }

    /// Build the transport over an already-connected client.
    pub fn from_client(client: async_nats::Client, config: NatsTopicConfig) -> Self {
        let jetstream = async_nats::jetstream::new(client);
        Self { jetstream, config }
    }

    pub fn config(&self) -> &NatsTopicConfig {
        &self.config
    }

    fn consumer_name(&self, topic: &str) -> String {
        // Durable names may not contain '.', so flatten the subject.
        format!("{}-{}", self.config.consumer_prefix, topic.replace('.', "-"))
    }

    async fn ensure_stream(&self) -> Result<async_nats::jetstream::stream::Stream, QueueError> {
        let stream_config = StreamConfig {
            name: self.config.stream_name.clone(),
            subjects: vec![format!("{}.>", self.config.subject_prefix)],
            retention: RetentionPolicy::WorkQueue,
            max_age: Duration::from_secs(self.config.max_age_seconds),
            max_messages: self.config.max_messages,
            ..Default::default()
        };

        self.jetstream
            .get_or_create_stream(stream_config)
            .await
            .map_err(|e| QueueError::StreamCreation(format!("Failed to create stream: {e}")))
    }

    async fn ensure_consumer(
        &self,
        topic: &str,
    ) -> Result<async_nats::jetstream::consumer::PullConsumer, QueueError> {
        let stream = self.ensure_stream().await?;
        let name = self.consumer_name(topic);

        let consumer_config = pull::Config {
            durable_name: Some(name.clone()),
            ack_policy: AckPolicy::Explicit,
            max_deliver: self.config.max_deliver,
            ack_wait: Duration::from_secs(self.config.ack_wait_seconds),
            filter_subject: topic.to_string(),
            ..Default::default()
        };

        stream
            .get_or_create_consumer(&name, consumer_config)
            .await
            .map_err(|e| QueueError::ConsumerCreation(format!("Failed to create consumer: {e}")))
    }
}

struct NatsAckHandle {
    message: Message,
}

#[async_trait]
impl AckHandle for NatsAckHandle {
    async fn ack(self: Box<Self>) -> Result<(), QueueError> {
        self.message
            .ack()
            .await
            .map_err(|e| QueueError::AckFailed(format!("Failed to acknowledge message: {e}")))
    }
}

#[async_trait]
impl MessageTopic for NatsTopic {
    #[instrument(skip(self))]
    async fn ensure_topic(&self, topic: &str) -> Result<(), QueueError> {
        self.ensure_consumer(topic).await?;
        info!(topic = %topic, "Topic provisioned");
        Ok(())
    }

    #[instrument(skip(self, payload), fields(bytes = payload.len()))]
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<String, QueueError> {
        let publish_future = self
            .jetstream
            .publish(topic.to_string(), payload.into())
            .await
            .map_err(|e| QueueError::PublishFailed(format!("Failed to publish message: {e}")))?;

        let timeout = Duration::from_secs(self.config.publish_timeout_seconds);
        match tokio::time::timeout(timeout, publish_future).await {
            Ok(Ok(ack)) => Ok(ack.sequence.to_string()),
            Ok(Err(e)) => Err(QueueError::PublishFailed(format!(
                "Failed to get publish acknowledgment: {e}"
            ))),
            Err(_) => Err(QueueError::Timeout(format!(
                "Publish acknowledgment timeout after {timeout:?}"
            ))),
        }
    }

    #[instrument(skip(self))]
    async fn subscribe(&self, topic: &str) -> Result<MessageStream, QueueError> {
        let consumer = self.ensure_consumer(topic).await?;
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let mut messages = match consumer.messages().await {
                Ok(messages) => messages,
                Err(e) => {
                    let _ = tx.send(Err(QueueError::ConsumeFailed(format!(
                        "Failed to create message stream: {e}"
                    ))));
                    return;
                }
            };

            loop {
                let item = match messages.next().await {
                    Some(item) => item,
                    None => {
                        error!("NATS message stream ended unexpectedly");
                        break;
                    }
                };

                let forwarded = match item {
                    Ok(message) => {
                        let payload = message.payload.to_vec();
                        Ok(ReceivedMessage::new(
                            payload,
                            Box::new(NatsAckHandle { message }) as Box<dyn AckHandle>,
                        ))
                    }
                    Err(e) => Err(QueueError::ConsumeFailed(format!(
                        "Error receiving message: {e}"
                    ))),
                };

                if tx.send(forwarded).is_err() {
                    // Subscriber dropped its stream.
                    break;
                }
            }
        });

        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = NatsTopicConfig::default();
        assert_eq!(config.url, "nats://localhost:4222");
        assert_eq!(config.stream_name, "TRIGGERS");
        assert_eq!(config.subject_prefix, "triggers");
        assert_eq!(config.max_deliver, 10);
        assert_eq!(config.ack_wait_seconds, 300);
    }

    #[test]
    fn test_consumer_name_flattens_subject() {
        let client_config = NatsTopicConfig::default();
        let name = format!(
            "{}-{}",
            client_config.consumer_prefix,
            "triggers.report".replace('.', "-")
        );
        assert_eq!(name, "trigger-workers-triggers-report");
    }
}
