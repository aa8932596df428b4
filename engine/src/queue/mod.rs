// Message topic abstraction for the queued runner strategy

pub mod memory;
pub mod nats;

pub use memory::InMemoryTopic;
pub use nats::{NatsTopic, NatsTopicConfig};

use crate::errors::QueueError;
use async_trait::async_trait;
use futures::stream::BoxStream;

/// Acknowledges a single received message back to the transport.
#[async_trait]
pub trait AckHandle: Send {
    async fn ack(self: Box<Self>) -> Result<(), QueueError>;
}

/// A message delivered to a subscriber, with its acknowledgment handle.
pub struct ReceivedMessage {
    payload: Vec<u8>,
    acker: Box<dyn AckHandle>,
}

impl ReceivedMessage {
    pub fn new(payload: Vec<u8>, acker: Box<dyn AckHandle>) -> Self {
        Self { payload, acker }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Acknowledge the message so the transport will not redeliver it.
    pub async fn ack(self) -> Result<(), QueueError> {
        self.acker.ack().await
    }
}

pub type MessageStream = BoxStream<'static, Result<ReceivedMessage, QueueError>>;

/// Publish/subscribe topic transport.
///
/// The delivery contract is at-least-once: subscribers must acknowledge every
/// message they are done with, and must tolerate redelivery of messages that
/// were received but never acked.
#[async_trait]
pub trait MessageTopic: Send + Sync {
    /// Idempotently provision the topic (create-if-absent).
    async fn ensure_topic(&self, topic: &str) -> Result<(), QueueError>;

    /// Publish a payload, returning the transport's message id.
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<String, QueueError>;

    /// Subscribe to the topic's message stream.
    async fn subscribe(&self, topic: &str) -> Result<MessageStream, QueueError>;
}
