// In-process topic transport for tests and single-node embedding

use crate::errors::QueueError;
use crate::queue::{AckHandle, MessageStream, MessageTopic, ReceivedMessage};
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tokio_stream::wrappers::UnboundedReceiverStream;

struct TopicState {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: Option<mpsc::UnboundedReceiver<Vec<u8>>>,
}

/// A `MessageTopic` backed by in-process channels. Messages published before
/// the subscriber attaches are buffered. Acks are counted so tests can
/// assert the consumer's acknowledgment discipline.
#[derive(Default)]
pub struct InMemoryTopic {
    topics: Mutex<HashMap<String, TopicState>>,
    next_id: AtomicU64,
    acked: Arc<AtomicU64>,
}

impl InMemoryTopic {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of messages acknowledged across all topics.
    pub fn acked_count(&self) -> u64 {
        self.acked.load(Ordering::SeqCst)
    }
}

struct MemoryAckHandle {
    acked: Arc<AtomicU64>,
}

#[async_trait]
impl AckHandle for MemoryAckHandle {
    async fn ack(self: Box<Self>) -> Result<(), QueueError> {
        self.acked.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl MessageTopic for InMemoryTopic {
    async fn ensure_topic(&self, topic: &str) -> Result<(), QueueError> {
        let mut topics = self.topics.lock().await;
        topics.entry(topic.to_string()).or_insert_with(|| {
            let (tx, rx) = mpsc::unbounded_channel();
            TopicState { tx, rx: Some(rx) }
        });
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<String, QueueError> {
        self.ensure_topic(topic).await?;
        let topics = self.topics.lock().await;
        let state = topics
            .get(topic)
            .ok_or_else(|| QueueError::PublishFailed(format!("unknown topic '{topic}'")))?;
        state
            .tx
            .send(payload)
            .map_err(|_| QueueError::PublishFailed(format!("topic '{topic}' is closed")))?;
        Ok(self.next_id.fetch_add(1, Ordering::SeqCst).to_string())
    }

    async fn subscribe(&self, topic: &str) -> Result<MessageStream, QueueError> {
        self.ensure_topic(topic).await?;
        let mut topics = self.topics.lock().await;
        let state = topics
            .get_mut(topic)
            .ok_or_else(|| QueueError::ConsumeFailed(format!("unknown topic '{topic}'")))?;
        let rx = state.rx.take().ok_or_else(|| {
            QueueError::ConsumeFailed(format!("topic '{topic}' already has a subscriber"))
        })?;

        let acked = Arc::clone(&self.acked);
        let stream = UnboundedReceiverStream::new(rx).map(move |payload| {
            Ok(ReceivedMessage::new(
                payload,
                Box::new(MemoryAckHandle {
                    acked: Arc::clone(&acked),
                }),
            ))
        });
        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_then_subscribe_delivers_buffered_messages() {
        let topic = InMemoryTopic::new();
        topic.ensure_topic("triggers.report").await.unwrap();

        topic
            .publish("triggers.report", b"one".to_vec())
            .await
            .unwrap();
        topic
            .publish("triggers.report", b"two".to_vec())
            .await
            .unwrap();

        let mut stream = topic.subscribe("triggers.report").await.unwrap();
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.payload(), b"one");
        first.ack().await.unwrap();

        let second = stream.next().await.unwrap().unwrap();
        assert_eq!(second.payload(), b"two");

        assert_eq!(topic.acked_count(), 1);
    }

    #[tokio::test]
    async fn test_second_subscriber_is_rejected() {
        let topic = InMemoryTopic::new();
        let _stream = topic.subscribe("triggers.report").await.unwrap();
        let err = match topic.subscribe("triggers.report").await {
            Ok(_) => panic!("expected second subscribe to be rejected"),
            Err(e) => e,
        };
        assert!(matches!(err, QueueError::ConsumeFailed(_)));
    }

    #[tokio::test]
    async fn test_ensure_topic_is_idempotent() {
        let topic = InMemoryTopic::new();
        topic.ensure_topic("triggers.report").await.unwrap();
        topic.publish("triggers.report", b"kept".to_vec()).await.unwrap();
        topic.ensure_topic("triggers.report").await.unwrap();

        let mut stream = topic.subscribe("triggers.report").await.unwrap();
        let message = stream.next().await.unwrap().unwrap();
        assert_eq!(message.payload(), b"kept");
    }

    #[tokio::test]
    async fn test_message_ids_are_unique() {
        let topic = InMemoryTopic::new();
        let a = topic.publish("t", b"a".to_vec()).await.unwrap();
        let b = topic.publish("t", b"b".to_vec()).await.unwrap();
        assert_ne!(a, b);
    }
}
