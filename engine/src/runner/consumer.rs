// Long-lived consumer loop for the queued runner strategy

use crate::errors::{ProcessError, QueueError};
use crate::queue::{MessageTopic, ReceivedMessage};
use crate::runner::{TriggerMessage, TriggerProcessor};
use crate::store::TriggerStore;
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, error, info, instrument, warn};

/// Consumes trigger messages for one handler type and executes them.
///
/// Version comparison against the stored record gives at-most-once execution
/// per claimed version on top of the transport's at-least-once delivery:
/// a message whose version no longer matches refers to a stale claim and is
/// dropped. Every message is acknowledged after handling regardless of
/// outcome; a crash between execution and ack can cause redelivery, which
/// the version check then rejects as stale.
pub struct TriggerConsumer {
    topic: Arc<dyn MessageTopic>,
    subject: String,
    processor: Arc<TriggerProcessor>,
    store: Arc<dyn TriggerStore>,
    shutdown_flag: Arc<AtomicBool>,
    shutdown_notify: Arc<Notify>,
}

impl TriggerConsumer {
    /// Create a consumer for the given subject, provisioning the topic and
    /// its subscription idempotently.
    #[instrument(skip(topic, processor), fields(handler = processor.handler_name()))]
    pub async fn new(
        topic: Arc<dyn MessageTopic>,
        subject: String,
        processor: Arc<TriggerProcessor>,
    ) -> Result<Self, QueueError> {
        topic.ensure_topic(&subject).await?;
        let store = processor.store();

        Ok(Self {
            topic,
            subject,
            processor,
            store,
            shutdown_flag: Arc::new(AtomicBool::new(false)),
            shutdown_notify: Arc::new(Notify::new()),
        })
    }

    /// Consume messages until shutdown is requested.
    #[instrument(skip(self), fields(subject = %self.subject))]
    pub async fn start(&self) -> Result<(), QueueError> {
        let mut messages = self.topic.subscribe(&self.subject).await?;
        info!("Trigger consumer started, waiting for messages");

        loop {
            if self.shutdown_flag.load(Ordering::Relaxed) {
                info!("Shutdown requested, stopping consumer");
                break;
            }

            tokio::select! {
                item = messages.next() => {
                    match item {
                        Some(Ok(message)) => self.handle_message(message).await,
                        Some(Err(e)) => {
                            error!(error = %e, "Error receiving message");
                            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                        }
                        None => {
                            warn!("Message stream ended unexpectedly");
                            break;
                        }
                    }
                }
                _ = self.shutdown_notify.notified() => {
                    info!("Shutdown notification received");
                    break;
                }
                // Periodic fallback so the shutdown flag is observed even if
                // a notification raced the select registration.
                _ = tokio::time::sleep(std::time::Duration::from_secs(1)) => {
                    continue;
                }
            }
        }

        info!("Trigger consumer stopped");
        Ok(())
    }

    /// Request a graceful stop of the consumer loop.
    pub fn shutdown(&self) {
        self.shutdown_flag.store(true, Ordering::Relaxed);
        self.shutdown_notify.notify_waiters();
    }

    async fn handle_message(&self, message: ReceivedMessage) {
        self.process_payload(message.payload()).await;

        // Acknowledged regardless of outcome; redelivery of an executed
        // message would only be dropped as stale anyway.
        if let Err(e) = message.ack().await {
            error!(error = %e, "Failed to acknowledge message");
        }
    }

    async fn process_payload(&self, payload: &[u8]) {
        let parsed: TriggerMessage = match serde_json::from_slice(payload) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(error = %e, "Dropping malformed trigger message");
                return;
            }
        };

        let record = match self.store.find_by_id(parsed.id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                warn!(trigger_id = %parsed.id, "Dropping message for unknown trigger");
                return;
            }
            Err(e) => {
                error!(trigger_id = %parsed.id, error = %e, "Failed to load trigger, dropping message");
                return;
            }
        };

        if record.version != parsed.version {
            debug!(
                trigger_id = %parsed.id,
                message_version = parsed.version,
                current_version = record.version,
                "Dropping stale trigger message"
            );
            return;
        }

        match self.processor.process(record).await {
            Ok(()) => {}
            Err(ProcessError::ShutdownInProgress) => {
                info!(trigger_id = %parsed.id, "Skipping trigger, shutdown in progress");
            }
            Err(e) => {
                error!(trigger_id = %parsed.id, error = %e, "Trigger execution failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::model::{TriggerRecord, TriggerStatus};
    use crate::queue::InMemoryTopic;
    use crate::runner::{QueuedRunner, TriggerHandler, TriggerRunner};
    use crate::shutdown::ShutdownCoordinator;
    use crate::store::InMemoryTriggerStore;
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use uuid::Uuid;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 1, 1, 12, 0, 0).unwrap()
    }

    struct CountingHandler {
        store: Arc<InMemoryTriggerStore>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TriggerHandler for CountingHandler {
        fn name(&self) -> &str {
            "report"
        }

        fn store(&self) -> Arc<dyn TriggerStore> {
            self.store.clone()
        }

        fn poll_schedule(&self) -> &str {
            "* * * * * *"
        }

        async fn handle(&self, _record: &TriggerRecord) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Fixture {
        topic: Arc<InMemoryTopic>,
        store: Arc<InMemoryTriggerStore>,
        handler: Arc<CountingHandler>,
        consumer: Arc<TriggerConsumer>,
    }

    async fn fixture() -> Fixture {
        let topic = Arc::new(InMemoryTopic::new());
        let store = Arc::new(InMemoryTriggerStore::new());
        let handler = Arc::new(CountingHandler {
            store: Arc::clone(&store),
            calls: AtomicUsize::new(0),
        });
        let processor = Arc::new(TriggerProcessor::new(
            handler.clone(),
            store.clone(),
            Arc::new(ManualClock::new(now())),
            Arc::new(ShutdownCoordinator::new(Duration::from_secs(5))),
        ));
        let consumer = Arc::new(
            TriggerConsumer::new(topic.clone(), "triggers.report".to_string(), processor)
                .await
                .unwrap(),
        );
        Fixture {
            topic,
            store,
            handler,
            consumer,
        }
    }

    async fn wait_until<F>(mut condition: F)
    where
        F: FnMut() -> bool,
    {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !condition() {
            if tokio::time::Instant::now() > deadline {
                panic!("condition not met within timeout");
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn test_valid_message_executes_trigger_and_acks() {
        let fx = fixture().await;

        let record = TriggerRecord::one_shot(Some(now()), now());
        fx.store.create(&record).await.unwrap();
        let mut claimed = record.clone();
        claimed.claim();
        let claimed = fx.store.save(&claimed).await.unwrap();

        let runner = QueuedRunner::new(fx.topic.clone(), "triggers.report".to_string());
        runner.run(vec![claimed]).await;

        let consumer = Arc::clone(&fx.consumer);
        let task = tokio::spawn(async move { consumer.start().await });

        let topic = Arc::clone(&fx.topic);
        wait_until(move || topic.acked_count() == 1).await;

        assert_eq!(fx.handler.calls.load(Ordering::SeqCst), 1);
        let stored = fx.store.find_by_id(record.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TriggerStatus::Success);

        fx.consumer.shutdown();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_stale_version_is_dropped_without_invoking_handler() {
        let fx = fixture().await;

        let record = TriggerRecord::one_shot(Some(now()), now());
        fx.store.create(&record).await.unwrap();
        let mut claimed = record.clone();
        claimed.claim();
        fx.store.save(&claimed).await.unwrap();

        // The message still carries the pre-claim version.
        let stale = TriggerMessage {
            id: record.id,
            version: record.version,
        };
        fx.topic
            .publish("triggers.report", serde_json::to_vec(&stale).unwrap())
            .await
            .unwrap();

        let consumer = Arc::clone(&fx.consumer);
        let task = tokio::spawn(async move { consumer.start().await });

        let topic = Arc::clone(&fx.topic);
        wait_until(move || topic.acked_count() == 1).await;

        assert_eq!(fx.handler.calls.load(Ordering::SeqCst), 0);
        let stored = fx.store.find_by_id(record.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TriggerStatus::Ready);

        fx.consumer.shutdown();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_malformed_payload_is_acked_and_dropped() {
        let fx = fixture().await;

        fx.topic
            .publish("triggers.report", b"not json".to_vec())
            .await
            .unwrap();

        let consumer = Arc::clone(&fx.consumer);
        let task = tokio::spawn(async move { consumer.start().await });

        let topic = Arc::clone(&fx.topic);
        wait_until(move || topic.acked_count() == 1).await;
        assert_eq!(fx.handler.calls.load(Ordering::SeqCst), 0);

        fx.consumer.shutdown();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_unknown_trigger_is_acked_and_dropped() {
        let fx = fixture().await;

        let message = TriggerMessage {
            id: Uuid::new_v4(),
            version: 1,
        };
        fx.topic
            .publish("triggers.report", serde_json::to_vec(&message).unwrap())
            .await
            .unwrap();

        let consumer = Arc::clone(&fx.consumer);
        let task = tokio::spawn(async move { consumer.start().await });

        let topic = Arc::clone(&fx.topic);
        wait_until(move || topic.acked_count() == 1).await;
        assert_eq!(fx.handler.calls.load(Ordering::SeqCst), 0);

        fx.consumer.shutdown();
        task.await.unwrap().unwrap();
    }
}
