// Queued runner: publish claimed triggers for a remote consumer

use crate::model::TriggerRecord;
use crate::queue::MessageTopic;
use crate::runner::TriggerRunner;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, instrument};
use uuid::Uuid;

/// Wire format for a claimed trigger: exactly the record id and the version
/// the claim was won at. The consumer compares the version against the
/// stored record and drops the message when it refers to a stale claim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerMessage {
    pub id: Uuid,
    pub version: i64,
}

impl From<&TriggerRecord> for TriggerMessage {
    fn from(record: &TriggerRecord) -> Self {
        Self {
            id: record.id,
            version: record.version,
        }
    }
}

/// Publishes rather than executes: every claimed trigger becomes one message
/// on the handler-scoped topic. A publish failure is logged and never blocks
/// the remaining triggers in the batch.
pub struct QueuedRunner {
    topic: Arc<dyn MessageTopic>,
    subject: String,
}

impl QueuedRunner {
    pub fn new(topic: Arc<dyn MessageTopic>, subject: String) -> Self {
        Self { topic, subject }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }
}

#[async_trait]
impl TriggerRunner for QueuedRunner {
    #[instrument(skip(self, triggers), fields(batch = triggers.len(), subject = %self.subject))]
    async fn run(&self, triggers: Vec<TriggerRecord>) {
        for record in &triggers {
            let message = TriggerMessage::from(record);
            let payload = match serde_json::to_vec(&message) {
                Ok(payload) => payload,
                Err(e) => {
                    error!(trigger_id = %record.id, error = %e, "Failed to serialize trigger message");
                    continue;
                }
            };

            match self.topic.publish(&self.subject, payload).await {
                Ok(message_id) => {
                    debug!(
                        trigger_id = %record.id,
                        version = record.version,
                        message_id = %message_id,
                        "Trigger published"
                    );
                }
                Err(e) => {
                    error!(trigger_id = %record.id, error = %e, "Failed to publish trigger");
                }
            }
        }
    }
}
