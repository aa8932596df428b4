// Direct runner: in-process fan-out execution

use crate::errors::ProcessError;
use crate::model::TriggerRecord;
use crate::runner::{TriggerProcessor, TriggerRunner};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info, instrument};

/// Executes a claimed batch fully in-process, one tokio task per trigger.
///
/// Each trigger carries its own error boundary: a handler failure or panic in
/// one task never aborts its siblings, and `run` returns once every task has
/// settled.
pub struct DirectRunner {
    processor: Arc<TriggerProcessor>,
}

impl DirectRunner {
    pub fn new(processor: Arc<TriggerProcessor>) -> Self {
        Self { processor }
    }
}

#[async_trait]
impl TriggerRunner for DirectRunner {
    #[instrument(skip(self, triggers), fields(batch = triggers.len(), handler = self.processor.handler_name()))]
    async fn run(&self, triggers: Vec<TriggerRecord>) {
        let mut tasks = Vec::with_capacity(triggers.len());

        for record in triggers {
            let processor = Arc::clone(&self.processor);
            let trigger_id = record.id;
            tasks.push(tokio::spawn(async move {
                match processor.process(record).await {
                    Ok(()) => {}
                    Err(ProcessError::ShutdownInProgress) => {
                        info!(trigger_id = %trigger_id, "Trigger rejected, shutdown in progress");
                    }
                    Err(e) => {
                        error!(trigger_id = %trigger_id, error = %e, "Trigger execution failed");
                    }
                }
            }));
        }

        for task in tasks {
            if let Err(e) = task.await {
                error!(error = %e, "Trigger task panicked");
            }
        }
    }
}
