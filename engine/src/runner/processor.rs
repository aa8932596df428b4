// Per-trigger execution sequence shared by both runner strategies

use crate::clock::Clock;
use crate::errors::{ProcessError, StoreError};
use crate::model::TriggerRecord;
use crate::runner::TriggerHandler;
use crate::shutdown::ShutdownCoordinator;
use crate::store::TriggerStore;
use crate::telemetry;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, instrument};
use uuid::Uuid;

/// Runs one claimed trigger through the processing lifecycle: admission
/// check, in-flight registration, `Processing` persistence, handler
/// invocation, and the terminal transition.
///
/// Every optimistic-lock conflict along the way means another instance owns
/// the trigger now; those are dropped silently. A handler failure is
/// contained here: the error transition is persisted best-effort and the
/// failure reported to the caller without poisoning sibling triggers.
pub struct TriggerProcessor {
    handler: Arc<dyn TriggerHandler>,
    store: Arc<dyn TriggerStore>,
    clock: Arc<dyn Clock>,
    shutdown: Arc<ShutdownCoordinator>,
}

impl TriggerProcessor {
    pub fn new(
        handler: Arc<dyn TriggerHandler>,
        store: Arc<dyn TriggerStore>,
        clock: Arc<dyn Clock>,
        shutdown: Arc<ShutdownCoordinator>,
    ) -> Self {
        Self {
            handler,
            store,
            clock,
            shutdown,
        }
    }

    pub fn store(&self) -> Arc<dyn TriggerStore> {
        Arc::clone(&self.store)
    }

    pub fn handler_name(&self) -> &str {
        self.handler.name()
    }

    /// Process one claimed trigger.
    ///
    /// Rejects with [`ProcessError::ShutdownInProgress`] once shutdown has
    /// begun. Otherwise the execution is registered with the coordinator for
    /// its full duration and unregistered on every exit path.
    #[instrument(skip(self, record), fields(trigger_id = %record.id, handler = self.handler.name()))]
    pub async fn process(&self, record: TriggerRecord) -> Result<(), ProcessError> {
        if self.shutdown.is_in_shutdown_mode() {
            return Err(ProcessError::ShutdownInProgress);
        }

        let process_id = self.shutdown.register_active_process(Uuid::new_v4()).await;
        let result = self.execute(record).await;
        self.shutdown.unregister_active_process(process_id).await;
        result
    }

    async fn execute(&self, mut record: TriggerRecord) -> Result<(), ProcessError> {
        record.begin_processing();
        let mut record = match self.store.save(&record).await {
            Ok(saved) => saved,
            Err(StoreError::Conflict { .. }) => {
                debug!("Claim lost before execution, trigger is handled elsewhere");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let started = Instant::now();
        let outcome = self.handler.handle(&record).await;
        telemetry::record_trigger_duration(self.handler.name(), started.elapsed().as_secs_f64());
        let now = self.clock.now();

        match outcome {
            Ok(()) => {
                telemetry::record_trigger_success(self.handler.name());
                record.on_success(now)?;
                match self.store.save(&record).await {
                    Ok(_) => Ok(()),
                    Err(StoreError::Conflict { .. }) => {
                        debug!("Claim lost while persisting success outcome");
                        Ok(())
                    }
                    Err(e) => Err(e.into()),
                }
            }
            Err(err) => {
                telemetry::record_trigger_failure(self.handler.name());
                error!(error = %err, "Trigger handler failed");
                record.on_error(now)?;
                match self.store.save(&record).await {
                    Ok(_) => {}
                    Err(StoreError::Conflict { .. }) => {
                        debug!("Claim lost while persisting error outcome");
                    }
                    Err(save_err) => {
                        // Secondary failure: logged and swallowed so it can
                        // never mask the handler failure or crash the runner.
                        error!(error = %save_err, "Failed to persist error outcome");
                    }
                }
                Err(ProcessError::Handler(err))
            }
        }
    }
}
