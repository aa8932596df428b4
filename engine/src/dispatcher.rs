// Scheduler facade wiring handlers to fetch-and-run poll loops

use crate::clock::Clock;
use crate::errors::DispatchError;
use crate::fetcher::TriggerFetcher;
use crate::queue::MessageTopic;
use crate::runner::{
    DirectRunner, QueuedRunner, RunnerStrategy, TriggerHandler, TriggerProcessor, TriggerRunner,
};
use crate::schedule;
use crate::shutdown::ShutdownCoordinator;
use chrono::Utc;
use chrono_tz::Tz;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Dispatcher configuration, resolved once at startup.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Runner strategy for every registered handler.
    pub strategy: RunnerStrategy,
    /// Timezone poll cron expressions are evaluated in.
    pub default_timezone: Tz,
    /// Prefix for handler-scoped queue subjects.
    pub subject_prefix: String,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            strategy: RunnerStrategy::Direct,
            default_timezone: Tz::UTC,
            subject_prefix: "triggers".to_string(),
        }
    }
}

impl DispatcherConfig {
    /// Resolve the dispatcher's slice of the loaded settings.
    pub fn from_settings(settings: &crate::config::Settings) -> Result<Self, String> {
        Ok(Self {
            strategy: settings.engine.runner_strategy,
            default_timezone: settings.engine.default_timezone()?,
            subject_prefix: settings.queue.subject_prefix.clone(),
        })
    }
}

/// Registers trigger handlers and drives their periodic poll cycles.
///
/// Each registration wires a named poll loop: on every firing of the
/// handler's poll cadence the fetcher claims due triggers and feeds them to
/// the strategy-selected runner. The handler registry is an explicit map
/// built at registration time; duplicate names are rejected.
pub struct Dispatcher {
    config: DispatcherConfig,
    clock: Arc<dyn Clock>,
    shutdown: Arc<ShutdownCoordinator>,
    topic: Option<Arc<dyn MessageTopic>>,
    poll_tasks: Mutex<HashMap<String, JoinHandle<()>>>,
    stop_tx: broadcast::Sender<()>,
}

impl Dispatcher {
    pub fn new(
        config: DispatcherConfig,
        clock: Arc<dyn Clock>,
        shutdown: Arc<ShutdownCoordinator>,
    ) -> Self {
        let (stop_tx, _) = broadcast::channel(1);
        Self {
            config,
            clock,
            shutdown,
            topic: None,
            poll_tasks: Mutex::new(HashMap::new()),
            stop_tx,
        }
    }

    /// Attach the message topic transport; required for the queued strategy.
    pub fn with_topic(mut self, topic: Arc<dyn MessageTopic>) -> Self {
        self.topic = Some(topic);
        self
    }

    pub fn coordinator(&self) -> Arc<ShutdownCoordinator> {
        Arc::clone(&self.shutdown)
    }

    /// Names of the currently registered handlers.
    pub async fn registered_handlers(&self) -> Vec<String> {
        self.poll_tasks.lock().await.keys().cloned().collect()
    }

    /// Register a handler type and start its poll loop.
    pub async fn register_handler(
        &self,
        handler: Arc<dyn TriggerHandler>,
    ) -> Result<(), DispatchError> {
        let name = handler.name().to_string();

        let mut poll_tasks = self.poll_tasks.lock().await;
        if poll_tasks.contains_key(&name) {
            return Err(DispatchError::DuplicateHandler(name));
        }

        let poll_expression = handler.poll_schedule().to_string();
        let poll_schedule = schedule::parse_cron_expression(&poll_expression).map_err(|source| {
            DispatchError::InvalidPollSchedule {
                handler: name.clone(),
                source,
            }
        })?;

        let runner = self.build_runner(&handler).await?;
        let fetcher = TriggerFetcher::new(
            name.clone(),
            handler.store(),
            Arc::clone(&self.clock),
        );

        let clock = Arc::clone(&self.clock);
        let tz = self.config.default_timezone;
        let task_name = name.clone();
        let mut stop_rx = self.stop_tx.subscribe();

        let task = tokio::spawn(async move {
            info!(
                handler = %task_name,
                schedule = %poll_expression,
                "Trigger poll loop started"
            );

            loop {
                let now = clock.now();
                let next = match poll_schedule.after(&now.with_timezone(&tz)).next() {
                    Some(next) => next.with_timezone(&Utc),
                    None => {
                        error!(handler = %task_name, "Poll schedule has no future firings, stopping loop");
                        break;
                    }
                };
                let delay = (next - now).to_std().unwrap_or(std::time::Duration::ZERO);

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {
                        let batch = fetcher.poll().await;
                        if !batch.is_empty() {
                            runner.run(batch).await;
                        }
                    }
                    _ = stop_rx.recv() => {
                        info!(handler = %task_name, "Trigger poll loop stopping");
                        break;
                    }
                }
            }
        });

        poll_tasks.insert(name.clone(), task);
        info!(handler = %name, "Trigger handler registered");
        Ok(())
    }

    async fn build_runner(
        &self,
        handler: &Arc<dyn TriggerHandler>,
    ) -> Result<Arc<dyn TriggerRunner>, DispatchError> {
        match self.config.strategy {
            RunnerStrategy::Direct => {
                let processor = Arc::new(TriggerProcessor::new(
                    Arc::clone(handler),
                    handler.store(),
                    Arc::clone(&self.clock),
                    Arc::clone(&self.shutdown),
                ));
                Ok(Arc::new(DirectRunner::new(processor)))
            }
            RunnerStrategy::Queued => {
                let topic = self
                    .topic
                    .clone()
                    .ok_or(DispatchError::TopicUnavailable)?;
                let subject = format!("{}.{}", self.config.subject_prefix, handler.name());
                topic.ensure_topic(&subject).await?;
                Ok(Arc::new(QueuedRunner::new(topic, subject)))
            }
        }
    }

    /// Stop all poll loops, then drain in-flight executions through the
    /// shutdown coordinator (bounded by its timeout).
    pub async fn shutdown(&self) {
        info!("Dispatcher shutdown requested");
        let _ = self.stop_tx.send(());
        self.shutdown.initiate_shutdown().await;

        let mut poll_tasks = self.poll_tasks.lock().await;
        for (name, task) in poll_tasks.drain() {
            if let Err(e) = task.await {
                error!(handler = %name, error = %e, "Poll task join failed");
            }
        }
        info!("Dispatcher stopped");
    }
}
