// Trigger execution strategies

pub mod consumer;
pub mod direct;
pub mod processor;
pub mod queued;

pub use consumer::TriggerConsumer;
pub use direct::DirectRunner;
pub use processor::TriggerProcessor;
pub use queued::{QueuedRunner, TriggerMessage};

use crate::model::TriggerRecord;
use crate::store::TriggerStore;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Which runner strategy the process uses. Selected by configuration for the
/// whole process, not per handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunnerStrategy {
    /// Execute claimed triggers in-process, one concurrent task each.
    Direct,
    /// Publish claimed triggers to a topic; a separate consumer executes.
    Queued,
}

/// A registered unit of schedulable work.
///
/// Implementors supply the store their triggers live in, the callback that
/// executes one trigger, and the cron cadence at which the engine polls for
/// due triggers of this type. The engine treats `handle` as opaque: what a
/// trigger actually does is the caller's business.
#[async_trait]
pub trait TriggerHandler: Send + Sync {
    /// Stable handler type name; also scopes the queue topic.
    fn name(&self) -> &str;

    fn store(&self) -> Arc<dyn TriggerStore>;

    /// Cron expression for the poll cadence of this handler type.
    fn poll_schedule(&self) -> &str;

    /// Execute one claimed trigger.
    async fn handle(&self, record: &TriggerRecord) -> anyhow::Result<()>;
}

/// Executes a batch of claimed triggers. Failures are contained per trigger;
/// `run` itself never fails.
#[async_trait]
pub trait TriggerRunner: Send + Sync {
    async fn run(&self, triggers: Vec<TriggerRecord>);
}
