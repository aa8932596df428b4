// Trigger record model and lifecycle transitions

use crate::errors::ScheduleError;
use crate::schedule;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Trigger execution status state machine.
///
/// `Idle` triggers are claimable; `Ready` marks an exclusive claim; a runner
/// moves the record through `Processing` to one of the terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerStatus {
    Idle,
    Ready,
    Processing,
    Success,
    Error,
}

impl TriggerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerStatus::Idle => "idle",
            TriggerStatus::Ready => "ready",
            TriggerStatus::Processing => "processing",
            TriggerStatus::Success => "success",
            TriggerStatus::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "idle" => Some(TriggerStatus::Idle),
            "ready" => Some(TriggerStatus::Ready),
            "processing" => Some(TriggerStatus::Processing),
            "success" => Some(TriggerStatus::Success),
            "error" => Some(TriggerStatus::Error),
            _ => None,
        }
    }
}

/// How a trigger recurs after a terminal outcome.
///
/// One-shot triggers retire after a single execution. Cron triggers
/// recompute their next run from the expression, evaluated in `time_zone`,
/// and reactivate after every outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Recurrence {
    OneShot,
    Cron { expression: String, time_zone: Tz },
}

/// A persisted unit of schedulable work.
///
/// The store exclusively owns record storage; the engine holds instances in
/// memory only for the duration of one fetch-claim-execute cycle. `version`
/// is bumped by the store on every persisted update and is the sole
/// concurrency-control mechanism.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerRecord {
    pub id: Uuid,
    pub recurrence: Recurrence,
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub status: TriggerStatus,
    pub version: i64,
    pub created_at: DateTime<Utc>,
}

impl TriggerRecord {
    /// Create a one-shot trigger. A `None` due time means "not scheduled"
    /// and leaves the trigger inactive.
    pub fn one_shot(next_run_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            recurrence: Recurrence::OneShot,
            next_run_at,
            last_run_at: None,
            is_active: next_run_at.is_some(),
            status: TriggerStatus::Idle,
            version: 1,
            created_at: now,
        }
    }

    /// Create a recurring trigger. The expression is validated and the first
    /// due time computed here, so a broken expression fails at creation
    /// rather than at claim time.
    pub fn cron(
        expression: impl Into<String>,
        time_zone: Tz,
        now: DateTime<Utc>,
    ) -> Result<Self, ScheduleError> {
        let expression = expression.into();
        let next_run_at = schedule::next_occurrence(&expression, time_zone, now)?;

        Ok(Self {
            id: Uuid::new_v4(),
            recurrence: Recurrence::Cron {
                expression,
                time_zone,
            },
            next_run_at: Some(next_run_at),
            last_run_at: None,
            is_active: true,
            status: TriggerStatus::Idle,
            version: 1,
            created_at: now,
        })
    }

    /// Whether this record is eligible for claiming at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.is_active
            && self.status == TriggerStatus::Idle
            && self.next_run_at.is_some_and(|due| due <= now)
    }

    /// Mark the record as exclusively claimed. Persisted by the fetcher via
    /// a compare-and-swap save.
    pub fn claim(&mut self) {
        self.status = TriggerStatus::Ready;
    }

    /// Mark execution as started.
    pub fn begin_processing(&mut self) {
        self.status = TriggerStatus::Processing;
    }

    /// Apply the successful-outcome transition.
    ///
    /// One-shot triggers retire: the due time is discarded and the trigger
    /// deactivated. Cron triggers reschedule strictly after `now` and return
    /// to the claimable state.
    pub fn on_success(&mut self, now: DateTime<Utc>) -> Result<(), ScheduleError> {
        self.last_run_at = Some(now);
        match self.recurrence.clone() {
            Recurrence::OneShot => {
                self.status = TriggerStatus::Success;
                self.next_run_at = None;
                self.is_active = false;
                Ok(())
            }
            Recurrence::Cron {
                expression,
                time_zone,
            } => self.reschedule(&expression, time_zone, now),
        }
    }

    /// Apply the failed-outcome transition.
    ///
    /// One-shot triggers keep their due time and activation so an operator
    /// can inspect and requeue them. Cron triggers reschedule even after an
    /// error; a recurring trigger never stops on failure.
    pub fn on_error(&mut self, now: DateTime<Utc>) -> Result<(), ScheduleError> {
        self.last_run_at = Some(now);
        match self.recurrence.clone() {
            Recurrence::OneShot => {
                self.status = TriggerStatus::Error;
                Ok(())
            }
            Recurrence::Cron {
                expression,
                time_zone,
            } => self.reschedule(&expression, time_zone, now),
        }
    }

    fn reschedule(
        &mut self,
        expression: &str,
        time_zone: Tz,
        from: DateTime<Utc>,
    ) -> Result<(), ScheduleError> {
        let next = schedule::next_occurrence(expression, time_zone, from)?;
        self.next_run_at = Some(next);
        self.is_active = true;
        self.status = TriggerStatus::Idle;
        Ok(())
    }
}
