// Error types for the trigger engine

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

/// Schedule-related errors
#[derive(Error, Debug)]
pub enum ScheduleError {
    #[error("Invalid cron expression '{expression}': {reason}")]
    InvalidCronExpression { expression: String, reason: String },

    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    #[error("Cron expression '{expression}' has no occurrence after {after}")]
    NoFutureOccurrence {
        expression: String,
        after: DateTime<Utc>,
    },

    #[error(
        "Cron expression '{expression}' computed next run {computed} which is not after {after}"
    )]
    NonAdvancingNextRun {
        expression: String,
        after: DateTime<Utc>,
        computed: DateTime<Utc>,
    },
}

/// Trigger store errors
///
/// `Conflict` is the typed optimistic-lock rejection: callers match on it to
/// treat contention as routine rather than as a defect.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Optimistic lock conflict on trigger {id} at version {version}")]
    Conflict { id: Uuid, version: i64 },

    #[error("Trigger not found: {0}")]
    NotFound(Uuid),

    #[error("Store operation failed: {0}")]
    Backend(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

/// Queue-related errors
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Failed to connect to queue: {0}")]
    Connection(String),

    #[error("Failed to create stream: {0}")]
    StreamCreation(String),

    #[error("Failed to create consumer: {0}")]
    ConsumerCreation(String),

    #[error("Failed to publish message: {0}")]
    PublishFailed(String),

    #[error("Failed to consume message: {0}")]
    ConsumeFailed(String),

    #[error("Failed to acknowledge message: {0}")]
    AckFailed(String),

    #[error("Message serialization failed: {0}")]
    SerializationFailed(String),

    #[error("Queue operation timeout: {0}")]
    Timeout(String),
}

/// Errors from processing a single claimed trigger
#[derive(Error, Debug)]
pub enum ProcessError {
    /// New work is rejected once shutdown has begun. Callers skip the
    /// trigger instead of treating this as a failure.
    #[error("Shutdown in progress, trigger execution rejected")]
    ShutdownInProgress,

    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Trigger handler failed: {0}")]
    Handler(#[source] anyhow::Error),
}

/// Dispatcher registration errors
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Handler '{0}' is already registered")]
    DuplicateHandler(String),

    #[error("Invalid poll schedule for handler '{handler}': {source}")]
    InvalidPollSchedule {
        handler: String,
        #[source]
        source: ScheduleError,
    },

    #[error("Queued runner strategy selected but no message topic configured")]
    TopicUnavailable,

    #[error(transparent)]
    Queue(#[from] QueueError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_display_names_trigger_and_version() {
        let id = Uuid::new_v4();
        let err = StoreError::Conflict { id, version: 7 };
        let text = err.to_string();
        assert!(text.contains(&id.to_string()));
        assert!(text.contains("version 7"));
    }

    #[test]
    fn test_sqlx_error_maps_to_backend() {
        let err: StoreError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, StoreError::Backend(_)));
    }

    #[test]
    fn test_schedule_error_display() {
        let err = ScheduleError::InvalidCronExpression {
            expression: "* * * *".to_string(),
            reason: "invalid format".to_string(),
        };
        assert!(err.to_string().contains("Invalid cron expression"));
    }

    #[test]
    fn test_shutdown_rejection_is_distinct() {
        let err = ProcessError::ShutdownInProgress;
        assert!(matches!(err, ProcessError::ShutdownInProgress));
    }
}
