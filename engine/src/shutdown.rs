// Graceful shutdown coordination for in-flight trigger executions

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Tracks in-flight trigger executions and gates new work during shutdown.
///
/// Runners register each execution before starting it and unregister it when
/// done. `initiate_shutdown` flips the coordinator into shutdown mode (which
/// never reverts) and waits, bounded by the configured timeout, for the
/// in-flight set to drain.
pub struct ShutdownCoordinator {
    shutting_down: AtomicBool,
    active: Mutex<HashMap<Uuid, Instant>>,
    completed: watch::Sender<bool>,
    shutdown_timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new(shutdown_timeout: Duration) -> Self {
        let (completed, _) = watch::channel(false);
        Self {
            shutting_down: AtomicBool::new(false),
            active: Mutex::new(HashMap::new()),
            completed,
            shutdown_timeout,
        }
    }

    /// Record an in-flight execution. Returns the id unchanged so callers
    /// hold it for the matching `unregister_active_process`.
    pub async fn register_active_process(&self, id: Uuid) -> Uuid {
        self.active.lock().await.insert(id, Instant::now());
        debug!(process_id = %id, "Registered active process");
        id
    }

    /// Remove an in-flight execution. If shutdown is in progress and this
    /// was the last active process, the pending shutdown completes.
    pub async fn unregister_active_process(&self, id: Uuid) {
        let drained = {
            let mut active = self.active.lock().await;
            active.remove(&id);
            active.is_empty()
        };
        debug!(process_id = %id, "Unregistered active process");

        if drained && self.is_in_shutdown_mode() {
            self.complete_shutdown();
        }
    }

    pub fn is_in_shutdown_mode(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /// Resolve the pending shutdown. Idempotent; a no-op when shutdown has
    /// not been initiated.
    pub fn complete_shutdown(&self) {
        if !self.is_in_shutdown_mode() {
            return;
        }
        self.completed.send_replace(true);
    }

    /// Enter shutdown mode and wait for in-flight work to drain.
    ///
    /// Completes immediately when nothing is active. Otherwise resolves when
    /// the last process unregisters or when the shutdown timeout elapses,
    /// whichever comes first; on timeout the still-active processes and
    /// their running durations are logged before force-resolving.
    #[instrument(skip(self))]
    pub async fn initiate_shutdown(&self) {
        self.shutting_down.store(true, Ordering::Release);
        info!("Shutdown initiated");

        {
            let active = self.active.lock().await;
            if active.is_empty() {
                drop(active);
                self.complete_shutdown();
                info!("No active processes, shutdown complete");
                return;
            }
            info!(active = active.len(), "Waiting for active processes to finish");
        }

        let mut completed = self.completed.subscribe();
        let wait = async {
            while !*completed.borrow_and_update() {
                if completed.changed().await.is_err() {
                    break;
                }
            }
        };

        if tokio::time::timeout(self.shutdown_timeout, wait).await.is_err() {
            let active = self.active.lock().await;
            for (id, started) in active.iter() {
                warn!(
                    process_id = %id,
                    running_for = ?started.elapsed(),
                    "Process still active at shutdown timeout"
                );
            }
            drop(active);
            self.complete_shutdown();
            warn!(
                timeout = ?self.shutdown_timeout,
                "Shutdown timeout elapsed, proceeding with outstanding work"
            );
        } else {
            info!("All active processes finished, shutdown complete");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_shutdown_with_no_active_work_completes_immediately() {
        let coordinator = ShutdownCoordinator::new(Duration::from_secs(5));
        let start = Instant::now();
        coordinator.initiate_shutdown().await;
        assert!(coordinator.is_in_shutdown_mode());
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_unregistering_last_process_completes_shutdown() {
        let coordinator = Arc::new(ShutdownCoordinator::new(Duration::from_secs(10)));
        let id = coordinator.register_active_process(Uuid::new_v4()).await;

        let waiter = {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move { coordinator.initiate_shutdown().await })
        };

        // Let the waiter enter shutdown mode before releasing the process.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(coordinator.is_in_shutdown_mode());

        let start = Instant::now();
        coordinator.unregister_active_process(id).await;
        waiter.await.unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_shutdown_times_out_with_stuck_process() {
        let coordinator = ShutdownCoordinator::new(Duration::from_millis(50));
        coordinator.register_active_process(Uuid::new_v4()).await;

        let start = Instant::now();
        coordinator.initiate_shutdown().await;
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(50));
        assert!(elapsed < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_complete_shutdown_is_idempotent_and_noop_before_shutdown() {
        let coordinator = ShutdownCoordinator::new(Duration::from_secs(5));

        // Not shutting down yet: must not pre-resolve a later shutdown.
        coordinator.complete_shutdown();
        assert!(!coordinator.is_in_shutdown_mode());

        coordinator.initiate_shutdown().await;
        coordinator.complete_shutdown();
        coordinator.complete_shutdown();
        assert!(coordinator.is_in_shutdown_mode());
    }

    #[tokio::test]
    async fn test_shutdown_mode_never_reverts() {
        let coordinator = Arc::new(ShutdownCoordinator::new(Duration::from_secs(5)));
        coordinator.initiate_shutdown().await;

        let id = coordinator.register_active_process(Uuid::new_v4()).await;
        coordinator.unregister_active_process(id).await;
        assert!(coordinator.is_in_shutdown_mode());
    }

    #[tokio::test]
    async fn test_register_returns_id_unchanged() {
        let coordinator = ShutdownCoordinator::new(Duration::from_secs(5));
        let id = Uuid::new_v4();
        assert_eq!(coordinator.register_active_process(id).await, id);
    }
}
