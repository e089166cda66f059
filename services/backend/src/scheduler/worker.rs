//! Scheduler background worker.
//!
//! Runs an assignment pass on a periodic interval until shutdown is
//! signaled. Release tasks already handed to the [`CompletionTracker`]
//! outlive the worker.

use std::sync::Arc;
use std::time::Duration;

use chrono::TimeDelta;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use super::eligibility::filter_eligible;
use super::matcher::Matcher;
use super::tracker::{CompletionTracker, ReleaseRetry};
use super::{SchedulerError, SchedulerResult};
use crate::config::ConfigError;
use crate::store::ResourceStore;

/// Longest accepted scan interval, cycle or retry backoff: thirty days.
pub const MAX_DURATION: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Timing for the scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Time between assignment passes.
    pub scan_interval: Duration,
    /// Simulated length of one machine cycle.
    pub service_duration: Duration,
    /// Attempts per release before leaving it to the next pass.
    pub release_retry_attempts: u32,
    pub release_retry_backoff: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(6 * 60),
            service_duration: Duration::from_secs(5 * 60),
            release_retry_attempts: 3,
            release_retry_backoff: Duration::from_secs(1),
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scan_interval.is_zero() {
            return Err(ConfigError::ZeroDuration("scan_interval"));
        }
        if self.service_duration.is_zero() {
            return Err(ConfigError::ZeroDuration("service_duration"));
        }
        for (key, value) in [
            ("scan_interval", self.scan_interval),
            ("service_duration", self.service_duration),
            ("release_retry_backoff", self.release_retry_backoff),
        ] {
            if value > MAX_DURATION {
                return Err(ConfigError::Invalid {
                    key,
                    reason: format!("must not exceed {} seconds", MAX_DURATION.as_secs()),
                });
            }
        }
        if self.release_retry_attempts == 0 {
            return Err(ConfigError::Invalid {
                key: "release_retry_attempts",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    fn service_delta(&self) -> Result<TimeDelta, ConfigError> {
        TimeDelta::from_std(self.service_duration).map_err(|e| ConfigError::Invalid {
            key: "service_duration",
            reason: e.to_string(),
        })
    }
}

/// Counters from one assignment pass.
#[derive(Debug, Default, Clone, PartialEq, Eq, serde::Serialize)]
pub struct PassStats {
    pub orders_considered: usize,
    pub eligible: usize,
    pub assigned: usize,
    pub lost_races: u32,
    /// Eligible orders left waiting for a machine.
    pub pending: usize,
    pub interrupted: bool,
    /// Committed assignments that had no pending release and were tracked
    /// again, typically after a release ran out of retries.
    pub releases_resumed: usize,
}

/// Counters from startup recovery.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryStats {
    pub claims_released: u64,
    pub assignments_tracked: usize,
}

/// Scheduler worker that runs assignment passes.
pub struct SchedulerWorker {
    store: Arc<dyn ResourceStore>,
    matcher: Matcher,
    tracker: CompletionTracker,
    config: SchedulerConfig,
}

impl SchedulerWorker {
    /// Create a new scheduler worker. Fails on an invalid config.
    pub fn new(
        store: Arc<dyn ResourceStore>,
        config: SchedulerConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let matcher = Matcher::new(store.clone(), config.service_delta()?);
        let tracker = CompletionTracker::new(
            store.clone(),
            ReleaseRetry {
                attempts: config.release_retry_attempts,
                backoff: config.release_retry_backoff,
            },
        );
        Ok(Self {
            store,
            matcher,
            tracker,
            config,
        })
    }

    pub fn tracker(&self) -> &CompletionTracker {
        &self.tracker
    }

    /// Rebuilds release tasks from persisted state.
    ///
    /// Claims that never reached their order are freed; committed
    /// assignments are tracked again with whatever time they have left.
    #[instrument(skip(self))]
    pub async fn recover(&self) -> SchedulerResult<RecoveryStats> {
        let claims_released = self.store.release_uncommitted_claims().await?;
        if claims_released > 0 {
            warn!(claims_released, "Released machines with uncommitted claims");
        }

        let assignments = self.store.list_active_assignments().await?;
        let assignments_tracked = assignments.len();
        for assignment in assignments {
            self.tracker.track(assignment);
        }

        info!(claims_released, assignments_tracked, "Scheduler recovery complete");
        Ok(RecoveryStats {
            claims_released,
            assignments_tracked,
        })
    }

    /// Run the scheduler worker until shutdown is signaled.
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.scan_interval.as_secs(),
            service_duration_secs = self.config.service_duration.as_secs(),
            "Starting scheduler worker"
        );

        let mut interval = tokio::time::interval(self.config.scan_interval);
        // Don't immediately tick on startup - wait for first interval
        interval.tick().await;

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.run_pass(&shutdown).await {
                        error!(error = %e, "Scheduler pass failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(
            releases_in_flight = self.tracker.in_flight(),
            "Scheduler worker shutting down"
        );
    }

    /// Tracks every committed assignment that has no pending release task.
    async fn resume_releases(&self) -> SchedulerResult<usize> {
        let mut resumed = 0;
        for assignment in self.store.list_active_assignments().await? {
            if self.tracker.track(assignment) {
                warn!(
                    order_id = %assignment.order_id,
                    machine_id = %assignment.machine_id,
                    "Resumed release with no pending task"
                );
                resumed += 1;
            }
        }
        Ok(resumed)
    }

    /// Run a single pass: resume releases, then list, filter, match, track.
    ///
    /// Assignments committed before an error are still tracked.
    pub async fn run_pass(
        &self,
        shutdown: &watch::Receiver<bool>,
    ) -> SchedulerResult<PassStats> {
        let releases_resumed = self.resume_releases().await?;

        let orders = self.store.list_unfulfilled_orders().await?;
        let orders_considered = orders.len();
        let eligible = filter_eligible(orders);

        let outcome = self.matcher.match_orders(&eligible, shutdown).await;
        for assignment in &outcome.assignments {
            self.tracker.track(*assignment);
        }

        if let Some(e) = outcome.aborted {
            return Err(e);
        }

        let stats = PassStats {
            orders_considered,
            eligible: eligible.len(),
            assigned: outcome.assignments.len(),
            lost_races: outcome.lost_races,
            pending: eligible.len() - outcome.assignments.len(),
            interrupted: outcome.interrupted,
            releases_resumed,
        };

        if stats.assigned > 0 || stats.lost_races > 0 {
            info!(
                eligible = stats.eligible,
                assigned = stats.assigned,
                lost_races = stats.lost_races,
                pending = stats.pending,
                "Scheduler pass complete"
            );
        } else {
            debug!(eligible = stats.eligible, "Scheduler pass made no assignments");
        }

        Ok(stats)
    }
}

/// Start/stop control for a running scheduler.
#[derive(Clone)]
pub struct SchedulerHandle {
    worker: Arc<SchedulerWorker>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl std::fmt::Debug for SchedulerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerHandle").finish_non_exhaustive()
    }
}

impl SchedulerHandle {
    /// Spawns `worker.run` and returns a handle to it.
    pub fn spawn(worker: SchedulerWorker) -> Self {
        let worker = Arc::new(worker);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn({
            let worker = worker.clone();
            async move { worker.run(shutdown_rx).await }
        });

        Self {
            worker,
            shutdown_tx: Arc::new(shutdown_tx),
            task: Arc::new(Mutex::new(Some(task))),
        }
    }

    /// Runs one pass right away, outside the periodic schedule.
    pub async fn scan_now(&self) -> SchedulerResult<PassStats> {
        if self.is_shutting_down() {
            return Err(SchedulerError::ShuttingDown);
        }
        self.worker.run_pass(&self.shutdown_tx.subscribe()).await
    }

    pub fn tracker(&self) -> &CompletionTracker {
        self.worker.tracker()
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// True while the scan loop task is alive.
    pub fn is_running(&self) -> bool {
        match self.task.try_lock() {
            Ok(task) => task.as_ref().is_some_and(|t| !t.is_finished()),
            // Only `shutdown` holds the lock for long.
            Err(_) => false,
        }
    }

    /// Stops scanning and waits for the loop to exit.
    ///
    /// Release tasks keep running; await [`CompletionTracker::wait`] to
    /// drain them.
    pub async fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
        let task = self.task.lock().await.take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!(error = %e, "Scheduler worker task panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    use crate::model::{NewClient, NewMachine, NewOrder, Order, ServiceKind};
    use crate::store::{MemoryStore, RecordStore};

    async fn seed(store: &MemoryStore) -> Order {
        store
            .create_machine(NewMachine {
                name: "m1".to_string(),
                capacity_kg: 8,
            })
            .await
            .unwrap();
        let client = store
            .create_client(NewClient {
                name: "ana".to_string(),
                email: "ana@example.com".to_string(),
                address: "Rua das Flores 12".to_string(),
            })
            .await
            .unwrap();
        store
            .create_order(NewOrder {
                client_id: client.id,
                services: vec![ServiceKind::Wash],
            })
            .await
            .unwrap()
    }

    #[test]
    fn test_config_defaults() {
        let config = SchedulerConfig::default();
        assert_eq!(config.scan_interval.as_secs(), 360);
        assert_eq!(config.service_duration.as_secs(), 300);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_rejects_zero_durations() {
        let config = SchedulerConfig {
            scan_interval: Duration::ZERO,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ZeroDuration("scan_interval"))
        ));

        let config = SchedulerConfig {
            service_duration: Duration::ZERO,
            ..Default::default()
        };
        assert!(SchedulerWorker::new(Arc::new(MemoryStore::new()), config).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pass_store_error_is_reported_not_fatal() {
        let store = Arc::new(MemoryStore::new());
        seed(&store).await;
        let worker = SchedulerWorker::new(store.clone(), SchedulerConfig::default()).unwrap();
        let (_tx, rx) = watch::channel(false);

        store.fail_next(1);
        assert!(worker.run_pass(&rx).await.is_err());

        let stats = worker.run_pass(&rx).await.unwrap();
        assert_eq!(stats.assigned, 1);
        assert_eq!(stats.pending, 0);
    }

    #[test]
    fn test_config_rejects_oversized_durations() {
        let config = SchedulerConfig {
            service_duration: Duration::from_secs(1_000_000_000_000_000),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                key: "service_duration",
                ..
            })
        ));

        let config = SchedulerConfig {
            scan_interval: MAX_DURATION + Duration::from_secs(1),
            ..Default::default()
        };
        assert!(SchedulerWorker::new(Arc::new(MemoryStore::new()), config).is_err());

        let config = SchedulerConfig {
            service_duration: MAX_DURATION,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pass_resumes_untracked_release_once() {
        let store = Arc::new(MemoryStore::new());
        let order = seed(&store).await;
        let machine = store.claim_idle_machine(order.id).await.unwrap().unwrap();
        let started_at = Utc::now();
        let completes_at = started_at + TimeDelta::minutes(2);
        store
            .commit_assignment(order.id, machine.id, started_at, completes_at)
            .await
            .unwrap();
        let worker = SchedulerWorker::new(store.clone(), SchedulerConfig::default()).unwrap();
        let (_tx, rx) = watch::channel(false);

        assert_eq!(worker.run_pass(&rx).await.unwrap().releases_resumed, 1);
        assert_eq!(worker.run_pass(&rx).await.unwrap().releases_resumed, 0);
        assert_eq!(worker.tracker().in_flight(), 1);

        worker.tracker().wait().await;
        assert!(store.get_machine(machine.id).await.unwrap().is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_now_refused_after_shutdown() {
        let store = Arc::new(MemoryStore::new());
        let worker = SchedulerWorker::new(store, SchedulerConfig::default()).unwrap();
        let handle = SchedulerHandle::spawn(worker);

        assert!(handle.scan_now().await.is_ok());
        assert!(handle.is_running());
        handle.shutdown().await;
        assert!(!handle.is_running());
        assert!(matches!(
            handle.scan_now().await,
            Err(SchedulerError::ShuttingDown)
        ));
    }
}
