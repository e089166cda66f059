//! Releases machines when their simulated cycle ends.
//!
//! Each committed assignment gets its own task. The tasks live in a
//! [`TaskTracker`] rather than under the scheduler loop, so stopping the loop
//! leaves them running and machines are never left occupied.
//!
//! A release that exhausts its retries drops out of the tracked set. Every
//! scheduler pass tracks such assignments again, so a store outage delays a
//! release but never strands the machine.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use lavanderia_id::{MachineId, OrderId};
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::model::Assignment;
use crate::store::ResourceStore;

type Key = (OrderId, MachineId);

/// Retry policy for a release that hits a store error.
#[derive(Debug, Clone, Copy)]
pub struct ReleaseRetry {
    pub attempts: u32,
    pub backoff: Duration,
}

/// Spawns and owns one release task per assignment.
#[derive(Clone)]
pub struct CompletionTracker {
    store: Arc<dyn ResourceStore>,
    retry: ReleaseRetry,
    tasks: TaskTracker,
    tracked: Arc<Mutex<HashSet<Key>>>,
}

/// Removes its key from the tracked set when the release task ends,
/// whether it released, found nothing to do, gave up or was cancelled.
struct TrackedGuard {
    key: Key,
    tracked: Arc<Mutex<HashSet<Key>>>,
}

impl Drop for TrackedGuard {
    fn drop(&mut self) {
        self.tracked
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

impl CompletionTracker {
    pub fn new(store: Arc<dyn ResourceStore>, retry: ReleaseRetry) -> Self {
        Self {
            store,
            retry,
            tasks: TaskTracker::new(),
            tracked: Arc::default(),
        }
    }

    /// Schedules the release of `assignment.machine_id`.
    ///
    /// The delay is recomputed from the persisted completion time, so an
    /// assignment recovered after a restart waits only for what is left.
    /// Returns false, and spawns nothing, when a task for the same order and
    /// machine is already pending.
    pub fn track(&self, assignment: Assignment) -> bool {
        let key = (assignment.order_id, assignment.machine_id);
        let inserted = self
            .tracked
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key);
        if !inserted {
            return false;
        }

        let guard = TrackedGuard {
            key,
            tracked: self.tracked.clone(),
        };
        let delay = assignment.remaining(Utc::now());
        let store = self.store.clone();
        let retry = self.retry;

        debug!(
            order_id = %assignment.order_id,
            machine_id = %assignment.machine_id,
            delay_secs = delay.as_secs(),
            "Tracking assignment"
        );

        self.tasks.spawn(async move {
            let _guard = guard;
            tokio::time::sleep(delay).await;
            release_with_retry(store.as_ref(), &assignment, retry).await;
        });
        true
    }

    /// True while a release task for this order and machine is pending.
    pub fn is_tracked(&self, order_id: OrderId, machine_id: MachineId) -> bool {
        self.tracked
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&(order_id, machine_id))
    }

    /// Number of release tasks that have not finished yet.
    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    /// Waits for every release task spawned so far.
    pub async fn wait(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }
}

async fn release_with_retry(
    store: &dyn ResourceStore,
    assignment: &Assignment,
    retry: ReleaseRetry,
) {
    let mut attempt = 1;
    loop {
        match store
            .release_machine(assignment.machine_id, assignment.order_id)
            .await
        {
            Ok(true) => {
                info!(
                    order_id = %assignment.order_id,
                    machine_id = %assignment.machine_id,
                    "Machine is now available"
                );
                return;
            }
            Ok(false) => {
                debug!(
                    order_id = %assignment.order_id,
                    machine_id = %assignment.machine_id,
                    "Machine already released"
                );
                return;
            }
            Err(e) if attempt < retry.attempts => {
                warn!(
                    machine_id = %assignment.machine_id,
                    attempt,
                    error = %e,
                    "Release failed; retrying"
                );
                attempt += 1;
                tokio::time::sleep(retry.backoff).await;
            }
            Err(e) => {
                error!(
                    order_id = %assignment.order_id,
                    machine_id = %assignment.machine_id,
                    error = %e,
                    "Giving up on release for now; the next pass tracks it again"
                );
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NewClient, NewMachine, NewOrder, ServiceKind};
    use crate::store::{MemoryStore, RecordStore};
    use chrono::TimeDelta;

    const RETRY: ReleaseRetry = ReleaseRetry {
        attempts: 3,
        backoff: Duration::from_secs(1),
    };

    async fn committed(store: &MemoryStore, duration: TimeDelta) -> Assignment {
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
        let order = store
            .create_order(NewOrder {
                client_id: client.id,
                services: vec![ServiceKind::FullCycle],
            })
            .await
            .unwrap();
        let machine = store.claim_idle_machine(order.id).await.unwrap().unwrap();
        let started_at = Utc::now();
        let completes_at = started_at + duration;
        assert!(store
            .commit_assignment(order.id, machine.id, started_at, completes_at)
            .await
            .unwrap());
        Assignment {
            order_id: order.id,
            machine_id: machine.id,
            started_at,
            completes_at,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_after_duration() {
        let store = Arc::new(MemoryStore::new());
        let assignment = committed(&store, TimeDelta::minutes(5)).await;
        let tracker = CompletionTracker::new(store.clone(), RETRY);

        tracker.track(assignment);
        tokio::time::sleep(Duration::from_secs(240)).await;
        assert!(store.get_machine(assignment.machine_id).await.unwrap().occupied);

        tracker.wait().await;
        let machine = store.get_machine(assignment.machine_id).await.unwrap();
        assert!(!machine.occupied);
        assert!(machine.current_order_id.is_none());
        assert!(!store
            .release_machine(assignment.machine_id, assignment.order_id)
            .await
            .unwrap());
        store.check_invariants().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_released_is_noop() {
        let store = Arc::new(MemoryStore::new());
        let assignment = committed(&store, TimeDelta::seconds(30)).await;
        store.admin_release_machine(assignment.machine_id).await.unwrap();
        let tracker = CompletionTracker::new(store.clone(), RETRY);

        tracker.track(assignment);
        tracker.wait().await;

        let order = store.get_order(assignment.order_id).await.unwrap();
        assert!(order.cycle_completed_at.is_none());
        assert_eq!(tracker.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overdue_assignment_releases_immediately() {
        let store = Arc::new(MemoryStore::new());
        let assignment = committed(&store, TimeDelta::minutes(-1)).await;
        let tracker = CompletionTracker::new(store.clone(), RETRY);

        let before = tokio::time::Instant::now();
        tracker.track(assignment);
        tracker.wait().await;

        assert_eq!(before.elapsed(), Duration::ZERO);
        assert!(store.get_machine(assignment.machine_id).await.unwrap().is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_error_is_retried() {
        let store = Arc::new(MemoryStore::new());
        let assignment = committed(&store, TimeDelta::seconds(10)).await;
        let tracker = CompletionTracker::new(store.clone(), RETRY);

        store.fail_next(2);
        tracker.track(assignment);
        tracker.wait().await;

        assert!(store.get_machine(assignment.machine_id).await.unwrap().is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_release_can_be_tracked_again() {
        let store = Arc::new(MemoryStore::new());
        let assignment = committed(&store, TimeDelta::seconds(10)).await;
        let tracker = CompletionTracker::new(store.clone(), RETRY);

        store.fail_next(3);
        assert!(tracker.track(assignment));
        tracker.wait().await;
        assert!(!tracker.is_tracked(assignment.order_id, assignment.machine_id));

        assert!(tracker.track(assignment));
        tracker.wait().await;
        let machine = store.get_machine(assignment.machine_id).await.unwrap();
        assert!(machine.is_idle());
        let order = store.get_order(assignment.order_id).await.unwrap();
        assert!(order.cycle_completed_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_track_spawns_once() {
        let store = Arc::new(MemoryStore::new());
        let assignment = committed(&store, TimeDelta::minutes(5)).await;
        let tracker = CompletionTracker::new(store.clone(), RETRY);

        assert!(tracker.track(assignment));
        assert!(!tracker.track(assignment));
        assert_eq!(tracker.in_flight(), 1);
        assert!(tracker.is_tracked(assignment.order_id, assignment.machine_id));

        tracker.wait().await;
        assert!(!tracker.is_tracked(assignment.order_id, assignment.machine_id));
        assert!(store.get_machine(assignment.machine_id).await.unwrap().is_idle());
    }
}
