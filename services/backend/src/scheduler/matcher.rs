//! Pairs eligible orders with idle machines.

use std::sync::Arc;

use chrono::{TimeDelta, Utc};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::SchedulerError;
use crate::config::ConfigError;
use crate::model::{Assignment, Order};
use crate::store::ResourceStore;

/// What one matching run committed.
#[derive(Debug, Default)]
pub struct MatchOutcome {
    /// Assignments committed to the store, in order of commit.
    pub assignments: Vec<Assignment>,
    /// Claims or commits that lost to a concurrent writer.
    pub lost_races: u32,
    /// True when a shutdown request stopped matching early.
    pub interrupted: bool,
    /// The error that ended the run, if any. Assignments committed before
    /// the error are still listed above.
    pub aborted: Option<SchedulerError>,
}

/// Matches orders to machines, one atomic claim at a time.
#[derive(Clone)]
pub struct Matcher {
    store: Arc<dyn ResourceStore>,
    service_duration: TimeDelta,
}

impl Matcher {
    pub fn new(store: Arc<dyn ResourceStore>, service_duration: TimeDelta) -> Self {
        Self {
            store,
            service_duration,
        }
    }

    /// Walks `orders` front to back, giving each the next idle machine.
    ///
    /// Stops when machines run out, when `shutdown` flips to true, or on the
    /// first store error.
    pub async fn match_orders(
        &self,
        orders: &[Order],
        shutdown: &watch::Receiver<bool>,
    ) -> MatchOutcome {
        let mut outcome = MatchOutcome::default();

        for order in orders {
            if *shutdown.borrow() {
                debug!("Shutdown requested; no further claims this pass");
                outcome.interrupted = true;
                break;
            }

            let machine = match self.store.claim_idle_machine(order.id).await {
                Ok(Some(machine)) => machine,
                Ok(None) => {
                    debug!(order_id = %order.id, "No idle machine left");
                    break;
                }
                Err(e) if e.is_conflict() => {
                    debug!(order_id = %order.id, error = %e, "Lost claim race");
                    outcome.lost_races += 1;
                    continue;
                }
                Err(e) => {
                    outcome.aborted = Some(e.into());
                    break;
                }
            };

            let started_at = Utc::now();
            let Some(completes_at) = started_at.checked_add_signed(self.service_duration) else {
                warn!(
                    machine_id = %machine.id,
                    "Cycle end is out of range; returning claim"
                );
                if let Err(e) = self.store.release_machine(machine.id, order.id).await {
                    warn!(machine_id = %machine.id, error = %e, "Failed to return claim");
                }
                outcome.aborted = Some(
                    ConfigError::Invalid {
                        key: "service_duration",
                        reason: "cycle end is out of the supported time range".to_string(),
                    }
                    .into(),
                );
                break;
            };

            match self
                .store
                .commit_assignment(order.id, machine.id, started_at, completes_at)
                .await
            {
                Ok(true) => {
                    info!(
                        order_id = %order.id,
                        machine_id = %machine.id,
                        completes_at = %completes_at,
                        "Assigned machine to order"
                    );
                    outcome.assignments.push(Assignment {
                        order_id: order.id,
                        machine_id: machine.id,
                        started_at,
                        completes_at,
                    });
                }
                Ok(false) => {
                    debug!(
                        order_id = %order.id,
                        machine_id = %machine.id,
                        "Order changed before commit; returning machine"
                    );
                    outcome.lost_races += 1;
                    if let Err(e) = self.store.release_machine(machine.id, order.id).await {
                        warn!(
                            machine_id = %machine.id,
                            error = %e,
                            "Failed to return uncommitted claim"
                        );
                        outcome.aborted = Some(e.into());
                        break;
                    }
                }
                Err(e) => {
                    // The claim may be left dangling; startup recovery frees it.
                    if let Err(release_err) =
                        self.store.release_machine(machine.id, order.id).await
                    {
                        warn!(
                            machine_id = %machine.id,
                            error = %release_err,
                            "Failed to return claim after commit error"
                        );
                    }
                    outcome.aborted = Some(e.into());
                    break;
                }
            }
        }

        outcome
    }
}
