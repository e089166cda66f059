//! Machine assignment scheduler.
//!
//! The scheduler is responsible for:
//! - Picking unfulfilled orders that need a wash, dry or full cycle
//! - Claiming an idle machine for each, atomically against the store
//! - Releasing each machine once its simulated cycle has run
//! - Rebuilding outstanding releases from persisted state on startup
//!
//! A pass runs eligibility filter, then matcher, then completion tracker.

mod eligibility;
mod matcher;
mod tracker;
mod worker;

use std::sync::Arc;

use thiserror::Error;

pub use eligibility::filter_eligible;
pub use matcher::{MatchOutcome, Matcher};
pub use tracker::{CompletionTracker, ReleaseRetry};
pub use worker::{
    PassStats, RecoveryStats, SchedulerConfig, SchedulerHandle, SchedulerWorker, MAX_DURATION,
};

use crate::config::ConfigError;
use crate::store::{ResourceStore, StoreError};

/// Result type for scheduler operations.
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Errors that can occur during scheduling.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("invalid scheduler config: {0}")]
    Config(#[from] ConfigError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("scheduler is shutting down")]
    ShuttingDown,
}

/// Validates `config`, recovers persisted assignments and starts the loop.
pub async fn start(
    store: Arc<dyn ResourceStore>,
    config: SchedulerConfig,
) -> SchedulerResult<SchedulerHandle> {
    let worker = SchedulerWorker::new(store, config)?;
    worker.recover().await?;
    Ok(SchedulerHandle::spawn(worker))
}
