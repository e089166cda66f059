//! Application state shared across request handlers.

use std::sync::Arc;

use crate::scheduler::SchedulerHandle;
use crate::store::RecordStore;

/// Shared application state.
///
/// This is passed to all request handlers via Axum's state extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    records: Arc<dyn RecordStore>,
    scheduler: SchedulerHandle,
}

impl AppState {
    /// Create a new application state.
    pub fn new(records: Arc<dyn RecordStore>, scheduler: SchedulerHandle) -> Self {
        Self {
            inner: Arc::new(AppStateInner { records, scheduler }),
        }
    }

    /// Get a reference to the record store.
    pub fn records(&self) -> &dyn RecordStore {
        self.inner.records.as_ref()
    }

    pub fn scheduler(&self) -> &SchedulerHandle {
        &self.inner.scheduler
    }
}
