//! Shared application state for the Axum API server.

use std::sync::Arc;

use herald_engine::schedule::{ScheduleService, StoreTriggerSource, TriggerSource};
use herald_store::Store;

/// Application state shared across all route handlers via Axum `State`.
#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub schedules: ScheduleService,
}

impl AppState {
    /// State whose cron triggers live in the same store as the records.
    pub fn new(store: Store) -> Self {
        let triggers = Arc::new(StoreTriggerSource::new(store.clone()));
        Self::with_triggers(store, triggers)
    }

    pub fn with_triggers(store: Store, triggers: Arc<dyn TriggerSource>) -> Self {
        Self {
            schedules: ScheduleService::new(store.clone(), triggers),
            store,
        }
    }
}
