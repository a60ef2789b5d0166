//! In-memory execution store.

use std::sync::Arc;

use parking_lot::Mutex;

use super::{latest_matching, TimeWindow};
use crate::core::error::StoreError;
use crate::core::ledger::ExecutionStore;
use crate::core::record::ExecutionRecord;
use crate::util::serde::ExecutionFilter;

/// Snapshot log kept in memory, for development and tests.
///
/// Clones share the same log, so a handle kept by the caller sees what the
/// ledger writes.
#[derive(Debug, Clone, Default)]
pub struct InMemoryExecutionStore {
    snapshots: Arc<Mutex<Vec<ExecutionRecord>>>,
}

impl InMemoryExecutionStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of snapshots written.
    pub fn len(&self) -> usize {
        self.snapshots.lock().len()
    }

    /// Whether nothing was written yet.
    pub fn is_empty(&self) -> bool {
        self.snapshots.lock().is_empty()
    }

    /// Latest snapshot of one execution.
    pub fn get(&self, execution_id: &str) -> Option<ExecutionRecord> {
        self.snapshots
            .lock()
            .iter()
            .rev()
            .find(|r| r.execution_id == execution_id)
            .cloned()
    }

    /// Latest snapshots matching `filter` and submitted inside `window`.
    pub fn query(&self, filter: &ExecutionFilter, window: TimeWindow) -> Vec<ExecutionRecord> {
        latest_matching(self.snapshots.lock().iter(), filter, window)
    }
}

impl ExecutionStore for InMemoryExecutionStore {
    fn append(&mut self, record: &ExecutionRecord) -> Result<(), StoreError> {
        self.snapshots.lock().push(record.clone());
        Ok(())
    }
}
