//! In-memory cost store.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::budget::store::{CostSnapshot, CostStore};
use crate::budget::types::{BudgetRule, CostAlert, CostEntry};
use crate::core::error::StoreError;

/// Keeps everything in memory; clones share state.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCostStore {
    inner: Arc<Mutex<CostSnapshot>>,
}

impl InMemoryCostStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with `snapshot`.
    pub fn with_snapshot(snapshot: CostSnapshot) -> Self {
        Self {
            inner: Arc::new(Mutex::new(snapshot)),
        }
    }
}

impl CostStore for InMemoryCostStore {
    fn append_entry(&mut self, entry: &CostEntry) -> Result<(), StoreError> {
        self.inner.lock().entries.push(entry.clone());
        Ok(())
    }

    fn save_rule(&mut self, rule: &BudgetRule) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        match inner.rules.iter_mut().find(|r| r.id == rule.id) {
            Some(existing) => *existing = rule.clone(),
            None => inner.rules.push(rule.clone()),
        }
        Ok(())
    }

    fn delete_rule(&mut self, rule_id: &str) -> Result<(), StoreError> {
        self.inner.lock().rules.retain(|r| r.id != rule_id);
        Ok(())
    }

    fn save_alert(&mut self, alert: &CostAlert) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        match inner.alerts.iter_mut().find(|a| a.id == alert.id) {
            Some(existing) => *existing = alert.clone(),
            None => inner.alerts.push(alert.clone()),
        }
        Ok(())
    }

    fn load(&self) -> Result<CostSnapshot, StoreError> {
        Ok(self.inner.lock().clone())
    }
}
