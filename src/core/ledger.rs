//! Execution ledger: live index, bounded history, and aggregate counters.
//!
//! All mutations go through one `parking_lot::Mutex` per ledger, and every
//! mutation is O(1) so the critical section stays short under load. Durable
//! writes happen after the state lock is released, but the store lock is taken
//! before it, so snapshots reach the store in transition order. A failed write
//! is logged and the in-memory state stays authoritative.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use serde_json::{Map, Value};
use tracing::{debug, error, info};

use crate::core::error::{StoreError, SubmissionError};
use crate::core::metrics::ExecutionMetrics;
use crate::core::record::{Completion, ExecutionRecord, ExecutionStatus};
use crate::util::clock::utc_now;
use crate::util::serde::{ExecutionFilter, ExecutionId, Scope};

/// Default number of terminal records kept in the rolling history.
pub const DEFAULT_HISTORY_CAPACITY: usize = 1000;

/// Durable sink for execution record snapshots.
///
/// A snapshot is written when a record is created and again when it reaches
/// a terminal state, so a crash mid-flight leaves an inspectable record.
pub trait ExecutionStore: Send {
    /// Append a snapshot of `record`.
    fn append(&mut self, record: &ExecutionRecord) -> Result<(), StoreError>;
}

struct LedgerState {
    active: HashMap<ExecutionId, ExecutionRecord>,
    history: VecDeque<ExecutionRecord>,
    history_ids: HashSet<ExecutionId>,
    by_class: HashMap<String, ExecutionMetrics>,
    global: ExecutionMetrics,
}

impl LedgerState {
    fn contains(&self, id: &str) -> bool {
        self.active.contains_key(id) || self.history_ids.contains(id)
    }

    fn push_history(&mut self, record: ExecutionRecord, capacity: usize) {
        if self.history.len() >= capacity {
            if let Some(evicted) = self.history.pop_front() {
                self.history_ids.remove(&evicted.execution_id);
            }
        }
        self.history_ids.insert(record.execution_id.clone());
        self.history.push_back(record);
    }
}

/// Authoritative store of what is running now and what ran recently.
pub struct ExecutionLedger {
    state: Mutex<LedgerState>,
    history_capacity: usize,
    store: Option<Mutex<Box<dyn ExecutionStore>>>,
}

impl ExecutionLedger {
    /// Create a ledger keeping at most `history_capacity` terminal records.
    pub fn new(history_capacity: usize) -> Self {
        Self {
            state: Mutex::new(LedgerState {
                active: HashMap::new(),
                history: VecDeque::with_capacity(history_capacity.min(4096)),
                history_ids: HashSet::new(),
                by_class: HashMap::new(),
                global: ExecutionMetrics::default(),
            }),
            history_capacity: history_capacity.max(1),
            store: None,
        }
    }

    /// Attach a durable store.
    #[must_use]
    pub fn with_store(mut self, store: Box<dyn ExecutionStore>) -> Self {
        self.store = Some(Mutex::new(store));
        self
    }

    /// Maximum number of historical records retained.
    pub const fn history_capacity(&self) -> usize {
        self.history_capacity
    }

    /// Record a new execution in the `Submitted` state.
    ///
    /// # Errors
    ///
    /// `SubmissionError::DuplicateId` if the identifier is already known.
    pub fn start(
        &self,
        execution_id: &str,
        task_class: &str,
        scope: Scope,
        input: Value,
    ) -> Result<(), SubmissionError> {
        let record = ExecutionRecord::submitted(execution_id, task_class, scope, input, utc_now());
        let store = {
            let mut state = self.state.lock();
            if state.contains(execution_id) {
                return Err(SubmissionError::DuplicateId(execution_id.to_string()));
            }
            state.active.insert(execution_id.to_string(), record.clone());
            self.lock_store()
        };
        debug!(execution_id = %execution_id, task_class = %task_class, "execution submitted");
        persist(store, &record);
        Ok(())
    }

    /// Move an active execution forward to a non-terminal status and merge
    /// `metadata` into the record.
    ///
    /// Returns `false` when the execution is unknown or already terminal, or
    /// when the transition would go backwards. Terminal states are reached
    /// only through [`complete`](Self::complete) and [`cancel`](Self::cancel).
    pub fn update_status(
        &self,
        execution_id: &str,
        status: ExecutionStatus,
        metadata: Map<String, Value>,
    ) -> bool {
        if status.is_terminal() {
            return false;
        }
        let mut state = self.state.lock();
        let Some(record) = state.active.get_mut(execution_id) else {
            return false;
        };
        if !record.status.can_transition_to(status) {
            return false;
        }
        record.status = status;
        if status == ExecutionStatus::Running && record.started_at.is_none() {
            record.started_at = Some(utc_now());
        }
        record.metadata.extend(metadata);
        true
    }

    /// Apply a terminal transition.
    ///
    /// Only the first terminal transition per execution is honored; later
    /// calls return `false` and change nothing.
    pub fn complete(&self, execution_id: &str, completion: Completion) -> bool {
        if !completion.status.is_terminal() {
            return false;
        }
        let (finished, store) = {
            let mut state = self.state.lock();
            let Some(mut record) = state.active.remove(execution_id) else {
                return false;
            };
            let now = utc_now();
            let duration_ms = elapsed_ms(record.submitted_at, now);
            record.status = completion.status;
            record.completed_at = Some(now);
            record.duration_ms = Some(duration_ms);
            record.success = Some(completion.status == ExecutionStatus::Completed);
            record.result_summary = completion.result_summary;
            record.error = completion.error;

            state
                .by_class
                .entry(record.task_class.clone())
                .or_default()
                .record(record.status, duration_ms, now);
            state.global.record(record.status, duration_ms, now);

            state.push_history(record.clone(), self.history_capacity);
            (record, self.lock_store())
        };
        debug!(
            execution_id = %execution_id,
            status = %finished.status,
            duration_ms = finished.duration_ms.unwrap_or_default(),
            "execution finished"
        );
        persist(store, &finished);
        true
    }

    /// Cancel a non-terminal execution. No-op on terminal or unknown ones.
    pub fn cancel(&self, execution_id: &str, reason: &str) -> bool {
        let cancelled = self.complete(execution_id, Completion::cancelled(reason));
        if cancelled {
            info!(execution_id = %execution_id, reason = %reason, "execution cancelled");
        }
        cancelled
    }

    /// Look up an execution, active or historical.
    pub fn get(&self, execution_id: &str) -> Option<ExecutionRecord> {
        let state = self.state.lock();
        if let Some(record) = state.active.get(execution_id) {
            return Some(record.clone());
        }
        if !state.history_ids.contains(execution_id) {
            return None;
        }
        state
            .history
            .iter()
            .rev()
            .find(|r| r.execution_id == execution_id)
            .cloned()
    }

    /// Non-terminal executions matching `filter`, oldest submission first.
    pub fn list_active(&self, filter: &ExecutionFilter) -> Vec<ExecutionRecord> {
        let state = self.state.lock();
        let mut records: Vec<_> = state
            .active
            .values()
            .filter(|r| filter.matches(&r.task_class, &r.scope))
            .cloned()
            .collect();
        records.sort_by_key(|r| r.submitted_at);
        records
    }

    /// Terminal executions matching `filter`, newest first, at most `limit`.
    pub fn list_history(&self, filter: &ExecutionFilter, limit: usize) -> Vec<ExecutionRecord> {
        let state = self.state.lock();
        state
            .history
            .iter()
            .rev()
            .filter(|r| filter.matches(&r.task_class, &r.scope))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Aggregate counters for one task class, or across all classes.
    pub fn metrics(&self, task_class: Option<&str>) -> ExecutionMetrics {
        let state = self.state.lock();
        match task_class {
            Some(class) => state.by_class.get(class).cloned().unwrap_or_default(),
            None => state.global.clone(),
        }
    }

    /// Aggregate counters for every task class seen so far.
    pub fn metrics_by_class(&self) -> HashMap<String, ExecutionMetrics> {
        self.state.lock().by_class.clone()
    }

    /// Number of non-terminal executions.
    pub fn active_count(&self) -> usize {
        self.state.lock().active.len()
    }

    /// Number of records in the rolling history.
    pub fn history_len(&self) -> usize {
        self.state.lock().history.len()
    }

    /// Drop historical records that completed more than `age` ago.
    ///
    /// Aggregate counters are left untouched. Returns the number removed.
    pub fn purge_older_than(&self, age: Duration) -> usize {
        let Ok(age) = chrono::Duration::from_std(age) else {
            return 0;
        };
        let cutoff = utc_now() - age;
        let mut state = self.state.lock();
        let LedgerState {
            history,
            history_ids,
            ..
        } = &mut *state;
        let before = history.len();
        history.retain(|r| {
            let keep = r.completed_at.is_some_and(|t| t >= cutoff);
            if !keep {
                history_ids.remove(&r.execution_id);
            }
            keep
        });
        let removed = before - history.len();
        if removed > 0 {
            info!(removed, "purged historical executions");
        }
        removed
    }

    /// Take the store lock; callers hold the state lock while doing so.
    fn lock_store(&self) -> Option<MutexGuard<'_, Box<dyn ExecutionStore>>> {
        self.store.as_ref().map(|store| store.lock())
    }
}

fn persist(store: Option<MutexGuard<'_, Box<dyn ExecutionStore>>>, record: &ExecutionRecord) {
    if let Some(mut store) = store {
        if let Err(e) = store.append(record) {
            error!(
                execution_id = %record.execution_id,
                error = %e,
                "failed to persist execution record"
            );
        }
    }
}

impl Default for ExecutionLedger {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

fn elapsed_ms(from: DateTime<Utc>, to: DateTime<Utc>) -> u64 {
    u64::try_from((to - from).num_milliseconds()).unwrap_or(0)
}
