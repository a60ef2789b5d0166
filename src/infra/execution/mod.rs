//! Execution record stores.

pub mod jsonl;
pub mod memory;

pub use jsonl::JsonlExecutionStore;
pub use memory::InMemoryExecutionStore;

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::core::record::ExecutionRecord;
use crate::util::serde::ExecutionFilter;

/// Time window over submission timestamps; unset bounds are open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeWindow {
    /// Inclusive lower bound.
    pub since: Option<DateTime<Utc>>,
    /// Exclusive upper bound.
    pub until: Option<DateTime<Utc>>,
}

impl TimeWindow {
    /// Whether `at` falls inside the window.
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.since.is_none_or(|s| at >= s) && self.until.is_none_or(|u| at < u)
    }
}

/// Collapse a snapshot log to the latest snapshot per execution, keep those
/// matching `filter` and `window`, and order them by submission time.
pub(crate) fn latest_matching<'a, I>(
    snapshots: I,
    filter: &ExecutionFilter,
    window: TimeWindow,
) -> Vec<ExecutionRecord>
where
    I: IntoIterator<Item = &'a ExecutionRecord>,
{
    let mut latest: HashMap<&str, &ExecutionRecord> = HashMap::new();
    for record in snapshots {
        latest.insert(record.execution_id.as_str(), record);
    }
    let mut records: Vec<ExecutionRecord> = latest
        .into_values()
        .filter(|r| filter.matches(&r.task_class, &r.scope) && window.contains(r.submitted_at))
        .cloned()
        .collect();
    records.sort_by(|a, b| {
        a.submitted_at
            .cmp(&b.submitted_at)
            .then_with(|| a.execution_id.cmp(&b.execution_id))
    });
    records
}
