//! Aggregate execution counters.
//!
//! Counters are folded in once per terminal transition. Nothing here rescans
//! history, so updating them is O(1) inside the ledger's critical section.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::record::ExecutionStatus;

/// Aggregate counters for one task class (or for all classes).
///
/// Timeouts and cancellations count as failures for rate purposes; they are
/// also tallied on their own.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionMetrics {
    /// Terminal executions observed.
    pub total: u64,
    /// Executions that completed.
    pub successful: u64,
    /// Executions that failed, timed out, or were cancelled.
    pub failed: u64,
    /// Subset of `failed` that timed out.
    pub timed_out: u64,
    /// Subset of `failed` that were cancelled.
    pub cancelled: u64,
    /// Sum of execution durations.
    pub total_duration_ms: u64,
    /// Mean duration over `total` executions.
    pub avg_duration_ms: f64,
    /// Shortest observed duration.
    pub min_duration_ms: Option<u64>,
    /// Longest observed duration.
    pub max_duration_ms: Option<u64>,
    /// `successful / total` as a percentage.
    pub success_rate: f64,
    /// Completion time of the latest execution.
    pub last_execution_at: Option<DateTime<Utc>>,
}

impl ExecutionMetrics {
    /// Fold in one terminal transition.
    pub fn record(&mut self, status: ExecutionStatus, duration_ms: u64, at: DateTime<Utc>) {
        debug_assert!(status.is_terminal());

        self.total += 1;
        match status {
            ExecutionStatus::Completed => self.successful += 1,
            ExecutionStatus::TimedOut => {
                self.failed += 1;
                self.timed_out += 1;
            }
            ExecutionStatus::Cancelled => {
                self.failed += 1;
                self.cancelled += 1;
            }
            _ => self.failed += 1,
        }

        self.total_duration_ms = self.total_duration_ms.saturating_add(duration_ms);
        self.min_duration_ms = Some(self.min_duration_ms.map_or(duration_ms, |m| m.min(duration_ms)));
        self.max_duration_ms = Some(self.max_duration_ms.map_or(duration_ms, |m| m.max(duration_ms)));

        #[allow(clippy::cast_precision_loss)]
        {
            self.avg_duration_ms = self.total_duration_ms as f64 / self.total as f64;
            self.success_rate = self.successful as f64 / self.total as f64 * 100.0;
        }

        self.last_execution_at = Some(self.last_execution_at.map_or(at, |last| last.max(at)));
    }
}
