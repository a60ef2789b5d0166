//! Background evaluation and rollup loops.
//!
//! Each loop is a named OS thread that parks on a shared condvar between
//! cycles. [`BudgetMonitor::stop`] flips the shutdown flag, wakes every loop,
//! and joins them, so shutdown is deterministic rather than best-effort.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, warn};

use crate::budget::tracker::CostTracker;

/// Shutdown signal shared by the loops.
#[derive(Debug, Default)]
struct LoopState {
    shutdown: bool,
}

#[derive(Debug, Default)]
struct Signal {
    state: Mutex<LoopState>,
    wake: Condvar,
}

impl Signal {
    /// Sleep for `interval` unless shutdown is requested first.
    /// Returns `true` when the loop should exit.
    fn wait(&self, interval: Duration) -> bool {
        let deadline = Instant::now() + interval;
        let mut state = self.state.lock();
        while !state.shutdown {
            if self.wake.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        state.shutdown
    }

    fn trigger(&self) -> bool {
        let mut state = self.state.lock();
        let first = !state.shutdown;
        state.shutdown = true;
        self.wake.notify_all();
        first
    }
}

/// Owns the periodic budget evaluation and spend rollup threads.
pub struct BudgetMonitor {
    signal: Arc<Signal>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl BudgetMonitor {
    /// Start both loops against `tracker`.
    ///
    /// # Errors
    ///
    /// Returns the spawn error if a loop thread cannot be created; any loop
    /// already started is stopped first.
    pub fn start(
        tracker: Arc<CostTracker>,
        evaluation_interval: Duration,
        rollup_interval: Duration,
    ) -> std::io::Result<Self> {
        let monitor = Self {
            signal: Arc::new(Signal::default()),
            handles: Mutex::new(Vec::with_capacity(2)),
        };

        let evaluator = Arc::clone(&tracker);
        monitor.spawn_loop("tg-budget-eval", evaluation_interval, move || {
            let raised = evaluator.evaluate_all_rules();
            if !raised.is_empty() {
                info!(raised = raised.len(), "budget evaluation raised alerts");
            }
        })?;
        monitor.spawn_loop("tg-budget-rollup", rollup_interval, move || {
            tracker.recompute_totals();
        })?;

        info!(
            evaluation_secs = evaluation_interval.as_secs(),
            rollup_secs = rollup_interval.as_secs(),
            "budget monitor started"
        );
        Ok(monitor)
    }

    fn spawn_loop<F>(&self, name: &str, interval: Duration, cycle: F) -> std::io::Result<()>
    where
        F: Fn() + Send + 'static,
    {
        let signal = Arc::clone(&self.signal);
        let loop_name = name.to_string();
        let spawned = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run_loop(&loop_name, interval, &signal, cycle));
        match spawned {
            Ok(handle) => {
                self.handles.lock().push(handle);
                Ok(())
            }
            Err(e) => {
                error!(loop_name = name, error = %e, "failed to spawn budget loop");
                self.stop();
                Err(e)
            }
        }
    }

    /// Whether the loops are still running.
    pub fn is_running(&self) -> bool {
        !self.signal.state.lock().shutdown
    }

    /// Stop both loops and wait for them to exit. Idempotent.
    pub fn stop(&self) {
        if self.signal.trigger() {
            info!("budget monitor stopping");
        }
        let handles: Vec<_> = self.handles.lock().drain(..).collect();
        for handle in handles {
            let name = handle.thread().name().unwrap_or("budget-loop").to_string();
            if handle.join().is_err() {
                warn!(loop_name = %name, "budget loop exited by panic");
            }
        }
    }
}

impl Drop for BudgetMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_loop<F>(name: &str, interval: Duration, signal: &Signal, cycle: F)
where
    F: Fn(),
{
    debug!(loop_name = name, "budget loop started");
    let mut iteration: u64 = 0;
    while !signal.wait(interval) {
        iteration += 1;
        if catch_unwind(AssertUnwindSafe(&cycle)).is_err() {
            error!(loop_name = name, iteration, "budget loop iteration panicked, continuing");
        }
    }
    debug!(loop_name = name, iterations = iteration, "budget loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::rates::{ModelRate, RateTable};
    use crate::budget::types::NewBudgetRule;
    use crate::budget::BudgetPeriod;
    use crate::util::serde::Scope;
    use rust_decimal::Decimal;

    #[test]
    fn test_monitor_evaluates_and_stops() {
        let tracker = Arc::new(CostTracker::new(RateTable::new(ModelRate::new(
            Decimal::TEN,
            Decimal::ZERO,
        ))));
        tracker
            .create_budget_rule(
                NewBudgetRule::new("r", BudgetPeriod::Daily, Decimal::ONE)
                    .with_thresholds([Decimal::ONE]),
            )
            .unwrap();
        tracker.record_cost("any", "thing", &Scope::global(), 1000, 0);

        let monitor = BudgetMonitor::start(
            Arc::clone(&tracker),
            Duration::from_millis(20),
            Duration::from_millis(20),
        )
        .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while tracker.list_alerts(&Default::default()).is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(tracker.list_alerts(&Default::default()).len(), 1);

        let started = Instant::now();
        monitor.stop();
        assert!(!monitor.is_running());
        assert!(started.elapsed() < Duration::from_secs(1));
        monitor.stop();
    }

    #[test]
    fn test_loop_survives_panicking_cycle() {
        let signal = Arc::new(Signal::default());
        let count = Arc::new(Mutex::new(0_u32));
        let (s, c) = (Arc::clone(&signal), Arc::clone(&count));
        let handle = thread::spawn(move || {
            run_loop("test", Duration::from_millis(5), &s, move || {
                let mut n = c.lock();
                *n += 1;
                let panic_now = *n == 1;
                drop(n);
                assert!(!panic_now, "first cycle fails");
            });
        });
        let deadline = Instant::now() + Duration::from_secs(5);
        while *count.lock() < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        signal.trigger();
        handle.join().unwrap();
        assert!(*count.lock() >= 3);
    }
}
