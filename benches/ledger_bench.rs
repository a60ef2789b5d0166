//! Benchmarks for the governor's hot paths.
//!
//! Benchmarks cover:
//! - Ledger start/complete cycles and aggregate reads
//! - Cost metering against the built-in rate table
//! - Budget evaluation over a growing cost ledger
//! - Executor round trips through the worker pool

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;

use prometheus_task_governor::budget::{BudgetPeriod, CostTracker, NewBudgetRule, RateTable};
use prometheus_task_governor::config::{BudgetConfig, ExecutorConfig};
use prometheus_task_governor::core::{
    work_fn, Completion, ExecutionLedger, TaskExecutor, TaskFault, TaskRequest,
};
use prometheus_task_governor::util::serde::{ExecutionFilter, Scope};
use rust_decimal::Decimal;
use serde_json::Value;

// ============================================================================
// Ledger Benchmarks
// ============================================================================

fn bench_ledger_lifecycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("ledger_start_complete");

    for size in [100_u64, 1_000, 10_000] {
        group.throughput(Throughput::Elements(size));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let ledger = ExecutionLedger::new(1_000);
                for i in 0..size {
                    let id = format!("bench-{i}");
                    ledger.start(&id, "bench", Scope::global(), Value::Null).unwrap();
                    let completion = if i % 5 == 0 {
                        Completion::failed(TaskFault::new("bench", "synthetic"))
                    } else {
                        Completion::succeeded(None)
                    };
                    black_box(ledger.complete(&id, completion));
                }
                black_box(ledger.metrics(None));
            });
        });
    }
    group.finish();
}

fn bench_ledger_history_scan(c: &mut Criterion) {
    let ledger = ExecutionLedger::new(1_000);
    for i in 0..1_000 {
        let id = format!("scan-{i}");
        let scope = Scope::organization(if i % 2 == 0 { "org_A" } else { "org_B" });
        ledger.start(&id, "scan", scope, Value::Null).unwrap();
        ledger.complete(&id, Completion::succeeded(None));
    }
    let filter = ExecutionFilter::organization("org_A");

    c.bench_function("ledger_list_history_filtered", |b| {
        b.iter(|| black_box(ledger.list_history(&filter, 100)));
    });
}

// ============================================================================
// Budget Benchmarks
// ============================================================================

fn bench_record_cost(c: &mut Criterion) {
    let tracker = CostTracker::new(RateTable::from_config(&BudgetConfig::default()));
    let scope = Scope::organization("org_A");

    c.bench_function("record_cost_builtin_rate", |b| {
        b.iter(|| black_box(tracker.record_cost("openai", "gpt-4o", &scope, 1_200, 350)));
    });
}

fn bench_evaluate_rules(c: &mut Criterion) {
    let mut group = c.benchmark_group("evaluate_all_rules");

    for entries in [1_000_u64, 10_000] {
        let tracker = CostTracker::new(RateTable::from_config(&BudgetConfig::default()));
        for period in [BudgetPeriod::Daily, BudgetPeriod::Weekly, BudgetPeriod::Monthly] {
            tracker
                .create_budget_rule(
                    NewBudgetRule::new(period.as_str(), period, Decimal::new(1_000_000, 0))
                        .with_thresholds([Decimal::new(5, 1), Decimal::new(9, 1), Decimal::ONE]),
                )
                .unwrap();
        }
        for _ in 0..entries {
            tracker.record_cost("anthropic", "claude-3-haiku", &Scope::global(), 800, 200);
        }

        group.throughput(Throughput::Elements(entries));
        group.bench_with_input(BenchmarkId::from_parameter(entries), &entries, |b, _| {
            b.iter(|| black_box(tracker.evaluate_all_rules()));
        });
    }
    group.finish();
}

// ============================================================================
// Executor Benchmarks
// ============================================================================

fn bench_executor_round_trip(c: &mut Criterion) {
    let config = ExecutorConfig::new()
        .with_worker_count(4)
        .with_max_in_flight(4)
        .with_default_timeout(Duration::from_secs(5));
    let executor = TaskExecutor::new(config, Arc::new(ExecutionLedger::new(1_000))).unwrap();
    let work = work_fn(|input, _| Ok(input));

    c.bench_function("executor_execute_noop", |b| {
        b.iter(|| black_box(executor.execute(TaskRequest::new("noop", Arc::clone(&work)))));
    });

    let batch: Vec<TaskRequest> = (0..64)
        .map(|_| TaskRequest::new("noop", Arc::clone(&work)))
        .collect();
    c.bench_function("executor_execute_batch_64", |b| {
        b.iter(|| black_box(executor.execute_batch(batch.clone(), 4)));
    });

    executor.shutdown(true);
}

// ============================================================================
// Benchmark Groups
// ============================================================================

criterion_group!(ledger_benches, bench_ledger_lifecycle, bench_ledger_history_scan);

criterion_group!(budget_benches, bench_record_cost, bench_evaluate_rules);

criterion_group!(executor_benches, bench_executor_round_trip);

criterion_main!(ledger_benches, budget_benches, executor_benches);
