//! # Prometheus Task Governor
//!
//! Concurrency-bounded task execution with a lifecycle ledger and budget
//! governance for AI agent workloads.
//!
//! The crate is three cooperating subsystems:
//!
//! - **Executor**: runs caller-supplied units of work on dedicated worker
//!   threads behind an admission gate, with a per-task timeout. A fault or
//!   panic inside a unit of work becomes a failed result, never a crash.
//! - **Execution ledger**: the authoritative record of what is running and
//!   what ran recently, with O(1) aggregate counters per task class.
//! - **Budget governance**: prices metered usage against a rate table,
//!   evaluates spending rules on a background cadence, and raises
//!   de-duplicated threshold alerts.
//!
//! ## Core Problem Solved
//!
//! LLM-backed tasks are slow, expensive, and occasionally hang:
//!
//! - **Bounded concurrency**: worker count and in-flight admissions are
//!   separate knobs, so a batch can run under a tighter cap than the pool
//! - **Timeouts without cooperation**: a stuck unit of work is detached and
//!   its late result discarded; the caller gets `TimedOut` on time
//! - **Spend visibility**: every billed call is priced at write time, and
//!   budgets alert once per threshold per period
//!
//! ## Running tasks
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use prometheus_task_governor::config::ExecutorConfig;
//! use prometheus_task_governor::core::{work_fn, ExecutionLedger, TaskExecutor, TaskRequest};
//!
//! let ledger = Arc::new(ExecutionLedger::new(1000));
//! let executor = TaskExecutor::new(
//!     ExecutorConfig::new().with_worker_count(4).with_max_in_flight(4),
//!     Arc::clone(&ledger),
//! )?;
//!
//! let work = work_fn(|input, _scope| Ok(input));
//! let result = executor.execute(TaskRequest::new("forecast", work));
//! assert!(result.success);
//! executor.shutdown(true);
//! ```
//!
//! ## Budgets
//!
//! ```rust,ignore
//! use prometheus_task_governor::budget::{BudgetPeriod, BudgetScope, CostTracker, NewBudgetRule, RateTable};
//! use rust_decimal::Decimal;
//!
//! let tracker = CostTracker::new(RateTable::from_config(&Default::default()));
//! tracker.create_budget_rule(
//!     NewBudgetRule::new("org A daily", BudgetPeriod::Daily, Decimal::new(25, 0))
//!         .with_thresholds([Decimal::new(5, 1), Decimal::ONE])
//!         .with_scope(BudgetScope::Organization("org_A".into())),
//! )?;
//! let alerts = tracker.evaluate_all_rules();
//! ```
//!
//! A process normally builds one [`runtime::GovernorContext`] at startup and
//! passes it to everything that needs these components.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Execution core: task model, worker pool, admission gate, and ledger.
pub mod core;
/// Cost metering, budget rules, alerts, and background evaluation.
pub mod budget;
/// Configuration models for the executor, ledger, and budgets.
pub mod config;
/// Builders to construct governor components from configuration.
pub mod builders;
/// Storage backends for execution snapshots and cost state.
pub mod infra;
/// Process context and operational API surface.
pub mod runtime;
/// Shared utilities.
pub mod util;
