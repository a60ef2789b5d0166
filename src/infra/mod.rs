//! Storage backends for execution snapshots and cost state.

pub mod cost;
pub mod execution;

pub use cost::{InMemoryCostStore, JsonlCostStore};
pub use execution::{InMemoryExecutionStore, JsonlExecutionStore, TimeWindow};
