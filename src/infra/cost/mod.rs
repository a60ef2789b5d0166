//! Cost, rule, and alert stores.

pub mod jsonl;
pub mod memory;

pub use jsonl::JsonlCostStore;
pub use memory::InMemoryCostStore;
