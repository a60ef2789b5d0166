//! Construction of governor components from configuration.

pub mod governor_builder;

pub use governor_builder::{build_executor, build_ledger, build_tracker, GovernorBuilder};
