//! Subcommand implementations

pub mod alerts;
pub mod allocations;
pub mod drift;
pub mod status;
