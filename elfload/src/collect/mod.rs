//! # Collect
//!
//! Runs the traced binary under the monitors and collects the resulting
//! records.

pub(crate) mod cli;

// Re-export collector.rs
pub(crate) mod collector;
pub(crate) use collector::*;
