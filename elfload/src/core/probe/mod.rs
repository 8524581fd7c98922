//! # Probes
//!
//! Describes where probe programs are attached (events), how they are loaded
//! and attached (actions), and the monitors bundling them with their source.

// Re-export probe.rs
#[allow(clippy::module_inception)]
pub(crate) mod probe;
pub(crate) use probe::*;

pub(crate) mod kernel;

pub(crate) mod monitor;
pub(crate) use monitor::*;
