//! # Modules
//!
//! Catalogue of the monitor modules. Each one bundles a probe program, the
//! kernel events it attaches to and the tables it writes to, alongside the
//! logic to decode the table payloads.

// Re-export module.rs
#[allow(clippy::module_inception)]
pub(crate) mod module;
pub(crate) use module::*;

pub(crate) mod exec;
pub(crate) mod mmap;
pub(crate) mod open;
