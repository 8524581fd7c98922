//! # Open
//!
//! Reports the files opened by the traced process, e.g. the shared libraries
//! and configuration files the dynamic loader looks up.

// Re-export open.rs
#[allow(clippy::module_inception)]
pub(crate) mod open;
pub(crate) use open::*;
