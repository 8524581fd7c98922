//! # Resolve
//!
//! Turns raw kernel payloads into analysis records. Each monitor module
//! registers the tables its probes write to; the resolve loop then drains all
//! of them concurrently, runs the payloads through the enhancer pipeline and
//! forwards the resulting records.

pub(crate) mod enhancer;
pub(crate) use enhancer::*;

// Re-export module.rs
#[allow(clippy::module_inception)]
pub(crate) mod module;
pub(crate) use module::*;

pub(crate) mod table;
pub(crate) use table::*;

pub(crate) mod wait;
