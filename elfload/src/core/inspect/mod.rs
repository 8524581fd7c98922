//! # Inspection helpers
//!
//! Provides support for inspecting the running kernel.

pub(crate) mod kernel;
pub(crate) use kernel::*;
