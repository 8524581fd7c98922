//! # Launch
//!
//! Starts the traced process frozen, so probes can be attached before it
//! runs a single instruction of the target binary.

pub(crate) mod process;
pub(crate) use process::*;
