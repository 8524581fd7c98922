//! # Cli
//!
//! Provides cli commands to perform some post-processing.

pub(crate) mod print;
pub(crate) use print::*;
