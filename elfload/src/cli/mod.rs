//! # Cli
//!
//! Command line interface: main options and subcommands.

// Re-export cli.rs
#[allow(clippy::module_inception)]
pub(crate) mod cli;
pub(crate) use cli::*;
