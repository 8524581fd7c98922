//! # Process
//!
//! Process provides utilities for commands to perform record processing.

pub(crate) mod cli;

pub(crate) mod display;
