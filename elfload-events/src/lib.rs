//! # elfload events
//!
//! This crate contains the definition of the analysis record emitted by elfload
//! as well as some ancillary helpers to store, read back and display records.

pub mod record;
pub use record::*;

pub mod display;
pub use display::*;

pub mod file;
