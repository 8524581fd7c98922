//! # Core
//!
//! Attachment model, kernel backend abstraction and the resolve pipeline
//! turning kernel events into analysis records.

pub(crate) mod bpf;
pub(crate) mod error;
pub(crate) mod inspect;
pub(crate) mod probe;
pub(crate) mod resolve;
