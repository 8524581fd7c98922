//! # Mmap
//!
//! Reports the memory mappings requested by the traced process, which
//! include the ones made by the dynamic loader to map the shared libraries.

// Re-export mmap.rs
#[allow(clippy::module_inception)]
pub(crate) mod mmap;
pub(crate) use mmap::*;
