//! # Inspect
//!
//! Inspect subcommand, reporting whether the running kernel can be used to
//! collect ELF loading events.

#[allow(clippy::module_inception)]
pub(crate) mod inspect;
pub(crate) use inspect::*;
