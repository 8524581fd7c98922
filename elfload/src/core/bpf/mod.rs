//! # Kernel backend
//!
//! Abstraction over the kernel facilities used to compile, load and attach
//! probe programs, and to retrieve their output tables. The libbpf backend
//! is the one used at runtime.

pub(crate) mod backend;
pub(crate) use backend::*;

pub(crate) mod libbpf;

#[cfg(test)]
pub(crate) mod fake;
