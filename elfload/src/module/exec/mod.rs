//! # Exec
//!
//! Watches the ELF loader (load_elf_binary) for the traced process: when it
//! starts loading the target binary and how it went. The target binary is
//! also statically inspected before being run.

// Re-export exec.rs
#[allow(clippy::module_inception)]
pub(crate) mod exec;
pub(crate) use exec::*;

pub(crate) mod elf;
