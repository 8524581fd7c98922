//! # Kernel probes
//!
//! Actions attaching probe programs to kernel functions.

pub(crate) mod kprobe;
pub(crate) use kprobe::*;

pub(crate) mod kretprobe;
pub(crate) use kretprobe::*;
